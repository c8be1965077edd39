/*!
 * Monitoring
 * Tracing setup and scenario spans
 */

mod tracer;

pub use tracer::{init_tracing, span_scenario, try_init_tracing, ScenarioSpan, TRACE_JSON_ENV};
