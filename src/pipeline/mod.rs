/*!
 * Pipeline Module
 * Bounded producer/consumer queue with poison-pill shutdown, and a runner
 * that drives it across threads
 */

mod queue;
mod runner;

pub use queue::{Message, ShutdownReport, ShutdownableQueue};
pub use runner::{Pipeline, PipelineConfig, PipelineReport};
