/*!
 * Deadlock Escape Tests
 *
 * Two workers take the same two locks in opposite orders. Once both hold
 * their first lock they are deadlocked; cancelling one must let the other
 * finish and leave the cancelled one holding nothing.
 */

use coord_kit::core::sync::{
    run_with_both, CancellationToken, InterruptibleLock, LockFairness, OrderedLockPair,
};
use coord_kit::SyncError;
use pretty_assertions::assert_eq;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

struct Outcome {
    result: Result<(), SyncError>,
    holds_x: bool,
    holds_y: bool,
}

fn crossed_workers(fairness: LockFairness) -> (Outcome, Outcome, u32, u32) {
    let lock_x = InterruptibleLock::with_fairness(0u32, fairness).named("x");
    let lock_y = InterruptibleLock::with_fairness(0u32, fairness).named("y");
    let token_a = CancellationToken::new();
    let token_b = CancellationToken::new();
    let both_hold_first = Barrier::new(2);

    let (a, b) = thread::scope(|scope| {
        let worker = |pair: OrderedLockPair<'_, u32, u32>, token: &CancellationToken| {
            let result = pair.run_staged(
                token,
                |_| {
                    both_hold_first.wait();
                },
                |first, second| {
                    *first += 1;
                    *second += 1;
                },
            );
            Outcome {
                result,
                holds_x: lock_x.is_held_by_current_thread(),
                holds_y: lock_y.is_held_by_current_thread(),
            }
        };

        let pair = OrderedLockPair::new(&lock_x, &lock_y);
        let (token_a, token_b) = (&token_a, &token_b);
        let a = scope.spawn(move || worker(pair, token_a));
        let b = scope.spawn(move || worker(pair.reversed(), token_b));

        // Each holds its first lock and is parked on its second
        while !(lock_x.is_locked()
            && lock_y.is_locked()
            && lock_x.queue_length() > 0
            && lock_y.queue_length() > 0)
        {
            thread::sleep(Duration::from_millis(1));
        }
        token_b.cancel();

        (a.join().unwrap(), b.join().unwrap())
    });

    let x = *lock_x.lock().unwrap();
    let y = *lock_y.lock().unwrap();
    (a, b, x, y)
}

#[test]
fn test_cancelling_one_worker_breaks_deadlock() {
    let (a, b, x, y) = crossed_workers(LockFairness::Barging);

    assert_eq!(a.result, Ok(()));
    assert_eq!(b.result, Err(SyncError::Cancelled));
    assert!(!a.holds_x && !a.holds_y);
    assert!(!b.holds_x && !b.holds_y);
    assert_eq!((x, y), (1, 1));
}

#[test]
fn test_deadlock_escape_with_fair_locks() {
    let (a, b, x, y) = crossed_workers(LockFairness::Fair);

    assert_eq!(a.result, Ok(()));
    assert!(b.result.as_ref().is_err_and(SyncError::is_cancelled));
    assert!(!b.holds_x && !b.holds_y);
    assert_eq!((x, y), (1, 1));
}

#[test]
fn test_bounded_wait_also_escapes() {
    let lock_x = InterruptibleLock::new(());
    let lock_y = InterruptibleLock::new(());
    let _held = lock_y.lock().unwrap();

    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let first = lock_x.lock().unwrap();
            let second = lock_y.lock_timeout(Duration::from_millis(30), &CancellationToken::new());
            let timed_out = matches!(second, Err(SyncError::Timeout(_)));
            drop(first);
            timed_out
        });
        assert!(worker.join().unwrap());
    });

    assert!(!lock_x.is_locked());
}

#[test]
fn test_same_order_never_deadlocks() {
    let lock_x = InterruptibleLock::new(0u64);
    let lock_y = InterruptibleLock::new(0u64);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let token = CancellationToken::new();
                for _ in 0..250 {
                    run_with_both(&lock_x, &lock_y, &token, |x, y| {
                        *x += 1;
                        *y += 2;
                    })
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(*lock_x.lock().unwrap(), 1000);
    assert_eq!(*lock_y.lock().unwrap(), 2000);
}
