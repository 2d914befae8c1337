//! Collapse concurrent invocations of an expensive, idempotent operation
//! (a cache reload) into a single execution shared by every caller that
//! arrives while it is running.
//!
//! ```
//! use resolver_cache_coalesce::Coalescer;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let coalescer = Coalescer::new();
//!
//! let c = Arc::clone(&counter);
//! let result: Result<u32, ()> = coalescer.run(|| {
//!     c.fetch_add(1, Ordering::SeqCst);
//!     Ok(42)
//! });
//! assert_eq!(result, Ok(42));
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//! ```

use std::sync::{Condvar, Mutex};

struct State<T, E> {
    in_flight: bool,
    epoch: u64,
    last_result: Option<Result<T, E>>,
}

/// A coalescing gate: at most one execution of the bound operation runs at
/// a time, and every caller present during that execution observes its
/// result rather than triggering one of their own.
///
/// Rearmed automatically once the in-flight execution returns: the next
/// `run()` call afterward starts a fresh execution rather than replaying a
/// stale cached result.
pub struct Coalescer<T, E> {
    state: Mutex<State<T, E>>,
    condvar: Condvar,
}

impl<T, E> Default for Coalescer<T, E>
where
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                in_flight: false,
                epoch: 0,
                last_result: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Run `thunk`, or wait for and share the result of an execution that
    /// is already in flight.
    pub fn run(&self, thunk: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if guard.in_flight {
            let target_epoch = guard.epoch;
            while guard.in_flight && guard.epoch == target_epoch {
                guard = self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
            }
            return guard
                .last_result
                .clone()
                .expect("in-flight execution completed without recording a result");
        }

        guard.in_flight = true;
        drop(guard);

        let result = thunk();

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.last_result = Some(result.clone());
        guard.in_flight = false;
        guard.epoch += 1;
        drop(guard);
        self.condvar.notify_all();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn ten_concurrent_calls_execute_thunk_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let coalescer = Arc::new(Coalescer::<u32, ()>::new());
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let coalescer = Arc::clone(&coalescer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coalescer.run(|| {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        // Give other waiters a chance to pile up behind us.
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(n)
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // every waiter observes the single executor's result
        assert!(results.iter().all(|r| *r == Ok(1)));

        let again = coalescer.run(|| Ok(counter.fetch_add(1, Ordering::SeqCst) + 1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(again, Ok(2));
    }

    // Property-based tests using proptest
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// However many threads call `run()` at once, the thunk executes
            /// exactly once per batch and every thread observes that one
            /// execution's result (spec §8: "ten concurrent run() calls
            /// increment exactly once", generalized to N).
            #[test]
            fn n_concurrent_calls_execute_thunk_exactly_once(n in 2usize..24) {
                let counter = AtomicU32::new(0);
                let coalescer = Coalescer::<u32, ()>::new();
                let barrier = std::sync::Barrier::new(n);

                let results: Vec<_> = thread::scope(|scope| {
                    let handles: Vec<_> = (0..n)
                        .map(|_| {
                            scope.spawn(|| {
                                barrier.wait();
                                coalescer.run(|| {
                                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                                    // Give other waiters a chance to pile up behind us.
                                    thread::sleep(std::time::Duration::from_millis(20));
                                    Ok(n)
                                })
                            })
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).collect()
                });

                prop_assert_eq!(counter.load(Ordering::SeqCst), 1);
                prop_assert!(results.iter().all(|r| *r == Ok(1)));
            }
        }
    }

    #[test]
    fn waiters_observe_the_executors_error() {
        let coalescer = Arc::new(Coalescer::<(), String>::new());
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coalescer = Arc::clone(&coalescer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coalescer.run(|| {
                        if i == 0 {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                        Err("boom".to_string())
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), Err("boom".to_string()));
        }
    }

    #[test]
    fn rearms_so_the_next_call_runs_again() {
        let counter = Arc::new(AtomicU32::new(0));
        let coalescer = Coalescer::<u32, ()>::new();

        for expected in 1..=3 {
            let c = Arc::clone(&counter);
            let result = coalescer.run(move || Ok(c.fetch_add(1, Ordering::SeqCst) + 1));
            assert_eq!(result, Ok(expected));
        }
    }
}
