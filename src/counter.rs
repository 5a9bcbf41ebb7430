//! The process-wide shared counter.
//!
//! A single atomic cell mutated by every worker. Callers only get `add` and
//! `snapshot`; there is no load-then-store path that could lose updates.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Lock-free 64-bit signed counter shared by all reactors.
///
/// Arithmetic wraps on overflow, like the underlying `fetch_add`.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicI64,
}

impl SharedCounter {
    /// A zeroed counter behind an `Arc`, ready to hand to every reactor.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically add `delta` and return the value before the update.
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }

    /// Atomically subtract `delta` and return the value before the update.
    ///
    /// Exact modulo 2^64 for every operand, `i64::MIN` included.
    pub fn sub(&self, delta: i64) -> i64 {
        self.add(delta.wrapping_neg())
    }

    /// Current value.
    pub fn snapshot(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_returns_previous() {
        let counter = SharedCounter::shared();
        assert_eq!(counter.add(5), 0);
        assert_eq!(counter.sub(2), 5);
        assert_eq!(counter.add(5), 3);
        assert_eq!(counter.sub(2), 8);
        assert_eq!(counter.snapshot(), 6);
    }

    #[test]
    fn test_wrapping() {
        let counter = SharedCounter::shared();
        counter.add(i64::MAX);
        counter.add(1);
        assert_eq!(counter.snapshot(), i64::MIN);

        // Subtracting MIN is the same as adding MIN modulo 2^64
        let counter = SharedCounter::shared();
        counter.sub(i64::MIN);
        assert_eq!(counter.snapshot(), i64::MIN);
        counter.sub(i64::MIN);
        assert_eq!(counter.snapshot(), 0);
    }

    #[test]
    fn test_shared_starts_at_zero() {
        let counter = SharedCounter::shared();
        let other = Arc::clone(&counter);
        other.add(9);
        assert_eq!(counter.snapshot(), 9);
        assert_eq!(SharedCounter::default().snapshot(), 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let counter = SharedCounter::shared();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        if i % 2 == 0 {
                            counter.add(3);
                        } else {
                            counter.sub(1);
                        }
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(counter.snapshot(), 4 * 10_000 * 3 - 4 * 10_000);
    }
}
