//! Completion counting primitives
//!
//! 🚦 [`JoinGate`] counts down a fixed number of independent completions and
//! lets exactly one caller continue once all of them have arrived.
//! [`OnceFlag`] is the single-step variant used for one-shot sub-steps.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A flag that can be raised once and claimed by exactly one caller
#[derive(Debug, Default)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// A flag that starts raised
    pub fn raised() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Raise the flag; `true` only for the caller that raised it
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// 🚦 Counts down `parties` arrivals, then fires once
#[derive(Debug)]
pub struct JoinGate {
    remaining: AtomicUsize,
    fired: OnceFlag,
}

impl JoinGate {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
            fired: OnceFlag::new(),
        }
    }

    /// Record one completion.
    ///
    /// Returns `true` for exactly one caller: the arrival that brings the
    /// count to zero. Arrivals past zero are ignored.
    pub fn arrive(&self) -> bool {
        let previous =
            self.remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        matches!(previous, Ok(1)) && self.fired.claim()
    }

    /// Arrivals still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the gate has fired
    pub fn has_fired(&self) -> bool {
        self.fired.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fires_on_last_arrival() {
        let gate = JoinGate::new(3);
        assert!(!gate.arrive());
        assert!(!gate.arrive());
        assert_eq!(gate.remaining(), 1);
        assert!(!gate.has_fired());

        assert!(gate.arrive());
        assert!(gate.has_fired());

        // Extra arrivals never fire again
        assert!(!gate.arrive());
        assert_eq!(gate.remaining(), 0);
    }

    #[test]
    fn test_racing_arrivals_fire_once() {
        for _ in 0..100 {
            let gate = Arc::new(JoinGate::new(16));
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    let gate = gate.clone();
                    std::thread::spawn(move || gate.arrive())
                })
                .collect();

            let fired = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|fired| *fired)
                .count();
            assert_eq!(fired, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_tasks_fire_once() {
        let gate = Arc::new(JoinGate::new(3));
        let arrivals = (0..3).map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.arrive() })
        });

        let results = futures::future::join_all(arrivals).await;
        let fired = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_once_flag() {
        let flag = OnceFlag::new();
        assert!(!flag.is_set());
        assert!(flag.claim());
        assert!(!flag.claim());
        assert!(flag.is_set());

        let raised = OnceFlag::raised();
        assert!(raised.is_set());
        assert!(!raised.claim());
    }
}
