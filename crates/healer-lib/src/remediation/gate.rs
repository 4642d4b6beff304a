//! Cluster-wide limit on concurrent drains

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared drain counter
///
/// Admission is a compare-and-increment against the caller's limit, so two
/// nodes racing for the last slot can never both get it.
#[derive(Debug, Default)]
pub struct DrainGate {
    active: AtomicUsize,
}

impl DrainGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a slot if fewer than `limit` are held
    pub fn try_acquire(self: &Arc<Self>, limit: usize) -> Option<DrainPermit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(DrainPermit {
                        gate: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Slot in the drain gate, released on drop
#[derive(Debug)]
pub struct DrainPermit {
    gate: Arc<DrainGate>,
}

impl Drop for DrainPermit {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced() {
        let gate = DrainGate::new();
        let first = gate.try_acquire(2);
        let second = gate.try_acquire(2);
        assert!(first.is_some() && second.is_some());
        assert!(gate.try_acquire(2).is_none());
        assert_eq!(gate.in_flight(), 2);

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.try_acquire(2).is_some());
    }

    #[test]
    fn test_limits_are_per_call() {
        let gate = DrainGate::new();
        let _held = gate.try_acquire(1).unwrap();
        assert!(gate.try_acquire(1).is_none());
        // a policy with a larger budget still sees the shared count
        assert!(gate.try_acquire(2).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_limit() {
        let gate = DrainGate::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let permit = gate.try_acquire(3);
                let observed = gate.in_flight();
                tokio::task::yield_now().await;
                (permit.is_some(), observed)
            }));
        }

        for handle in handles {
            let (_, observed) = handle.await.unwrap();
            assert!(observed <= 3);
        }
        assert_eq!(gate.in_flight(), 0);
    }
}
