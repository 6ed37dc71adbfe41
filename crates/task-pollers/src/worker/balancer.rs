//! Sticky vs. regular queue selection for decision polls
//!
//! Rules, evaluated under one lock per poll:
//! 1. Sticky execution disabled: always poll the regular queue.
//! 2. Sticky backlog reported: poll the sticky queue.
//! 3. Otherwise poll whichever queue has fewer polls in flight, preferring
//!    sticky on a tie.

use std::sync::Arc;

use parking_lot::Mutex;

/// Which decision queue a poll targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// This worker's own queue
    Sticky,
    /// The queue shared by every worker
    Regular,
}

/// Snapshot of the balancer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalancerState {
    pub pending_regular: usize,
    pub pending_sticky: usize,
    pub sticky_backlog: i64,
}

/// Balances decision polls between the sticky and regular queues
#[derive(Debug, Clone)]
pub struct PollBalancer {
    state: Arc<Mutex<BalancerState>>,
    sticky_enabled: bool,
}

impl PollBalancer {
    pub fn new(sticky_enabled: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(BalancerState::default())),
            sticky_enabled,
        }
    }

    pub fn is_sticky_enabled(&self) -> bool {
        self.sticky_enabled
    }

    /// Choose a queue and count the poll as in flight
    ///
    /// The poll stays counted until the returned permit is dropped.
    pub fn acquire(&self) -> PollPermit {
        if !self.sticky_enabled {
            return PollPermit {
                state: None,
                kind: QueueKind::Regular,
            };
        }

        let mut state = self.state.lock();
        let kind = if state.sticky_backlog > 0 || state.pending_sticky <= state.pending_regular {
            state.pending_sticky += 1;
            QueueKind::Sticky
        } else {
            state.pending_regular += 1;
            QueueKind::Regular
        };

        PollPermit {
            state: Some(Arc::clone(&self.state)),
            kind,
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> BalancerState {
        *self.state.lock()
    }
}

/// An in-flight decision poll
///
/// Dropping the permit releases the poll, whether it succeeded, failed,
/// returned nothing or was abandoned mid-flight.
#[derive(Debug)]
pub struct PollPermit {
    state: Option<Arc<Mutex<BalancerState>>>,
    kind: QueueKind,
}

impl PollPermit {
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_sticky(&self) -> bool {
        self.kind == QueueKind::Sticky
    }

    /// Record the backlog hint of the poll's response
    ///
    /// Only sticky polls carry a backlog signal; for regular polls this
    /// does nothing.
    pub fn update_backlog(&self, backlog_count_hint: i64) {
        if let (Some(state), QueueKind::Sticky) = (&self.state, self.kind) {
            state.lock().sticky_backlog = backlog_count_hint.max(0);
        }
    }
}

impl Drop for PollPermit {
    fn drop(&mut self) {
        let Some(state) = &self.state else {
            return;
        };

        let mut state = state.lock();
        let pending = match self.kind {
            QueueKind::Sticky => &mut state.pending_sticky,
            QueueKind::Regular => &mut state.pending_regular,
        };
        *pending = pending.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_always_regular_and_uncounted() {
        let balancer = PollBalancer::new(false);

        let a = balancer.acquire();
        let b = balancer.acquire();

        assert_eq!(a.kind(), QueueKind::Regular);
        assert_eq!(b.kind(), QueueKind::Regular);
        a.update_backlog(10);
        assert_eq!(balancer.snapshot(), BalancerState::default());
    }

    #[test]
    fn test_tie_prefers_sticky() {
        let balancer = PollBalancer::new(true);
        assert_eq!(balancer.acquire().kind(), QueueKind::Sticky);
    }

    #[test]
    fn test_alternates_without_backlog() {
        let balancer = PollBalancer::new(true);

        let first = balancer.acquire();
        let second = balancer.acquire();
        let third = balancer.acquire();

        assert_eq!(first.kind(), QueueKind::Sticky);
        assert_eq!(second.kind(), QueueKind::Regular);
        assert_eq!(third.kind(), QueueKind::Sticky);
        assert_eq!(
            balancer.snapshot(),
            BalancerState {
                pending_regular: 1,
                pending_sticky: 2,
                sticky_backlog: 0,
            }
        );
    }

    #[test]
    fn test_backlog_forces_sticky() {
        let balancer = PollBalancer::new(true);

        let sticky = balancer.acquire();
        sticky.update_backlog(3);

        // pending_sticky (1) > pending_regular (0) but the backlog wins
        let next = balancer.acquire();
        assert_eq!(next.kind(), QueueKind::Sticky);
        assert_eq!(balancer.snapshot().sticky_backlog, 3);
    }

    #[test]
    fn test_regular_poll_never_touches_backlog() {
        let balancer = PollBalancer::new(true);

        let sticky = balancer.acquire();
        sticky.update_backlog(5);
        drop(sticky);

        let _first = balancer.acquire();
        let _second = balancer.acquire();
        let regular = {
            // Clear the backlog so the counters decide
            let clear = balancer.acquire();
            clear.update_backlog(0);
            drop(clear);
            balancer.acquire()
        };
        assert_eq!(regular.kind(), QueueKind::Regular);

        regular.update_backlog(99);
        assert_eq!(balancer.snapshot().sticky_backlog, 0);
    }

    #[test]
    fn test_drop_releases() {
        let balancer = PollBalancer::new(true);

        let permits: Vec<_> = (0..7).map(|_| balancer.acquire()).collect();
        let state = balancer.snapshot();
        assert_eq!(state.pending_sticky + state.pending_regular, 7);
        assert_eq!(state.pending_sticky, 4);
        assert_eq!(state.pending_regular, 3);

        drop(permits);
        assert_eq!(balancer.snapshot(), BalancerState::default());
    }
}
