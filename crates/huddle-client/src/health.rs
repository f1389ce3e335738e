//! ICE health tracking per peer

use std::collections::HashMap;

use uuid::Uuid;

use crate::peer::IceConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    /// Offer again with fresh ICE credentials
    RestartIce { attempt: u32 },
    /// Restarts are exhausted; the peer is unreachable
    GiveUp,
}

/// Decides when a failed ICE connection is restarted and when it is
/// abandoned. `Disconnected` is left alone since it often recovers by
/// itself; `Failed` asks for a restart, up to `max_restarts` in a row.
/// Only restarts reported through [`ConnectionHealthMonitor::restart_sent`]
/// count against that budget.
#[derive(Debug)]
pub struct ConnectionHealthMonitor {
    max_restarts: u32,
    restarts: HashMap<Uuid, u32>,
}

impl ConnectionHealthMonitor {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            restarts: HashMap::new(),
        }
    }

    pub fn observe(&mut self, peer_id: Uuid, state: IceConnectionState) -> HealthAction {
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if self.restarts.remove(&peer_id).is_some() {
                    tracing::info!("ICE recovered for {}", peer_id);
                }
                HealthAction::None
            }
            IceConnectionState::Failed => {
                let sent = self.restarts.get(&peer_id).copied().unwrap_or(0);
                if sent >= self.max_restarts {
                    tracing::warn!("ICE failed for {} after {} restarts", peer_id, sent);
                    self.restarts.remove(&peer_id);
                    return HealthAction::GiveUp;
                }
                let attempt = sent + 1;
                tracing::warn!(
                    "ICE failed for {}, restarting ({}/{})",
                    peer_id,
                    attempt,
                    self.max_restarts
                );
                HealthAction::RestartIce { attempt }
            }
            IceConnectionState::Disconnected => {
                tracing::debug!("ICE disconnected for {}, waiting for recovery", peer_id);
                HealthAction::None
            }
            _ => HealthAction::None,
        }
    }

    /// A restart offer reached the wire
    pub fn restart_sent(&mut self, peer_id: Uuid) {
        *self.restarts.entry(peer_id).or_insert(0) += 1;
    }

    pub fn forget(&mut self, peer_id: Uuid) {
        self.restarts.remove(&peer_id);
    }

    pub fn clear(&mut self) {
        self.restarts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_bounded() {
        let mut monitor = ConnectionHealthMonitor::new(2);
        let peer = Uuid::new_v4();

        assert_eq!(
            monitor.observe(peer, IceConnectionState::Failed),
            HealthAction::RestartIce { attempt: 1 }
        );
        monitor.restart_sent(peer);
        assert_eq!(
            monitor.observe(peer, IceConnectionState::Failed),
            HealthAction::RestartIce { attempt: 2 }
        );
        monitor.restart_sent(peer);
        assert_eq!(monitor.observe(peer, IceConnectionState::Failed), HealthAction::GiveUp);
    }

    #[test]
    fn test_unsent_restarts_are_not_counted() {
        let mut monitor = ConnectionHealthMonitor::new(1);
        let peer = Uuid::new_v4();

        for _ in 0..5 {
            assert_eq!(
                monitor.observe(peer, IceConnectionState::Failed),
                HealthAction::RestartIce { attempt: 1 }
            );
        }
        monitor.restart_sent(peer);
        assert_eq!(monitor.observe(peer, IceConnectionState::Failed), HealthAction::GiveUp);
    }

    #[test]
    fn test_recovery_resets_the_count() {
        let mut monitor = ConnectionHealthMonitor::new(1);
        let peer = Uuid::new_v4();

        assert_eq!(
            monitor.observe(peer, IceConnectionState::Failed),
            HealthAction::RestartIce { attempt: 1 }
        );
        monitor.restart_sent(peer);
        assert_eq!(monitor.observe(peer, IceConnectionState::Connected), HealthAction::None);
        assert_eq!(
            monitor.observe(peer, IceConnectionState::Failed),
            HealthAction::RestartIce { attempt: 1 }
        );
    }

    #[test]
    fn test_disconnected_waits() {
        let mut monitor = ConnectionHealthMonitor::new(3);
        let peer = Uuid::new_v4();

        assert_eq!(monitor.observe(peer, IceConnectionState::Disconnected), HealthAction::None);
        assert_eq!(monitor.observe(peer, IceConnectionState::Checking), HealthAction::None);
    }

    #[test]
    fn test_zero_restarts_gives_up_immediately() {
        let mut monitor = ConnectionHealthMonitor::new(0);
        assert_eq!(
            monitor.observe(Uuid::new_v4(), IceConnectionState::Failed),
            HealthAction::GiveUp
        );
    }
}
