//! Liveness: periodic pings to quiet neighbors, eviction on timeout.
//!
//! Per neighbor: `CONNECTED -> PING_SENT(timer) -> CONNECTED` when any sign
//! of life arrives, or `PING_SENT(timer) -> EVICTED` when the timer fires.
//!
//! The node never sleeps. Arming a timeout queues a [`TimerRequest`]; whoever
//! drives the node schedules it and calls `on_timer` with the token when it
//! expires. Refreshing a vertex invalidates its token, so a late fire is a
//! no-op.

use crate::message::{decode_record, encode_record, Ping, PingType};
use crate::node::MeshNode;
use crate::topology::VertexId;
use crate::transport::{Channel, PeerHandle};
use crate::MeshError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Identifies one armed timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// "Call `on_timer(token)` after this long"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub token: TimerToken,
    pub after: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct PingTimers {
    next_token: u64,
    armed: HashMap<VertexId, TimerToken>,
    requests: Vec<TimerRequest>,
}

impl PingTimers {
    pub(crate) fn arm(&mut self, vertex: &VertexId, after: Duration) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed.insert(vertex.clone(), token);
        self.requests.push(TimerRequest { token, after });
        token
    }

    /// Idempotent
    pub(crate) fn cancel(&mut self, vertex: &VertexId) -> bool {
        self.armed.remove(vertex).is_some()
    }

    pub(crate) fn is_armed(&self, vertex: &VertexId) -> bool {
        self.armed.contains_key(vertex)
    }

    /// Vertex whose currently armed timer carries `token`, disarming it
    pub(crate) fn fire(&mut self, token: TimerToken) -> Option<VertexId> {
        let vertex = self
            .armed
            .iter()
            .find(|(_, armed)| **armed == token)
            .map(|(vertex, _)| vertex.clone())?;
        self.armed.remove(&vertex);
        Some(vertex)
    }

    pub(crate) fn drain_requests(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.requests)
    }
}

impl MeshNode {
    /// Ping every neighbor that has been quiet for longer than
    /// `last_connection_interval_secs` and arm its timeout.
    pub fn run_liveness_sweep(&mut self, now: u64) {
        self.track_changes(|node| node.liveness_sweep(now));
    }

    fn liveness_sweep(&mut self, now: u64) {
        let interval = self.config().last_connection_interval_ms();
        let timeout = self.config().ping_timeout();

        let quiet: Vec<VertexId> = self
            .store
            .neighbors()
            .into_iter()
            .filter(|id| !self.ping_timers.is_armed(id))
            .filter(|id| {
                self.store
                    .vertex(id)
                    .map_or(false, |v| now.saturating_sub(v.last_known_ping) > interval)
            })
            .collect();

        for id in quiet {
            let ping = Ping::initial(self.self_id().as_str(), id.as_str());
            let sent = encode_record(&ping)
                .map_err(|e| MeshError::Encode(e.to_string()))
                .and_then(|bytes| self.send_to_vertex(&id, Channel::Ping, &bytes));
            if let Err(e) = sent {
                debug!("Ping to {} not sent: {}", id, e);
            }
            // Armed even when the send failed
            let token = self.ping_timers.arm(&id, timeout);
            debug!("Ping timeout {:?} armed for {}", token, id);
        }
    }

    /// Handle a ping record from the vertex bound to the delivering link
    pub(crate) fn on_ping(&mut self, from: &VertexId, data: &[u8], now: u64) -> Result<(), MeshError> {
        let ping: Ping =
            decode_record(data).map_err(|e| MeshError::Decode(format!("ping: {}", e)))?;

        match ping.ping_type {
            PingType::Initial => {
                if ping.sender != from.as_str() {
                    return Err(MeshError::UnknownVertex(ping.sender));
                }
                self.refresh_liveness(from, now);
                let bytes = encode_record(&ping.into_response())
                    .map_err(|e| MeshError::Encode(e.to_string()))?;
                self.send_to_vertex(from, Channel::Ping, &bytes)
            }
            PingType::Response => {
                let probed = VertexId::from_full_name(ping.receiver);
                if !self.store.contains(&probed) {
                    return Err(MeshError::UnknownVertex(probed.to_string()));
                }
                self.refresh_liveness(&probed, now);
                Ok(())
            }
        }
    }

    /// Record a sign of life and disarm any pending timeout
    pub(crate) fn refresh_liveness(&mut self, id: &VertexId, now: u64) {
        if let Some(vertex) = self.store.vertex_mut(id) {
            vertex.last_known_ping = now;
        }
        if self.ping_timers.cancel(id) {
            debug!("Ping timeout for {} cancelled", id);
        }
    }

    /// A previously requested timer expired. Unknown tokens are ignored.
    pub fn on_timer(&mut self, token: TimerToken, now: u64) {
        let Some(id) = self.ping_timers.fire(token) else {
            debug!("Stale timer {:?} ignored", token);
            return;
        };
        info!("Ping to {} timed out, evicting", id);
        self.track_changes(|node| node.evict(&id, now, true));
    }

    /// The transport reported a dropped link
    pub(crate) fn on_link_lost(&mut self, peer: &PeerHandle, now: u64) {
        match self.links.get(peer).cloned() {
            Some(id) => {
                info!("Link to {} lost, evicting", id);
                self.evict(&id, now, false);
            }
            None => debug!("Link {} lost before handshake", peer),
        }
    }

    /// Drop the direct link to `id` and prune whatever became unreachable
    pub(crate) fn evict(&mut self, id: &VertexId, now: u64, disconnect: bool) {
        let link = self
            .store
            .vertex_mut(id)
            .map(|vertex| std::mem::take(&mut vertex.link))
            .unwrap_or_default();
        if let Some(handle) = link.handle() {
            self.links.remove(handle);
            if disconnect {
                self.transport().disconnect(handle);
            }
        }

        let self_id = self.self_id().clone();
        if self.store.remove_edge(&self_id, id) {
            self.store.mark_local_update(now);
        }
        self.ping_timers.cancel(id);
        self.exchanges.forget(id);

        for removed in self.store.remove_vertex(id) {
            self.ping_timers.cancel(&removed);
            self.exchanges.forget(&removed);
            self.links.retain(|_, bound| bound != &removed);
        }

        if self.store.contains(id) {
            debug!("{} still reachable through other vertices after eviction", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> VertexId {
        VertexId::from_full_name(format!("{}#x", name))
    }

    #[test]
    fn test_timer_tokens_are_unique() {
        let mut timers = PingTimers::default();
        let a = timers.arm(&id("a"), Duration::from_secs(10));
        let b = timers.arm(&id("b"), Duration::from_secs(10));
        assert_ne!(a, b);

        let requests = timers.drain_requests();
        assert_eq!(requests.len(), 2);
        assert!(timers.drain_requests().is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timers = PingTimers::default();
        let token = timers.arm(&id("a"), Duration::from_secs(10));

        assert!(timers.cancel(&id("a")));
        assert!(!timers.cancel(&id("a")));
        assert_eq!(timers.fire(token), None);
    }

    #[test]
    fn test_rearm_invalidates_old_token() {
        let mut timers = PingTimers::default();
        let old = timers.arm(&id("a"), Duration::from_secs(10));
        timers.cancel(&id("a"));
        let new = timers.arm(&id("a"), Duration::from_secs(10));

        assert_eq!(timers.fire(old), None);
        assert_eq!(timers.fire(new), Some(id("a")));
        assert!(!timers.is_armed(&id("a")));
    }
}
