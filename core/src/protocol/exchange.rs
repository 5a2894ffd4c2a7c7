//! Topology exchange: stop-and-wait transfer of snapshot segments.
//!
//! A snapshot is encoded, cut into segments of at most `max_segment_size`
//! bytes and sent one `ExchangePackage` at a time. The next segment leaves
//! only after the previous one is acknowledged, so each peer has at most one
//! unacknowledged segment per direction. Pending transfers idle for longer
//! than `pending_cleanup_secs` are dropped; a later request starts over.

use crate::events::{ExchangeDirection, MeshEvent};
use crate::message::{
    decode_record, encode_record, ExchangeAck, ExchangeEnvelope, ExchangePackage,
    ExchangeRequest, ExchangeType,
};
use crate::node::MeshNode;
use crate::topology::{TopologySnapshot, VertexId};
use crate::transport::{Channel, PeerHandle};
use crate::MeshError;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Split `data` into consecutive chunks of at most `max_size` bytes.
///
/// Empty input yields a single empty segment so that an exchange always has
/// at least one package to acknowledge.
pub fn split_into_segments(data: &[u8], max_size: usize) -> Vec<Vec<u8>> {
    if data.is_empty() || max_size == 0 {
        return vec![data.to_vec()];
    }
    data.chunks(max_size).map(|chunk| chunk.to_vec()).collect()
}

pub fn join_segments(segments: &[Vec<u8>]) -> Vec<u8> {
    segments.concat()
}

/// In-progress transfer with one peer in one direction
#[derive(Debug, Clone)]
pub(crate) struct PendingExchange {
    /// Outbound: every segment. Inbound: segments received so far.
    segments: Vec<Vec<u8>>,
    /// Outbound: number of the segment awaiting acknowledgement (1-based).
    /// Inbound: number of segments received in order.
    segments_processed: u32,
    total: u32,
    time_of_last_activity: u64,
    /// Outbound: graph version the snapshot was taken from
    graph_version: u64,
}

/// Read-only view of a pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeProgress {
    pub segments_processed: u32,
    pub total: u32,
    pub time_of_last_activity: u64,
}

impl From<&PendingExchange> for ExchangeProgress {
    fn from(pending: &PendingExchange) -> Self {
        Self {
            segments_processed: pending.segments_processed,
            total: pending.total,
            time_of_last_activity: pending.time_of_last_activity,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ExchangeTracker {
    outbound: HashMap<VertexId, PendingExchange>,
    inbound: HashMap<VertexId, PendingExchange>,
    /// Graph version of the last snapshot each peer acknowledged in full
    delivered: HashMap<VertexId, u64>,
}

impl ExchangeTracker {
    pub(crate) fn progress(
        &self,
        peer: &VertexId,
        direction: ExchangeDirection,
    ) -> Option<ExchangeProgress> {
        let map = match direction {
            ExchangeDirection::Outbound => &self.outbound,
            ExchangeDirection::Inbound => &self.inbound,
        };
        map.get(peer).map(ExchangeProgress::from)
    }

    /// Drop both directions for a peer
    pub(crate) fn forget(&mut self, peer: &VertexId) {
        self.outbound.remove(peer);
        self.inbound.remove(peer);
        self.delivered.remove(peer);
    }

    /// Remove entries idle for longer than `max_idle` ms; returns how many
    fn cleanup(&mut self, now: u64, max_idle: u64) -> usize {
        let before = self.outbound.len() + self.inbound.len();
        let fresh = |pending: &PendingExchange| {
            now.saturating_sub(pending.time_of_last_activity) <= max_idle
        };
        self.outbound.retain(|_, pending| fresh(pending));
        self.inbound.retain(|_, pending| fresh(pending));
        before - (self.outbound.len() + self.inbound.len())
    }
}

impl MeshNode {
    /// Send our full graph to `peer`, one acknowledged segment at a time
    pub fn initiate_exchange(&mut self, peer: &VertexId, now: u64) -> Result<(), MeshError> {
        let graph_version = self.store.graph_version();
        let bytes = self
            .store
            .snapshot()
            .encode()
            .map_err(|e| MeshError::Encode(e.to_string()))?;
        let segments = split_into_segments(&bytes, self.config().max_segment_size);
        let total = segments.len() as u32;

        info!(
            "Starting exchange with {}: {} bytes in {} segments",
            peer,
            bytes.len(),
            total
        );
        self.exchanges.outbound.insert(
            peer.clone(),
            PendingExchange {
                segments,
                segments_processed: 1,
                total,
                time_of_last_activity: now,
                graph_version,
            },
        );

        self.send_segment(peer, 1)
    }

    /// Ask `peer` for its graph
    pub(crate) fn request_exchange(&mut self, peer: &VertexId) -> Result<(), MeshError> {
        let last_update_received = self
            .store
            .vertex(peer)
            .ok_or_else(|| MeshError::UnknownVertex(peer.to_string()))?
            .last_exchange_date;
        debug!("Requesting exchange from {} (last: {:?})", peer, last_update_received);

        self.send_exchange_record(
            peer,
            ExchangeType::Request,
            &ExchangeRequest {
                last_update_received,
            },
        )
    }

    /// Decide whether a request from `peer` deserves a fresh exchange
    pub(crate) fn process_incoming_request(
        &mut self,
        peer: &VertexId,
        request: ExchangeRequest,
        now: u64,
    ) -> Result<(), MeshError> {
        if self.exchanges.outbound.contains_key(peer) {
            debug!("Exchange to {} already pending, request ignored", peer);
            return Err(MeshError::DuplicateExchange(peer.to_string()));
        }

        // Changes that came from the requester itself are never sent back
        let due = match (request.last_update_received, self.exchanges.delivered.get(peer)) {
            (None, _) => true,
            (Some(_), Some(&version)) => self.store.changed_since_version(version, peer),
            (Some(received), None) => self.store.changed_since(received, peer),
        };

        if due {
            self.initiate_exchange(peer, now)
        } else {
            debug!("{} already has our latest graph", peer);
            Ok(())
        }
    }

    pub(crate) fn handle_package(
        &mut self,
        peer: &VertexId,
        package: ExchangePackage,
        now: u64,
    ) -> Result<(), MeshError> {
        let total = package.package_total_count;
        let number = package.current_package_number;
        if total == 0 || number == 0 || number > total {
            return Err(MeshError::Decode(format!(
                "package {}/{} from {}",
                number, total, peer
            )));
        }

        let restart = match self.exchanges.inbound.get(peer) {
            None if number != 1 => {
                debug!("Package {} from {} without a transfer in progress", number, peer);
                return Ok(());
            }
            None => true,
            Some(pending) => number == 1 && (pending.segments_processed > 1 || pending.total != total),
        };
        if restart {
            self.exchanges.inbound.insert(
                peer.clone(),
                PendingExchange {
                    segments: Vec::new(),
                    segments_processed: 0,
                    total,
                    time_of_last_activity: now,
                    graph_version: 0,
                },
            );
        }

        let Some(pending) = self.exchanges.inbound.get_mut(peer) else {
            return Ok(());
        };
        if pending.total != total {
            debug!("Package from {} with mismatched total {}", peer, total);
            return Ok(());
        }
        if number <= pending.segments_processed {
            pending.time_of_last_activity = now;
            debug!("Duplicate package {} from {}, re-acknowledging", number, peer);
            return self.send_ack(peer, number);
        }
        if number != pending.segments_processed + 1 {
            debug!(
                "Out-of-order package {} from {} (expected {})",
                number,
                peer,
                pending.segments_processed + 1
            );
            return Ok(());
        }

        pending.segments.push(package.payload);
        pending.segments_processed = number;
        pending.time_of_last_activity = now;
        let complete = pending.segments_processed == pending.total;

        if let Err(e) = self.send_ack(peer, number) {
            debug!("Ack {} to {} not sent: {}", number, peer, e);
        }

        if complete {
            self.complete_inbound(peer, now)?;
        }
        Ok(())
    }

    fn complete_inbound(&mut self, peer: &VertexId, now: u64) -> Result<(), MeshError> {
        let Some(pending) = self.exchanges.inbound.remove(peer) else {
            return Ok(());
        };
        let snapshot = TopologySnapshot::decode(&join_segments(&pending.segments))?;
        if &snapshot.sender != peer {
            warn!(
                "Snapshot from {} claims sender {}, discarded",
                peer, snapshot.sender
            );
            return Err(MeshError::UnknownVertex(snapshot.sender.to_string()));
        }

        let outcome = self.store.apply_exchanged_snapshot(peer, &snapshot, now);
        for removed in &outcome.removed {
            self.ping_timers.cancel(removed);
            self.exchanges.forget(removed);
            self.links.retain(|_, bound| bound != removed);
        }
        if let Some(vertex) = self.store.vertex_mut(peer) {
            vertex.last_exchange_date = Some(now);
        }

        info!(
            "Exchange from {} complete: {} rebuilt, {} created, {} removed",
            peer,
            outcome.rebuilt.len(),
            outcome.created.len(),
            outcome.removed.len()
        );
        self.events.push(MeshEvent::ExchangeCompleted {
            peer: peer.clone(),
            direction: ExchangeDirection::Inbound,
        });
        Ok(())
    }

    pub(crate) fn handle_ack(
        &mut self,
        peer: &VertexId,
        ack: ExchangeAck,
        now: u64,
    ) -> Result<(), MeshError> {
        let Some(pending) = self.exchanges.outbound.get_mut(peer) else {
            debug!("Ack from {} without an exchange in progress", peer);
            return Ok(());
        };
        if ack.received_package_number != pending.segments_processed {
            debug!(
                "Ack {} from {} ignored (awaiting {})",
                ack.received_package_number, peer, pending.segments_processed
            );
            return Ok(());
        }

        if pending.segments_processed >= pending.total {
            let version = pending.graph_version;
            self.exchanges.outbound.remove(peer);
            self.exchanges.delivered.insert(peer.clone(), version);
            info!("Exchange to {} acknowledged in full", peer);
            self.events.push(MeshEvent::ExchangeCompleted {
                peer: peer.clone(),
                direction: ExchangeDirection::Outbound,
            });
            return Ok(());
        }

        pending.segments_processed += 1;
        pending.time_of_last_activity = now;
        let next = pending.segments_processed;
        self.send_segment(peer, next)
    }

    /// Entry point for everything on the `exchange` channel
    pub(crate) fn on_exchange_data(
        &mut self,
        link: &PeerHandle,
        data: &[u8],
        now: u64,
    ) -> Result<(), MeshError> {
        let peer = self
            .links
            .get(link)
            .cloned()
            .ok_or_else(|| MeshError::UnknownVertex(link.to_string()))?;
        let envelope: ExchangeEnvelope = decode_record(data)
            .map_err(|e| MeshError::Decode(format!("exchange envelope: {}", e)))?;
        if envelope.sender != peer.as_str() {
            warn!(
                "Exchange envelope from {} claims sender {}",
                peer, envelope.sender
            );
            return Err(MeshError::UnknownVertex(envelope.sender));
        }

        match envelope.kind {
            ExchangeType::Request => {
                let request: ExchangeRequest = decode_record(&envelope.payload)
                    .map_err(|e| MeshError::Decode(format!("exchange request: {}", e)))?;
                self.process_incoming_request(&peer, request, now)
            }
            ExchangeType::Package => {
                let package: ExchangePackage = decode_record(&envelope.payload)
                    .map_err(|e| MeshError::Decode(format!("exchange package: {}", e)))?;
                self.handle_package(&peer, package, now)
            }
            ExchangeType::Ack => {
                let ack: ExchangeAck = decode_record(&envelope.payload)
                    .map_err(|e| MeshError::Decode(format!("exchange ack: {}", e)))?;
                self.handle_ack(&peer, ack, now)
            }
        }
    }

    /// Periodic exchange bookkeeping: drop abandoned transfers, resend
    /// stalled segments, then ask neighbors whose graph is overdue.
    pub fn run_exchange_maintenance(&mut self, now: u64) {
        self.track_changes(|node| node.exchange_maintenance(now));
    }

    fn exchange_maintenance(&mut self, now: u64) {
        let max_idle = self.config().pending_cleanup_ms();
        let dropped = self.exchanges.cleanup(now, max_idle);
        if dropped > 0 {
            info!("Dropped {} abandoned exchanges", dropped);
        }

        let resend_after = self.config().segment_resend_ms();
        let stalled: Vec<(VertexId, u32)> = self
            .exchanges
            .outbound
            .iter()
            .filter(|(_, pending)| {
                now.saturating_sub(pending.time_of_last_activity) >= resend_after
            })
            .map(|(peer, pending)| (peer.clone(), pending.segments_processed))
            .collect();
        for (peer, number) in stalled {
            debug!("Resending segment {} to {}", number, peer);
            if let Err(e) = self.send_segment(&peer, number) {
                debug!("Resend to {} failed: {}", peer, e);
            }
        }

        let interval = self.config().last_exchange_interval_ms();
        let overdue: Vec<VertexId> = self
            .store
            .neighbors()
            .into_iter()
            .filter(|peer| !self.exchanges.inbound.contains_key(peer))
            .filter(|peer| {
                self.store.vertex(peer).map_or(false, |v| match v.last_exchange_date {
                    None => true,
                    Some(last) => now.saturating_sub(last) > interval,
                })
            })
            .collect();
        for peer in overdue {
            if let Err(e) = self.request_exchange(&peer) {
                debug!("Exchange request to {} failed: {}", peer, e);
            }
        }
    }

    pub fn exchange_progress(
        &self,
        peer: &VertexId,
        direction: ExchangeDirection,
    ) -> Option<ExchangeProgress> {
        self.exchanges.progress(peer, direction)
    }

    /// (Re)send outbound segment `number` without touching the cursor
    fn send_segment(&mut self, peer: &VertexId, number: u32) -> Result<(), MeshError> {
        let Some(pending) = self.exchanges.outbound.get(peer) else {
            return Ok(());
        };
        let Some(payload) = (number as usize)
            .checked_sub(1)
            .and_then(|index| pending.segments.get(index))
        else {
            return Ok(());
        };
        let package = ExchangePackage {
            package_total_count: pending.total,
            current_package_number: number,
            payload: payload.clone(),
        };
        self.send_exchange_record(peer, ExchangeType::Package, &package)
    }

    fn send_ack(&self, peer: &VertexId, number: u32) -> Result<(), MeshError> {
        self.send_exchange_record(
            peer,
            ExchangeType::Ack,
            &ExchangeAck {
                received_package_number: number,
            },
        )
    }

    fn send_exchange_record<T: Serialize>(
        &self,
        peer: &VertexId,
        kind: ExchangeType,
        record: &T,
    ) -> Result<(), MeshError> {
        let payload = encode_record(record).map_err(|e| MeshError::Encode(e.to_string()))?;
        let envelope = ExchangeEnvelope {
            kind,
            sender: self.self_id().to_string(),
            payload,
        };
        let bytes = encode_record(&envelope).map_err(|e| MeshError::Encode(e.to_string()))?;
        self.send_to_vertex(peer, Channel::Exchange, &bytes)
    }
}
