//! State and behavior shared by both transport roles: the outbound read
//!  buffer, the inbound reassembly buffer, and the sequence bookkeeping that
//!  ties them together.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::TunnelTxRx;
use crate::seq::SequenceState;
use crate::tunnel::{spawn_tunnel_reader, ReadBuffer, TunDevice};
use crate::wire::FRAGMENT_LEN;

/// How an incoming tunnel message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The message was sequential and its payload and ack were applied.
    Applied,

    /// The message carried an unexpected id; its payload and ack were
    ///  skipped, but the exchange continues.
    InvalidId,

    /// The message was missing required fields and was dropped entirely.
    Malformed,
}

/// The per-endpoint transport core. Owned by the transport task; only the
///  read buffer is shared (with the tunnel-read task, under its mutex).
pub(crate) struct TransportCore {
    seq: SequenceState,
    payload_in_flight: bool,
    frame_buffer: BytesMut,
    tun: Arc<dyn TunDevice>,
    read_buffer: ReadBuffer,
}

impl TransportCore {
    pub fn new(tun: Arc<dyn TunDevice>) -> TransportCore {
        TransportCore {
            seq: SequenceState::new(),
            payload_in_flight: false,
            frame_buffer: BytesMut::new(),
            tun,
            read_buffer: Default::default(),
        }
    }

    pub fn spawn_reader(&self) -> JoinHandle<()> {
        spawn_tunnel_reader(self.tun.clone(), self.read_buffer.clone())
    }

    /// Composes the next outbound tunnel message: id, ack for the peer's last
    ///  accepted message, and up to [`FRAGMENT_LEN`] bytes peeked (not popped)
    ///  from the front datagram. The chunk is only erased once the peer acks
    ///  it, so a lost exchange retransmits the same fragment under the same id.
    pub async fn compose_tunnel(&mut self) -> TunnelTxRx {
        let read_buffer = self.read_buffer.clone();
        let mut queue = read_buffer.lock().await;
        self.compose_tunnel_locked(&mut queue)
    }

    /// Applies an incoming tunnel message: sequence validation, reassembly,
    ///  and ack handling, in that order.
    pub async fn apply_tunnel(&mut self, tunnel: &TunnelTxRx) -> Disposition {
        let read_buffer = self.read_buffer.clone();
        let mut queue = read_buffer.lock().await;
        self.apply_tunnel_locked(&mut queue, tunnel).await
    }

    /// Applies an incoming tunnel message and composes the reply to it under
    ///  a single acquisition of the read-buffer mutex. No reply is composed
    ///  for malformed messages.
    pub async fn apply_and_compose(&mut self, tunnel: &TunnelTxRx) -> (Disposition, Option<TunnelTxRx>) {
        let read_buffer = self.read_buffer.clone();
        let mut queue = read_buffer.lock().await;

        let disposition = self.apply_tunnel_locked(&mut queue, tunnel).await;
        let response = match disposition {
            Disposition::Malformed => None,
            _ => Some(self.compose_tunnel_locked(&mut queue)),
        };
        (disposition, response)
    }

    fn compose_tunnel_locked(&mut self, queue: &mut VecDeque<Vec<u8>>) -> TunnelTxRx {
        let mut tunnel = TunnelTxRx {
            id: self.seq.next_id(),
            ack_id: self.seq.last_ack_id(),
            payload: None,
            remaining_bytes: 0,
        };

        if let Some(datagram) = queue.front() {
            let transfer_size = datagram.len().min(FRAGMENT_LEN);
            tunnel.payload = Some(datagram[..transfer_size].to_vec());
            tunnel.remaining_bytes = (datagram.len() - transfer_size) as u32;
            self.payload_in_flight = true;
        }

        tunnel
    }

    async fn apply_tunnel_locked(&mut self, queue: &mut VecDeque<Vec<u8>>, tunnel: &TunnelTxRx) -> Disposition {
        if tunnel.ack_id.is_none() && self.seq.last_ack_id().is_some() {
            return Disposition::Malformed;
        }

        if !self.seq.is_valid_peer_id(tunnel.id) {
            warn!("received non-sequential tunnel message: expected {}, got {}",
                self.seq.last_ack_id().expect("a sequence gap implies an accepted id").next(),
                tunnel.id);
            return Disposition::InvalidId;
        }
        self.seq.accept_peer_id(tunnel.id);

        if let Some(payload) = &tunnel.payload {
            self.frame_buffer.extend_from_slice(payload);
            if tunnel.remaining_bytes == 0 {
                let datagram = self.frame_buffer.split();
                info!("writing {} bytes to the tunnel", datagram.len());
                if let Err(e) = self.tun.write_datagram(&datagram).await {
                    // not recovered - the IP layer above retransmits end-to-end
                    error!("failed to write to the tunnel: {:#}", e);
                }
            }
        }

        if let Some(ack_id) = tunnel.ack_id {
            if self.seq.try_ack(ack_id) {
                self.finish_acked_fragment(queue);
            }
            else {
                warn!("peer failed to ack {} - retransmitting", self.seq.next_id());
            }
        }

        Disposition::Applied
    }

    /// The fragment sent most recently was acknowledged: erase it from the
    ///  front datagram, dropping the datagram once fully transferred.
    fn finish_acked_fragment(&mut self, queue: &mut VecDeque<Vec<u8>>) {
        if !self.payload_in_flight {
            return;
        }

        if let Some(datagram) = queue.front_mut() {
            let transfer_size = datagram.len().min(FRAGMENT_LEN);
            datagram.drain(..transfer_size);
            if datagram.is_empty() {
                queue.pop_front();
                trace!("datagram fully transferred, {} more queued", queue.len());
            }
        }

        self.payload_in_flight = false;
    }

    pub fn payload_in_flight(&self) -> bool {
        self.payload_in_flight
    }

    #[cfg(test)]
    pub fn read_buffer(&self) -> ReadBuffer {
        self.read_buffer.clone()
    }

    #[cfg(test)]
    pub fn last_ack_id(&self) -> Option<crate::seq::SequenceId> {
        self.seq.last_ack_id()
    }

    #[cfg(test)]
    pub fn next_id(&self) -> crate::seq::SequenceId {
        self.seq.next_id()
    }
}

/// Aborts a worker task when the owning transport goes away.
pub(crate) fn abort_worker(handle: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        handle.abort();
        debug!("aborted tunnel reader");
    }
}
