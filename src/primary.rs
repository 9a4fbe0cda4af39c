//! The primary transport: the endpoint that initiates every exchange. It
//!  beacons on a fixed schedule, polls the secondary with one tunnel request
//!  per cycle, and awaits each response under the configured radio deadline.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RadioTunConfig;
use crate::endpoint::{abort_worker, TransportCore};
use crate::link::{Link, LinkFrame};
use crate::protocol::{Ping, Request, Response};
use crate::tunnel::TunDevice;

/// Pause between receive polls while awaiting a response.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Number of ping commands that may be queued before `ping` callers are
///  backpressured.
const PING_COMMAND_DEPTH: usize = 4;

/// The possible results of a request operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    /// The request was successful.
    Success,

    /// The request timed out.
    Timeout,

    /// The exchange was malformed on either side.
    MalformedRequest,

    /// There was an error transmitting the request.
    TransmitError,
}

struct PingCommand {
    value: Option<u32>,
    reply: oneshot::Sender<RequestResult>,
}

/// Handle for issuing diagnostic requests against a running
///  [`PrimaryTransport`]. Cheap to clone.
#[derive(Clone)]
pub struct PrimaryHandle {
    ping_tx: mpsc::Sender<PingCommand>,
}

impl PrimaryHandle {
    /// Sends a ping with the supplied value to round trip. The ping displaces
    ///  tunnel traffic for one poll cycle.
    pub async fn ping(&self, value: Option<u32>) -> RequestResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = PingCommand { value, reply: reply_tx };

        if self.ping_tx.send(command).await.is_err() {
            return RequestResult::TransmitError;
        }
        reply_rx.await.unwrap_or(RequestResult::TransmitError)
    }
}

/// The primary (polling) side of the radio tunnel.
pub struct PrimaryTransport {
    core: TransportCore,
    link: Arc<dyn Link>,
    config: RadioTunConfig,
    ping_rx: mpsc::Receiver<PingCommand>,
    reader_handle: Option<JoinHandle<()>>,
}

impl Drop for PrimaryTransport {
    fn drop(&mut self) {
        abort_worker(&mut self.reader_handle);
    }
}

impl PrimaryTransport {
    pub fn new(
        link: Arc<dyn Link>,
        tun: Arc<dyn TunDevice>,
        config: RadioTunConfig,
    ) -> anyhow::Result<(PrimaryTransport, PrimaryHandle)> {
        config.validate()?;
        let (ping_tx, ping_rx) = mpsc::channel(PING_COMMAND_DEPTH);

        let transport = PrimaryTransport {
            core: TransportCore::new(tun),
            link,
            config,
            ping_rx,
            reader_handle: None,
        };
        Ok((transport, PrimaryHandle { ping_tx }))
    }

    /// The transfer loop - this function never returns; cancel it by dropping
    ///  the task it runs on.
    pub async fn run(mut self) {
        info!("starting primary transport loop");
        self.reader_handle = Some(self.core.spawn_reader());

        let mut next_beacon = Instant::now();
        loop {
            if Instant::now() >= next_beacon {
                if let Err(e) = self.link.beacon().await {
                    warn!("failed to transmit beacon: {}", e);
                }
                next_beacon += self.config.beacon_interval;
            }

            match self.ping_rx.try_recv() {
                Ok(command) => {
                    let result = self.run_ping(command.value).await;
                    let _ = command.reply.send(result);
                }
                Err(_) => self.run_tunnel_cycle().await,
            }

            sleep(self.config.poll_interval).await;
        }
    }

    /// One poll cycle: compose a tunnel request from the read buffer,
    ///  transmit it, and apply the response. A timeout or an invalid
    ///  response leaves the sequence state untouched, so the next cycle
    ///  retransmits the same fragment under the same id.
    async fn run_tunnel_cycle(&mut self) {
        let request = Request::TunnelTxRx(self.core.compose_tunnel().await);
        if let Err(e) = self.transmit_request(&request).await {
            warn!("failed to transmit tunnel request: {}", e);
            return;
        }

        match self.await_response().await {
            Some(Response::TunnelTxRx(tunnel)) => {
                self.core.apply_tunnel(&tunnel).await;
            }
            Some(Response::Ping(_)) => {
                warn!("received a ping response during a tunnel exchange - ignoring");
            }
            None => {
                debug!("tunnel request {:?} timed out - retransmitting next cycle", request);
            }
        }
    }

    async fn run_ping(&mut self, value: Option<u32>) -> RequestResult {
        info!("sending ping request");
        let request = Request::Ping(Ping { value });
        if let Err(e) = self.transmit_request(&request).await {
            error!("failed to transmit ping request: {}", e);
            return RequestResult::TransmitError;
        }

        match self.await_response().await {
            Some(Response::Ping(ping)) => {
                if ping.value != value {
                    // logged only, matching the responder's echo contract
                    error!("ping response value mismatch: sent {:?}, got {:?}", value, ping.value);
                }
                RequestResult::Success
            }
            Some(Response::TunnelTxRx(_)) => {
                warn!("received a tunnel response to a ping request");
                RequestResult::MalformedRequest
            }
            None => {
                debug!("ping request timed out");
                RequestResult::Timeout
            }
        }
    }

    async fn transmit_request(&self, request: &Request) -> Result<(), crate::link::LinkError> {
        let mut buf = BytesMut::with_capacity(self.link.max_payload_size() as usize);
        request.ser(&mut buf);

        let frame = LinkFrame {
            address: self.config.secondary_addr,
            payload: buf.to_vec(),
        };
        self.link.transmit(&frame).await
    }

    /// Polls the link for a response until `rf_delay` has elapsed. Beacon
    ///  frames, transient receive errors and unparsable frames are skipped
    ///  without resetting the deadline.
    async fn await_response(&self) -> Option<Response> {
        let deadline = Instant::now() + self.config.rf_delay;
        loop {
            match self.link.receive().await {
                Ok(Some(frame)) if frame.payload.is_empty() => {
                    debug!("ignoring beacon frame from {:#010x} while awaiting a response", frame.address);
                }
                Ok(Some(frame)) => {
                    match Response::deser(&mut frame.payload.as_slice()) {
                        Ok(response) => return Some(response),
                        Err(e) => warn!("dropping unparsable response frame: {:#}", e),
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("transient receive error: {}", e),
            }

            if Instant::now() >= deadline {
                return None;
            }
            sleep(RECEIVE_POLL_INTERVAL).await;
        }
    }
}
