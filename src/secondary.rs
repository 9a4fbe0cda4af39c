//! The secondary transport: the endpoint that listens continuously and
//!  produces one response per request, piggybacking its own outbound
//!  fragments onto the acks.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::config::RadioTunConfig;
use crate::endpoint::{abort_worker, Disposition, TransportCore};
use crate::link::{Link, LinkError, LinkFrame};
use crate::protocol::{Ping, Request, Response, TunnelTxRx};
use crate::tunnel::TunDevice;

/// The secondary (responding) side of the radio tunnel.
pub struct SecondaryTransport {
    core: TransportCore,
    link: Arc<dyn Link>,
    config: RadioTunConfig,
    reader_handle: Option<JoinHandle<()>>,
}

impl Drop for SecondaryTransport {
    fn drop(&mut self) {
        abort_worker(&mut self.reader_handle);
    }
}

impl SecondaryTransport {
    pub fn new(link: Arc<dyn Link>, tun: Arc<dyn TunDevice>, config: RadioTunConfig) -> anyhow::Result<SecondaryTransport> {
        config.validate()?;
        Ok(SecondaryTransport {
            core: TransportCore::new(tun),
            link,
            config,
            reader_handle: None,
        })
    }

    /// The listen loop - this function never returns; cancel it by dropping
    ///  the task it runs on.
    pub async fn run(mut self) {
        info!("starting secondary transport loop");
        self.reader_handle = Some(self.core.spawn_reader());

        loop {
            match self.link.receive().await {
                Ok(Some(frame)) if frame.payload.is_empty() => {
                    trace!("ignoring beacon frame from {:#010x}", frame.address);
                }
                Ok(Some(frame)) => self.handle_frame(&frame).await,
                Ok(None) => sleep(self.config.poll_interval).await,
                Err(e) => debug!("transient receive error: {}", e),
            }
        }
    }

    async fn handle_frame(&mut self, frame: &LinkFrame) {
        let request = match Request::deser(&mut frame.payload.as_slice()) {
            Ok(request) => request,
            Err(e) => {
                warn!("dropping unparsable request frame: {:#}", e);
                return;
            }
        };

        match request {
            Request::Ping(ping) => self.handle_ping(ping).await,
            Request::TunnelTxRx(tunnel) => self.handle_tunnel(tunnel).await,
        }
    }

    async fn handle_ping(&self, ping: Ping) {
        info!("responding to ping request");
        let response = Response::Ping(Ping { value: ping.value });
        if let Err(e) = self.transmit_response(&response).await {
            error!("failed to send ping response: {}", e);
        }
    }

    async fn handle_tunnel(&mut self, tunnel: TunnelTxRx) {
        let (disposition, response) = self.core.apply_and_compose(&tunnel).await;
        if disposition == Disposition::Malformed {
            error!("dropping tunnel request with missing fields");
            return;
        }

        if let Some(response_tunnel) = response {
            if let Err(e) = self.transmit_response(&Response::TunnelTxRx(response_tunnel)).await {
                // the primary's timeout recovers from a lost response
                error!("failed to send tunnel response: {}", e);
            }
        }
    }

    async fn transmit_response(&self, response: &Response) -> Result<(), LinkError> {
        let mut buf = BytesMut::with_capacity(self.link.max_payload_size() as usize);
        response.ser(&mut buf);

        let frame = LinkFrame {
            address: self.config.primary_addr,
            payload: buf.to_vec(),
        };
        self.link.transmit(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::{MockLink, MockLinkConfig};
    use crate::seq::SequenceId;
    use crate::test_util::ChannelTun;
    use std::time::Duration;

    fn test_config() -> RadioTunConfig {
        RadioTunConfig::new(25, -1, 0x0a0a0a0a, 0x0b0b0b0b, 5_000)
    }

    fn test_link() -> Arc<MockLink> {
        Arc::new(MockLink::new(MockLinkConfig {
            max_payload_size: 32,
            beacon_interval: Duration::from_millis(100),
            mock_time: Duration::ZERO,
            beacon_result_pattern: vec![],
            receive_script: vec![],
        }))
    }

    fn test_secondary(link: Arc<MockLink>) -> (SecondaryTransport, crate::test_util::ChannelTunHandle) {
        let (tun, tun_handle) = ChannelTun::new();
        (SecondaryTransport::new(link, Arc::new(tun), test_config()).unwrap(), tun_handle)
    }

    fn request_frame(request: &Request) -> LinkFrame {
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        LinkFrame { address: 0x0a0a0a0a, payload: buf.to_vec() }
    }

    fn tunnel_request(id: u32, ack_id: Option<u32>, payload: Option<&[u8]>, remaining_bytes: u32) -> LinkFrame {
        request_frame(&Request::TunnelTxRx(TunnelTxRx {
            id: SequenceId::from_raw(id),
            ack_id: ack_id.map(SequenceId::from_raw),
            payload: payload.map(|p| p.to_vec()),
            remaining_bytes,
        }))
    }

    fn transmitted_responses(link: &MockLink) -> Vec<Response> {
        link.transmitted().iter()
            .map(|frame| Response::deser(&mut frame.payload.as_slice()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_reassembles_fragmented_datagram() {
        let link = test_link();
        let (mut secondary, tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&tunnel_request(0, None, Some(b"ABCDEFGH"), 5)).await;
        secondary.handle_frame(&tunnel_request(1, Some(0), Some(b"IJKLM"), 0)).await;

        assert_eq!(tun_handle.written(), vec![b"ABCDEFGHIJKLM".to_vec()]);

        let responses = transmitted_responses(&link);
        assert_eq!(responses, vec![
            Response::TunnelTxRx(TunnelTxRx {
                id: SequenceId::ZERO,
                ack_id: Some(SequenceId::ZERO),
                payload: None,
                remaining_bytes: 0,
            }),
            Response::TunnelTxRx(TunnelTxRx {
                id: SequenceId::from_raw(1),
                ack_id: Some(SequenceId::from_raw(1)),
                payload: None,
                remaining_bytes: 0,
            }),
        ]);
    }

    #[tokio::test]
    async fn test_ping_echoes_value() {
        let link = test_link();
        let (mut secondary, _tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&request_frame(&Request::Ping(Ping { value: Some(0xDEADBEEF) }))).await;

        assert_eq!(transmitted_responses(&link), vec![Response::Ping(Ping { value: Some(0xDEADBEEF) })]);
    }

    #[tokio::test]
    async fn test_ping_echoes_absence_of_value() {
        let link = test_link();
        let (mut secondary, _tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&request_frame(&Request::Ping(Ping { value: None }))).await;

        assert_eq!(transmitted_responses(&link), vec![Response::Ping(Ping { value: None })]);
    }

    #[tokio::test]
    async fn test_non_sequential_request_still_gets_response() {
        let link = test_link();
        let (mut secondary, tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&tunnel_request(3, None, None, 0)).await;

        // id 5 when 4 is expected: the payload is ignored, the ack still
        //  reports the last accepted id
        secondary.handle_frame(&tunnel_request(5, Some(0), Some(b"drop me"), 0)).await;

        assert!(tun_handle.written().is_empty());
        let responses = transmitted_responses(&link);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1], Response::TunnelTxRx(TunnelTxRx {
            id: SequenceId::ZERO,
            ack_id: Some(SequenceId::from_raw(3)),
            payload: None,
            remaining_bytes: 0,
        }));
    }

    #[tokio::test]
    async fn test_missing_ack_id_produces_no_response() {
        let link = test_link();
        let (mut secondary, _tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&tunnel_request(0, None, None, 0)).await;
        secondary.handle_frame(&tunnel_request(1, None, None, 0)).await;

        assert_eq!(transmitted_responses(&link).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_dropped_without_response() {
        let link = test_link();
        let (mut secondary, _tun_handle) = test_secondary(link.clone());

        secondary.handle_frame(&LinkFrame { address: 0x0a0a0a0a, payload: vec![2, 0x05, 0x00] }).await;

        assert!(link.transmitted().is_empty());
    }

    #[tokio::test]
    async fn test_piggybacks_outbound_fragments() {
        let link = test_link();
        let (mut secondary, _tun_handle) = test_secondary(link.clone());
        secondary.core.read_buffer().lock().await.push_back(b"0123456789".to_vec());

        secondary.handle_frame(&tunnel_request(0, None, None, 0)).await;

        let responses = transmitted_responses(&link);
        assert_eq!(responses[0], Response::TunnelTxRx(TunnelTxRx {
            id: SequenceId::ZERO,
            ack_id: Some(SequenceId::ZERO),
            payload: Some(b"01234567".to_vec()),
            remaining_bytes: 2,
        }));

        // the primary acks id 0, so the next response carries the rest
        secondary.handle_frame(&tunnel_request(1, Some(0), None, 0)).await;

        let responses = transmitted_responses(&link);
        assert_eq!(responses[1], Response::TunnelTxRx(TunnelTxRx {
            id: SequenceId::from_raw(1),
            ack_id: Some(SequenceId::from_raw(1)),
            payload: Some(b"89".to_vec()),
            remaining_bytes: 0,
        }));
    }
}
