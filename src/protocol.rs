//! The message schema of the radio tunnel protocol: `Request` and `Response`,
//!  each a tagged union over `Ping` and `TunnelTxRx`.

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

use crate::seq::SequenceId;
use crate::wire::{self, kind, ping_flags, tunnel_flags, FRAGMENT_LEN};

/// A ping message. Request and response share the shape; the responder echoes
///  `value` iff it was present in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub value: Option<u32>,
}

/// A tunnel traffic message, carrying at most one outbound fragment and the
///  ack for the peer's most recently accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTxRx {
    /// The sender's `next_id`.
    pub id: SequenceId,
    /// Id of the peer message most recently accepted by the sender. Absent
    ///  only until the sender has accepted its first peer message.
    pub ack_id: Option<SequenceId>,
    /// A fragment of the datagram currently being transferred, at most
    ///  [`FRAGMENT_LEN`] bytes.
    pub payload: Option<Vec<u8>>,
    /// Bytes of the current datagram still unsent after this fragment. The
    ///  fragment carrying 0 completes the datagram.
    pub remaining_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping(Ping),
    TunnelTxRx(TunnelTxRx),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ping(Ping),
    TunnelTxRx(TunnelTxRx),
}

impl Ping {
    fn body_len(&self) -> usize {
        2 + self.value.map_or(0, |_| size_of::<u32>())
    }

    fn ser_body(&self, kind_byte: u8, buf: &mut BytesMut) {
        buf.put_u8(kind_byte);
        match self.value {
            Some(value) => {
                buf.put_u8(ping_flags::HAS_VALUE);
                buf.put_u32_le(value);
            }
            None => {
                buf.put_u8(0);
            }
        }
    }

    fn deser_body(buf: &mut impl Buf) -> anyhow::Result<Ping> {
        let flags = buf.try_get_u8()?;
        let value = if flags & ping_flags::HAS_VALUE != 0 {
            Some(buf.try_get_u32_le()?)
        }
        else {
            None
        };
        Ok(Ping { value })
    }
}

impl TunnelTxRx {
    fn body_len(&self) -> usize {
        2 + size_of::<u32>()
            + self.ack_id.map_or(0, |_| size_of::<u32>())
            + self.payload.as_ref().map_or(0, |p| 1 + p.len())
            + size_of::<u32>()
    }

    fn ser_body(&self, kind_byte: u8, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.ack_id.is_some() {
            flags |= tunnel_flags::HAS_ACK_ID;
        }
        if self.payload.is_some() {
            flags |= tunnel_flags::HAS_PAYLOAD;
        }

        buf.put_u8(kind_byte);
        buf.put_u8(flags);
        buf.put_u32_le(self.id.to_raw());
        if let Some(ack_id) = self.ack_id {
            buf.put_u32_le(ack_id.to_raw());
        }
        if let Some(payload) = &self.payload {
            assert!(payload.len() <= FRAGMENT_LEN, "fragment exceeds the protocol limit");
            buf.put_u8(payload.len() as u8);
            buf.put_slice(payload);
        }
        buf.put_u32_le(self.remaining_bytes);
    }

    fn deser_body(buf: &mut impl Buf) -> anyhow::Result<TunnelTxRx> {
        let flags = buf.try_get_u8()?;
        let id = SequenceId::from_raw(buf.try_get_u32_le()?);
        let ack_id = if flags & tunnel_flags::HAS_ACK_ID != 0 {
            Some(SequenceId::from_raw(buf.try_get_u32_le()?))
        }
        else {
            None
        };
        let payload = if flags & tunnel_flags::HAS_PAYLOAD != 0 {
            let payload_len = buf.try_get_u8()? as usize;
            if payload_len > FRAGMENT_LEN {
                bail!("fragment of {} bytes exceeds the protocol limit of {}", payload_len, FRAGMENT_LEN);
            }
            if buf.remaining() < payload_len {
                bail!("truncated fragment: {} bytes declared, {} present", payload_len, buf.remaining());
            }
            Some(buf.copy_to_bytes(payload_len).to_vec())
        }
        else {
            None
        };
        let remaining_bytes = buf.try_get_u32_le()?;

        Ok(TunnelTxRx {
            id,
            ack_id,
            payload,
            remaining_bytes,
        })
    }
}

enum MessageBody {
    Ping(Ping),
    TunnelTxRx(TunnelTxRx),
}

fn deser_message(buf: &mut impl Buf, expect_response: bool) -> anyhow::Result<MessageBody> {
    let mut body = wire::take_envelope_body(buf)?;
    let kind_byte = body.try_get_u8()?;

    let is_response = kind_byte & kind::RESPONSE_FLAG != 0;
    if is_response != expect_response {
        bail!("message direction mismatch: expected {}, got {}",
            if expect_response { "response" } else { "request" },
            if is_response { "response" } else { "request" });
    }

    match kind_byte & kind::TAG_MASK {
        kind::PING => Ok(MessageBody::Ping(Ping::deser_body(&mut body)?)),
        kind::TUNNEL_TXRX => Ok(MessageBody::TunnelTxRx(TunnelTxRx::deser_body(&mut body)?)),
        tag => bail!("unknown message tag {}", tag),
    }
}

impl Request {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            Request::Ping(ping) => {
                buf.put_u8(ping.body_len() as u8);
                ping.ser_body(kind::PING, buf);
            }
            Request::TunnelTxRx(tunnel) => {
                buf.put_u8(tunnel.body_len() as u8);
                tunnel.ser_body(kind::TUNNEL_TXRX, buf);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Request> {
        match deser_message(buf, false)? {
            MessageBody::Ping(ping) => Ok(Request::Ping(ping)),
            MessageBody::TunnelTxRx(tunnel) => Ok(Request::TunnelTxRx(tunnel)),
        }
    }
}

impl Response {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            Response::Ping(ping) => {
                buf.put_u8(ping.body_len() as u8);
                ping.ser_body(kind::PING | kind::RESPONSE_FLAG, buf);
            }
            Response::TunnelTxRx(tunnel) => {
                buf.put_u8(tunnel.body_len() as u8);
                tunnel.ser_body(kind::TUNNEL_TXRX | kind::RESPONSE_FLAG, buf);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Response> {
        match deser_message(buf, true)? {
            MessageBody::Ping(ping) => Ok(Response::Ping(ping)),
            MessageBody::TunnelTxRx(tunnel) => Ok(Response::TunnelTxRx(tunnel)),
        }
    }
}
