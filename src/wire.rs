//! Little-endian wire primitives and the envelope constants shared by all
//!  messages. See the crate documentation for the full envelope layout.

use anyhow::bail;
use bytes::Buf;

/// Maximum number of datagram bytes carried in a single tunnel message.
///
/// This is a protocol constant: a typical radio frame carries 32 bytes, and
///  the worst-case envelope (length, kind, flags, id, ack id, payload length,
///  remaining bytes) takes 16 of them.
pub const FRAGMENT_LEN: usize = 8;

/// Values for the `kind` byte of the envelope.
pub(crate) mod kind {
    /// Set on responses, clear on requests.
    pub const RESPONSE_FLAG: u8 = 0x80;
    pub const TAG_MASK: u8 = 0x7f;

    pub const PING: u8 = 1;
    pub const TUNNEL_TXRX: u8 = 2;
}

/// Presence bits in the `flags` byte of a `Ping` message.
pub(crate) mod ping_flags {
    pub const HAS_VALUE: u8 = 0x01;
}

/// Presence bits in the `flags` byte of a `TunnelTxRx` message.
pub(crate) mod tunnel_flags {
    pub const HAS_ACK_ID: u8 = 0x01;
    pub const HAS_PAYLOAD: u8 = 0x02;
}

/// Encodes a u32 value as its 4-byte little-endian representation.
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decodes a little-endian u32, failing on a short buffer.
pub fn decode_u32(buf: &mut impl Buf) -> anyhow::Result<u32> {
    Ok(buf.try_get_u32_le()?)
}

/// Splits the length-tagged envelope body off the front of a received frame
///  payload. Radio frames are padded to a fixed size, so anything after the
///  tagged length is ignored.
pub(crate) fn take_envelope_body(buf: &mut impl Buf) -> anyhow::Result<bytes::Bytes> {
    let body_len = buf.try_get_u8()? as usize;
    if buf.remaining() < body_len {
        bail!("envelope declares {} bytes but only {} are present", body_len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(body_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::ascending_bytes(0x01020304, [0x04, 0x03, 0x02, 0x01])]
    #[case::zero(0, [0, 0, 0, 0])]
    #[case::max(u32::MAX, [0xff, 0xff, 0xff, 0xff])]
    #[case::single_byte(0x2a, [0x2a, 0, 0, 0])]
    fn test_encode_u32(#[case] value: u32, #[case] expected: [u8; 4]) {
        assert_eq!(encode_u32(value), expected);

        let mut buf: &[u8] = &expected;
        assert_eq!(decode_u32(&mut buf).unwrap(), value);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_u32_short_buffer() {
        let mut buf: &[u8] = &[1, 2, 3];
        assert!(decode_u32(&mut buf).is_err());
    }

    #[test]
    fn test_take_envelope_body_ignores_padding() {
        let mut buf: &[u8] = &[3, 0xaa, 0xbb, 0xcc, 0, 0, 0];
        let body = take_envelope_body(&mut buf).unwrap();
        assert_eq!(body.as_ref(), &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_take_envelope_body_truncated() {
        let mut buf: &[u8] = &[5, 1, 2];
        assert!(take_envelope_body(&mut buf).is_err());
    }
}
