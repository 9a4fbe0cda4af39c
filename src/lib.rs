//! `radiotun` bridges IP traffic across a low-bandwidth, short-range packet
//!  radio link between two endpoints. A virtual network interface on each
//!  side injects and receives IP datagrams; this crate fragments those
//!  datagrams into tiny radio frames, transports them reliably over the
//!  half-duplex link, and reassembles them on the far side.
//!
//! ## Design goals
//!
//! * Two endpoints, fixed roles: the **primary** initiates every exchange by
//!   polling, the **secondary** listens continuously and responds. No
//!   multi-hop routing and no more than two stations per link.
//! * Strict stop-and-wait reliability: at most one request in flight, and at
//!   most one fragment in flight per direction. The sender retains the
//!   current fragment until the peer's ack is observed, so a lost frame in
//!   either direction is recovered by retransmission under the same id.
//! * Datagrams are opaque: whatever arrives on the local TUN descriptor comes
//!   out byte-identical on the peer's TUN descriptor, in order per direction.
//! * The physical radio is abstracted behind a three-operation link (beacon,
//!   receive, transmit, plus a payload-size query), so new backends plug in
//!   without touching the transport.
//! * Integrity is limited to sequence-id checks plus the physical layer's
//!   per-frame CRC. There is no encryption or authentication at this layer.
//!
//! ## Wire format
//!
//! Frames carry one message inside a length-tagged envelope. All multi-byte
//!  integers are little-endian.
//!
//! ```ascii
//! 0: length (u8)   - number of meaningful bytes after this one; the radio
//!                     pads frames to its fixed size, the tail is ignored
//! 1: kind (u8)     - bit 7: response flag (requests 0, responses 1)
//!                    bits 0-6: message tag: 1 = Ping, 2 = TunnelTxRx
//! 2: flags (u8)    - per-message presence bits
//! 3: fields, in fixed order
//! ```
//!
//! `Ping` fields (flag bit 0 = value present):
//!
//! ```ascii
//! 0: value (u32) - present iff flag bit 0; echoed verbatim by the responder
//! ```
//!
//! `TunnelTxRx` fields (flag bit 0 = ack id present, bit 1 = payload present):
//!
//! ```ascii
//! 0: id (u32)              - the sender's next sequence id
//! *: ack id (u32)          - id of the peer message most recently accepted
//! *: payload length (u8) and payload - at most 8 bytes of datagram
//! *: remaining bytes (u32) - datagram bytes still unsent after this fragment
//! ```
//!
//! The 8-byte fragment limit derives from the radio's 32-byte frames minus
//!  the worst-case envelope overhead.
//!
//! ## Concurrency model
//!
//! Each endpoint runs two cooperating tasks: the transport loop (primary or
//!  secondary) and a tunnel reader that drains the TUN descriptor into a
//!  mutex-protected queue. The link itself is only ever touched from the
//!  transport task - the medium is half-duplex and the backends rely on it.

pub mod config;
mod endpoint;
pub mod link;
pub mod primary;
pub mod protocol;
pub mod secondary;
pub mod seq;
pub mod tunnel;
pub mod wire;

#[cfg(test)] mod test_util;

pub use config::RadioTunConfig;
pub use link::{Link, LinkError, LinkFrame};
pub use primary::{PrimaryHandle, PrimaryTransport, RequestResult};
pub use protocol::{Ping, Request, Response, TunnelTxRx};
pub use secondary::SecondaryTransport;
pub use seq::SequenceId;
pub use tunnel::{TunDevice, TunnelFd};
