//! The abstract radio link that the transport rides on.
//!
//! A link moves small opaque frames between exactly two stations over a
//!  half-duplex medium: the transport must never assume that a send and a
//!  receive can be in progress at the same time, and accordingly only ever
//!  touches the link from its own task.

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod nrf;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("frame of {size} bytes exceeds the link payload limit of {max}")]
    FrameTooLarge { size: usize, max: u32 },

    #[error("frame transmission failed")]
    Transmit,

    #[error("received frame failed the integrity check")]
    Checksum,
}

/// A frame to send or receive with the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// The address of the other station or of this station, depending on
    ///  whether the frame is being transmitted or was received.
    pub address: u32,

    /// The frame payload. An empty payload marks a beacon frame.
    pub payload: Vec<u8>,
}

/// This is an abstraction over the physical radio, introduced to facilitate
///  mocking the I/O part away for testing and to allow plugging in other
///  backends (software-defined radios, in-memory loopbacks).
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Announce this station's presence on the broadcast channel. Invoked by
    ///  the primary at a fixed interval.
    async fn beacon(&self) -> Result<(), LinkError>;

    /// Non-blocking poll for a single frame. `Ok(None)` means no frame was
    ///  ready; `Err(LinkError::Checksum)` means a frame arrived but was
    ///  corrupt. Neither implies any state change for the caller.
    async fn receive(&self) -> Result<Option<LinkFrame>, LinkError>;

    /// Send one frame, blocking briefly for the physical-layer ack.
    async fn transmit(&self, frame: &LinkFrame) -> Result<(), LinkError>;

    /// Upper bound on the payload size of a single frame.
    fn max_payload_size(&self) -> u32;
}
