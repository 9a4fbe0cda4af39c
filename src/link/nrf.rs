//! A [`Link`] backend for nRF24-class short-range radios.
//!
//! The physical driver itself is opened, tuned and powered by an external
//!  initializer; this module talks to it through the [`RadioDevice`] seam and
//!  only deals with addressing and frame layout: every raw frame starts with
//!  the sender's address packed little-endian, followed by the payload.

use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::{error, warn};

use crate::link::{Link, LinkError, LinkFrame};

/// Raw frame size of the radio in bytes.
pub const RAW_FRAME_LEN: usize = 32;

/// Size of the sender address prefix inside each raw frame.
const ADDRESS_LEN: usize = 4;

/// The pipe indexes for broadcast and directed frames.
const BROADCAST_PIPE: u8 = 0;
const DIRECTED_PIPE: u8 = 1;

/// The address for broadcast frames. Selected to avoid alternating binary as
///  well as many level shifts on the air.
pub const BROADCAST_ADDRESS: u32 = 0xc341efa2;

/// The driver surface of an already-initialized radio chip. Pipes are keyed
///  by 5-byte hardware addresses; all operations are brief bus transactions.
#[cfg_attr(test, automock)]
pub trait RadioDevice: Send + Sync + 'static {
    fn open_writing_pipe(&self, address: &[u8; 5]);
    fn open_reading_pipe(&self, pipe: u8, address: &[u8; 5]);

    fn start_listening(&self);
    fn stop_listening(&self);

    /// Returns the pipe a pending frame arrived on, if any.
    fn available(&self) -> Option<u8>;

    /// Reads one pending frame. Returns false if the frame could not be read
    ///  intact.
    fn read_frame(&self, frame: &mut [u8; RAW_FRAME_LEN]) -> bool;

    /// Writes one frame, blocking until the hardware acked or gave up.
    fn write_frame(&self, frame: &[u8; RAW_FRAME_LEN]) -> bool;
}

/// Formats an address the way the radio hardware expects it: packed
///  little-endian into five bytes with a zero high byte.
fn format_address(address: u32) -> [u8; 5] {
    let le = address.to_le_bytes();
    [le[0], le[1], le[2], le[3], 0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RadioState {
    Unknown,
    Receiving,
    Transmitting,
}

struct NrfLinkInner {
    state: RadioState,
    last_transmit_address: u32,
}

/// [`Link`] implementation over a [`RadioDevice`].
pub struct NrfLink {
    device: Box<dyn RadioDevice>,
    address: u32,
    inner: Mutex<NrfLinkInner>,
}

impl NrfLink {
    /// Sets up the link for the station with the given address: opens the
    ///  broadcast and directed reading pipes and starts listening.
    pub fn new(device: Box<dyn RadioDevice>, address: u32) -> anyhow::Result<NrfLink> {
        if address == 0 {
            bail!("station address cannot be 0");
        }
        if address == BROADCAST_ADDRESS {
            bail!("station address cannot be the broadcast address");
        }

        device.open_reading_pipe(BROADCAST_PIPE, &format_address(BROADCAST_ADDRESS));
        device.open_reading_pipe(DIRECTED_PIPE, &format_address(address));
        device.start_listening();

        Ok(NrfLink {
            device,
            address,
            inner: Mutex::new(NrfLinkInner {
                state: RadioState::Receiving,
                last_transmit_address: 0,
            }),
        })
    }

    fn start_receiving(&self) {
        let mut inner = self.inner.lock().expect("nrf link state mutex poisoned");
        if inner.state != RadioState::Receiving {
            self.device.start_listening();
            inner.state = RadioState::Receiving;
        }
    }

    fn start_transmitting(&self, address: u32) {
        let mut inner = self.inner.lock().expect("nrf link state mutex poisoned");

        let mut open_writing_pipe = address != inner.last_transmit_address;
        if inner.state != RadioState::Transmitting {
            self.device.stop_listening();
            inner.state = RadioState::Transmitting;
            open_writing_pipe = true;
        }

        if open_writing_pipe {
            self.device.open_writing_pipe(&format_address(address));
            inner.last_transmit_address = address;
        }
    }

    fn populate_address(&self, raw_frame: &mut [u8; RAW_FRAME_LEN]) {
        raw_frame[..ADDRESS_LEN].copy_from_slice(&self.address.to_le_bytes());
    }
}

#[async_trait]
impl Link for NrfLink {
    async fn beacon(&self) -> Result<(), LinkError> {
        let mut raw_frame = [0; RAW_FRAME_LEN];
        self.populate_address(&mut raw_frame);

        self.start_transmitting(BROADCAST_ADDRESS);
        if !self.device.write_frame(&raw_frame) {
            error!("failed to write beacon");
            return Err(LinkError::Transmit);
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<LinkFrame>, LinkError> {
        self.start_receiving();

        let pipe = match self.device.available() {
            Some(pipe) => pipe,
            None => return Ok(None),
        };

        let mut raw_frame = [0; RAW_FRAME_LEN];
        if !self.device.read_frame(&mut raw_frame) {
            return Err(LinkError::Checksum);
        }

        if pipe != BROADCAST_PIPE && pipe != DIRECTED_PIPE {
            warn!("received frame from invalid pipe: {}", pipe);
            return Err(LinkError::Checksum);
        }

        let address = u32::from_le_bytes(raw_frame[..ADDRESS_LEN].try_into().expect("address prefix is 4 bytes"));

        // broadcast frames are beacons and carry no payload
        let payload = if pipe == DIRECTED_PIPE {
            raw_frame[ADDRESS_LEN..].to_vec()
        }
        else {
            Vec::new()
        };

        Ok(Some(LinkFrame { address, payload }))
    }

    async fn transmit(&self, frame: &LinkFrame) -> Result<(), LinkError> {
        if frame.payload.len() > self.max_payload_size() as usize {
            return Err(LinkError::FrameTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size(),
            });
        }

        let mut raw_frame = [0; RAW_FRAME_LEN];
        self.populate_address(&mut raw_frame);
        raw_frame[ADDRESS_LEN..ADDRESS_LEN + frame.payload.len()].copy_from_slice(&frame.payload);

        self.start_transmitting(frame.address);
        if !self.device.write_frame(&raw_frame) {
            error!("failed to write frame to {:#010x}", frame.address);
            return Err(LinkError::Transmit);
        }
        Ok(())
    }

    fn max_payload_size(&self) -> u32 {
        (RAW_FRAME_LEN - ADDRESS_LEN) as u32
    }
}
