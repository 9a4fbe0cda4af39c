//! Test backends for the [`Link`] abstraction: a scripted replay that asserts
//!  the primary's beacon schedule, and an in-memory pair for loopback tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use crate::link::{Link, LinkError, LinkFrame};

/// Tolerance for the beacon schedule: each beacon must land within
///  `[n * interval, n * interval + 10ms)` of the link's start time.
const BEACON_SCHEDULE_SLACK: Duration = Duration::from_millis(10);

const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(100);

pub struct MockLinkConfig {
    pub max_payload_size: u32,

    /// The beacon interval the transport under test is configured with.
    pub beacon_interval: Duration,

    /// How long the scripted scenario runs; see [`MockLink::wait_for_complete`].
    pub mock_time: Duration,

    /// Results returned by successive `beacon` calls, cycled. An empty
    ///  pattern means every beacon succeeds.
    pub beacon_result_pattern: Vec<Result<(), LinkError>>,

    /// Results returned by successive `receive` calls. Once the script is
    ///  exhausted, further calls return `Ok(None)`.
    pub receive_script: Vec<Result<Option<LinkFrame>, LinkError>>,
}

struct MockLinkInner {
    beacon_count: u32,
    receive_index: usize,
    transmitted: Vec<LinkFrame>,
}

/// A scripted [`Link`] for unit tests: replays configured beacon and receive
///  results, records transmitted frames, and panics if a beacon misses its
///  schedule.
pub struct MockLink {
    config: MockLinkConfig,
    start_time: Instant,
    inner: Mutex<MockLinkInner>,
}

impl MockLink {
    pub fn new(config: MockLinkConfig) -> MockLink {
        MockLink {
            config,
            start_time: Instant::now(),
            inner: Mutex::new(MockLinkInner {
                beacon_count: 0,
                receive_index: 0,
                transmitted: Vec::new(),
            }),
        }
    }

    /// Waits until the configured scenario time has fully elapsed.
    pub async fn wait_for_complete(&self) {
        while self.start_time.elapsed() <= self.config.mock_time {
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub fn beacon_count(&self) -> u32 {
        self.inner.lock().expect("mock link mutex poisoned").beacon_count
    }

    /// All frames transmitted so far, in order.
    pub fn transmitted(&self) -> Vec<LinkFrame> {
        self.inner.lock().expect("mock link mutex poisoned").transmitted.clone()
    }
}

#[async_trait]
impl Link for MockLink {
    async fn beacon(&self) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().expect("mock link mutex poisoned");

        let relative = self.start_time.elapsed();
        let expected = self.config.beacon_interval * inner.beacon_count;
        assert!(
            relative >= expected && relative < expected + BEACON_SCHEDULE_SLACK,
            "beacon {} off schedule: expected within [{:?}, {:?}), was {:?}",
            inner.beacon_count, expected, expected + BEACON_SCHEDULE_SLACK, relative,
        );

        let result = if self.config.beacon_result_pattern.is_empty() {
            Ok(())
        }
        else {
            let index = inner.beacon_count as usize % self.config.beacon_result_pattern.len();
            self.config.beacon_result_pattern[index].clone()
        };
        inner.beacon_count += 1;
        result
    }

    async fn receive(&self) -> Result<Option<LinkFrame>, LinkError> {
        let mut inner = self.inner.lock().expect("mock link mutex poisoned");
        match self.config.receive_script.get(inner.receive_index) {
            Some(result) => {
                inner.receive_index += 1;
                result.clone()
            }
            None => Ok(None),
        }
    }

    async fn transmit(&self, frame: &LinkFrame) -> Result<(), LinkError> {
        if frame.payload.len() > self.config.max_payload_size as usize {
            return Err(LinkError::FrameTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.inner.lock().expect("mock link mutex poisoned").transmitted.push(frame.clone());
        Ok(())
    }

    fn max_payload_size(&self) -> u32 {
        self.config.max_payload_size
    }
}

/// One side of an in-memory link pair. Frames transmitted on one side pop out
///  of the other side's `receive`, except where the drop script says the air
///  ate them.
pub struct SimulatedLink {
    address: u32,
    max_payload_size: u32,
    to_peer: mpsc::UnboundedSender<LinkFrame>,
    from_peer: Mutex<mpsc::UnboundedReceiver<LinkFrame>>,
    drop_script: Mutex<VecDeque<bool>>,
    transmitted: Mutex<Vec<LinkFrame>>,
}

impl SimulatedLink {
    /// Creates a connected pair of links for the two given station addresses.
    pub fn pair(primary_addr: u32, secondary_addr: u32, max_payload_size: u32) -> (SimulatedLink, SimulatedLink) {
        let (to_secondary, from_primary) = mpsc::unbounded_channel();
        let (to_primary, from_secondary) = mpsc::unbounded_channel();

        let primary = SimulatedLink {
            address: primary_addr,
            max_payload_size,
            to_peer: to_secondary,
            from_peer: Mutex::new(from_secondary),
            drop_script: Mutex::new(VecDeque::new()),
            transmitted: Mutex::new(Vec::new()),
        };
        let secondary = SimulatedLink {
            address: secondary_addr,
            max_payload_size,
            to_peer: to_primary,
            from_peer: Mutex::new(from_primary),
            drop_script: Mutex::new(VecDeque::new()),
            transmitted: Mutex::new(Vec::new()),
        };
        (primary, secondary)
    }

    /// Configures which upcoming transmissions the simulated air swallows:
    ///  one entry per `transmit` call, `true` meaning the frame is lost.
    ///  Once the script is exhausted, every frame is delivered.
    pub fn set_drop_script(&self, script: Vec<bool>) {
        *self.drop_script.lock().expect("simulated link mutex poisoned") = script.into();
    }

    pub fn transmitted(&self) -> Vec<LinkFrame> {
        self.transmitted.lock().expect("simulated link mutex poisoned").clone()
    }
}

#[async_trait]
impl Link for SimulatedLink {
    async fn beacon(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn receive(&self) -> Result<Option<LinkFrame>, LinkError> {
        match self.from_peer.lock().expect("simulated link mutex poisoned").try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(_) => Ok(None),
        }
    }

    async fn transmit(&self, frame: &LinkFrame) -> Result<(), LinkError> {
        if frame.payload.len() > self.max_payload_size as usize {
            return Err(LinkError::FrameTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }

        self.transmitted.lock().expect("simulated link mutex poisoned").push(frame.clone());

        let dropped = self.drop_script.lock().expect("simulated link mutex poisoned")
            .pop_front()
            .unwrap_or(false);
        if dropped {
            return Ok(());
        }

        // the receiver sees the sender's address
        let delivered = LinkFrame {
            address: self.address,
            payload: frame.payload.clone(),
        };
        let _ = self.to_peer.send(delivered);
        Ok(())
    }

    fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }
}
