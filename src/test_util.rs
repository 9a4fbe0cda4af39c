//! Shared helpers for transport tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::tunnel::TunDevice;

/// A [`TunDevice`] driven by the test: datagrams pushed through the handle
///  come out of `read_datagram`, and everything the transport writes is
///  recorded for inspection. Reads block forever once the feed is idle, like
///  a real quiet TUN device.
pub struct ChannelTun {
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

pub struct ChannelTunHandle {
    feed_tx: mpsc::UnboundedSender<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ChannelTun {
    pub fn new() -> (ChannelTun, ChannelTunHandle) {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));

        let tun = ChannelTun {
            incoming: tokio::sync::Mutex::new(feed_rx),
            written: written.clone(),
        };
        let handle = ChannelTunHandle { feed_tx, written };
        (tun, handle)
    }
}

impl ChannelTunHandle {
    /// Makes the device's next read yield this datagram.
    pub fn feed(&self, datagram: Vec<u8>) {
        self.feed_tx.send(datagram).expect("channel tun was dropped");
    }

    /// All datagrams written to the device so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().expect("channel tun mutex poisoned").clone()
    }

    /// Waits until the transport has written at least `count` datagrams.
    pub async fn wait_for_writes(&self, count: usize) {
        while self.written.lock().expect("channel tun mutex poisoned").len() < count {
            sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl TunDevice for ChannelTun {
    async fn read_datagram(&self) -> anyhow::Result<Vec<u8>> {
        match self.incoming.lock().await.recv().await {
            Some(datagram) => Ok(datagram),
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn write_datagram(&self, datagram: &[u8]) -> anyhow::Result<()> {
        self.written.lock().expect("channel tun mutex poisoned").push(datagram.to_vec());
        Ok(())
    }
}
