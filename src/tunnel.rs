//! The virtual network interface seam and the tunnel-read worker.
//!
//! The core does not create or configure the TUN device - it consumes an
//!  already-open file descriptor whose reads yield exactly one IP datagram per
//!  call and whose writes accept one datagram per call.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::unix::AsyncFd;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// The queue of outbound datagrams, shared between the transport task and the
///  tunnel-read task.
pub(crate) type ReadBuffer = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// Upper bound for a single IP datagram read from the device.
const MAX_DATAGRAM_LEN: usize = 65535;

/// Abstraction over the TUN file descriptor, introduced to facilitate mocking
///  the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TunDevice: Send + Sync + 'static {
    /// Reads exactly one IP datagram, blocking until one is available.
    async fn read_datagram(&self) -> anyhow::Result<Vec<u8>>;

    /// Writes one IP datagram.
    async fn write_datagram(&self, datagram: &[u8]) -> anyhow::Result<()>;
}

/// [`TunDevice`] implementation over an externally opened TUN descriptor.
pub struct TunnelFd {
    fd: AsyncFd<OwnedFd>,
}

impl TunnelFd {
    /// Takes ownership of the already-open descriptor and switches it to
    ///  non-blocking mode.
    pub fn new(tunnel_fd: RawFd) -> anyhow::Result<TunnelFd> {
        let owned = unsafe { OwnedFd::from_raw_fd(tunnel_fd) };
        set_nonblocking(&owned)?;
        let fd = AsyncFd::new(owned)
            .context("failed to register the tunnel fd with the runtime")?;
        Ok(TunnelFd { fd })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> anyhow::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error()).context("failed to read tunnel fd flags");
    }
    let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(std::io::Error::last_os_error()).context("failed to set the tunnel fd non-blocking");
    }
    Ok(())
}

#[async_trait]
impl TunDevice for TunnelFd {
    async fn read_datagram(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0; MAX_DATAGRAM_LEN];
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                let num_read = unsafe {
                    libc::read(inner.get_ref().as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if num_read < 0 {
                    Err(std::io::Error::last_os_error())
                }
                else {
                    Ok(num_read as usize)
                }
            });

            match result {
                Ok(Ok(num_read)) => {
                    buf.truncate(num_read);
                    return Ok(buf);
                }
                Ok(Err(e)) => return Err(e).context("failed to read from the tunnel fd"),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_datagram(&self, datagram: &[u8]) -> anyhow::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| {
                let num_written = unsafe {
                    libc::write(inner.get_ref().as_raw_fd(), datagram.as_ptr() as *const libc::c_void, datagram.len())
                };
                if num_written < 0 {
                    Err(std::io::Error::last_os_error())
                }
                else {
                    Ok(num_written as usize)
                }
            });

            match result {
                Ok(Ok(num_written)) => {
                    if num_written != datagram.len() {
                        warn!("short write to the tunnel fd: {} of {} bytes", num_written, datagram.len());
                    }
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e).context("failed to write to the tunnel fd"),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Spawns the tunnel-read worker: it reads full datagrams from the device and
///  appends them to the read buffer, independently of the transport loop so
///  that the transport never blocks on the TUN.
pub(crate) fn spawn_tunnel_reader(tun: Arc<dyn TunDevice>, read_buffer: ReadBuffer) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("starting tunnel reader");
        loop {
            match tun.read_datagram().await {
                Ok(datagram) if datagram.is_empty() => {
                    warn!("tunnel device returned an empty read - stopping the reader");
                    break;
                }
                Ok(datagram) => {
                    trace!("queueing a datagram of {} bytes from the tunnel", datagram.len());
                    read_buffer.lock().await.push_back(datagram);
                }
                Err(e) => {
                    error!("error reading from the tunnel device: {:#}", e);
                    break;
                }
            }
        }
    })
}
