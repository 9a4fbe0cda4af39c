use std::os::fd::RawFd;
use std::time::Duration;

use anyhow::bail;

/// Configuration shared by both endpoint roles.
pub struct RadioTunConfig {
    /// The chip-enable line of the radio. Opaque to the transport; it is
    ///  forwarded to whatever initializes the physical radio driver.
    pub ce_pin: u16,

    /// An already-open TUN file descriptor. The transport takes ownership of
    ///  it but never creates or configures the device - reads must yield
    ///  exactly one IP datagram per call, writes must accept one per call.
    pub tunnel_fd: RawFd,

    /// Station address of the primary endpoint.
    pub primary_addr: u32,

    /// Station address of the secondary endpoint.
    pub secondary_addr: u32,

    /// The primary's per-request timeout: how long to poll for a response
    ///  before the request is considered lost and retransmitted.
    ///
    /// This bounds the worst case turnaround of the radio (transmit, remote
    ///  processing, response transmit). Choosing it too small retransmits
    ///  requests whose responses are still in the air; choosing it too big
    ///  wastes the channel after an actual loss.
    pub rf_delay: Duration,

    /// Interval of the primary's presence beacons.
    pub beacon_interval: Duration,

    /// Pacing of the poll loops: the pause between transfer cycles on the
    ///  primary and between empty receive polls on the secondary.
    pub poll_interval: Duration,
}

impl RadioTunConfig {
    pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    pub fn new(ce_pin: u16, tunnel_fd: RawFd, primary_addr: u32, secondary_addr: u32, rf_delay_us: u64) -> RadioTunConfig {
        RadioTunConfig {
            ce_pin,
            tunnel_fd,
            primary_addr,
            secondary_addr,
            rf_delay: Duration::from_micros(rf_delay_us),
            beacon_interval: Self::DEFAULT_BEACON_INTERVAL,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.primary_addr == 0 || self.secondary_addr == 0 {
            bail!("station addresses cannot be 0");
        }
        if self.primary_addr == self.secondary_addr {
            bail!("primary and secondary addresses must differ");
        }
        if self.rf_delay.is_zero() {
            bail!("rf delay cannot be zero");
        }
        if self.beacon_interval.is_zero() {
            bail!("beacon interval cannot be zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid_config() -> RadioTunConfig {
        RadioTunConfig::new(25, 3, 0x0a0a0a0a, 0x0b0b0b0b, 5_000)
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
        assert_eq!(valid_config().rf_delay, Duration::from_millis(5));
    }

    #[rstest]
    #[case::zero_primary(|c: &mut RadioTunConfig| c.primary_addr = 0)]
    #[case::zero_secondary(|c: &mut RadioTunConfig| c.secondary_addr = 0)]
    #[case::equal_addresses(|c: &mut RadioTunConfig| c.secondary_addr = c.primary_addr)]
    #[case::zero_rf_delay(|c: &mut RadioTunConfig| c.rf_delay = Duration::ZERO)]
    #[case::zero_beacon_interval(|c: &mut RadioTunConfig| c.beacon_interval = Duration::ZERO)]
    fn test_invalid_config(#[case] break_config: fn(&mut RadioTunConfig)) {
        let mut config = valid_config();
        break_config(&mut config);
        assert!(config.validate().is_err());
    }
}
