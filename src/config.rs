//! Explicit per-session configuration.
use crate::constants::*;
use crate::firmware::FirmwareSet;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::DeviceSession`].
///
/// Every tunable the driver core uses lives here, so separate sessions can
/// run with different settings.  Use `..Default::default()` to override a
/// subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Log every frame and event at debug rather than trace level
    pub debug: bool,
    /// Capacity of each per-port queue
    pub queue_capacity: usize,
    /// Receive depth at which RX is disabled on the device
    pub high_water: usize,
    /// Receive depth at which RX is re-enabled on the device
    pub low_water: usize,
    /// Transmitted bytes after which a SEND_NEXT acknowledgement is requested
    pub trigger_send_next: usize,
    /// Delay between firmware blocks
    pub fw_block_delay: Duration,
    /// Delay after STOP_FW_DOWN and after QUERY_FW_READY
    pub fw_settle_delay: Duration,
    /// Interval between GET_OUTQUEUE polls when waiting for tx to drain
    pub drain_poll_interval: Duration,
    /// Maximum GET_OUTQUEUE polls when waiting for tx to drain
    pub drain_max_polls: u32,
    /// Timeout for synchronous control requests
    pub control_timeout: Duration,
    /// Directory holding `moxa-XXXX.fw` images
    pub firmware_dir: Option<PathBuf>,
    /// Firmware images to offer the device at attach.  Populated from
    /// `firmware_dir` by [`crate::SessionBuilder`], or directly.
    #[serde(skip)]
    pub firmware: FirmwareSet,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            queue_capacity: MAX_QUEUE_SIZE,
            high_water: HIGH_WATER_SIZE,
            low_water: LOW_WATER_SIZE,
            trigger_send_next: TRIGGER_SEND_NEXT,
            fw_block_delay: DEFAULT_FW_BLOCK_DELAY,
            fw_settle_delay: DEFAULT_FW_SETTLE_DELAY,
            drain_poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
            drain_max_polls: DEFAULT_DRAIN_MAX_POLLS,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            firmware_dir: None,
            firmware: FirmwareSet::default(),
        }
    }
}

impl SessionConfig {
    /// Check the queue and watermark settings are consistent
    pub fn validate(&self) -> Result<(), Error> {
        trace!("SessionConfig::validate");
        let message = if self.queue_capacity <= HEADER_SIZE {
            format!(
                "Queue capacity {} must exceed the {HEADER_SIZE} byte frame header",
                self.queue_capacity
            )
        } else if self.high_water > self.queue_capacity {
            format!(
                "High water {} exceeds queue capacity {}",
                self.high_water, self.queue_capacity
            )
        } else if self.low_water >= self.high_water {
            format!(
                "Low water {} must be below high water {}",
                self.low_water, self.high_water
            )
        } else if self.trigger_send_next == 0 {
            "Send next trigger must be non-zero".to_string()
        } else {
            return Ok(());
        };
        warn!("{message}");
        Err(Error::Args { message })
    }
}
