//! Register map and raw register access for the M37 module.
//!
//! The module exposes a 256-byte window with 16-bit registers:
//!
//! ```text
//!  offset  read            write
//!  0x00    -               data channel 0
//!  0x02    -               data channel 1
//!  0x04    -               data channel 2
//!  0x06    -               data channel 3
//!  0x40    status          configuration
//!  0xFE    -               serial load (programmable logic)
//! ```
//!
//! The configuration register cannot be read back (reads at `0x40` return
//! the status register), so [`Registers`] keeps a shadow of the last value
//! written and applies every set/clear to that shadow before writing it out.

use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{error, trace};

use crate::error::{M37Error, Result};
use crate::frame::{Frame, CHANNEL_COUNT};

/// Size of the register window in bytes.
pub const WINDOW_SIZE: usize = 256;

/// Offset of the status (read) / configuration (write) register.
pub const STATUS_REG: u16 = 0x40;

/// Offset of the configuration register (shared with status).
pub const CONFIG_REG: u16 = 0x40;

/// Offset of the serial load register.
pub const LOAD_REG: u16 = 0xFE;

/// Number of 16-bit words in the identity window.
pub const ID_WORDS: usize = 64;

/// Identity word 0 of every module.
pub const ID_MAGIC: u16 = 0x5346;

/// Identity word 1 of an M37.
pub const ID_M37: u16 = 0x0025;

/// Identity word 1 of an M37N.
pub const ID_M37N: u16 = 0x7D25;

/// Offset of the data register for `channel`.
pub const fn data_reg(channel: usize) -> u16 {
    (channel as u16) << 1
}

bitflags! {
    /// Configuration register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigFlags: u16 {
        /// Update strobe: latch the data registers into the converters
        const UPDATE = 0x01;
        /// External trigger enable
        const EXTERNAL_ENABLE = 0x02;
        /// Interrupt enable
        const IRQ_ENABLE = 0x04;
        /// Analog output enable
        const OUTPUT_ENABLE = 0x08;
    }
}

bitflags! {
    /// Status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        /// Transfer accepted, hardware buffer ready for the next frame
        const BUFFER_READY = 0x01;
        /// Interrupt pending
        const IRQ_PENDING = 0x04;
        /// Analog power supply present
        const POWER = 0x10;
    }
}

bitflags! {
    /// Serial load register lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadLines: u16 {
        /// Data
        const TDO = 0x01;
        /// Clock
        const TCK = 0x02;
        /// Mode select
        const TMS = 0x08;
    }
}

/// Raw 16-bit access to a module's register and identity windows.
///
/// Implementations must perform each access as a single bus cycle; the
/// driver relies on the order in which calls are made.
pub trait RegisterAccess: Send + Sync {
    /// Read the register at byte `offset`.
    fn read16(&self, offset: u16) -> u16;

    /// Write `value` to the register at byte `offset`.
    fn write16(&self, offset: u16, value: u16);

    /// Read word `index` of the identity window.
    fn read_id_word(&self, index: u16) -> u16;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn read16(&self, offset: u16) -> u16 {
        (**self).read16(offset)
    }

    fn write16(&self, offset: u16, value: u16) {
        (**self).write16(offset, value)
    }

    fn read_id_word(&self, index: u16) -> u16 {
        (**self).read_id_word(index)
    }
}

/// Poll budget for the update handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Status reads before giving up (at least 1)
    pub max_polls: u32,
    /// Delay between two status reads
    pub poll_interval: Duration,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Register layer shared by the application and interrupt paths.
pub(crate) struct Registers {
    access: Box<dyn RegisterAccess>,
    /// Shadow of the write-only configuration register.
    /// Held only for the read-modify-write of a single register.
    config: Mutex<ConfigFlags>,
}

impl Registers {
    pub(crate) fn new(access: Box<dyn RegisterAccess>) -> Self {
        Self {
            access,
            config: Mutex::new(ConfigFlags::empty()),
        }
    }

    pub(crate) fn status(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.access.read16(STATUS_REG))
    }

    /// Last value written to the configuration register.
    pub(crate) fn config(&self) -> ConfigFlags {
        *self.config.lock()
    }

    /// Overwrite the configuration register.
    pub(crate) fn write_config(&self, flags: ConfigFlags) {
        let mut shadow = self.config.lock();
        *shadow = flags;
        self.access.write16(CONFIG_REG, flags.bits());
    }

    /// Apply `f` to the shadow and write the result.
    pub(crate) fn modify_config(&self, f: impl FnOnce(&mut ConfigFlags)) {
        let mut shadow = self.config.lock();
        f(&mut shadow);
        self.access.write16(CONFIG_REG, shadow.bits());
    }

    /// Write all four data registers in channel order.
    pub(crate) fn write_frame(&self, frame: &Frame) {
        for (channel, value) in frame.values().into_iter().enumerate() {
            self.access.write16(data_reg(channel), value);
        }
    }

    /// Assert the update strobe.
    pub(crate) fn strobe_update(&self) {
        self.modify_config(|c| c.insert(ConfigFlags::UPDATE));
    }

    /// Poll status until buffer-ready, failing fast on power loss.
    ///
    /// Returns the number of status reads it took.
    pub(crate) fn wait_ready(&self, policy: &HandshakePolicy) -> Result<u32> {
        let max_polls = policy.max_polls.max(1);
        for poll in 1..=max_polls {
            let status = self.status();
            if !status.contains(StatusFlags::POWER) {
                error!(status = status.bits(), "Analog power supply failed");
                return Err(M37Error::DeviceNotReady {
                    message: "analog power supply absent".to_string(),
                });
            }
            if status.contains(StatusFlags::BUFFER_READY) {
                trace!(polls = poll, "Buffer ready");
                return Ok(poll);
            }
            if poll < max_polls {
                thread::sleep(policy.poll_interval);
            }
        }

        error!(polls = max_polls, "Buffer ready timeout");
        Err(M37Error::Timeout { polls: max_polls })
    }

    pub(crate) fn write_load(&self, lines: LoadLines) {
        self.access.write16(LOAD_REG, lines.bits());
    }

    pub(crate) fn id_word(&self, index: u16) -> u16 {
        self.access.read_id_word(index)
    }
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registers")
            .field("config", &self.config())
            .finish()
    }
}

const _: () = assert!(data_reg(CHANNEL_COUNT - 1) < STATUS_REG);
