//! Device context, initialization and teardown.
//!
//! [`M37Device`] owns the register window, the committed channel values and
//! the streaming buffer. It is shared by reference between application
//! threads and the interrupt dispatcher, usually behind an `Arc`.
//!
//! # Example
//!
//! ```rust,no_run
//! use daq_driver_m37::backends::MmioWindow;
//! use daq_driver_m37::{M37Config, M37Device};
//!
//! let window = MmioWindow::open_with_identity("/dev/uio0", "/dev/uio0", 4096)?;
//! let config = M37Config::load("/etc/m37.toml")?;
//! let device = M37Device::builder(window).config(config).build()?;
//!
//! device.write_channel(0, 0x7FFF)?;
//! device.close()?;
//! # Ok::<(), daq_driver_m37::M37Error>(())
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bitstream::{load_bitstream, Bitstream};
use crate::buffer::{BufferMode, OutputBuffer};
use crate::config::M37Config;
use crate::error::{M37Error, Result};
use crate::frame::Frame;
use crate::regs::{
    ConfigFlags, HandshakePolicy, RegisterAccess, Registers, StatusFlags, ID_M37, ID_M37N,
    ID_MAGIC, ID_WORDS,
};

/// Driver identification string.
pub const IDENT: &str = concat!(
    "daq-driver-m37 ",
    env!("CARGO_PKG_VERSION"),
    ": M37 4-channel 16-bit analog output"
);

/// Source of the update strobe for buffered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Updates are strobed by the driver
    #[default]
    Internal,
    /// Updates are strobed by the external trigger input
    External,
}

impl TriggerMode {
    /// Mode selected by the `ext_trig` configuration flag.
    pub fn from_external(external: bool) -> Self {
        if external {
            Self::External
        } else {
            Self::Internal
        }
    }

    /// Whether updates come from the external trigger input.
    pub fn is_external(self) -> bool {
        self == Self::External
    }
}

/// An initialized M37 module.
///
/// All methods take `&self`. Direct writes are serialized by a commit lock
/// that the interrupt handler never takes.
pub struct M37Device {
    pub(crate) regs: Registers,
    /// Last frame accepted by the hardware
    pub(crate) store: Mutex<Frame>,
    pub(crate) buffer: OutputBuffer,
    pub(crate) handshake: HandshakePolicy,
    pub(crate) ext_trigger: AtomicBool,
    /// Streaming permitted by the application
    pub(crate) irq_enabled: AtomicBool,
    /// A buffered write is in progress
    pub(crate) irq_armed: AtomicBool,
    pub(crate) irq_count: AtomicU32,
    pub(crate) debug_level: AtomicU32,
    id_check: bool,
    closed: AtomicBool,
    commit_lock: Mutex<()>,
}

/// Builder for [`M37Device`].
pub struct M37DeviceBuilder {
    access: Box<dyn RegisterAccess>,
    config: M37Config,
    bitstream: Option<Bitstream>,
}

impl M37DeviceBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: M37Config) -> Self {
        self.config = config;
        self
    }

    /// Bitstream to load; takes precedence over `config.pld_image`.
    pub fn bitstream(mut self, bitstream: Bitstream) -> Self {
        self.bitstream = Some(bitstream);
        self
    }

    /// Initialize the module.
    ///
    /// On error every partially built resource has been dropped and the
    /// hardware is left as the failing step found it.
    pub fn build(self) -> Result<M37Device> {
        let Self {
            access,
            config,
            bitstream,
        } = self;

        config.validate()?;
        let buffer = OutputBuffer::new(&config.buffer)?;
        let regs = Registers::new(access);
        let id_check = config.effective_id_check();

        if id_check {
            check_identity(&regs)?;
        }

        if config.pld_load {
            let bitstream = match (bitstream, &config.pld_image) {
                (Some(bitstream), _) => bitstream,
                (None, Some(path)) => Bitstream::load(path)?,
                (None, None) => {
                    return Err(M37Error::InvalidConfig {
                        message: "pld_load is enabled but no bitstream image was given"
                            .to_string(),
                    })
                }
            };
            load_bitstream(&regs, &bitstream);
        }

        // Torn down only once fully initialized
        let device = M37Device {
            regs,
            store: Mutex::new(Frame::ZERO),
            buffer,
            handshake: config.handshake_policy(),
            ext_trigger: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            irq_armed: AtomicBool::new(false),
            irq_count: AtomicU32::new(0),
            debug_level: AtomicU32::new(config.debug_level),
            id_check,
            closed: AtomicBool::new(true),
            commit_lock: Mutex::new(()),
        };

        device.regs.write_config(ConfigFlags::OUTPUT_ENABLE);

        // Two-stage hardware buffer: both stages get zeros
        device.commit(Frame::ZERO)?;
        device.commit(Frame::ZERO)?;

        device.apply_trigger_mode(TriggerMode::from_external(config.ext_trig))?;
        device.closed.store(false, Ordering::Release);

        info!(
            id_check,
            pld_load = config.pld_load,
            ext_trig = config.ext_trig,
            buffer_mode = ?config.buffer.mode,
            "M37 initialized"
        );
        Ok(device)
    }
}

fn check_identity(regs: &Registers) -> Result<()> {
    let magic = regs.id_word(0);
    let id = regs.id_word(1);

    if magic != ID_MAGIC || !matches!(id, ID_M37 | ID_M37N) {
        error!(magic, id, "Illegal module identity");
        return Err(M37Error::IllegalIdentity { magic, id });
    }
    info!(id = format_args!("{:#06x}", id), "Module identity found");
    Ok(())
}

impl M37Device {
    /// Start building a device on `access`.
    pub fn builder(access: impl RegisterAccess + 'static) -> M37DeviceBuilder {
        M37DeviceBuilder {
            access: Box::new(access),
            config: M37Config::default(),
            bitstream: None,
        }
    }

    /// Initialize with `config`, loading the bitstream from `config.pld_image`.
    pub fn init(access: impl RegisterAccess + 'static, config: M37Config) -> Result<Self> {
        Self::builder(access).config(config).build()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(M37Error::invalid_state("device is closed"));
        }
        Ok(())
    }

    /// Commit `frame` through the full update handshake.
    ///
    /// On success the channel store holds `frame`; on failure it is
    /// unchanged.
    pub fn commit_frame(&self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        self.commit(frame)
    }

    pub(crate) fn commit(&self, frame: Frame) -> Result<()> {
        let guard = self.lock_commits();
        self.commit_locked(&guard, frame)
    }

    /// Serialize commits; hold the guard across any read of the store that
    /// the next commit depends on.
    pub(crate) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    pub(crate) fn commit_locked(&self, _guard: &MutexGuard<'_, ()>, frame: Frame) -> Result<()> {
        self.regs.write_frame(&frame);
        self.regs.strobe_update();
        let polls = self.regs.wait_ready(&self.handshake)?;

        *self.store.lock() = frame;
        debug!(?frame, polls, "Frame committed");
        Ok(())
    }

    /// Select the update trigger source.
    ///
    /// Internal trigger is refused while interrupt streaming is enabled.
    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        self.ensure_open()?;
        self.apply_trigger_mode(mode)
    }

    fn apply_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        match mode {
            TriggerMode::External => {
                self.regs.modify_config(|c| {
                    c.remove(ConfigFlags::UPDATE);
                    c.insert(ConfigFlags::EXTERNAL_ENABLE);
                });
                self.ext_trigger.store(true, Ordering::Release);
            }
            TriggerMode::Internal => {
                if self.irq_enabled.load(Ordering::Acquire) {
                    return Err(M37Error::invalid_state(
                        "disable interrupts before leaving external trigger mode",
                    ));
                }
                self.regs
                    .modify_config(|c| c.remove(ConfigFlags::EXTERNAL_ENABLE | ConfigFlags::UPDATE));
                self.ext_trigger.store(false, Ordering::Release);
            }
        }
        debug!(?mode, "Trigger mode set");
        Ok(())
    }

    /// Current trigger source.
    pub fn trigger_mode(&self) -> TriggerMode {
        TriggerMode::from_external(self.ext_trigger.load(Ordering::Acquire))
    }

    /// Permit or stop interrupt-driven streaming.
    ///
    /// Enabling requires external trigger and ring buffer mode and only sets
    /// the software flag; the hardware interrupt is armed by the next
    /// buffered write. Disabling takes effect in hardware immediately.
    pub fn set_interrupt_enable(&self, enable: bool) -> Result<()> {
        self.ensure_open()?;

        if enable {
            if !self.ext_trigger.load(Ordering::Acquire) {
                return Err(M37Error::invalid_state(
                    "interrupts require external trigger mode",
                ));
            }
            if self.buffer.mode() != BufferMode::RingBuffer {
                return Err(M37Error::invalid_state(
                    "interrupts require ring buffer mode",
                ));
            }
            self.irq_enabled.store(true, Ordering::Release);
        } else {
            self.regs
                .modify_config(|c| c.remove(ConfigFlags::IRQ_ENABLE | ConfigFlags::UPDATE));
            self.irq_enabled.store(false, Ordering::Release);
            self.irq_armed.store(false, Ordering::Release);
        }
        debug!(enable, "Interrupt streaming");
        Ok(())
    }

    /// Whether interrupt streaming is enabled.
    pub fn interrupts_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Acquire)
    }

    /// Whether a buffered write is currently feeding the buffer.
    pub fn is_armed(&self) -> bool {
        self.irq_armed.load(Ordering::Acquire)
    }

    /// Last frame accepted by the hardware.
    pub fn channel_values(&self) -> Frame {
        *self.store.lock()
    }

    /// Last value written to the configuration register.
    pub fn config_register(&self) -> ConfigFlags {
        self.regs.config()
    }

    /// Interrupts serviced so far.
    pub fn interrupt_count(&self) -> u32 {
        self.irq_count.load(Ordering::Relaxed)
    }

    /// Overwrite the interrupt counter.
    pub fn set_interrupt_count(&self, count: u32) {
        self.irq_count.store(count, Ordering::Relaxed);
    }

    /// Driver debug level.
    pub fn debug_level(&self) -> u32 {
        self.debug_level.load(Ordering::Relaxed)
    }

    /// Set the driver debug level.
    pub fn set_debug_level(&self, level: u32) {
        self.debug_level.store(level, Ordering::Relaxed);
    }

    /// Whether the analog power supply is present.
    pub fn power_present(&self) -> bool {
        self.regs.status().contains(StatusFlags::POWER)
    }

    /// The streaming buffer.
    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Whether the identity was checked at init.
    pub fn id_check_enabled(&self) -> bool {
        self.id_check
    }

    /// Raw identity PROM contents.
    pub fn identity_words(&self) -> [u16; ID_WORDS] {
        let mut words = [0u16; ID_WORDS];
        for (index, word) in words.iter_mut().enumerate() {
            *word = self.regs.id_word(index as u16);
        }
        words
    }

    /// Identity PROM as bytes, each word big-endian.
    pub fn identity_data(&self) -> Vec<u8> {
        self.identity_words()
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect()
    }

    /// Driver identification string.
    pub fn ident(&self) -> &'static str {
        IDENT
    }

    /// Whether the device has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Quiesce the hardware and release the buffer.
    ///
    /// Interrupts and external trigger are switched off, all channels are
    /// zeroed through one handshake, and the configuration register is
    /// cleared even if that handshake fails. Its error, if any, is returned.
    /// Calling `close` again does nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.teardown()
    }

    fn teardown(&self) -> Result<()> {
        self.regs.modify_config(|c| {
            c.remove(ConfigFlags::IRQ_ENABLE | ConfigFlags::EXTERNAL_ENABLE | ConfigFlags::UPDATE)
        });
        self.irq_enabled.store(false, Ordering::Release);
        self.irq_armed.store(false, Ordering::Release);
        self.ext_trigger.store(false, Ordering::Release);
        self.buffer.close();

        let result = self.commit(Frame::ZERO);
        if let Err(ref e) = result {
            warn!(error = %e, "Zeroing channels on close failed");
        }
        self.regs.write_config(ConfigFlags::empty());

        info!(interrupts = self.interrupt_count(), "M37 closed");
        result
    }
}

impl Drop for M37Device {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.teardown() {
                warn!(error = %e, "Teardown on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for M37Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("M37Device")
            .field("channels", &self.channel_values())
            .field("trigger", &self.trigger_mode())
            .field("irq_enabled", &self.interrupts_enabled())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
