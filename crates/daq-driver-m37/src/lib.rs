//! Driver for the M37 four-channel 16-bit analog output module.
//!
//! The M37 has four independent DAC channels behind a small register window.
//! Values reach the converters only through an update handshake: the four
//! data registers are written, the update strobe is asserted, and the status
//! register is polled until the module reports buffer-ready. Loss of the
//! analog power supply aborts the handshake at once.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`M37Device`] - Initialized module with committed-value store and RAII teardown
//! - [`M37DeviceBuilder`] - Initialization sequence (identity check, logic load, zeroing)
//! - [`backends::MmioWindow`] / [`backends::SimulatedModule`] - Register access
//!
//! ## Output Paths
//! - Direct: [`M37Device::write_channel`] and single-frame [`M37Device::write_block`]
//!   commit synchronously
//! - Buffered: in ring buffer mode with external trigger and interrupts enabled,
//!   block writes queue [`Frame`]s in the [`OutputBuffer`] and
//!   [`M37Device::handle_interrupt`] feeds one frame to the hardware per trigger
//!
//! ## Control
//! - [`StatusCode`] / [`M37Device::set_stat`] / [`M37Device::get_stat`]
//! - [`InfoQuery`] - Capability descriptors
//! - [`M37Config`] - TOML configuration
//! - [`hal::AsyncOutput`] - Tokio façade
//!
//! # Example
//!
//! ```no_run
//! use daq_driver_m37::backends::SimulatedModule;
//! use daq_driver_m37::{M37Config, M37Device};
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut config = M37Config::default();
//! config.pld_load = false;
//!
//! let device = M37Device::init(SimulatedModule::new(), config)?;
//! device.write_channel(0, 0x7FFF)?;
//! assert_eq!(device.channel_values().values(), [0x7FFF, 0, 0, 0]);
//! device.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod bitstream;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod hal;
pub mod irq;
pub mod output;
pub mod regs;
pub mod status;

pub use bitstream::Bitstream;
pub use buffer::{BufferMode, OutputBuffer};
pub use config::{BufferConfig, HandshakeConfig, M37Config};
pub use device::{M37Device, M37DeviceBuilder, TriggerMode, IDENT};
pub use error::{M37Error, Result};
pub use frame::{code_to_volts, volts_to_code, Frame, CHANNEL_COUNT, FRAME_BYTES};
pub use irq::IrqStatus;
pub use regs::{ConfigFlags, HandshakePolicy, RegisterAccess, StatusFlags};
pub use status::{
    AddrMode, BlockStatusCode, BufferCode, ChannelDirection, ChannelType, DataModes, InfoQuery,
    InfoResponse, LockMode, StatusCode,
};
