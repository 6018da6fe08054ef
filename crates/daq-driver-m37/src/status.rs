//! Status codes and capability queries.
//!
//! Every tunable and readable driver value has a [`StatusCode`] with a raw
//! numeric form, so tools can address them by number:
//!
//! ```text
//!  0x0001..0x0009  driver      debug level, interrupts, channel geometry, identity
//!  0x1000..0x1001  module      external trigger, power supply
//!  0x2000..0x2007  buffer      mode, timeout, low-water, fill level, ...
//!  0x3000          block       identity PROM data
//! ```

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::BufferMode;
use crate::device::{M37Device, TriggerMode};
use crate::error::{M37Error, Result};
use crate::frame::{CHANNEL_BYTES, CHANNEL_COUNT};
use crate::regs::{ID_WORDS, WINDOW_SIZE};

const BUFFER_BASE: u32 = 0x2000;
const BUFFER_END: u32 = 0x2FFF;

/// Codes owned by the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCode {
    /// Buffer mode (raw [`BufferMode`])
    Mode,
    /// Write timeout in milliseconds, 0 = forever
    Timeout,
    /// Low-water mark in bytes
    LowWater,
    /// Low-water signalling on/off
    LowWaterSignal,
    /// Queued bytes (read-only)
    FillLevel,
    /// Capacity in bytes (read-only)
    Capacity,
    /// Underrun count (read-only)
    Underruns,
    /// Buffer debug level
    DebugLevel,
}

/// Driver status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Driver debug level
    DebugLevel,
    /// Interrupt streaming enable
    IrqEnable,
    /// Interrupt counter
    IrqCount,
    /// Number of channels (read-only)
    ChannelCount,
    /// Channel direction
    ChannelDirection,
    /// Channel width in bits (read-only)
    ChannelLength,
    /// Channel type (read-only)
    ChannelType,
    /// Identity check enabled (read-only)
    IdCheck,
    /// Identity PROM size in bytes (read-only)
    IdSize,
    /// External trigger mode
    ExtTrigger,
    /// Analog power supply present (read-only)
    PowerSupply,
    /// Output buffer code
    Buffer(BufferCode),
}

impl StatusCode {
    /// Raw code number.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::DebugLevel => 0x0001,
            Self::IrqEnable => 0x0002,
            Self::IrqCount => 0x0003,
            Self::ChannelCount => 0x0004,
            Self::ChannelDirection => 0x0005,
            Self::ChannelLength => 0x0006,
            Self::ChannelType => 0x0007,
            Self::IdCheck => 0x0008,
            Self::IdSize => 0x0009,
            Self::ExtTrigger => 0x1000,
            Self::PowerSupply => 0x1001,
            Self::Buffer(code) => {
                BUFFER_BASE
                    + match code {
                        BufferCode::Mode => 0,
                        BufferCode::Timeout => 1,
                        BufferCode::LowWater => 2,
                        BufferCode::LowWaterSignal => 3,
                        BufferCode::FillLevel => 4,
                        BufferCode::Capacity => 5,
                        BufferCode::Underruns => 6,
                        BufferCode::DebugLevel => 7,
                    }
            }
        }
    }

    /// Parse a raw code number.
    pub fn from_raw(raw: u32) -> Result<Self> {
        let code = match raw {
            0x0001 => Self::DebugLevel,
            0x0002 => Self::IrqEnable,
            0x0003 => Self::IrqCount,
            0x0004 => Self::ChannelCount,
            0x0005 => Self::ChannelDirection,
            0x0006 => Self::ChannelLength,
            0x0007 => Self::ChannelType,
            0x0008 => Self::IdCheck,
            0x0009 => Self::IdSize,
            0x1000 => Self::ExtTrigger,
            0x1001 => Self::PowerSupply,
            BUFFER_BASE..=BUFFER_END => Self::Buffer(match raw - BUFFER_BASE {
                0 => BufferCode::Mode,
                1 => BufferCode::Timeout,
                2 => BufferCode::LowWater,
                3 => BufferCode::LowWaterSignal,
                4 => BufferCode::FillLevel,
                5 => BufferCode::Capacity,
                6 => BufferCode::Underruns,
                7 => BufferCode::DebugLevel,
                _ => return Err(M37Error::UnknownCode { code: raw }),
            }),
            _ => return Err(M37Error::UnknownCode { code: raw }),
        };
        Ok(code)
    }

    /// Whether `set_stat` accepts this code.
    pub fn is_settable(self) -> bool {
        matches!(
            self,
            Self::DebugLevel
                | Self::IrqEnable
                | Self::IrqCount
                | Self::ChannelDirection
                | Self::ExtTrigger
                | Self::Buffer(
                    BufferCode::Mode
                        | BufferCode::Timeout
                        | BufferCode::LowWater
                        | BufferCode::LowWaterSignal
                        | BufferCode::DebugLevel
                )
        )
    }
}

/// Block status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatusCode {
    /// Identity PROM contents, one big-endian word per two bytes
    IdData,
}

impl BlockStatusCode {
    /// Raw code number.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::IdData => 0x3000,
        }
    }

    /// Parse a raw code number.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0x3000 => Ok(Self::IdData),
            _ => Err(M37Error::UnknownCode { code: raw }),
        }
    }
}

/// Direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    /// Read only
    Input,
    /// Write only
    Output,
    /// Read and write
    InOut,
}

impl ChannelDirection {
    /// Raw status value.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
            Self::InOut => 2,
        }
    }

    /// Convert from the raw status value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            2 => Some(Self::InOut),
            _ => None,
        }
    }
}

/// Signal type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Digital signal
    Digital,
    /// Analog signal
    Analog,
}

impl ChannelType {
    /// Raw status value.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Digital => 0,
            Self::Analog => 1,
        }
    }
}

bitflags! {
    /// Bus data widths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataModes: u32 {
        /// 8-bit access
        const D08 = 0x01;
        /// 16-bit access
        const D16 = 0x02;
        /// 32-bit access
        const D32 = 0x04;
    }
}

/// Bus address width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    /// 8-bit addresses
    A08,
    /// 24-bit addresses
    A24,
}

/// How calls into the driver must be serialized by its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Fully reentrant
    None,
    /// One call at a time per device
    Call,
    /// One call at a time per channel
    Channel,
}

/// Capability question about the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    /// Every address and data mode the module supports
    HwCharacter,
    /// Number of address spaces
    AddrSpaceCount,
    /// Layout of address space `n`
    AddrSpace(u32),
    /// Whether an interrupt line is needed
    Irq,
    /// Required call serialization
    LockMode,
}

/// Answer to an [`InfoQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoResponse {
    /// Supported bus access
    HwCharacter {
        /// Address width
        addr: AddrMode,
        /// Data widths
        data: DataModes,
    },
    /// Number of address spaces
    AddrSpaceCount(u32),
    /// One address space
    AddrSpace {
        /// Address width
        addr: AddrMode,
        /// Data widths
        data: DataModes,
        /// Window size in bytes
        size: usize,
    },
    /// Interrupt line needed
    Irq(bool),
    /// Required call serialization
    LockMode(LockMode),
}

const ADDRSPACE_COUNT: u32 = 1;

fn flag(value: u32) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(M37Error::invalid_parameter(format!(
            "value {} out of range (0 or 1)",
            value
        ))),
    }
}

impl M37Device {
    /// Answer a capability query. Needs no device.
    pub fn info(query: InfoQuery) -> Result<InfoResponse> {
        let response = match query {
            InfoQuery::HwCharacter => InfoResponse::HwCharacter {
                addr: AddrMode::A08,
                data: DataModes::D08 | DataModes::D16,
            },
            InfoQuery::AddrSpaceCount => InfoResponse::AddrSpaceCount(ADDRSPACE_COUNT),
            InfoQuery::AddrSpace(index) if index < ADDRSPACE_COUNT => InfoResponse::AddrSpace {
                addr: AddrMode::A08,
                data: DataModes::D16,
                size: WINDOW_SIZE,
            },
            InfoQuery::AddrSpace(index) => {
                return Err(M37Error::invalid_parameter(format!(
                    "address space {} does not exist",
                    index
                )))
            }
            InfoQuery::Irq => InfoResponse::Irq(true),
            InfoQuery::LockMode => InfoResponse::LockMode(LockMode::Call),
        };
        Ok(response)
    }

    /// Set a status value.
    pub fn set_stat(&self, code: StatusCode, value: u32) -> Result<()> {
        self.ensure_open()?;
        debug!(?code, value, "SetStat");

        match code {
            StatusCode::DebugLevel => self.set_debug_level(value),
            StatusCode::IrqEnable => self.set_interrupt_enable(flag(value)?)?,
            StatusCode::IrqCount => self.set_interrupt_count(value),
            StatusCode::ChannelDirection => {
                if ChannelDirection::from_raw(value) != Some(ChannelDirection::Output) {
                    return Err(M37Error::invalid_parameter(
                        "channels are output only",
                    ));
                }
            }
            StatusCode::ExtTrigger => {
                self.set_trigger_mode(TriggerMode::from_external(flag(value)?))?
            }
            StatusCode::Buffer(BufferCode::Mode) => {
                let mode = BufferMode::from_raw(value).ok_or_else(|| {
                    M37Error::invalid_parameter(format!("unknown buffer mode {}", value))
                })?;
                if mode == BufferMode::UserControlled && self.interrupts_enabled() {
                    return Err(M37Error::invalid_parameter(
                        "disable interrupts before leaving ring buffer mode",
                    ));
                }
                self.buffer.set_mode(mode)?;
            }
            StatusCode::Buffer(BufferCode::Timeout) => self
                .buffer
                .set_timeout(Some(Duration::from_millis(u64::from(value)))),
            StatusCode::Buffer(BufferCode::LowWater) => {
                self.buffer.set_low_water(value as usize)?
            }
            StatusCode::Buffer(BufferCode::LowWaterSignal) => {
                self.buffer.set_low_water_signal(flag(value)?)
            }
            StatusCode::Buffer(BufferCode::DebugLevel) => self.buffer.set_debug_level(value),
            read_only => {
                return Err(M37Error::UnknownCode {
                    code: read_only.to_raw(),
                })
            }
        }
        Ok(())
    }

    /// Get a status value.
    pub fn get_stat(&self, code: StatusCode) -> Result<u32> {
        self.ensure_open()?;

        let value = match code {
            StatusCode::DebugLevel => self.debug_level(),
            StatusCode::IrqEnable => u32::from(self.interrupts_enabled()),
            StatusCode::IrqCount => self.interrupt_count(),
            StatusCode::ChannelCount => CHANNEL_COUNT as u32,
            StatusCode::ChannelDirection => ChannelDirection::Output.to_raw(),
            StatusCode::ChannelLength => (CHANNEL_BYTES * 8) as u32,
            StatusCode::ChannelType => ChannelType::Analog.to_raw(),
            StatusCode::IdCheck => u32::from(self.id_check_enabled()),
            StatusCode::IdSize => (ID_WORDS * 2) as u32,
            StatusCode::ExtTrigger => u32::from(self.trigger_mode().is_external()),
            StatusCode::PowerSupply => u32::from(self.power_present()),
            StatusCode::Buffer(code) => match code {
                BufferCode::Mode => self.buffer.mode().to_raw(),
                BufferCode::Timeout => self
                    .buffer
                    .timeout()
                    .map_or(0, |t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX)),
                BufferCode::LowWater => self.buffer.low_water() as u32,
                BufferCode::LowWaterSignal => u32::from(self.buffer.low_water_signal()),
                BufferCode::FillLevel => self.buffer.fill_level() as u32,
                BufferCode::Capacity => self.buffer.capacity() as u32,
                BufferCode::Underruns => self.buffer.underruns(),
                BufferCode::DebugLevel => self.buffer.debug_level(),
            },
        };
        Ok(value)
    }

    /// Set a status value by raw code number.
    pub fn set_stat_raw(&self, code: u32, value: u32) -> Result<()> {
        self.set_stat(StatusCode::from_raw(code)?, value)
    }

    /// Get a status value by raw code number.
    pub fn get_stat_raw(&self, code: u32) -> Result<u32> {
        self.get_stat(StatusCode::from_raw(code)?)
    }

    /// Get a block status value.
    pub fn get_block_stat(&self, code: BlockStatusCode) -> Result<Vec<u8>> {
        self.ensure_open()?;
        match code {
            BlockStatusCode::IdData => Ok(self.identity_data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedModule;
    use crate::config::M37Config;

    fn device() -> M37Device {
        let mut config = M37Config::default();
        config.pld_load = false;
        config.handshake.poll_interval_ms = 1;
        M37Device::init(SimulatedModule::new(), config).unwrap()
    }

    #[test]
    fn test_raw_codes() {
        let codes = [
            StatusCode::DebugLevel,
            StatusCode::IrqEnable,
            StatusCode::ChannelType,
            StatusCode::PowerSupply,
            StatusCode::Buffer(BufferCode::Mode),
            StatusCode::Buffer(BufferCode::DebugLevel),
        ];
        for code in codes {
            assert_eq!(StatusCode::from_raw(code.to_raw()).unwrap(), code);
        }
        assert!(matches!(
            StatusCode::from_raw(0x2050),
            Err(M37Error::UnknownCode { code: 0x2050 })
        ));
        assert!(StatusCode::from_raw(0x4242).is_err());
    }

    #[test]
    fn test_fixed_geometry() {
        let device = device();
        assert_eq!(device.get_stat(StatusCode::ChannelCount).unwrap(), 4);
        assert_eq!(device.get_stat(StatusCode::ChannelLength).unwrap(), 16);
        assert_eq!(device.get_stat(StatusCode::IdSize).unwrap(), 128);
        assert_eq!(
            device.get_stat(StatusCode::ChannelDirection).unwrap(),
            ChannelDirection::Output.to_raw()
        );
        assert_eq!(
            device.get_stat(StatusCode::ChannelType).unwrap(),
            ChannelType::Analog.to_raw()
        );
        assert_eq!(device.get_stat(StatusCode::PowerSupply).unwrap(), 1);
        assert_eq!(device.get_block_stat(BlockStatusCode::IdData).unwrap().len(), 128);
    }

    #[test]
    fn test_read_only_codes_refuse_set() {
        let device = device();
        for code in [StatusCode::ChannelCount, StatusCode::PowerSupply] {
            assert!(!code.is_settable());
            assert!(matches!(
                device.set_stat(code, 1),
                Err(M37Error::UnknownCode { .. })
            ));
        }
    }

    #[test]
    fn test_channel_direction() {
        let device = device();
        assert!(device
            .set_stat(StatusCode::ChannelDirection, ChannelDirection::Output.to_raw())
            .is_ok());
        assert!(device
            .set_stat(StatusCode::ChannelDirection, ChannelDirection::Input.to_raw())
            .is_err());
    }

    #[test]
    fn test_buffer_mode_rules() {
        let device = device();
        let mode = StatusCode::Buffer(BufferCode::Mode);

        assert!(device.set_stat(mode, BufferMode::RingOverwrite.to_raw()).is_err());
        assert!(device.set_stat(mode, BufferMode::CurrentBuffer.to_raw()).is_err());
        device.set_stat(mode, BufferMode::RingBuffer.to_raw()).unwrap();

        device.set_stat(StatusCode::ExtTrigger, 1).unwrap();
        device.set_stat(StatusCode::IrqEnable, 1).unwrap();
        assert!(device
            .set_stat(mode, BufferMode::UserControlled.to_raw())
            .is_err());
        assert_eq!(device.get_stat(mode).unwrap(), BufferMode::RingBuffer.to_raw());

        assert!(device.set_stat(StatusCode::IrqEnable, 2).is_err());
        device.set_stat(StatusCode::IrqEnable, 0).unwrap();
        device
            .set_stat(mode, BufferMode::UserControlled.to_raw())
            .unwrap();
    }

    #[test]
    fn test_buffer_values() {
        let device = device();
        device.set_stat_raw(0x2002, 16).unwrap();
        assert!(device.set_stat_raw(0x2002, 12).is_err());
        assert_eq!(device.get_stat_raw(0x2002).unwrap(), 16);

        device.set_stat(StatusCode::Buffer(BufferCode::Timeout), 0).unwrap();
        assert_eq!(device.get_stat(StatusCode::Buffer(BufferCode::Timeout)).unwrap(), 0);
        assert_eq!(
            device.get_stat(StatusCode::Buffer(BufferCode::Capacity)).unwrap(),
            160
        );
        assert!(device.set_stat_raw(0x7777, 0).is_err());
    }

    #[test]
    fn test_info() {
        assert_eq!(
            M37Device::info(InfoQuery::HwCharacter).unwrap(),
            InfoResponse::HwCharacter {
                addr: AddrMode::A08,
                data: DataModes::D08 | DataModes::D16
            }
        );
        assert_eq!(
            M37Device::info(InfoQuery::AddrSpace(0)).unwrap(),
            InfoResponse::AddrSpace {
                addr: AddrMode::A08,
                data: DataModes::D16,
                size: 256
            }
        );
        assert!(M37Device::info(InfoQuery::AddrSpace(1)).is_err());
        assert_eq!(
            M37Device::info(InfoQuery::LockMode).unwrap(),
            InfoResponse::LockMode(LockMode::Call)
        );
        assert_eq!(M37Device::info(InfoQuery::Irq).unwrap(), InfoResponse::Irq(true));
    }
}
