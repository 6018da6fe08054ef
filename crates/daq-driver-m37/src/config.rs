//! Device configuration.
//!
//! Configuration is read once at initialization. It can be built in code or
//! loaded from TOML:
//!
//! ```toml
//! debug_level = 0
//! id_check = true
//! pld_load = true
//! pld_image = "/lib/firmware/m37.bin"
//! ext_trig = false
//!
//! [buffer]
//! size = 160
//! mode = "user_controlled"
//! timeout_ms = 1000
//! low_water = 8
//!
//! [handshake]
//! max_polls = 10
//! poll_interval_ms = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::BufferMode;
use crate::error::{M37Error, Result};
use crate::frame::FRAME_BYTES;
use crate::regs::HandshakePolicy;

/// Top-level configuration for an M37 device.
///
/// The defaults load the programmable logic but name no bitstream, so
/// `M37Config::default()` only initializes a device if an image is supplied,
/// either through `pld_image` or [`M37DeviceBuilder::bitstream`]. Otherwise
/// init fails with [`M37Error::InvalidConfig`]. Set `pld_load = false` for a
/// module whose logic is already loaded.
///
/// [`M37DeviceBuilder::bitstream`]: crate::device::M37DeviceBuilder::bitstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct M37Config {
    /// Driver debug level
    #[serde(default)]
    pub debug_level: u32,

    /// Verify the module identity before use
    #[serde(default = "default_true")]
    pub id_check: bool,

    /// Load the programmable logic at init (disabling also disables `id_check`)
    #[serde(default = "default_true")]
    pub pld_load: bool,

    /// Bitstream image file, used when no image is handed to the builder
    #[serde(default)]
    pub pld_image: Option<PathBuf>,

    /// Start in external trigger mode
    #[serde(default)]
    pub ext_trig: bool,

    /// Output buffer geometry and policy
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Update handshake poll budget
    #[serde(default)]
    pub handshake: HandshakeConfig,
}

/// Output buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Capacity in bytes (positive multiple of 8)
    #[serde(default = "default_buffer_size")]
    pub size: usize,

    /// Buffer mode
    #[serde(default)]
    pub mode: BufferMode,

    /// Blocking write timeout in milliseconds (0 = wait forever)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Low-water level in bytes (multiple of 8)
    #[serde(default = "default_low_water")]
    pub low_water: usize,

    /// Buffer debug level
    #[serde(default)]
    pub debug_level: u32,
}

/// Update handshake configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Status reads before a commit times out
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Delay between status reads in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    160
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_low_water() -> usize {
    8
}

fn default_max_polls() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for M37Config {
    fn default() -> Self {
        Self {
            debug_level: 0,
            id_check: true,
            pld_load: true,
            pld_image: None,
            ext_trig: false,
            buffer: BufferConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: default_buffer_size(),
            mode: BufferMode::default(),
            timeout_ms: default_timeout_ms(),
            low_water: default_low_water(),
            debug_level: 0,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_polls: default_max_polls(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl M37Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| M37Error::InvalidConfig {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every value against the module's limits.
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        if self.handshake.max_polls == 0 {
            return Err(M37Error::invalid_parameter(
                "handshake.max_polls must be at least 1",
            ));
        }
        Ok(())
    }

    /// Identity check after applying the `pld_load` override.
    pub fn effective_id_check(&self) -> bool {
        self.id_check && self.pld_load
    }

    /// Handshake poll budget.
    pub fn handshake_policy(&self) -> HandshakePolicy {
        HandshakePolicy {
            max_polls: self.handshake.max_polls,
            poll_interval: Duration::from_millis(self.handshake.poll_interval_ms),
        }
    }
}

impl BufferConfig {
    /// Check buffer geometry and mode.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size % FRAME_BYTES != 0 {
            return Err(M37Error::invalid_parameter(format!(
                "buffer.size {} must be a positive multiple of {}",
                self.size, FRAME_BYTES
            )));
        }
        if !self.mode.is_supported() {
            return Err(M37Error::invalid_parameter(format!(
                "buffer.mode {:?} is not supported",
                self.mode
            )));
        }
        if self.low_water % FRAME_BYTES != 0 {
            return Err(M37Error::invalid_parameter(format!(
                "buffer.low_water {} must be a multiple of {}",
                self.low_water, FRAME_BYTES
            )));
        }
        Ok(())
    }

    /// Write timeout, `None` meaning wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = M37Config::default();
        assert!(config.id_check);
        assert!(config.pld_load);
        assert!(!config.ext_trig);
        assert_eq!(config.buffer.size, 160);
        assert_eq!(config.buffer.mode, BufferMode::UserControlled);
        assert_eq!(config.buffer.timeout_ms, 1000);
        assert_eq!(config.buffer.low_water, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = M37Config::from_toml_str("").unwrap();
        assert_eq!(config, M37Config::default());
    }

    #[test]
    fn test_parse_toml() {
        let config = M37Config::from_toml_str(
            r#"
            ext_trig = true
            pld_load = false

            [buffer]
            size = 64
            mode = "ring_buffer"
            timeout_ms = 0
            "#,
        )
        .unwrap();

        assert!(config.ext_trig);
        assert!(!config.effective_id_check());
        assert_eq!(config.buffer.size, 64);
        assert_eq!(config.buffer.mode, BufferMode::RingBuffer);
        assert_eq!(config.buffer.timeout(), None);
        assert_eq!(config.buffer.low_water, 8);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut config = M37Config::default();
        config.buffer.size = 0;
        assert!(config.validate().is_err());

        config.buffer.size = 20;
        assert!(config.validate().is_err());

        config.buffer.size = 160;
        config.buffer.low_water = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unsupported_modes() {
        for mode in [BufferMode::CurrentBuffer, BufferMode::RingOverwrite] {
            let mut config = M37Config::default();
            config.buffer.mode = mode;
            assert!(config.validate().is_err(), "{:?} should be rejected", mode);
        }
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let err = M37Config::from_toml_str("[buffer]\nmode = \"bogus\"").unwrap_err();
        assert!(matches!(err, M37Error::InvalidConfig { .. }));
    }
}
