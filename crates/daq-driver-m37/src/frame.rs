//! Register frames: one 16-bit value per channel.

use crate::error::{M37Error, Result};

/// Number of analog output channels.
pub const CHANNEL_COUNT: usize = 4;

/// Bytes per channel value.
pub const CHANNEL_BYTES: usize = 2;

/// Bytes per frame.
pub const FRAME_BYTES: usize = CHANNEL_COUNT * CHANNEL_BYTES;

/// Full-scale output voltage.
pub const FULL_SCALE_VOLTS: f64 = 10.0;

/// Convert a voltage in `[-10, 10)` to a channel code.
///
/// Codes are two's complement: `0x8000` is -10 V, `0x7FFF` just below +10 V.
pub fn volts_to_code(volts: f64) -> Result<u16> {
    if !(-FULL_SCALE_VOLTS..FULL_SCALE_VOLTS).contains(&volts) {
        return Err(M37Error::invalid_parameter(format!(
            "{} V outside [-{}, {}) V",
            volts, FULL_SCALE_VOLTS, FULL_SCALE_VOLTS
        )));
    }
    let scaled = (volts * (f64::from(u16::MAX) / (2.0 * FULL_SCALE_VOLTS))).round();
    Ok((scaled as i32).clamp(i16::MIN.into(), i16::MAX.into()) as i16 as u16)
}

/// Convert a channel code back to volts.
pub fn code_to_volts(code: u16) -> f64 {
    f64::from(code as i16) * (2.0 * FULL_SCALE_VOLTS) / f64::from(u16::MAX)
}

/// One value per channel, the unit moved to hardware in every update.
///
/// On the wire a frame is four little-endian words, channel 0 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Frame([u16; CHANNEL_COUNT]);

impl Frame {
    /// All channels at zero.
    pub const ZERO: Frame = Frame([0; CHANNEL_COUNT]);

    /// Create a frame from per-channel values.
    pub const fn new(values: [u16; CHANNEL_COUNT]) -> Self {
        Self(values)
    }

    /// Per-channel values, index = channel.
    pub const fn values(&self) -> [u16; CHANNEL_COUNT] {
        self.0
    }

    /// Value of a single channel.
    pub fn channel(&self, channel: usize) -> Option<u16> {
        self.0.get(channel).copied()
    }

    /// Copy of this frame with one channel replaced.
    pub fn with_channel(mut self, channel: usize, value: u16) -> Result<Self> {
        let slot = self.0.get_mut(channel).ok_or_else(|| {
            M37Error::invalid_parameter(format!(
                "channel {} out of range (module has {} channels)",
                channel, CHANNEL_COUNT
            ))
        })?;
        *slot = value;
        Ok(self)
    }

    /// Encode as 8 bytes.
    pub fn to_bytes(&self) -> [u8; FRAME_BYTES] {
        let mut out = [0u8; FRAME_BYTES];
        for (chunk, value) in out.chunks_exact_mut(CHANNEL_BYTES).zip(self.0) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Decode exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_BYTES {
            return Err(M37Error::BufferSize {
                len: bytes.len(),
                expected: format!("exactly {} bytes", FRAME_BYTES),
            });
        }
        Ok(Self::decode(bytes))
    }

    /// Decode a block of one or more whole frames.
    pub fn parse_block(bytes: &[u8]) -> Result<Vec<Self>> {
        if bytes.is_empty() || bytes.len() % FRAME_BYTES != 0 {
            return Err(M37Error::BufferSize {
                len: bytes.len(),
                expected: format!("a positive multiple of {} bytes", FRAME_BYTES),
            });
        }
        Ok(bytes.chunks_exact(FRAME_BYTES).map(Self::decode).collect())
    }

    /// Encode a sequence of frames as one block.
    pub fn encode_block(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.to_bytes()).collect()
    }

    fn decode(chunk: &[u8]) -> Self {
        let mut values = [0u16; CHANNEL_COUNT];
        for (value, word) in values.iter_mut().zip(chunk.chunks_exact(CHANNEL_BYTES)) {
            *value = u16::from_le_bytes([word[0], word[1]]);
        }
        Self(values)
    }
}

impl From<[u16; CHANNEL_COUNT]> for Frame {
    fn from(values: [u16; CHANNEL_COUNT]) -> Self {
        Self(values)
    }
}
