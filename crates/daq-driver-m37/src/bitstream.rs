//! Programmable logic bitstream and its serial loader.
//!
//! An image is a 4-byte big-endian payload length followed by the payload.
//! Each payload byte is shifted out as four 2-bit groups, least significant
//! group first: bit 0 of the group drives TDO, bit 1 drives TMS, and the
//! group is latched on the rising edge of TCK.

use std::path::Path;

use tracing::{debug, info, trace};

use crate::error::{M37Error, Result};
use crate::regs::{LoadLines, Registers};

/// Bytes in the length prefix.
const HEADER_BYTES: usize = 4;

/// Bitstream image for the module's programmable logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitstream {
    payload: Vec<u8>,
}

impl Bitstream {
    /// Parse a length-prefixed image.
    ///
    /// Bytes beyond the declared length are ignored.
    pub fn from_image(image: &[u8]) -> Result<Self> {
        let header: [u8; HEADER_BYTES] = image
            .get(..HEADER_BYTES)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                M37Error::invalid_parameter(format!(
                    "bitstream image of {} bytes has no length header",
                    image.len()
                ))
            })?;
        let declared = u32::from_be_bytes(header) as usize;
        let body = &image[HEADER_BYTES..];

        let payload = body.get(..declared).ok_or_else(|| {
            M37Error::invalid_parameter(format!(
                "bitstream declares {} bytes but only {} present",
                declared,
                body.len()
            ))
        })?;

        Ok(Self {
            payload: payload.to_vec(),
        })
    }

    /// Wrap a raw payload with no header.
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Read and parse an image file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = std::fs::read(path)?;
        let bitstream = Self::from_image(&image)?;
        debug!(path = %path.display(), bytes = bitstream.len(), "Loaded bitstream image");
        Ok(bitstream)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes, in shift order.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encode back to the length-prefixed form.
    pub fn to_image(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(HEADER_BYTES + self.payload.len());
        image.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        image.extend_from_slice(&self.payload);
        image
    }
}

/// Shift `bitstream` into the programmable logic.
///
/// Write-only: nothing is read back, so a bad image only shows up in the
/// identity check that follows.
pub(crate) fn load_bitstream(regs: &Registers, bitstream: &Bitstream) {
    let mut lines = LoadLines::empty();

    for (index, &byte) in bitstream.payload().iter().enumerate() {
        let mut bits = byte;
        for _ in 0..4 {
            lines.remove(LoadLines::TCK);
            regs.write_load(lines);

            lines.set(LoadLines::TDO, bits & 0x01 != 0);
            lines.set(LoadLines::TMS, bits & 0x02 != 0);
            regs.write_load(lines);

            lines.insert(LoadLines::TCK);
            regs.write_load(lines);

            bits >>= 2;
        }
        if index % 4096 == 0 {
            trace!(offset = index, "Shifting bitstream");
        }
    }

    info!(bytes = bitstream.len(), "Programmable logic loaded");
}
