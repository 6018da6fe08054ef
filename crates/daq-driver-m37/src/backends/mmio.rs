#![allow(unsafe_code)]
//! Memory-mapped register window.
//!
//! Maps the module's 256-byte register window (and optionally its identity
//! window) from a device file, typically a UIO node or a bus bridge
//! resource file, and accesses it with volatile 16-bit loads and stores.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::{MmapOptions, MmapRaw};
use tracing::{debug, warn};

use crate::error::{M37Error, Result};
use crate::regs::{RegisterAccess, ID_WORDS, WINDOW_SIZE};

/// Identity window size in bytes.
const ID_WINDOW_SIZE: usize = ID_WORDS * 2;

/// Value read from an unmapped or out-of-range location.
const FLOATING_BUS: u16 = 0xFFFF;

/// Register window backed by a shared memory mapping.
#[derive(Debug)]
pub struct MmioWindow {
    regs: MmapRaw,
    ident: Option<MmapRaw>,
}

impl MmioWindow {
    /// Map the register window at offset 0 of `path`.
    ///
    /// Without an identity window every identity word reads as `0xFFFF`, so
    /// the identity check must be disabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let regs = map_window(path.as_ref(), 0, WINDOW_SIZE)?;
        Ok(Self { regs, ident: None })
    }

    /// Map the register window at offset 0 of `path` and the identity
    /// window at `id_offset` of `id_path`.
    ///
    /// `id_offset` must be even so identity words stay 16-bit aligned.
    pub fn open_with_identity(
        path: impl AsRef<Path>,
        id_path: impl AsRef<Path>,
        id_offset: u64,
    ) -> Result<Self> {
        if id_offset % 2 != 0 {
            return Err(M37Error::invalid_parameter(format!(
                "identity window offset {:#x} is not 16-bit aligned",
                id_offset
            )));
        }
        let regs = map_window(path.as_ref(), 0, WINDOW_SIZE)?;
        let ident = map_window(id_path.as_ref(), id_offset, ID_WINDOW_SIZE)?;
        Ok(Self {
            regs,
            ident: Some(ident),
        })
    }

    fn word_ptr(map: &MmapRaw, byte_offset: usize) -> Option<*mut u16> {
        let base = map.as_ptr() as usize;
        if (base + byte_offset) % 2 != 0 || byte_offset + 2 > map.len() {
            return None;
        }
        // SAFETY: in bounds and 2-byte aligned, checked above
        Some(unsafe { map.as_mut_ptr().add(byte_offset) } as *mut u16)
    }
}

fn map_window(path: &Path, offset: u64, len: usize) -> Result<MmapRaw> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let map = MmapOptions::new().offset(offset).len(len).map_raw(&file)?;
    debug!(path = %path.display(), offset, len, "Mapped register window");
    Ok(map)
}

impl RegisterAccess for MmioWindow {
    fn read16(&self, offset: u16) -> u16 {
        match Self::word_ptr(&self.regs, usize::from(offset)) {
            // SAFETY: pointer is inside the live mapping
            Some(p) => unsafe { ptr::read_volatile(p) },
            None => {
                warn!(offset, "Register read outside window");
                FLOATING_BUS
            }
        }
    }

    fn write16(&self, offset: u16, value: u16) {
        match Self::word_ptr(&self.regs, usize::from(offset)) {
            // SAFETY: pointer is inside the live mapping
            Some(p) => unsafe { ptr::write_volatile(p, value) },
            None => warn!(offset, "Register write outside window"),
        }
    }

    fn read_id_word(&self, index: u16) -> u16 {
        let Some(ident) = &self.ident else {
            return FLOATING_BUS;
        };
        match Self::word_ptr(ident, usize::from(index) * 2) {
            // SAFETY: pointer is inside the live mapping
            Some(p) => unsafe { ptr::read_volatile(p) },
            None => FLOATING_BUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn window_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_register_access_hits_file() {
        let file = window_file(WINDOW_SIZE);
        let window = MmioWindow::open(file.path()).unwrap();

        window.write16(0x06, 0xBEEF);
        assert_eq!(window.read16(0x06), 0xBEEF);
        assert_eq!(window.read16(WINDOW_SIZE as u16), FLOATING_BUS);
        drop(window);

        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(u16::from_ne_bytes([bytes[6], bytes[7]]), 0xBEEF);
    }

    #[test]
    fn test_identity_window() {
        let regs = window_file(WINDOW_SIZE);
        let ident = window_file(ID_WINDOW_SIZE);
        {
            let mut bytes = vec![0u8; ID_WINDOW_SIZE];
            bytes[0..2].copy_from_slice(&0x5346u16.to_ne_bytes());
            std::fs::write(ident.path(), &bytes).unwrap();
        }

        let window = MmioWindow::open_with_identity(regs.path(), ident.path(), 0).unwrap();
        assert_eq!(window.read_id_word(0), 0x5346);
        assert_eq!(window.read_id_word(ID_WORDS as u16), FLOATING_BUS);

        let bare = MmioWindow::open(regs.path()).unwrap();
        assert_eq!(bare.read_id_word(0), FLOATING_BUS);
    }

    #[test]
    fn test_odd_identity_offset_rejected() {
        let regs = window_file(WINDOW_SIZE);
        let ident = window_file(ID_WINDOW_SIZE + 2);

        let err = MmioWindow::open_with_identity(regs.path(), ident.path(), 1).unwrap_err();
        assert!(matches!(err, M37Error::InvalidParameter { .. }));

        let window = MmioWindow::open_with_identity(regs.path(), ident.path(), 2).unwrap();
        assert_eq!(window.read_id_word(0), 0);
    }
}
