//! Write paths: direct commits and buffered streaming.
//!
//! The buffer mode picks the path. In [`BufferMode::UserControlled`] every
//! write is committed synchronously through the update handshake. In
//! [`BufferMode::RingBuffer`] block writes are queued and the interrupt
//! handler moves them to the hardware on each external trigger.

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::buffer::BufferMode;
use crate::device::M37Device;
use crate::error::{M37Error, Result};
use crate::frame::{Frame, FRAME_BYTES};
use crate::regs::ConfigFlags;

impl M37Device {
    /// Set one channel, keeping the others at their committed values.
    pub fn write_channel(&self, channel: usize, value: u16) -> Result<()> {
        self.ensure_open()?;
        self.reject_external_trigger()?;

        let guard = self.lock_commits();
        let frame = self.channel_values().with_channel(channel, value)?;
        debug!(channel, value, "Write channel");
        self.commit_locked(&guard, frame)
    }

    /// Write a block of little-endian frames.
    ///
    /// Direct mode takes exactly one frame. Ring buffer mode takes any
    /// positive number of frames and blocks until all are queued. Returns
    /// the number of bytes written.
    pub fn write_block(&self, bytes: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        match self.buffer.mode() {
            BufferMode::RingBuffer => {
                self.require_interrupts()?;
                let frames = Frame::parse_block(bytes)?;
                self.enqueue(&frames)
            }
            _ => {
                self.reject_external_trigger()?;
                let frame = Frame::from_bytes(bytes)?;
                self.commit(frame)?;
                Ok(FRAME_BYTES)
            }
        }
    }

    /// Typed form of [`write_block`](Self::write_block).
    pub fn write_frames(&self, frames: &[Frame]) -> Result<usize> {
        self.ensure_open()?;

        match self.buffer.mode() {
            BufferMode::RingBuffer => {
                self.require_interrupts()?;
                if frames.is_empty() {
                    return Err(M37Error::BufferSize {
                        len: 0,
                        expected: format!("a positive multiple of {} bytes", FRAME_BYTES),
                    });
                }
                self.enqueue(frames)
            }
            _ => {
                self.reject_external_trigger()?;
                match frames {
                    [frame] => {
                        self.commit(*frame)?;
                        Ok(FRAME_BYTES)
                    }
                    _ => Err(M37Error::BufferSize {
                        len: frames.len() * FRAME_BYTES,
                        expected: format!("exactly {} bytes", FRAME_BYTES),
                    }),
                }
            }
        }
    }

    /// The module has no inputs.
    pub fn read_channel(&self, _channel: usize) -> Result<u16> {
        Err(M37Error::UnsupportedOperation {
            operation: "read_channel",
        })
    }

    /// The module has no inputs.
    pub fn read_block(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(M37Error::UnsupportedOperation {
            operation: "read_block",
        })
    }

    fn reject_external_trigger(&self) -> Result<()> {
        if self.ext_trigger.load(Ordering::Acquire) {
            return Err(M37Error::invalid_parameter(
                "direct writes are not possible in external trigger mode",
            ));
        }
        Ok(())
    }

    fn require_interrupts(&self) -> Result<()> {
        if !self.irq_enabled.load(Ordering::Acquire) {
            return Err(M37Error::invalid_parameter(
                "buffered writes require interrupts to be enabled",
            ));
        }
        Ok(())
    }

    fn enqueue(&self, frames: &[Frame]) -> Result<usize> {
        self.irq_armed.store(true, Ordering::Release);
        self.regs.modify_config(|c| {
            c.remove(ConfigFlags::UPDATE);
            c.insert(ConfigFlags::IRQ_ENABLE);
        });
        debug!(frames = frames.len(), "Buffered write");

        let result = self.buffer.write_blocking(frames);
        self.irq_armed.store(false, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedModule;
    use crate::config::M37Config;
    use crate::device::TriggerMode;

    fn device(mode: BufferMode) -> (SimulatedModule, M37Device) {
        let sim = SimulatedModule::new();
        let mut config = M37Config::default();
        config.pld_load = false;
        config.handshake.poll_interval_ms = 1;
        config.buffer.mode = mode;
        config.buffer.timeout_ms = 20;
        let device = M37Device::init(sim.clone(), config).unwrap();
        sim.clear_history();
        (sim, device)
    }

    #[test]
    fn test_write_channel_keeps_siblings() {
        let (sim, device) = device(BufferMode::UserControlled);
        device.write_channel(1, 0x1111).unwrap();
        device.write_channel(3, 0x3333).unwrap();

        assert_eq!(device.channel_values().values(), [0, 0x1111, 0, 0x3333]);
        assert_eq!(sim.data_registers().values(), [0, 0x1111, 0, 0x3333]);
        assert_eq!(sim.committed_frames().len(), 2);
    }

    #[test]
    fn test_write_channel_out_of_range() {
        let (sim, device) = device(BufferMode::UserControlled);
        assert!(matches!(
            device.write_channel(4, 1),
            Err(M37Error::InvalidParameter { .. })
        ));
        assert!(sim.committed_frames().is_empty());
    }

    #[test]
    fn test_direct_write_refused_under_external_trigger() {
        let (sim, device) = device(BufferMode::UserControlled);
        device.write_channel(0, 7).unwrap();
        device.set_trigger_mode(TriggerMode::External).unwrap();

        assert!(device.write_channel(0, 8).is_err());
        assert!(device.write_block(&Frame::ZERO.to_bytes()).is_err());
        assert_eq!(device.channel_values().values(), [7, 0, 0, 0]);
        assert_eq!(sim.committed_frames().len(), 1);
    }

    #[test]
    fn test_direct_block_must_be_one_frame() {
        let (_sim, device) = device(BufferMode::UserControlled);
        assert!(matches!(
            device.write_block(&[0u8; 16]),
            Err(M37Error::BufferSize { len: 16, .. })
        ));

        let frame = Frame::new([1, 2, 3, 4]);
        assert_eq!(device.write_block(&frame.to_bytes()).unwrap(), 8);
        assert_eq!(device.channel_values(), frame);
        assert!(device.write_frames(&[frame, frame]).is_err());
    }

    #[test]
    fn test_buffered_write_requires_interrupts() {
        let (_sim, device) = device(BufferMode::RingBuffer);
        let err = device.write_block(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, M37Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_buffered_write_arms_irq() {
        let (sim, device) = device(BufferMode::RingBuffer);
        device.set_trigger_mode(TriggerMode::External).unwrap();
        device.set_interrupt_enable(true).unwrap();
        assert!(!device.config_register().contains(ConfigFlags::IRQ_ENABLE));

        let block = Frame::encode_block(&[Frame::new([1, 1, 1, 1]), Frame::new([2, 2, 2, 2])]);
        assert_eq!(device.write_block(&block).unwrap(), 16);

        assert!(device.config_register().contains(ConfigFlags::IRQ_ENABLE));
        assert!(!device.is_armed());
        assert_eq!(device.buffer().len(), 2);
        // Nothing reaches the hardware until an interrupt
        assert!(sim.committed_frames().is_empty());

        assert!(matches!(
            device.write_block(&[0u8; 12]),
            Err(M37Error::BufferSize { .. })
        ));
    }

    #[test]
    fn test_reads_unsupported() {
        let (_sim, device) = device(BufferMode::UserControlled);
        assert!(matches!(
            device.read_channel(0),
            Err(M37Error::UnsupportedOperation { .. })
        ));
        assert!(device.read_block(&mut [0u8; 8]).is_err());
    }
}
