//! Interrupt service.
//!
//! The dispatcher that owns the interrupt line calls
//! [`M37Device::handle_interrupt`] once per assertion. The handler never
//! polls, never waits on a writer and never fails.

use std::sync::atomic::Ordering;

use tracing::{trace, warn};

use crate::device::M37Device;
use crate::regs::{ConfigFlags, StatusFlags};

/// Outcome of one interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqStatus {
    /// The interrupt came from this module and was serviced
    Handled,
    /// The module was not asserting; nothing was touched
    NotOurs,
}

impl M37Device {
    /// Service one hardware interrupt.
    ///
    /// Moves the next queued frame to the hardware. When the buffer is
    /// empty the last committed frame is strobed again so the converters
    /// keep a valid update, and if no buffered write is in progress the
    /// hardware interrupt is switched off until the next one.
    ///
    /// A closed device claims no interrupts.
    pub fn handle_interrupt(&self) -> IrqStatus {
        if self.is_closed() {
            return IrqStatus::NotOurs;
        }
        let status = self.regs.status();
        if !status.intersects(StatusFlags::IRQ_PENDING | StatusFlags::BUFFER_READY) {
            return IrqStatus::NotOurs;
        }

        let sent = self.buffer.send_next(|frame| {
            self.regs.write_frame(&frame);
            self.regs.strobe_update();
            *self.store.lock() = frame;
        });

        match sent {
            Some(frame) => trace!(?frame, "Interrupt: frame written"),
            None => {
                if !self.irq_armed.load(Ordering::Acquire) {
                    self.regs
                        .modify_config(|c| c.remove(ConfigFlags::IRQ_ENABLE | ConfigFlags::UPDATE));
                }
                let last = *self.store.lock();
                self.regs.write_frame(&last);
                self.regs.strobe_update();
                self.buffer.record_underrun();
                warn!(frame = ?last, "Interrupt: buffer underrun");
            }
        }

        self.irq_count.fetch_add(1, Ordering::Relaxed);
        IrqStatus::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedModule;
    use crate::buffer::BufferMode;
    use crate::config::M37Config;
    use crate::device::TriggerMode;
    use crate::frame::Frame;
    use tracing_test::traced_test;

    fn streaming_device() -> (SimulatedModule, M37Device) {
        let sim = SimulatedModule::new();
        let mut config = M37Config::default();
        config.pld_load = false;
        config.ext_trig = true;
        config.handshake.poll_interval_ms = 1;
        config.buffer.mode = BufferMode::RingBuffer;
        let device = M37Device::init(sim.clone(), config).unwrap();
        device.set_interrupt_enable(true).unwrap();
        sim.clear_history();
        (sim, device)
    }

    #[test]
    fn test_not_ours_has_no_side_effects() {
        let (sim, device) = streaming_device();
        sim.set_ready_latency(None);
        sim.set_irq_pending(false);

        assert_eq!(device.handle_interrupt(), IrqStatus::NotOurs);
        assert_eq!(device.interrupt_count(), 0);
        assert!(sim.config_writes().is_empty());
        assert_eq!(device.buffer().underruns(), 0);
    }

    #[test]
    fn test_closed_device_claims_nothing() {
        let (sim, device) = streaming_device();
        device.close().unwrap();
        sim.clear_history();
        sim.set_irq_pending(true);

        assert_eq!(device.handle_interrupt(), IrqStatus::NotOurs);
        assert_eq!(sim.config(), 0);
        assert!(sim.config_writes().is_empty());
        assert!(sim.committed_frames().is_empty());
        assert_eq!(device.interrupt_count(), 0);
    }

    #[test]
    fn test_frame_available_is_committed() {
        let (sim, device) = streaming_device();
        let frame = Frame::new([10, 20, 30, 40]);
        device.write_frames(&[frame]).unwrap();

        sim.set_irq_pending(true);
        assert_eq!(device.handle_interrupt(), IrqStatus::Handled);

        assert_eq!(sim.committed_frames(), vec![frame]);
        assert_eq!(device.channel_values(), frame);
        assert_eq!(device.interrupt_count(), 1);
        assert!(device.buffer().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_underrun_reasserts_last_frame_and_disarms() {
        let (sim, device) = streaming_device();
        let frame = Frame::new([1, 2, 3, 4]);
        device.write_frames(&[frame]).unwrap();
        sim.set_irq_pending(true);
        device.handle_interrupt();
        assert!(device.config_register().contains(ConfigFlags::IRQ_ENABLE));

        sim.set_irq_pending(true);
        assert_eq!(device.handle_interrupt(), IrqStatus::Handled);

        assert_eq!(sim.committed_frames(), vec![frame, frame]);
        assert!(!device.config_register().contains(ConfigFlags::IRQ_ENABLE));
        assert_eq!(device.buffer().underruns(), 1);
        assert_eq!(device.interrupt_count(), 2);
        assert!(logs_contain("buffer underrun"));
    }

    #[test]
    fn test_underrun_while_armed_keeps_irq_enabled() {
        let (sim, device) = streaming_device();
        device.write_frames(&[Frame::ZERO]).unwrap();
        sim.set_irq_pending(true);
        device.handle_interrupt();

        device.irq_armed.store(true, Ordering::Release);
        sim.set_irq_pending(true);
        device.handle_interrupt();

        assert!(device.config_register().contains(ConfigFlags::IRQ_ENABLE));
        assert_eq!(sim.committed_frames().len(), 2);
    }
}
