//! Async façade over the blocking driver.
//!
//! Commits sleep between handshake polls and buffered writes block while the
//! buffer is full, so each call runs on the blocking thread pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use daq_driver_m37::hal::AsyncOutput;
//!
//! let output = AsyncOutput::new(Arc::new(device));
//! output.write_channel(0, 0x8000).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::device::M37Device;
use crate::error::Result;
use crate::frame::Frame;

/// Async handle to a shared [`M37Device`].
#[derive(Debug, Clone)]
pub struct AsyncOutput {
    device: Arc<M37Device>,
}

impl AsyncOutput {
    /// Wrap a shared device.
    pub fn new(device: Arc<M37Device>) -> Self {
        Self { device }
    }

    /// The underlying device.
    pub fn device(&self) -> &Arc<M37Device> {
        &self.device
    }

    /// See [`M37Device::write_channel`].
    pub async fn write_channel(&self, channel: usize, value: u16) -> Result<()> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.write_channel(channel, value)).await?
    }

    /// See [`M37Device::write_block`].
    pub async fn write_block(&self, bytes: Vec<u8>) -> Result<usize> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.write_block(&bytes)).await?
    }

    /// See [`M37Device::write_frames`].
    pub async fn write_frames(&self, frames: Vec<Frame>) -> Result<usize> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.write_frames(&frames)).await?
    }

    /// Wait for the buffer to drain to its low-water mark.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_low_water(&self, timeout: Duration) -> Result<bool> {
        let device = Arc::clone(&self.device);
        let reached =
            tokio::task::spawn_blocking(move || device.buffer().wait_low_water(timeout)).await?;
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedModule;
    use crate::config::M37Config;

    fn output() -> (SimulatedModule, AsyncOutput) {
        let sim = SimulatedModule::new();
        let mut config = M37Config::default();
        config.pld_load = false;
        config.handshake.poll_interval_ms = 1;
        let device = M37Device::init(sim.clone(), config).unwrap();
        (sim, AsyncOutput::new(Arc::new(device)))
    }

    #[tokio::test]
    async fn test_async_write_channel() {
        let (sim, output) = output();
        output.write_channel(2, 0x4000).await.unwrap();
        assert_eq!(sim.data_registers().values(), [0, 0, 0x4000, 0]);
        assert_eq!(output.device().channel_values().values(), [0, 0, 0x4000, 0]);
    }

    #[tokio::test]
    async fn test_async_errors_propagate() {
        let (_sim, output) = output();
        assert!(output.write_channel(9, 1).await.is_err());
        assert!(output.write_block(vec![0u8; 3]).await.is_err());
        assert_eq!(
            output.write_frames(vec![Frame::new([1, 2, 3, 4])]).await.unwrap(),
            8
        );
    }

    #[tokio::test]
    async fn test_wait_low_water_on_empty_buffer() {
        let (_sim, output) = output();
        assert!(output.wait_low_water(Duration::from_millis(5)).await.unwrap());
    }
}
