//! Block write example with interrupt-driven streaming.
//!
//! Runs against the simulated module. A background thread plays the
//! external trigger: every tick it raises the interrupt line and services
//! it, so queued frames move to the "hardware" at the tick rate.
//!
//! # Usage
//!
//! ```bash
//! # One frame, direct mode
//! cargo run -p daq-driver-m37 --example blkwrite -- --ch0 1.5 --ch3 -2
//!
//! # Sine waveform through the ring buffer
//! cargo run -p daq-driver-m37 --example blkwrite -- --ring --sine --periods 5
//! ```

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use daq_driver_m37::backends::SimulatedModule;
use daq_driver_m37::{
    volts_to_code, BufferCode, BufferMode, Frame, M37Config, M37Device, StatusCode,
};

/// Samples per waveform period.
const PERIOD_SIZE: usize = 100;

#[derive(Parser)]
#[command(about = "Configure and write M37 channels")]
struct Args {
    /// Ring buffer mode with external trigger and interrupts
    #[arg(long)]
    ring: bool,

    /// Block write timeout in milliseconds (0 = none)
    #[arg(long)]
    timeout_ms: Option<u32>,

    /// Channel 0 volts
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ch0: f64,
    /// Channel 1 volts
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ch1: f64,
    /// Channel 2 volts
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ch2: f64,
    /// Channel 3 volts
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ch3: f64,

    /// Write a sine period on all channels instead of fixed values
    #[arg(long)]
    sine: bool,

    /// Number of blocks to write
    #[arg(long, default_value_t = 1)]
    periods: usize,

    /// Report low-water notifications
    #[arg(long)]
    low_water: bool,

    /// External trigger tick in microseconds
    #[arg(long, default_value_t = 500)]
    tick_us: u64,
}

fn sine_period() -> anyhow::Result<Vec<Frame>> {
    (0..PERIOD_SIZE)
        .map(|n| -> anyhow::Result<Frame> {
            let volts = 9.99 * (2.0 * PI * n as f64 / PERIOD_SIZE as f64).sin();
            let code = volts_to_code(volts)?;
            Ok(Frame::new([code; 4]))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let block = if args.sine {
        if !args.ring {
            anyhow::bail!("--sine needs --ring: direct mode writes exactly one frame");
        }
        sine_period()?
    } else {
        vec![Frame::new([
            volts_to_code(args.ch0)?,
            volts_to_code(args.ch1)?,
            volts_to_code(args.ch2)?,
            volts_to_code(args.ch3)?,
        ])]
    };

    let sim = SimulatedModule::new();
    let mut config = M37Config::default();
    config.pld_load = false;
    let device = Arc::new(M37Device::init(sim.clone(), config)?);

    let mode = if args.ring {
        BufferMode::RingBuffer
    } else {
        BufferMode::UserControlled
    };
    device.set_stat(StatusCode::Buffer(BufferCode::Mode), mode.to_raw())?;
    if let Some(timeout) = args.timeout_ms {
        device.set_stat(StatusCode::Buffer(BufferCode::Timeout), timeout)?;
    }
    device.set_stat(StatusCode::ExtTrigger, u32::from(args.ring))?;
    println!(
        "number of channels  : {}",
        device.get_stat(StatusCode::ChannelCount)?
    );
    if args.low_water {
        device.set_stat(StatusCode::Buffer(BufferCode::LowWaterSignal), 1)?;
    }
    device.set_stat(StatusCode::IrqEnable, u32::from(args.ring))?;

    let stop = Arc::new(AtomicBool::new(false));
    let clock = args.ring.then(|| {
        let device = Arc::clone(&device);
        let sim = sim.clone();
        let stop = Arc::clone(&stop);
        let tick = Duration::from_micros(args.tick_us);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                sim.set_irq_pending(true);
                device.handle_interrupt();
                thread::sleep(tick);
            }
        })
    });

    for _ in 0..args.periods {
        let written = device.write_frames(&block)?;
        println!("block written: {} bytes", written);
    }

    if let Some(clock) = clock {
        while !device.buffer().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Release);
        clock
            .join()
            .map_err(|_| anyhow::anyhow!("clock thread panicked"))?;
    }

    println!("frames at the converters: {}", sim.committed_frames().len());
    println!("interrupts:               {}", device.interrupt_count());
    println!(
        "underruns:                {}",
        device.get_stat(StatusCode::Buffer(BufferCode::Underruns))?
    );
    if args.low_water {
        println!(
            "low-water notifications:  {}",
            device.buffer().low_water_events()
        );
    }

    device.set_stat(StatusCode::IrqEnable, 0)?;
    device.close()?;
    Ok(())
}
