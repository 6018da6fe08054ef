//! Write a voltage to one channel.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p daq-driver-m37 --example write -- --volts -2.5 --channel 1
//! cargo run -p daq-driver-m37 --example write -- --volts 5 --device /dev/uio0 --no-pld
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use daq_driver_m37::backends::{MmioWindow, SimulatedModule};
use daq_driver_m37::{volts_to_code, M37Config, M37Device, RegisterAccess};

#[derive(Parser)]
#[command(about = "Configure and write to an M37 channel")]
struct Args {
    /// Output voltage in [-10, 10)
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    volts: f64,

    /// Channel number (0..3)
    #[arg(short, long, default_value_t = 0)]
    channel: usize,

    /// Repeat the write every 100 ms until interrupted
    #[arg(short, long)]
    looped: bool,

    /// Register window device file; simulated module when omitted
    #[arg(long)]
    device: Option<PathBuf>,

    /// Byte offset of the identity window in the device file
    #[arg(long, default_value_t = 4096)]
    id_offset: u64,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the logic load (and the identity check)
    #[arg(long)]
    no_pld: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let value = volts_to_code(args.volts)?;

    let access: Box<dyn RegisterAccess> = match &args.device {
        Some(path) => Box::new(MmioWindow::open_with_identity(path, path, args.id_offset)?),
        None => Box::new(SimulatedModule::new()),
    };
    let mut config = match &args.config {
        Some(path) => M37Config::load(path)?,
        None => M37Config::default(),
    };
    if args.no_pld || (args.device.is_none() && config.pld_image.is_none()) {
        config.pld_load = false;
    }

    let device = M37Device::init(access, config)?;
    println!("channel number      : {}", args.channel);

    loop {
        device.write_channel(args.channel, value)?;
        println!("write: {:#06x} = {:016b}", value, value);
        if !args.looped {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    device.close()?;
    Ok(())
}
