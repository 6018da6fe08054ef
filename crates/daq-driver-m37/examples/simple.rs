//! Simple output example.
//!
//! Drives one channel to -10 V, then to just below +10 V.
//!
//! # Usage
//!
//! ```bash
//! # Against the simulated module
//! cargo run -p daq-driver-m37 --example simple -- 2
//!
//! # Against a real module (register window at offset 0, identity at 4096)
//! cargo run -p daq-driver-m37 --example simple -- 2 --device /dev/uio0 --bitstream m37.bin
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use daq_driver_m37::backends::{MmioWindow, SimulatedModule};
use daq_driver_m37::{M37Config, M37Device, RegisterAccess, StatusCode};

#[derive(Parser)]
#[command(about = "M37 simple example")]
struct Args {
    /// Channel number (0..3)
    channel: usize,

    /// Register window device file; simulated module when omitted
    #[arg(long)]
    device: Option<PathBuf>,

    /// Byte offset of the identity window in the device file
    #[arg(long, default_value_t = 4096)]
    id_offset: u64,

    /// Bitstream image to load
    #[arg(long)]
    bitstream: Option<PathBuf>,

    /// Delay between the two values in milliseconds
    #[arg(long, default_value_t = 2000)]
    delay_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let access: Box<dyn RegisterAccess> = match &args.device {
        Some(path) => Box::new(MmioWindow::open_with_identity(path, path, args.id_offset)?),
        None => Box::new(SimulatedModule::new()),
    };
    let mut config = M37Config::default();
    config.pld_load = args.bitstream.is_some();
    config.pld_image = args.bitstream.clone();

    println!("m37 simple - {}", daq_driver_m37::IDENT);
    let device = M37Device::init(access, config)?;

    println!("channel number      : {}", args.channel);
    println!(
        "number of channels  : {}",
        device.get_stat(StatusCode::ChannelCount)?
    );

    println!("set channel {} to -10.0V", args.channel);
    device.write_channel(args.channel, 0x8000)?;
    thread::sleep(Duration::from_millis(args.delay_ms));

    println!("set channel {} to +9.99..V", args.channel);
    device.write_channel(args.channel, 0x7FFF)?;
    thread::sleep(Duration::from_millis(args.delay_ms));

    device.close()?;
    Ok(())
}
