//! Command-line host for the RTD2142 protocol engine: probe a hub, dump
//! its flash, or push a new firmware image through the full
//! detach/write/verify/attach sequence.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rtd2142_device::Device;
use rtd2142_proto::{Phase, Progress};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[clap(name = "rtd2142-updater", about = "Firmware updater for the Realtek RTD2142 DP MST hub")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate the hub and print its version and flags.
    Probe {
        /// Name of the drm_dp_aux_dev this hub's DDC/CI channel rides on.
        dp_aux_name: String,
    },
    /// Write a new firmware image to the hub's inactive bank.
    Update {
        dp_aux_name: String,
        /// Raw USER-bank firmware image.
        firmware: PathBuf,
    },
    /// Read the entire flash chip out to a file.
    Dump {
        dp_aux_name: String,
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Probe { dp_aux_name } => probe(&dp_aux_name),
        Command::Update { dp_aux_name, firmware } => update(&dp_aux_name, &firmware),
        Command::Dump { dp_aux_name, output } => dump(&dp_aux_name, &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn open_device(dp_aux_name: &str) -> rtd2142_proto::Result<Device> {
    let mut device = Device::new();
    device.set_name("RTD2142");
    device.set_quirk_kv("RealtekMstDpAuxName", dp_aux_name)?;
    device.open()?;
    Ok(device)
}

fn probe(dp_aux_name: &str) -> rtd2142_proto::Result<()> {
    let device = open_device(dp_aux_name)?;
    println!("physical id : {}", device.physical_id().unwrap_or_default());
    println!("instance ids: {:?}", device.instance_ids());
    println!("version     : {}", device.version().unwrap_or_else(|| "unknown".into()));
    println!("flags       : {:?}", device.flags());
    Ok(())
}

fn update(dp_aux_name: &str, firmware: &std::path::Path) -> rtd2142_proto::Result<()> {
    let image = std::fs::read(firmware).map_err(rtd2142_proto::Error::Io)?;
    let mut device = open_device(dp_aux_name)?;

    if !device.flags().contains(rtd2142_device::DeviceFlags::UPDATABLE) {
        return Err(rtd2142_proto::Error::NotSupported(
            "device does not report an updatable dual-bank mode".into(),
        ));
    }

    let mut progress = CliProgress::new();
    device.detach(&mut progress)?;
    let result = device.write_firmware(&image, &mut progress);

    match result {
        Ok(()) => {
            device.attach(&mut progress)?;
            progress.finish();
            device.reload()?;
            println!("update complete, now running {}", device.version().unwrap_or_else(|| "unknown".into()));
            device.close()?;
            Ok(())
        }
        Err(err) => {
            // Best-effort: try to leave ISP mode even though the write
            // failed, so the device doesn't get stranded.
            let _ = device.attach(&mut progress);
            progress.finish();
            Err(err)
        }
    }
}

fn dump(dp_aux_name: &str, output: &std::path::Path) -> rtd2142_proto::Result<()> {
    let mut device = open_device(dp_aux_name)?;
    let mut progress = CliProgress::new();
    let image = device.dump_firmware(&mut progress);
    progress.finish();
    let image = image?;
    std::fs::write(output, image).map_err(rtd2142_proto::Error::Io)?;
    device.close()?;
    Ok(())
}

/// Bridges the protocol engine's [`Progress`] callbacks onto an indicatif
/// progress bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg:>14} [{bar:40}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Progress for CliProgress {
    fn set_phase(&mut self, phase: Phase) {
        let label = match phase {
            Phase::Idle => "idle",
            Phase::DeviceRestart => "restarting",
            Phase::DeviceErase => "erasing",
            Phase::DeviceWrite => "writing",
            Phase::DeviceVerify => "verifying",
            Phase::DeviceRead => "reading",
        };
        self.bar.set_message(label);
    }

    fn set_progress(&mut self, done: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(done);
    }
}
