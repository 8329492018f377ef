//! Simulator frontend
//!
//! Loads a configuration file, builds the simulator and runs it to
//! completion. Command-line flags override the corresponding file options.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use avr_core::{Config, RunState, Simulator};

#[derive(Parser, Debug)]
#[command(name = "avrsim", about = "Cycle-accurate AVR microcontroller simulator")]
struct Args {
    /// Configuration file (key/value lines)
    config: Option<PathBuf>,

    /// Firmware image (Intel HEX), overrides `firmware_file`
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Device name, overrides `mcu`
    #[arg(short, long)]
    mcu: Option<String>,

    /// CPU clock in Hz, overrides `mcu_freq`
    #[arg(long)]
    freq: Option<u64>,

    /// Remote-debug port, overrides `rsp_port`
    #[arg(long)]
    rsp_port: Option<u16>,

    /// Run to completion and report the result (firmware test mode)
    #[arg(long)]
    test: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(fw) = args.firmware {
        cfg.firmware_file = Some(fw);
    }
    if let Some(mcu) = args.mcu {
        cfg.mcu = mcu;
    }
    if let Some(freq) = args.freq {
        cfg.freq_hz = freq;
    }
    if let Some(port) = args.rsp_port {
        cfg.rsp_port = Some(port);
    }
    if args.test {
        cfg.firmware_test = true;
    }
    if cfg.firmware_file.is_none() && cfg.rsp_port.is_none() {
        anyhow::bail!("nothing to run: no firmware image and no debug port");
    }

    let mut sim = Simulator::from_config(&cfg).context("simulator setup")?;
    log::info!(
        "{} at {} Hz, firmware {}",
        sim.mcu.profile.name,
        sim.mcu.freq_hz,
        cfg.firmware_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
    );
    if let Some(port) = sim.rsp_port() {
        log::info!("waiting for debugger on port {}", port);
        // park the core until the debugger takes control
        sim.mcu.run_state = RunState::Stopped;
    }

    let state = sim.run();
    log::info!(
        "simulation finished in state {:?} after {} cycles",
        state,
        sim.mcu.cycles
    );
    Ok(if sim.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
