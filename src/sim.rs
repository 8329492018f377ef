//! Simulator orchestrator
//!
//! [`Simulator`] owns the machine state and composes the per-cycle work:
//! decode-and-execute one cycle, advance the cycle counter, tick the
//! timers, let the interrupt arbiter run at instruction boundaries, sample
//! the trace writer, and tick any attached extension models. Run control
//! goes through [`RunState`]; any collaborator may request a stop and the
//! driver observes it at the top of the next iteration.

use std::fs::File;
use std::io::BufWriter;

use thiserror::Error;

use crate::config::Config;
use crate::device::{DeviceProfile, FuseError};
use crate::firmware::{self, FirmwareError};
use crate::peripherals::{interrupt, Timers};
use crate::rsp::RspServer;
use crate::state::{Mcu, RunState};
use crate::vcd::{TraceVar, VcdWriter};

/// How often the debug endpoint is checked for an interrupt byte while
/// the core is running.
const RSP_POLL_INTERVAL: u64 = 1024;

/// An extension model ticked by the driver loop.
///
/// `conf` runs once after the firmware is loaded; `tick` runs every cycle
/// with full mutable access to the machine state, so a model's writes are
/// indistinguishable from bus-master writes.
pub trait Model {
    fn conf(&mut self, mcu: &mut Mcu);
    fn tick(&mut self, mcu: &mut Mcu);
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
    #[error(transparent)]
    Fuse(#[from] FuseError),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    #[error("dump_regs entry '{0}' does not name a register of this device")]
    UnknownDumpReg(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Simulator {
    pub mcu: Mcu,
    timers: Timers,
    vcd: Option<VcdWriter<BufWriter<File>>>,
    rsp: Option<RspServer>,
    models: Vec<Box<dyn Model>>,
    firmware_test: bool,
}

impl Simulator {
    /// Bare simulator around an existing machine state.
    pub fn new(mcu: Mcu) -> Self {
        let timers = Timers::new(&mcu.profile);
        Self {
            mcu,
            timers,
            vcd: None,
            rsp: None,
            models: Vec::new(),
            firmware_test: false,
        }
    }

    /// Build a simulator from a parsed configuration: device lookup, fuse
    /// validation, firmware image, trace writer and debug endpoint.
    pub fn from_config(cfg: &Config) -> Result<Simulator, SetupError> {
        let profile = DeviceProfile::by_name(&cfg.mcu)
            .ok_or_else(|| SetupError::UnknownDevice(cfg.mcu.clone()))?;
        let mut mcu = Mcu::new(profile, cfg.freq_hz);

        if let Some(lfuse) = cfg.lfuse {
            mcu.profile.decode_clock_select(lfuse)?;
            mcu.lfuse = lfuse;
        }
        mcu.hfuse = cfg.hfuse.unwrap_or(mcu.hfuse);
        mcu.efuse = cfg.efuse.unwrap_or(mcu.efuse);
        mcu.lockbits = cfg.lockbits.unwrap_or(mcu.lockbits);
        mcu.trap_at_isr = cfg.trap_at_isr;

        if let Some(path) = &cfg.firmware_file {
            firmware::load_ihex_file(path, &mut mcu.flash, cfg.reset_flash)?;
        }

        let mut sim = Simulator::new(mcu);
        sim.firmware_test = cfg.firmware_test;

        if let Some(path) = &cfg.vcd_file {
            let mut vars = Vec::with_capacity(cfg.dump_regs.len());
            for raw in &cfg.dump_regs {
                let var = TraceVar::resolve(&sim.mcu.profile, raw)
                    .ok_or_else(|| SetupError::UnknownDumpReg(raw.clone()))?;
                vars.push(var);
            }
            let out = BufWriter::new(File::create(path)?);
            sim.vcd = Some(VcdWriter::new(out, sim.mcu.freq_hz, vars)?);
        }

        if let Some(port) = cfg.rsp_port {
            sim.rsp = Some(RspServer::bind(port)?);
        }

        for model in &cfg.lua_models {
            log::warn!(
                "script model {} ignored: no interpreter in this build",
                model.display()
            );
        }
        Ok(sim)
    }

    /// Reset the core and peripheral state; flash and fuses survive.
    pub fn reset(&mut self) {
        self.mcu.reset();
        self.timers.reset();
    }

    /// Attach an extension model; its `conf` hook runs immediately.
    pub fn add_model(&mut self, mut model: Box<dyn Model>) {
        model.conf(&mut self.mcu);
        self.models.push(model);
    }

    /// Port of the debug endpoint, when one is bound.
    pub fn rsp_port(&self) -> Option<u16> {
        self.rsp.as_ref().map(|r| r.local_port())
    }

    /// Run until the core reaches an exit state. With a debug endpoint
    /// attached, a plain halt parks the loop in idle passes (one remote
    /// command per pass) instead of exiting.
    pub fn run(&mut self) -> RunState {
        loop {
            match self.mcu.run_state {
                RunState::Stop | RunState::TestFail => break,
                RunState::Stopped => {
                    // firmware-test runs treat a halt as completion even
                    // under a debugger
                    if self.rsp.is_some() && !self.firmware_test {
                        self.idle_pass();
                    } else {
                        break;
                    }
                }
                RunState::Running | RunState::Sleeping | RunState::Step => {
                    self.cycle();
                }
            }
        }
        if let Some(vcd) = &mut self.vcd {
            if let Err(e) = vcd.flush() {
                log::error!("trace flush failed: {}", e);
            }
        }
        self.mcu.run_state
    }

    /// Run at most `n` cycles (stops early on an exit state).
    pub fn run_cycles(&mut self, n: u64) {
        for _ in 0..n {
            if self.mcu.run_state.is_exit() {
                return;
            }
            self.cycle();
        }
    }

    /// One iteration of the driver loop: instruction cycle, cycle counter,
    /// timer tick, interrupt acceptance at instruction boundaries, trace
    /// sample, model hooks.
    fn cycle(&mut self) {
        let stepping = self.mcu.run_state == RunState::Step;

        if self.mcu.run_state != RunState::Sleeping {
            if let Err(e) = self.mcu.step() {
                log::error!("{}", e);
                self.mcu.run_state = RunState::TestFail;
                return;
            }
        }
        self.mcu.cycles += 1;

        self.timers.tick(&mut self.mcu);

        if !self.mcu.in_multi && !self.mcu.run_state.is_exit() {
            interrupt::service(&mut self.mcu);
        }

        if let Some(vcd) = &mut self.vcd {
            if let Err(e) = vcd.sample(self.mcu.cycles, &self.mcu) {
                log::error!("trace write failed, disabling dump: {}", e);
                self.vcd = None;
            }
        }

        for model in &mut self.models {
            model.tick(&mut self.mcu);
        }

        if stepping && !self.mcu.in_multi && self.mcu.run_state == RunState::Step {
            self.mcu.run_state = RunState::Stopped;
        }

        if let Some(rsp) = &mut self.rsp {
            if self.mcu.run_state == RunState::Stopped {
                let _ = rsp.notify_stopped();
            } else if self.mcu.cycles % RSP_POLL_INTERVAL == 0 {
                let _ = rsp.poll_interrupt(&mut self.mcu);
                if self.mcu.run_state == RunState::Stopped {
                    let _ = rsp.notify_stopped();
                }
            }
        }
    }

    /// Idle pass while halted under a debugger: process one remote
    /// command, then yield briefly.
    fn idle_pass(&mut self) {
        let result = match &mut self.rsp {
            Some(rsp) => {
                let _ = rsp.notify_stopped();
                rsp.poll(&mut self.mcu)
            }
            None => return,
        };
        if let Err(e) = result {
            log::error!("debug endpoint error: {}", e);
            self.rsp = None;
            return;
        }
        if self.mcu.run_state == RunState::Stopped {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Process exit code for a finished run.
    pub fn exit_code(&self) -> i32 {
        match self.mcu.run_state {
            RunState::TestFail => 1,
            _ => 0,
        }
    }
}
