//! Value-change-dump trace output
//!
//! Selected registers are sampled once per cycle and written as a text VCD
//! stream: one `$var reg N name name` declaration per register (8-bit
//! byte, 16-bit little-endian pair, or a single bit), an initial
//! `$dumpvars` section, then `#<tick>` blocks emitted only when a sampled
//! value changed. The timescale is one CPU cycle, `10^12 / freq`
//! picoseconds.

use std::io::{self, Write};

use crate::device::DeviceProfile;
use crate::state::Mcu;

/// One traced register or register bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceVar {
    /// Declared name; doubles as the VCD identifier
    pub name: String,
    pub addr: u16,
    /// Width in bits: 1, 8 or 16
    pub bits: u8,
    /// For single-bit vars, the bit index within the byte
    pub bit: Option<u8>,
}

impl TraceVar {
    /// Resolve a `dump_regs` entry against a device profile. Plain names
    /// (`R17`, `PORTB`, `TCNT1`) trace the whole register; a trailing digit
    /// on an 8-bit register name (`PORTD4`) traces that bit.
    pub fn resolve(profile: &DeviceProfile, raw: &str) -> Option<TraceVar> {
        if let Some((addr, width)) = profile.lookup_reg(raw) {
            return Some(TraceVar {
                name: raw.to_string(),
                addr,
                bits: width * 8,
                bit: None,
            });
        }
        // NAMEn selects bit n of NAME
        let (prefix, last) = raw.split_at(raw.len().checked_sub(1)?);
        let bit = last.parse::<u8>().ok().filter(|b| *b < 8)?;
        let (addr, width) = profile.lookup_reg(prefix)?;
        if width != 1 {
            return None;
        }
        Some(TraceVar {
            name: raw.to_string(),
            addr,
            bits: 1,
            bit: Some(bit),
        })
    }

    fn value(&self, mcu: &Mcu) -> u16 {
        match self.bit {
            Some(b) => (mcu.read(self.addr) >> b & 1) as u16,
            None if self.bits == 16 => mcu.read16(self.addr),
            None => mcu.read(self.addr) as u16,
        }
    }
}

/// Change-only VCD writer over any byte sink.
pub struct VcdWriter<W: Write> {
    out: W,
    vars: Vec<(TraceVar, Option<u16>)>,
    started: bool,
}

impl<W: Write> VcdWriter<W> {
    /// Write the declaration header for `vars` and return the writer.
    pub fn new(mut out: W, freq_hz: u64, vars: Vec<TraceVar>) -> io::Result<Self> {
        let ps = 1_000_000_000_000u64 / freq_hz.max(1);
        writeln!(out, "$timescale {} ps $end", ps)?;
        writeln!(out, "$scope module avr $end")?;
        for v in &vars {
            writeln!(out, "$var reg {} {} {} $end", v.bits, v.name, v.name)?;
        }
        writeln!(out, "$upscope $end")?;
        writeln!(out, "$enddefinitions $end")?;
        Ok(Self {
            out,
            vars: vars.into_iter().map(|v| (v, None)).collect(),
            started: false,
        })
    }

    /// Sample every traced register at `tick`, emitting a block only when
    /// something changed. The first call dumps every initial value.
    pub fn sample(&mut self, tick: u64, mcu: &Mcu) -> io::Result<()> {
        if !self.started {
            self.started = true;
            writeln!(self.out, "#{}", tick)?;
            writeln!(self.out, "$dumpvars")?;
            for (var, last) in &mut self.vars {
                let v = var.value(mcu);
                writeln!(self.out, "b{:b} {}", v, var.name)?;
                *last = Some(v);
            }
            return writeln!(self.out, "$end");
        }

        let mut header_done = false;
        for i in 0..self.vars.len() {
            let v = self.vars[i].0.value(mcu);
            if self.vars[i].1 == Some(v) {
                continue;
            }
            if !header_done {
                header_done = true;
                writeln!(self.out, "#{}", tick)?;
            }
            writeln!(self.out, "b{:b} {}", v, self.vars[i].0.name)?;
            self.vars[i].1 = Some(v);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
