//! AVR instruction decode and execution
//!
//! One [`Mcu::step`] call corresponds to one clock cycle. Single-cycle
//! instructions decode and apply in the same call. Multi-cycle instructions
//! follow a skip-cycles pattern: the first call latches the remaining cycle
//! count and returns without side effects, intermediate calls drain the
//! count, and the final call applies the architectural effect atomically
//! (PC, SREG, memory, stack).
//!
//! # Module Organization
//!
//! - `flags`: SREG bit constants and the [`Flag`](flags::Flag) sum type
//! - `decode`: instruction word → [`Op`]
//! - `helpers`: register/index accessors, canonical SREG update rules
//! - `execute`: per-opcode architectural effects
//!
//! # References
//! - AVR Instruction Set Manual (DS40002198), cycle tables per family

use thiserror::Error;

mod decode;
mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

pub use decode::{decode, is_32bit, Index, IndexMode, Op};

use crate::state::Mcu;
use flags::Flag;

/// Decode/execute failure. Unknown opcodes halt the driver; architectural
/// faults (extension-register instructions on small parts) instead move the
/// run state to `TestFail` and are not reported here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("unknown instruction word {word:#06X} at {pc:#08X}")]
    UnknownInstruction { pc: u32, word: u16 },
}

impl Mcu {
    /// Instruction word at PC, honoring the one-shot match-point fetch, and
    /// the following word for 32-bit encodings. The second word always comes
    /// from flash: breakpoint substitution only replaces the first word.
    fn fetch(&self) -> (u16, u16) {
        let word = if self.fetch_from_mpm {
            self.mpm_word(self.pc)
        } else {
            self.flash_word(self.pc)
        };
        (word, self.flash_word(self.pc.wrapping_add(2)))
    }

    /// Advance the core by one clock cycle.
    pub fn step(&mut self) -> Result<(), StepError> {
        if self.in_multi {
            self.cycles_remaining -= 1;
            if self.cycles_remaining > 0 {
                return Ok(());
            }
            self.in_multi = false;
            return self.execute_current();
        }

        let (word, word2) = self.fetch();
        let op = decode(word, word2, self.profile.reduced_core);
        let n = self.op_cycles(&op);
        if n > 1 {
            self.in_multi = true;
            self.cycles_remaining = n - 1;
            return Ok(());
        }
        self.execute_current()
    }

    /// Decode and apply the instruction at PC. The decode is deterministic,
    /// so re-decoding on the final cycle of a multi-cycle instruction sees
    /// the same word the cycle count was derived from.
    fn execute_current(&mut self) -> Result<(), StepError> {
        let (word, word2) = self.fetch();
        self.fetch_from_mpm = false;
        let op = decode(word, word2, self.profile.reduced_core);
        self.apply(op)
    }

    /// Cycles for one execution of `op` in the current machine state.
    ///
    /// Conditional branches cost the taken price only when taken; skip
    /// instructions pay one extra cycle per skipped word; load/store costs
    /// depend on the device class and target address.
    fn op_cycles(&self, op: &Op) -> u8 {
        use Op::*;
        let long_pc = self.profile.pc_frame_bytes() == 3;
        match *op {
            Adiw { .. } | Sbiw { .. } => 2,
            Mul { .. } | Muls { .. } | Mulsu { .. } => 2,
            Fmul { .. } | Fmuls { .. } | Fmulsu { .. } => 2,

            Rjmp { .. } | Ijmp | Eijmp => 2,
            Jmp { .. } => 3,
            Rcall { .. } | Icall => {
                if long_pc {
                    4
                } else {
                    3
                }
            }
            Eicall => 4,
            Call { .. } => {
                if long_pc {
                    5
                } else {
                    4
                }
            }
            Ret | Reti => {
                if long_pc {
                    5
                } else {
                    4
                }
            }
            Brbs { s, .. } => {
                if self.flag(Flag::from_bit(s)) {
                    2
                } else {
                    1
                }
            }
            Brbc { s, .. } => {
                if self.flag(Flag::from_bit(s)) {
                    1
                } else {
                    2
                }
            }

            Cpse { d, r } => self.skip_cycles(self.reg(d) == self.reg(r)),
            Sbrc { r, b } => self.skip_cycles(self.reg(r) & 1 << b == 0),
            Sbrs { r, b } => self.skip_cycles(self.reg(r) & 1 << b != 0),
            Sbic { io, b } => self.skip_cycles(!self.bit(self.io(io), b)),
            Sbis { io, b } => self.skip_cycles(self.bit(self.io(io), b)),

            Push { .. } | Pop { .. } => 2,
            Sbi { .. } | Cbi { .. } => 2,
            Lpm { .. } | Elpm { .. } => 3,
            Xch { .. } | Las { .. } | Lac { .. } | Lat { .. } => 2,

            Lds { addr, .. } | Sts { addr, .. } => self.ldst_cycles(addr),
            Lds16 { addr, .. } | Sts16 { addr, .. } => self.ldst_cycles(addr),
            Ld { idx, mode, .. } | St { idx, mode, .. } => {
                self.ldst_cycles(self.indirect_addr(idx, mode))
            }
            Ldd { idx, q, .. } | Std { idx, q, .. } => {
                self.ldst_cycles(self.index_pair(idx).wrapping_add(q as u16))
            }

            _ => 1,
        }
    }

    /// 1 cycle when the test fails, otherwise 1 + one per skipped word.
    fn skip_cycles(&self, skip: bool) -> u8 {
        if !skip {
            1
        } else if self.instr_len(self.pc.wrapping_add(2)) == 4 {
            3
        } else {
            2
        }
    }
}
