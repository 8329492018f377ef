//! Execution helpers for the AVR core
//!
//! This module extends [`Mcu`] with:
//! - register-file and X/Y/Z index-pair accessors (R26..R31 form the pairs,
//!   low byte first)
//! - RAMPZ/EIND extension-register access for large-flash parts
//! - the canonical SREG update rules shared by the arithmetic families
//! - effective-address computation and skip-length logic
//!
//! # References
//! - AVR Instruction Set Manual (DS40002198), flag equations per instruction

use super::decode::{is_32bit, Index, IndexMode};
use super::flags::Flag;
use crate::device::addr;
use crate::state::Mcu;

impl Mcu {
    // ========== Register file ==========

    #[inline]
    pub fn reg(&self, r: u8) -> u8 {
        self.read(r as u16)
    }

    #[inline]
    pub fn set_reg(&mut self, r: u8, value: u8) {
        self.write(r as u16, value);
    }

    /// Register pair `r+1:r`, little-endian.
    #[inline]
    pub fn reg_pair(&self, r: u8) -> u16 {
        self.read16(r as u16)
    }

    #[inline]
    pub fn set_reg_pair(&mut self, r: u8, value: u16) {
        self.write16(r as u16, value);
    }

    /// X pair, R27:R26
    #[inline]
    pub fn x(&self) -> u16 {
        self.reg_pair(26)
    }

    #[inline]
    pub fn set_x(&mut self, value: u16) {
        self.set_reg_pair(26, value);
    }

    /// Y pair, R29:R28
    #[inline]
    pub fn y(&self) -> u16 {
        self.reg_pair(28)
    }

    #[inline]
    pub fn set_y(&mut self, value: u16) {
        self.set_reg_pair(28, value);
    }

    /// Z pair, R31:R30
    #[inline]
    pub fn z(&self) -> u16 {
        self.reg_pair(30)
    }

    #[inline]
    pub fn set_z(&mut self, value: u16) {
        self.set_reg_pair(30, value);
    }

    // ========== Extension registers ==========

    /// RAMPZ byte, 0 on parts without extension registers.
    #[inline]
    pub fn rampz(&self) -> u8 {
        if self.profile.has_ext_regs {
            self.read(addr::RAMPZ)
        } else {
            0
        }
    }

    /// EIND byte, 0 on parts without extension registers.
    #[inline]
    pub fn eind(&self) -> u8 {
        if self.profile.has_ext_regs {
            self.read(addr::EIND)
        } else {
            0
        }
    }

    /// RAMPZ:Z as a 24-bit flash byte address (ELPM, SPM).
    #[inline]
    pub fn z_full(&self) -> u32 {
        (self.rampz() as u32) << 16 | self.z() as u32
    }

    /// Write back a 24-bit RAMPZ:Z value after a post-increment.
    pub fn set_z_full(&mut self, value: u32) {
        self.set_z(value as u16);
        if self.profile.has_ext_regs {
            self.write(addr::RAMPZ, (value >> 16) as u8);
        }
    }

    // ========== Canonical SREG update rules ==========

    /// Add-family rule: `r = rd + rr + c`, carry auxiliary
    /// `aux = rd&rr | rr&!r | !r&rd`. Sets C H Z N V S, returns the result.
    pub fn alu_add(&mut self, rd: u8, rr: u8, carry: bool) -> u8 {
        let r = rd.wrapping_add(rr).wrapping_add(carry as u8);
        let aux = rd & rr | rr & !r | !r & rd;
        let v = rd & rr & !r | !rd & !rr & r;
        self.set_flag(Flag::C, aux & 0x80 != 0);
        self.set_flag(Flag::H, aux & 0x08 != 0);
        self.arith_nzvs(r, v & 0x80 != 0, false);
        r
    }

    /// Sub-family rule: `r = rd - rr - c`, carry auxiliary
    /// `aux = !rd&rr | rr&r | r&!rd`. With `clear_only_z` (CPC, SBC) the Z
    /// flag is cleared on a non-zero result and left alone otherwise, which
    /// is what makes multi-word compares chain.
    pub fn alu_sub(&mut self, rd: u8, rr: u8, carry: bool, clear_only_z: bool) -> u8 {
        let r = rd.wrapping_sub(rr).wrapping_sub(carry as u8);
        let aux = !rd & rr | rr & r | r & !rd;
        let v = rd & !rr & !r | !rd & rr & r;
        self.set_flag(Flag::C, aux & 0x80 != 0);
        self.set_flag(Flag::H, aux & 0x08 != 0);
        self.arith_nzvs(r, v & 0x80 != 0, clear_only_z);
        r
    }

    /// AND/OR/EOR rule: V cleared, N/Z/S from the result.
    pub fn logic_flags(&mut self, r: u8) {
        self.arith_nzvs(r, false, false);
    }

    /// ASR/LSR/ROR rule: C is the shifted-out low bit of the operand,
    /// V = N xor C.
    pub fn shift_right_flags(&mut self, rd: u8, r: u8) {
        let c = rd & 0x01 != 0;
        let n = r & 0x80 != 0;
        self.set_flag(Flag::C, c);
        self.arith_nzvs(r, n ^ c, false);
    }

    /// Common N/Z/V/S tail.
    pub(crate) fn arith_nzvs(&mut self, r: u8, v: bool, clear_only_z: bool) {
        let n = r & 0x80 != 0;
        if clear_only_z {
            if r != 0 {
                self.set_flag(Flag::Z, false);
            }
        } else {
            self.set_flag(Flag::Z, r == 0);
        }
        self.set_flag(Flag::N, n);
        self.set_flag(Flag::V, v);
        self.set_flag(Flag::S, n ^ v);
    }

    // ========== Addressing ==========

    /// Current value of an index pair.
    pub fn index_pair(&self, idx: Index) -> u16 {
        match idx {
            Index::X => self.x(),
            Index::Y => self.y(),
            Index::Z => self.z(),
        }
    }

    pub fn set_index_pair(&mut self, idx: Index, value: u16) {
        match idx {
            Index::X => self.set_x(value),
            Index::Y => self.set_y(value),
            Index::Z => self.set_z(value),
        }
    }

    /// Effective address of an indirect access without committing the
    /// pointer side effect (used by the cycle table).
    pub fn indirect_addr(&self, idx: Index, mode: IndexMode) -> u16 {
        let ptr = self.index_pair(idx);
        match mode {
            IndexMode::Plain | IndexMode::PostInc => ptr,
            IndexMode::PreDec => ptr.wrapping_sub(1),
        }
    }

    /// Resolve an indirect access and commit the pointer side effect.
    /// Returns the effective address.
    pub fn indirect_access(&mut self, idx: Index, mode: IndexMode) -> u16 {
        let ptr = self.index_pair(idx);
        match mode {
            IndexMode::Plain => ptr,
            IndexMode::PostInc => {
                self.set_index_pair(idx, ptr.wrapping_add(1));
                ptr
            }
            IndexMode::PreDec => {
                let ptr = ptr.wrapping_sub(1);
                self.set_index_pair(idx, ptr);
                ptr
            }
        }
    }

    /// Load/store cycle cost for the given data-memory address.
    ///
    /// Baseline cores take 2 cycles for every LD/ST form. Reduced cores run
    /// them in 1. The xmega class takes 1 cycle inside on-chip SRAM and 2
    /// through the I/O bridge.
    pub fn ldst_cycles(&self, address: u16) -> u8 {
        if self.profile.reduced_core {
            1
        } else if self.profile.xmega {
            if self.in_sram(address) {
                1
            } else {
                2
            }
        } else {
            2
        }
    }

    /// Byte length of the instruction at `at` (2 or 4), for the skip
    /// instructions and the arbiter's return-address math.
    pub fn instr_len(&self, at: u32) -> u32 {
        if is_32bit(self.flash_word(at)) {
            4
        } else {
            2
        }
    }
}
