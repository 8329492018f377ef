//! Decoder/executor tests
//!
//! `instructions` covers the architectural effect of each opcode family,
//! `timing` the per-instruction cycle budget and the multi-cycle
//! bookkeeping invariants.

use crate::device::DeviceProfile;
use crate::state::Mcu;

mod instructions;

/// Write instruction words into flash at a byte address, little-endian.
pub fn load_words(mcu: &mut Mcu, at: u32, words: &[u16]) {
    for (i, w) in words.iter().enumerate() {
        let a = at as usize + i * 2;
        mcu.flash[a] = *w as u8;
        mcu.flash[a + 1] = (*w >> 8) as u8;
    }
}

/// ATmega328P core with a program at the reset vector.
pub fn program(words: &[u16]) -> Mcu {
    let mut mcu = Mcu::new(DeviceProfile::atmega328p(), 16_000_000);
    load_words(&mut mcu, 0, words);
    mcu
}

/// Step to the end of the current instruction, draining intermediate
/// cycles. Returns the number of cycles consumed.
pub fn step_instr(mcu: &mut Mcu) -> u32 {
    let mut cycles = 0;
    loop {
        mcu.step().expect("instruction decodes");
        cycles += 1;
        if !mcu.in_multi {
            return cycles;
        }
    }
}

/// Run `n` whole instructions.
pub fn run_instrs(mcu: &mut Mcu, n: usize) {
    for _ in 0..n {
        step_instr(mcu);
    }
}
