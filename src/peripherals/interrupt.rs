//! Interrupt arbiter
//!
//! Invoked by the driver loop between instructions, never inside a
//! multi-cycle instruction. The arbiter samples the global interrupt
//! enable, each vector's enable and raised bits in I/O space, and the
//! internal per-vector pending latches; it then dispatches the
//! lowest-addressed pending vector: clear the raised bit, clear I, push
//! the return address (2 or 3 bytes by PC width) and jump to the vector
//! slot.
//!
//! RETI sets the `exec_main` one-shot, which makes the next arbiter pass a
//! no-op so exactly one main-program instruction runs between back-to-back
//! interrupts.

use crate::cpu::flags::Flag;
use crate::state::{Mcu, RunState};

/// Sample pending interrupts and dispatch the highest-priority one.
/// Returns the vector slot index that was taken.
pub fn service(mcu: &mut Mcu) -> Option<u16> {
    if !mcu.flag(Flag::I) {
        return None;
    }
    if mcu.exec_main {
        mcu.exec_main = false;
        return None;
    }

    // Latch every vector whose enable and raised bits are both set
    for i in 0..mcu.profile.vectors.len() {
        let v = mcu.profile.vectors[i];
        if let (Some(en), Some(ra)) = (v.enable, v.raised) {
            if mcu.bit(en.addr, en.bit) && mcu.bit(ra.addr, ra.bit) {
                mcu.int_pending[i] = true;
            }
        }
    }

    // Lowest vector address wins
    let selected = (0..mcu.profile.vectors.len())
        .filter(|&i| mcu.int_pending[i])
        .min_by_key(|&i| mcu.profile.vectors[i].index)?;

    let v = mcu.profile.vectors[selected];
    mcu.int_pending[selected] = false;
    if let Some(ra) = v.raised {
        mcu.set_bit(ra.addr, ra.bit, false);
    }
    mcu.set_flag(Flag::I, false);

    let ret = mcu.pc;
    mcu.push_pc(ret);
    mcu.pc = mcu.profile.vector_addr(v.index);

    if mcu.run_state == RunState::Sleeping {
        mcu.run_state = RunState::Running;
    }
    if mcu.trap_at_isr {
        mcu.run_state = RunState::Stopped;
    }

    log::trace!("vector {} taken, return address {:#06X}", v.index, ret);
    Some(v.index)
}
