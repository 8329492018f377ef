//! Cycle-driven peripheral models
//!
//! The timer/counter units tick once per CPU cycle; the interrupt arbiter
//! runs between instructions. Both operate directly on the machine state's
//! data memory, so everything a program can observe lives at its
//! architectural address.

pub mod interrupt;
pub mod timer;

pub use timer::{Timer, Timers};
