//! Timer/counter subsystem
//!
//! Each [`Timer`] is driven once per CPU cycle from the driver loop. A tick
//! advances the prescaler, steps the counter according to the waveform
//! generation mode, applies the compare-output pin action (gated by the
//! DDR bit), latches the double-buffered OCR values at the mode's update
//! point, and raises the overflow/compare/capture flags in the timer's
//! interrupt flag register.
//!
//! All counter and control values live in data memory; the struct keeps
//! only what the hardware keeps outside the register file: the prescaler
//! accumulator, count direction, the latched compare values, and the last
//! sampled pin levels for edge detection. A second simulator instance
//! therefore cannot interfere with this one.
//!
//! # References
//! - ATmega48A/PA/88A/PA/168A/PA/328/P datasheet, TC0/TC1/TC2 chapters

use crate::device::{tifr, DeviceProfile, OutputPin, TimerDef, TimerWidth};
use crate::state::Mcu;

/// Input-capture edge select bit in TCCRnB.
const ICES: u8 = 6;

/// Internal prescaler divisors indexed by CS bits 1..=5.
const PRESCALE: [u32; 6] = [0, 1, 8, 64, 256, 1024];

/// Decoded clock select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    Stopped,
    Div(u32),
    ExtFalling,
    ExtRising,
}

impl ClockSource {
    fn from_cs(cs: u8) -> ClockSource {
        match cs & 0x07 {
            0 => ClockSource::Stopped,
            n @ 1..=5 => ClockSource::Div(PRESCALE[n as usize]),
            6 => ClockSource::ExtFalling,
            _ => ClockSource::ExtRising,
        }
    }
}

/// Waveform generation mode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WgmKind {
    Normal,
    Ctc,
    FastPwm,
    PhasePwm,
    PhaseFreqPwm,
    Reserved,
}

/// Where the TOP value comes from in the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopSource {
    Fixed(u16),
    OcrA,
    Icr,
}

/// When the double-buffered OCR values become visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OcrUpdate {
    Immediate,
    Bottom,
    Top,
}

#[derive(Debug, Clone, Copy)]
struct Wgm {
    kind: WgmKind,
    top: TopSource,
    update: OcrUpdate,
}

const RESERVED_WGM: Wgm = Wgm {
    kind: WgmKind::Reserved,
    top: TopSource::Fixed(0),
    update: OcrUpdate::Immediate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Compare-match context for the pin action table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Match while counting up (the only phase in single-slope modes)
    Up,
    /// Match while counting down (dual-slope modes)
    Down,
    /// Counter reached BOTTOM (single-slope modes re-assert the pin here)
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinAct {
    None,
    Toggle,
    Clear,
    Set,
}

/// Static (WGM, COM) → pin action matrix.
///
/// `top_is_ocra` feeds the one irregular cell: COM = 01 in the PWM modes is
/// "toggle OC on match" only for channel A when OCRA is TOP, disconnected
/// otherwise.
fn compare_action(kind: WgmKind, com: u8, channel_a: bool, top_is_ocra: bool, phase: Phase) -> PinAct {
    match kind {
        WgmKind::Normal | WgmKind::Ctc => match com {
            0b01 => PinAct::Toggle,
            0b10 => PinAct::Clear,
            0b11 => PinAct::Set,
            _ => PinAct::None,
        },
        WgmKind::FastPwm => match (com, phase) {
            (0b01, Phase::Up) if channel_a && top_is_ocra => PinAct::Toggle,
            (0b10, Phase::Up) => PinAct::Clear,
            (0b10, Phase::Bottom) => PinAct::Set,
            (0b11, Phase::Up) => PinAct::Set,
            (0b11, Phase::Bottom) => PinAct::Clear,
            _ => PinAct::None,
        },
        WgmKind::PhasePwm | WgmKind::PhaseFreqPwm => match (com, phase) {
            (0b01, Phase::Up) if channel_a && top_is_ocra => PinAct::Toggle,
            (0b10, Phase::Up) => PinAct::Clear,
            (0b10, Phase::Down) => PinAct::Set,
            (0b11, Phase::Up) => PinAct::Set,
            (0b11, Phase::Down) => PinAct::Clear,
            _ => PinAct::None,
        },
        WgmKind::Reserved => PinAct::None,
    }
}

/// Runtime state of one timer/counter.
#[derive(Debug, Clone)]
pub struct Timer {
    def: TimerDef,
    /// Latched (visible) compare values; the bytes in data memory are the
    /// program-side buffer
    ocra: u16,
    ocrb: u16,
    direction: Direction,
    /// Prescaler tick accumulator
    accum: u32,
    last_cs: u8,
    last_t_pin: bool,
    last_icp_pin: bool,
    /// Compare already passed when the prescaler was switched; serviced on
    /// the next timer tick
    missed_compare: bool,
    warned_wgm: bool,
    warned_clock: bool,
}

impl Timer {
    pub fn new(def: TimerDef) -> Self {
        Self {
            def,
            ocra: 0,
            ocrb: 0,
            direction: Direction::Up,
            accum: 0,
            last_cs: 0,
            last_t_pin: false,
            last_icp_pin: false,
            missed_compare: false,
            warned_wgm: false,
            warned_clock: false,
        }
    }

    pub fn reset(&mut self) {
        let def = self.def.clone();
        *self = Timer::new(def);
    }

    fn max(&self) -> u16 {
        match self.def.width {
            TimerWidth::Bits8 => 0xFF,
            TimerWidth::Bits16 => 0xFFFF,
        }
    }

    fn read_count(&self, mcu: &Mcu) -> u16 {
        match self.def.width {
            TimerWidth::Bits8 => mcu.read(self.def.tcnt) as u16,
            TimerWidth::Bits16 => mcu.read16(self.def.tcnt),
        }
    }

    fn write_count(&self, mcu: &mut Mcu, value: u16) {
        match self.def.width {
            TimerWidth::Bits8 => mcu.write(self.def.tcnt, value as u8),
            TimerWidth::Bits16 => mcu.write16(self.def.tcnt, value),
        }
    }

    /// Decode the waveform generation mode from TCCRnA/TCCRnB.
    fn wgm(&self, mcu: &Mcu) -> Wgm {
        let a = mcu.read(self.def.tccra);
        let b = mcu.read(self.def.tccrb);
        let max = TopSource::Fixed(self.max());
        match self.def.width {
            TimerWidth::Bits8 => {
                // WGM02 in TCCRnB bit 3, WGM01:00 in TCCRnA bits 1:0
                match (a & 0x3) | (b >> 1) & 0x4 {
                    0 => Wgm { kind: WgmKind::Normal, top: max, update: OcrUpdate::Immediate },
                    1 => Wgm { kind: WgmKind::PhasePwm, top: max, update: OcrUpdate::Top },
                    2 => Wgm { kind: WgmKind::Ctc, top: TopSource::OcrA, update: OcrUpdate::Immediate },
                    3 => Wgm { kind: WgmKind::FastPwm, top: max, update: OcrUpdate::Bottom },
                    5 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::OcrA, update: OcrUpdate::Top },
                    7 => Wgm { kind: WgmKind::FastPwm, top: TopSource::OcrA, update: OcrUpdate::Bottom },
                    _ => RESERVED_WGM,
                }
            }
            TimerWidth::Bits16 => {
                // WGM13:12 in TCCRnB bits 4:3, WGM11:10 in TCCRnA bits 1:0
                match (a & 0x3) | (b >> 1) & 0xC {
                    0 => Wgm { kind: WgmKind::Normal, top: max, update: OcrUpdate::Immediate },
                    1 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::Fixed(0x00FF), update: OcrUpdate::Top },
                    2 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::Fixed(0x01FF), update: OcrUpdate::Top },
                    3 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::Fixed(0x03FF), update: OcrUpdate::Top },
                    4 => Wgm { kind: WgmKind::Ctc, top: TopSource::OcrA, update: OcrUpdate::Immediate },
                    5 => Wgm { kind: WgmKind::FastPwm, top: TopSource::Fixed(0x00FF), update: OcrUpdate::Bottom },
                    6 => Wgm { kind: WgmKind::FastPwm, top: TopSource::Fixed(0x01FF), update: OcrUpdate::Bottom },
                    7 => Wgm { kind: WgmKind::FastPwm, top: TopSource::Fixed(0x03FF), update: OcrUpdate::Bottom },
                    8 => Wgm { kind: WgmKind::PhaseFreqPwm, top: TopSource::Icr, update: OcrUpdate::Bottom },
                    9 => Wgm { kind: WgmKind::PhaseFreqPwm, top: TopSource::OcrA, update: OcrUpdate::Bottom },
                    10 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::Icr, update: OcrUpdate::Top },
                    11 => Wgm { kind: WgmKind::PhasePwm, top: TopSource::OcrA, update: OcrUpdate::Top },
                    12 => Wgm { kind: WgmKind::Ctc, top: TopSource::Icr, update: OcrUpdate::Immediate },
                    14 => Wgm { kind: WgmKind::FastPwm, top: TopSource::Icr, update: OcrUpdate::Bottom },
                    15 => Wgm { kind: WgmKind::FastPwm, top: TopSource::OcrA, update: OcrUpdate::Bottom },
                    _ => RESERVED_WGM,
                }
            }
        }
    }

    fn top(&self, mcu: &Mcu, wgm: &Wgm) -> u16 {
        match wgm.top {
            TopSource::Fixed(v) => v,
            TopSource::OcrA => self.ocra,
            TopSource::Icr => match self.def.icr {
                Some(icr) => mcu.read16(icr),
                None => self.max(),
            },
        }
    }

    /// Copy the program-side OCR buffers into the visible compare values.
    fn latch_ocr(&mut self, mcu: &Mcu) {
        match self.def.width {
            TimerWidth::Bits8 => {
                self.ocra = mcu.read(self.def.ocra) as u16;
                self.ocrb = mcu.read(self.def.ocrb) as u16;
            }
            TimerWidth::Bits16 => {
                self.ocra = mcu.read16(self.def.ocra);
                self.ocrb = mcu.read16(self.def.ocrb);
            }
        }
    }

    /// One CPU-cycle tick.
    pub fn tick(&mut self, mcu: &mut Mcu) {
        let tccrb = mcu.read(self.def.tccrb);
        let cs = tccrb & 0x07;
        if cs != self.last_cs {
            self.last_cs = cs;
            self.accum = 0;
            // a clock-source switch is an initialization point: the compare
            // values take effect now, and a counter already past OCRnA gets
            // its compare serviced on the next tick
            self.latch_ocr(mcu);
            if self.read_count(mcu) > self.ocra {
                self.missed_compare = true;
            }
        }

        self.poll_input_capture(mcu);

        let advance = match ClockSource::from_cs(cs) {
            ClockSource::Stopped => false,
            ClockSource::Div(div) => {
                self.accum += 1;
                if self.accum >= div {
                    self.accum = 0;
                    true
                } else {
                    false
                }
            }
            ClockSource::ExtFalling | ClockSource::ExtRising => {
                let rising = cs == 0x7;
                match self.def.t_pin {
                    Some(pin) => {
                        let cur = mcu.bit(pin.pin.addr, pin.pin.bit);
                        let last = self.last_t_pin;
                        self.last_t_pin = cur;
                        if rising {
                            !last && cur
                        } else {
                            last && !cur
                        }
                    }
                    None => {
                        if !self.warned_clock {
                            log::warn!("{}: external clock selected but no T pin; treating as stopped", self.def.name);
                            self.warned_clock = true;
                        }
                        false
                    }
                }
            }
        };

        if advance {
            self.advance(mcu);
        }
    }

    /// Step the counter by one timer clock.
    fn advance(&mut self, mcu: &mut Mcu) {
        let wgm = self.wgm(mcu);
        if wgm.kind == WgmKind::Reserved {
            if !self.warned_wgm {
                log::warn!("{}: reserved waveform mode; timer treated as stopped", self.def.name);
                self.warned_wgm = true;
            }
            return;
        }
        if wgm.update == OcrUpdate::Immediate {
            self.latch_ocr(mcu);
        }

        if self.missed_compare {
            self.missed_compare = false;
            mcu.set_bit(self.def.tifr, tifr::OCFA, true);
            self.drive_pin(mcu, &wgm, true, Phase::Up);
        }

        let top = self.top(mcu, &wgm);
        let max = self.max();
        let mut tcnt = self.read_count(mcu);

        match wgm.kind {
            WgmKind::Normal => {
                tcnt = if tcnt == max {
                    mcu.set_bit(self.def.tifr, tifr::TOV, true);
                    0
                } else {
                    tcnt + 1
                };
                self.check_compares(mcu, &wgm, tcnt, Phase::Up);
            }
            WgmKind::Ctc => {
                tcnt = if tcnt == top {
                    0
                } else if tcnt == max {
                    // the counter escaped above TOP (TCNT write); it wraps
                    // at MAX and overflows like normal mode
                    mcu.set_bit(self.def.tifr, tifr::TOV, true);
                    0
                } else {
                    tcnt + 1
                };
                self.check_compares(mcu, &wgm, tcnt, Phase::Up);
            }
            WgmKind::FastPwm => {
                if tcnt >= top.min(max) {
                    tcnt = 0;
                    mcu.set_bit(self.def.tifr, tifr::TOV, true);
                    if wgm.update == OcrUpdate::Bottom {
                        self.latch_ocr(mcu);
                    }
                    self.drive_both_pins(mcu, &wgm, Phase::Bottom);
                } else {
                    tcnt += 1;
                }
                self.check_compares(mcu, &wgm, tcnt, Phase::Up);
            }
            WgmKind::PhasePwm | WgmKind::PhaseFreqPwm => {
                match self.direction {
                    Direction::Up => {
                        if tcnt < top {
                            tcnt += 1;
                        }
                        if tcnt >= top {
                            self.direction = Direction::Down;
                            if wgm.update == OcrUpdate::Top {
                                self.latch_ocr(mcu);
                            }
                        }
                        self.check_compares(mcu, &wgm, tcnt, Phase::Up);
                    }
                    Direction::Down => {
                        if tcnt > 0 {
                            tcnt -= 1;
                        }
                        if tcnt == 0 {
                            self.direction = Direction::Up;
                            mcu.set_bit(self.def.tifr, tifr::TOV, true);
                            if wgm.update == OcrUpdate::Bottom {
                                self.latch_ocr(mcu);
                            }
                        }
                        self.check_compares(mcu, &wgm, tcnt, Phase::Down);
                    }
                }
            }
            WgmKind::Reserved => unreachable!(),
        }

        self.write_count(mcu, tcnt);
    }

    /// Raise compare flags and drive the output pins on a match.
    fn check_compares(&mut self, mcu: &mut Mcu, wgm: &Wgm, tcnt: u16, phase: Phase) {
        if tcnt == self.ocra {
            mcu.set_bit(self.def.tifr, tifr::OCFA, true);
            self.drive_pin(mcu, wgm, true, phase);
        }
        if tcnt == self.ocrb {
            mcu.set_bit(self.def.tifr, tifr::OCFB, true);
            self.drive_pin(mcu, wgm, false, phase);
        }
    }

    fn drive_both_pins(&mut self, mcu: &mut Mcu, wgm: &Wgm, phase: Phase) {
        self.drive_pin(mcu, wgm, true, phase);
        self.drive_pin(mcu, wgm, false, phase);
    }

    /// Apply the compare-output action for one channel. The pin is only
    /// driven when its DDR bit configures it as an output.
    fn drive_pin(&mut self, mcu: &mut Mcu, wgm: &Wgm, channel_a: bool, phase: Phase) {
        let pin = if channel_a { self.def.oca_pin } else { self.def.ocb_pin };
        let Some(OutputPin { port, ddr }) = pin else {
            return;
        };
        let tccra = mcu.read(self.def.tccra);
        let com = if channel_a {
            tccra >> 6 & 0x3
        } else {
            tccra >> 4 & 0x3
        };
        let top_is_ocra = matches!(wgm.top, TopSource::OcrA);
        let act = compare_action(wgm.kind, com, channel_a, top_is_ocra, phase);
        if act == PinAct::None || !mcu.bit(ddr.addr, ddr.bit) {
            return;
        }
        match act {
            PinAct::Toggle => {
                let cur = mcu.bit(port.addr, port.bit);
                mcu.set_bit(port.addr, port.bit, !cur);
            }
            PinAct::Clear => mcu.set_bit(port.addr, port.bit, false),
            PinAct::Set => mcu.set_bit(port.addr, port.bit, true),
            PinAct::None => {}
        }
    }

    /// Sample the input-capture pin; on the selected edge, copy TCNT into
    /// ICR and raise the capture flag.
    fn poll_input_capture(&mut self, mcu: &mut Mcu) {
        let (Some(icp), Some(icr)) = (self.def.icp_pin, self.def.icr) else {
            return;
        };
        let cur = mcu.bit(icp.pin.addr, icp.pin.bit);
        let last = self.last_icp_pin;
        self.last_icp_pin = cur;
        if cur == last {
            return;
        }
        let rising = mcu.bit(self.def.tccrb, ICES);
        if cur == rising {
            let tcnt = self.read_count(mcu);
            mcu.write16(icr, tcnt);
            mcu.set_bit(self.def.tifr, tifr::ICF, true);
        }
    }
}

/// All timers of a device, built from its profile.
#[derive(Debug, Clone)]
pub struct Timers {
    timers: Vec<Timer>,
}

impl Timers {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            timers: profile.timers.iter().cloned().map(Timer::new).collect(),
        }
    }

    /// Advance every timer by one CPU cycle.
    pub fn tick(&mut self, mcu: &mut Mcu) {
        for t in &mut self.timers {
            t.tick(mcu);
        }
    }

    pub fn reset(&mut self) {
        for t in &mut self.timers {
            t.reset();
        }
    }
}
