//! AVR device profiles
//!
//! A [`DeviceProfile`] is the static description of one microcontroller:
//! memory bounds, signature, fuse defaults, program-counter width, the
//! interrupt vector table and the timer register map. Profiles are consumed
//! by the simulator core and never mutated while it runs.
//!
//! The data-memory address space is flat: 32 general-purpose registers,
//! then the I/O window, then on-chip SRAM. All register locations below are
//! data-memory byte addresses, not I/O offsets.
//!
//! # References
//! - ATmega48A/PA/88A/PA/168A/PA/328/P datasheet (DS40002061)
//! - ATmega640/1280/2560 datasheet (DS2549)
//! - AVR Instruction Set Manual (DS40002198)

use thiserror::Error;

/// Data-memory addresses shared by the megaAVR parts modeled here.
pub mod addr {
    /// First general-purpose register (R0)
    pub const REG_FILE_START: u16 = 0x00;
    /// One past R31
    pub const REG_FILE_END: u16 = 0x20;
    /// Base of the I/O window; `IN`/`OUT` offsets are relative to this
    pub const IO_BASE: u16 = 0x20;

    pub const PINB: u16 = 0x23;
    pub const DDRB: u16 = 0x24;
    pub const PORTB: u16 = 0x25;
    pub const PIND: u16 = 0x29;
    pub const DDRD: u16 = 0x2A;
    pub const PORTD: u16 = 0x2B;

    pub const TIFR0: u16 = 0x35;
    pub const TIFR1: u16 = 0x36;
    pub const TIFR2: u16 = 0x37;

    pub const TCCR0A: u16 = 0x44;
    pub const TCCR0B: u16 = 0x45;
    pub const TCNT0: u16 = 0x46;
    pub const OCR0A: u16 = 0x47;
    pub const OCR0B: u16 = 0x48;

    pub const SMCR: u16 = 0x53;
    pub const SPMCSR: u16 = 0x57;
    pub const RAMPZ: u16 = 0x5B;
    pub const EIND: u16 = 0x5C;
    pub const SPL: u16 = 0x5D;
    pub const SPH: u16 = 0x5E;
    pub const SREG: u16 = 0x5F;

    pub const TIMSK0: u16 = 0x6E;
    pub const TIMSK1: u16 = 0x6F;
    pub const TIMSK2: u16 = 0x70;

    pub const TCCR1A: u16 = 0x80;
    pub const TCCR1B: u16 = 0x81;
    pub const TCNT1L: u16 = 0x84;
    pub const ICR1L: u16 = 0x86;
    pub const OCR1AL: u16 = 0x88;
    pub const OCR1BL: u16 = 0x8A;

    pub const TCCR2A: u16 = 0xB0;
    pub const TCCR2B: u16 = 0xB1;
    pub const TCNT2: u16 = 0xB2;
    pub const OCR2A: u16 = 0xB3;
    pub const OCR2B: u16 = 0xB4;
}

/// Flag bit positions shared by the TIFRn/TIMSKn register pairs.
pub mod tifr {
    /// Overflow
    pub const TOV: u8 = 0;
    /// Compare match A
    pub const OCFA: u8 = 1;
    /// Compare match B
    pub const OCFB: u8 = 2;
    /// Input capture (16-bit timers)
    pub const ICF: u8 = 5;
}

/// Location of a single bit in data memory: `(byte address, bit index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBit {
    pub addr: u16,
    pub bit: u8,
}

impl IoBit {
    pub const fn new(addr: u16, bit: u8) -> Self {
        Self { addr, bit }
    }
}

/// An output-compare pin: driven through PORT only when the DDR bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPin {
    pub port: IoBit,
    pub ddr: IoBit,
}

/// An input pin sampled from a PIN register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPin {
    pub pin: IoBit,
}

/// One interrupt vector slot.
///
/// The byte address of the slot is `ivt_base + index * vector_stride`.
/// `enable` and `raised` point at the mask/flag bits in I/O space; slots
/// without a modeled peripheral carry `None` and are never taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vector {
    pub index: u16,
    pub enable: Option<IoBit>,
    pub raised: Option<IoBit>,
}

impl Vector {
    pub const fn new(index: u16, enable: IoBit, raised: IoBit) -> Self {
        Self {
            index,
            enable: Some(enable),
            raised: Some(raised),
        }
    }
}

/// Counter width of a timer/counter unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerWidth {
    Bits8,
    Bits16,
}

/// Register map and pin wiring for one timer/counter.
///
/// For 16-bit timers, `tcnt`, `ocra`, `ocrb` and `icr` name the low byte;
/// the high byte lives at the next address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerDef {
    pub name: &'static str,
    pub width: TimerWidth,
    pub tccra: u16,
    pub tccrb: u16,
    pub tcnt: u16,
    pub ocra: u16,
    pub ocrb: u16,
    /// Input-capture register, 16-bit timers only
    pub icr: Option<u16>,
    pub tifr: u16,
    pub timsk: u16,
    pub oca_pin: Option<OutputPin>,
    pub ocb_pin: Option<OutputPin>,
    /// External clock input (CS = 0b110/0b111)
    pub t_pin: Option<InputPin>,
    pub icp_pin: Option<InputPin>,
    /// Vector slot indices into the profile's vector table
    pub ovf_vector: u16,
    pub compa_vector: u16,
    pub compb_vector: u16,
    pub capt_vector: Option<u16>,
}

impl TimerDef {
    /// Vector table entries for this timer: slots from the per-timer
    /// vector fields, enable bits in TIMSKn, raised bits in TIFRn.
    pub fn vectors(&self) -> Vec<Vector> {
        let mut vectors = vec![
            Vector::new(
                self.ovf_vector,
                IoBit::new(self.timsk, tifr::TOV),
                IoBit::new(self.tifr, tifr::TOV),
            ),
            Vector::new(
                self.compa_vector,
                IoBit::new(self.timsk, tifr::OCFA),
                IoBit::new(self.tifr, tifr::OCFA),
            ),
            Vector::new(
                self.compb_vector,
                IoBit::new(self.timsk, tifr::OCFB),
                IoBit::new(self.tifr, tifr::OCFB),
            ),
        ];
        if let Some(capt) = self.capt_vector {
            vectors.push(Vector::new(
                capt,
                IoBit::new(self.timsk, tifr::ICF),
                IoBit::new(self.tifr, tifr::ICF),
            ));
        }
        vectors
    }
}

/// A named I/O register for trace selection (`dump_regs`) and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRegName {
    pub name: &'static str,
    pub addr: u16,
    /// 1 or 2 bytes (2 = little-endian pair such as TCNT1)
    pub width: u8,
}

/// Fuse and lock byte defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseDefaults {
    pub low: u8,
    pub high: u8,
    pub extended: u8,
    pub lockbits: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FuseError {
    /// CKSEL 0b0001 is reserved on every part modeled here
    #[error("impossible CKSEL encoding {0:#06b} in low fuse")]
    BadClockSelect(u8),
}

/// Static description of one microcontroller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub signature: [u8; 3],
    /// Program memory size in bytes
    pub flash_size: u32,
    /// Self-programming page size in bytes
    pub spm_page_size: u32,
    /// First byte of on-chip SRAM in data memory
    pub ram_start: u16,
    /// Last byte of on-chip SRAM in data memory (inclusive)
    pub ram_end: u16,
    /// Program counter width in bits: 16 or 22
    pub pc_bits: u8,
    /// RAMPZ/EIND extension registers present
    pub has_ext_regs: bool,
    pub reduced_core: bool,
    pub xmega: bool,
    /// Byte address of the reset vector
    pub reset_vector: u32,
    /// Byte address of vector slot 0
    pub ivt_base: u32,
    /// Bytes per vector slot (2 for RJMP tables, 4 for JMP tables)
    pub vector_stride: u32,
    pub vectors: Vec<Vector>,
    pub timers: Vec<TimerDef>,
    pub fuses: FuseDefaults,
    pub io_names: Vec<IoRegName>,
}

impl DeviceProfile {
    /// Look up a stock profile by its lowercase device name.
    pub fn by_name(name: &str) -> Option<DeviceProfile> {
        match name {
            "atmega328p" | "m328p" => Some(Self::atmega328p()),
            "atmega88" | "m88" => Some(Self::atmega88()),
            "atmega2560" | "m2560" => Some(Self::atmega2560()),
            _ => None,
        }
    }

    /// Total data-memory size: registers + I/O + SRAM.
    pub fn dm_size(&self) -> usize {
        self.ram_end as usize + 1
    }

    /// Bytes pushed for a return address: 2, or 3 on 22-bit-PC parts.
    pub fn pc_frame_bytes(&self) -> u8 {
        if self.pc_bits > 16 {
            3
        } else {
            2
        }
    }

    /// Byte address of a vector slot.
    pub fn vector_addr(&self, index: u16) -> u32 {
        self.ivt_base + index as u32 * self.vector_stride
    }

    /// Resolve a register name from a `dump_regs` entry.
    ///
    /// Accepts `R0`..`R31` and the named I/O registers of the profile.
    pub fn lookup_reg(&self, name: &str) -> Option<(u16, u8)> {
        if let Some(num) = name
            .strip_prefix('R')
            .or_else(|| name.strip_prefix('r'))
            .and_then(|n| n.parse::<u16>().ok())
        {
            if num < 32 {
                return Some((num, 1));
            }
        }
        self.io_names
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| (r.addr, r.width))
    }

    /// Validate the CKSEL field of a low-fuse byte.
    ///
    /// CKSEL lives in bits 3:0; the only encoding rejected by the hardware
    /// tables of the modeled parts is 0b0001.
    pub fn decode_clock_select(&self, lfuse: u8) -> Result<u8, FuseError> {
        let cksel = lfuse & 0x0F;
        if cksel == 0b0001 {
            return Err(FuseError::BadClockSelect(cksel));
        }
        Ok(cksel)
    }

    fn megax8_io_names() -> Vec<IoRegName> {
        vec![
            IoRegName { name: "SREG", addr: addr::SREG, width: 1 },
            IoRegName { name: "SPL", addr: addr::SPL, width: 1 },
            IoRegName { name: "SPH", addr: addr::SPH, width: 1 },
            IoRegName { name: "SP", addr: addr::SPL, width: 2 },
            IoRegName { name: "PORTB", addr: addr::PORTB, width: 1 },
            IoRegName { name: "DDRB", addr: addr::DDRB, width: 1 },
            IoRegName { name: "PINB", addr: addr::PINB, width: 1 },
            IoRegName { name: "PORTD", addr: addr::PORTD, width: 1 },
            IoRegName { name: "DDRD", addr: addr::DDRD, width: 1 },
            IoRegName { name: "PIND", addr: addr::PIND, width: 1 },
            IoRegName { name: "TCNT0", addr: addr::TCNT0, width: 1 },
            IoRegName { name: "TCCR0A", addr: addr::TCCR0A, width: 1 },
            IoRegName { name: "TCCR0B", addr: addr::TCCR0B, width: 1 },
            IoRegName { name: "OCR0A", addr: addr::OCR0A, width: 1 },
            IoRegName { name: "OCR0B", addr: addr::OCR0B, width: 1 },
            IoRegName { name: "TIFR0", addr: addr::TIFR0, width: 1 },
            IoRegName { name: "TIMSK0", addr: addr::TIMSK0, width: 1 },
            IoRegName { name: "TCNT1", addr: addr::TCNT1L, width: 2 },
            IoRegName { name: "ICR1", addr: addr::ICR1L, width: 2 },
            IoRegName { name: "OCR1A", addr: addr::OCR1AL, width: 2 },
            IoRegName { name: "OCR1B", addr: addr::OCR1BL, width: 2 },
            IoRegName { name: "TIFR1", addr: addr::TIFR1, width: 1 },
            IoRegName { name: "TIMSK1", addr: addr::TIMSK1, width: 1 },
            IoRegName { name: "TCNT2", addr: addr::TCNT2, width: 1 },
            IoRegName { name: "TIFR2", addr: addr::TIFR2, width: 1 },
            IoRegName { name: "TIMSK2", addr: addr::TIMSK2, width: 1 },
            IoRegName { name: "SPMCSR", addr: addr::SPMCSR, width: 1 },
        ]
    }

    /// Derive the interrupt vector table from a timer configuration
    /// table, so the timer defs are the single source of the
    /// vector/enable/raised wiring.
    pub fn timer_vectors(timers: &[TimerDef]) -> Vec<Vector> {
        timers.iter().flat_map(TimerDef::vectors).collect()
    }

    /// Timer/counter table shared by the ATmega48/88/168/328 family:
    /// 8-bit T0, 16-bit T1 with input capture, 8-bit T2 (no external clock).
    fn megax8_timers() -> Vec<TimerDef> {
        vec![
            TimerDef {
                name: "timer0",
                width: TimerWidth::Bits8,
                tccra: addr::TCCR0A,
                tccrb: addr::TCCR0B,
                tcnt: addr::TCNT0,
                ocra: addr::OCR0A,
                ocrb: addr::OCR0B,
                icr: None,
                tifr: addr::TIFR0,
                timsk: addr::TIMSK0,
                // OC0A = PD6, OC0B = PD5
                oca_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTD, 6),
                    ddr: IoBit::new(addr::DDRD, 6),
                }),
                ocb_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTD, 5),
                    ddr: IoBit::new(addr::DDRD, 5),
                }),
                // T0 = PD4
                t_pin: Some(InputPin { pin: IoBit::new(addr::PIND, 4) }),
                icp_pin: None,
                ovf_vector: 16,
                compa_vector: 14,
                compb_vector: 15,
                capt_vector: None,
            },
            TimerDef {
                name: "timer1",
                width: TimerWidth::Bits16,
                tccra: addr::TCCR1A,
                tccrb: addr::TCCR1B,
                tcnt: addr::TCNT1L,
                ocra: addr::OCR1AL,
                ocrb: addr::OCR1BL,
                icr: Some(addr::ICR1L),
                tifr: addr::TIFR1,
                timsk: addr::TIMSK1,
                // OC1A = PB1, OC1B = PB2
                oca_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTB, 1),
                    ddr: IoBit::new(addr::DDRB, 1),
                }),
                ocb_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTB, 2),
                    ddr: IoBit::new(addr::DDRB, 2),
                }),
                // T1 = PD5
                t_pin: Some(InputPin { pin: IoBit::new(addr::PIND, 5) }),
                // ICP1 = PB0
                icp_pin: Some(InputPin { pin: IoBit::new(addr::PINB, 0) }),
                ovf_vector: 13,
                compa_vector: 11,
                compb_vector: 12,
                capt_vector: Some(10),
            },
            TimerDef {
                name: "timer2",
                width: TimerWidth::Bits8,
                tccra: addr::TCCR2A,
                tccrb: addr::TCCR2B,
                tcnt: addr::TCNT2,
                ocra: addr::OCR2A,
                ocrb: addr::OCR2B,
                icr: None,
                tifr: addr::TIFR2,
                timsk: addr::TIMSK2,
                // OC2A = PB3, OC2B = PD3
                oca_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTB, 3),
                    ddr: IoBit::new(addr::DDRB, 3),
                }),
                ocb_pin: Some(OutputPin {
                    port: IoBit::new(addr::PORTD, 3),
                    ddr: IoBit::new(addr::DDRD, 3),
                }),
                t_pin: None,
                icp_pin: None,
                ovf_vector: 9,
                compa_vector: 7,
                compb_vector: 8,
                capt_vector: None,
            },
        ]
    }

    /// ATmega328P: 32 KiB flash, 2 KiB SRAM, 16-bit PC, JMP vector table.
    pub fn atmega328p() -> DeviceProfile {
        let timers = Self::megax8_timers();
        DeviceProfile {
            name: "atmega328p",
            signature: [0x1E, 0x95, 0x0F],
            flash_size: 0x8000,
            spm_page_size: 128,
            ram_start: 0x0100,
            ram_end: 0x08FF,
            pc_bits: 16,
            has_ext_regs: false,
            reduced_core: false,
            xmega: false,
            reset_vector: 0x0000,
            ivt_base: 0x0000,
            vector_stride: 4,
            vectors: Self::timer_vectors(&timers),
            timers,
            fuses: FuseDefaults { low: 0x62, high: 0xD9, extended: 0xFF, lockbits: 0xFF },
            io_names: Self::megax8_io_names(),
        }
    }

    /// ATmega88: the 8 KiB sibling of the 328P. Same register map, smaller
    /// memories, RJMP vector table, 64-byte SPM pages.
    pub fn atmega88() -> DeviceProfile {
        let timers = Self::megax8_timers();
        DeviceProfile {
            name: "atmega88",
            signature: [0x1E, 0x93, 0x0A],
            flash_size: 0x2000,
            spm_page_size: 64,
            ram_start: 0x0100,
            ram_end: 0x04FF,
            pc_bits: 16,
            has_ext_regs: false,
            reduced_core: false,
            xmega: false,
            reset_vector: 0x0000,
            ivt_base: 0x0000,
            vector_stride: 2,
            vectors: Self::timer_vectors(&timers),
            timers,
            fuses: FuseDefaults { low: 0x62, high: 0xDF, extended: 0xF9, lockbits: 0xFF },
            io_names: Self::megax8_io_names(),
        }
    }

    /// ATmega2560: 256 KiB flash, 22-bit PC, RAMPZ and EIND present,
    /// 3-byte return-address frames. Timer0 shares the x8 register map.
    pub fn atmega2560() -> DeviceProfile {
        let timers = vec![TimerDef {
            name: "timer0",
            width: TimerWidth::Bits8,
            tccra: addr::TCCR0A,
            tccrb: addr::TCCR0B,
            tcnt: addr::TCNT0,
            ocra: addr::OCR0A,
            ocrb: addr::OCR0B,
            icr: None,
            tifr: addr::TIFR0,
            timsk: addr::TIMSK0,
            // OC0A = PB7 on the 2560
            oca_pin: Some(OutputPin {
                port: IoBit::new(addr::PORTB, 7),
                ddr: IoBit::new(addr::DDRB, 7),
            }),
            ocb_pin: None,
            // T0 = PD7
            t_pin: Some(InputPin { pin: IoBit::new(addr::PIND, 7) }),
            icp_pin: None,
            ovf_vector: 22,
            compa_vector: 20,
            compb_vector: 21,
            capt_vector: None,
        }];
        DeviceProfile {
            name: "atmega2560",
            signature: [0x1E, 0x98, 0x01],
            flash_size: 0x40000,
            spm_page_size: 256,
            ram_start: 0x0200,
            ram_end: 0x21FF,
            pc_bits: 22,
            has_ext_regs: true,
            reduced_core: false,
            xmega: false,
            reset_vector: 0x0000,
            ivt_base: 0x0000,
            vector_stride: 4,
            vectors: Self::timer_vectors(&timers),
            timers,
            fuses: FuseDefaults { low: 0x62, high: 0x99, extended: 0xFF, lockbits: 0xFF },
            io_names: vec![
                IoRegName { name: "SREG", addr: addr::SREG, width: 1 },
                IoRegName { name: "SP", addr: addr::SPL, width: 2 },
                IoRegName { name: "RAMPZ", addr: addr::RAMPZ, width: 1 },
                IoRegName { name: "EIND", addr: addr::EIND, width: 1 },
                IoRegName { name: "TCNT0", addr: addr::TCNT0, width: 1 },
                IoRegName { name: "TIFR0", addr: addr::TIFR0, width: 1 },
                IoRegName { name: "TIMSK0", addr: addr::TIMSK0, width: 1 },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name() {
        assert_eq!(DeviceProfile::by_name("atmega328p").unwrap().name, "atmega328p");
        assert_eq!(DeviceProfile::by_name("m2560").unwrap().name, "atmega2560");
        assert!(DeviceProfile::by_name("z80").is_none());
    }

    #[test]
    fn test_328p_bounds() {
        let p = DeviceProfile::atmega328p();
        assert_eq!(p.flash_size, 0x8000);
        assert_eq!(p.dm_size(), 0x900);
        assert_eq!(p.pc_frame_bytes(), 2);
        assert!(!p.has_ext_regs);
    }

    #[test]
    fn test_2560_frames() {
        let p = DeviceProfile::atmega2560();
        assert_eq!(p.pc_bits, 22);
        assert_eq!(p.pc_frame_bytes(), 3);
        assert!(p.has_ext_regs);
    }

    #[test]
    fn test_vector_addr() {
        let p = DeviceProfile::atmega328p();
        // Timer0 overflow is slot 16 in a 4-byte table
        assert_eq!(p.vector_addr(16), 0x40);

        let p = DeviceProfile::atmega88();
        // RJMP table: 2 bytes per slot
        assert_eq!(p.vector_addr(16), 0x20);
    }

    #[test]
    fn test_lookup_reg() {
        let p = DeviceProfile::atmega328p();
        assert_eq!(p.lookup_reg("R16"), Some((16, 1)));
        assert_eq!(p.lookup_reg("TCNT1"), Some((addr::TCNT1L, 2)));
        assert_eq!(p.lookup_reg("sreg"), Some((addr::SREG, 1)));
        assert_eq!(p.lookup_reg("R32"), None);
        assert_eq!(p.lookup_reg("NOSUCH"), None);
    }

    #[test]
    fn test_cksel_decode() {
        let p = DeviceProfile::atmega328p();
        assert_eq!(p.decode_clock_select(0x62), Ok(0b0010));
        assert_eq!(
            p.decode_clock_select(0x61),
            Err(FuseError::BadClockSelect(0b0001))
        );
    }

    #[test]
    fn test_timer_table() {
        let p = DeviceProfile::atmega328p();
        assert_eq!(p.timers.len(), 3);
        let t1 = &p.timers[1];
        assert_eq!(t1.width, TimerWidth::Bits16);
        assert!(t1.icr.is_some());
        assert_eq!(t1.capt_vector, Some(10));
        // Timer2 has no external clock pin
        assert!(p.timers[2].t_pin.is_none());
    }

    #[test]
    fn test_vectors_derived_from_timers() {
        let p = DeviceProfile::atmega328p();
        // three timers, one capture vector among them
        assert_eq!(p.vectors.len(), 10);
        let ovf0 = p.vectors.iter().find(|v| v.index == 16).unwrap();
        assert_eq!(ovf0.enable, Some(IoBit::new(addr::TIMSK0, tifr::TOV)));
        assert_eq!(ovf0.raised, Some(IoBit::new(addr::TIFR0, tifr::TOV)));
        let capt1 = p.vectors.iter().find(|v| v.index == 10).unwrap();
        assert_eq!(capt1.raised, Some(IoBit::new(addr::TIFR1, tifr::ICF)));
        let compb2 = p.vectors.iter().find(|v| v.index == 8).unwrap();
        assert_eq!(compb2.enable, Some(IoBit::new(addr::TIMSK2, tifr::OCFB)));

        let p = DeviceProfile::atmega2560();
        assert_eq!(p.vectors.len(), 3);
        assert!(p.vectors.iter().any(|v| v.index == 22));
    }
}
