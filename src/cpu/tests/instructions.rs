//! Instruction-level tests
//!
//! Programs are hand-assembled instruction words loaded at the reset
//! vector. Each family is exercised for its architectural effect and its
//! SREG behavior, including the documented boundary cases (INC 0x7F,
//! DEC 0x80, ADIW wrap, ROR through carry, skips over 32-bit words, the
//! CPC/SBC clear-only zero flag).

use super::*;
use crate::cpu::flags::Flag;
use crate::cpu::StepError;
use crate::device::{addr, DeviceProfile};
use crate::state::RunState;

fn run_to_stop(mcu: &mut Mcu) {
    for _ in 0..100_000 {
        if mcu.run_state != RunState::Running {
            return;
        }
        mcu.step().expect("program decodes");
    }
    panic!("program never stopped");
}

// ===== Arithmetic =====

#[test]
fn test_ldi_add() {
    // LDI R16, 0x05 ; LDI R17, 0x03 ; ADD R16, R17 ; BREAK
    let mut m = program(&[0xE005, 0xE013, 0x0F01, 0x9598]);
    run_to_stop(&mut m);
    assert_eq!(m.run_state, RunState::Stopped);
    assert_eq!(m.reg(16), 0x08);
    assert_eq!(m.reg(17), 0x03);
    for f in [Flag::C, Flag::Z, Flag::N, Flag::V, Flag::S, Flag::H] {
        assert!(!m.flag(f), "{:?} expected clear", f);
    }
}

#[test]
fn test_add_carry_and_zero() {
    // LDI R16, 0xFF ; LDI R17, 0x01 ; ADD R16, R17
    let mut m = program(&[0xEF0F, 0xE011, 0x0F01]);
    run_instrs(&mut m, 3);
    assert_eq!(m.reg(16), 0x00);
    assert!(m.flag(Flag::C));
    assert!(m.flag(Flag::Z));
    assert!(m.flag(Flag::H));
}

#[test]
fn test_adc_uses_carry() {
    let mut m = program(&[0x1F01]); // ADC R16, R17
    m.set_reg(16, 0x10);
    m.set_reg(17, 0x20);
    m.set_flag(Flag::C, true);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x31);
    assert!(!m.flag(Flag::C));
}

#[test]
fn test_sub_borrow() {
    let mut m = program(&[0x1B01]); // SUB R16, R17
    m.set_reg(16, 0x03);
    m.set_reg(17, 0x05);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xFE);
    assert!(m.flag(Flag::C));
    assert!(m.flag(Flag::N));
}

#[test]
fn test_subi_sbci_16bit_chain() {
    // SUBI R24, 0x01 ; SBCI R25, 0x00 on R25:R24 = 0x0100 → 0x00FF
    let mut m = program(&[0x5081, 0x4090]);
    m.set_reg(24, 0x00);
    m.set_reg(25, 0x01);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(24), 0xFF);
    assert_eq!(m.reg(25), 0x00);
}

#[test]
fn test_inc_boundary() {
    let mut m = program(&[0x9503]); // INC R16
    m.set_reg(16, 0x7F);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x80);
    assert!(m.flag(Flag::V));
    assert!(m.flag(Flag::N));
    assert!(!m.flag(Flag::S));
}

#[test]
fn test_dec_boundary() {
    let mut m = program(&[0x950A]); // DEC R16
    m.set_reg(16, 0x80);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x7F);
    assert!(m.flag(Flag::V));
    assert!(!m.flag(Flag::N));
}

#[test]
fn test_inc_rollover_sets_z() {
    let mut m = program(&[0x9503]); // INC R16
    m.set_reg(16, 0xFF);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x00);
    assert!(m.flag(Flag::Z));
    assert!(!m.flag(Flag::V));
}

#[test]
fn test_adiw_wrap() {
    // ADIW R24, 1 with R25:R24 = 0xFFFF
    let mut m = program(&[0x9601]);
    m.set_reg_pair(24, 0xFFFF);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(24), 0x0000);
    assert!(m.flag(Flag::C));
    assert!(m.flag(Flag::Z));
    assert!(!m.flag(Flag::V));
}

#[test]
fn test_sbiw_borrow() {
    // SBIW R24, 1 with R25:R24 = 0x0000
    let mut m = program(&[0x9701]);
    m.set_reg_pair(24, 0x0000);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(24), 0xFFFF);
    assert!(m.flag(Flag::C));
    assert!(m.flag(Flag::N));
}

#[test]
fn test_cp_cpc_clear_only_z() {
    // 16-bit compare of R17:R16 against R19:R18
    // CP R16, R18 ; CPC R17, R19
    let equal = [0x1702, 0x0713];
    let mut m = program(&equal);
    m.set_reg_pair(16, 0x0100);
    m.set_reg_pair(18, 0x0100);
    run_instrs(&mut m, 2);
    assert!(m.flag(Flag::Z), "equal words leave Z set through CPC");

    let mut m = program(&equal);
    m.set_reg_pair(16, 0x0101);
    m.set_reg_pair(18, 0x0100);
    run_instrs(&mut m, 2);
    // low-byte compare cleared Z; the zero high-byte result must not set it
    assert!(!m.flag(Flag::Z));
}

#[test]
fn test_com_neg() {
    let mut m = program(&[0x9500, 0x9501]); // COM R16 ; NEG R16
    m.set_reg(16, 0x0F);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xF0);
    assert!(m.flag(Flag::C));
    assert!(!m.flag(Flag::V));
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x10);
    assert!(m.flag(Flag::C), "NEG of non-zero sets carry");
}

#[test]
fn test_neg_of_0x80_overflows() {
    let mut m = program(&[0x9501]); // NEG R16
    m.set_reg(16, 0x80);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x80);
    assert!(m.flag(Flag::V));
    assert!(m.flag(Flag::N));
}

// ===== Logic =====

#[test]
fn test_logic_clears_v() {
    let mut m = program(&[0x2301, 0x2B01, 0x2701]); // AND, OR, EOR R16,R17
    m.set_flag(Flag::V, true);
    m.set_reg(16, 0xF0);
    m.set_reg(17, 0x0F);
    step_instr(&mut m); // AND → 0
    assert_eq!(m.reg(16), 0x00);
    assert!(m.flag(Flag::Z));
    assert!(!m.flag(Flag::V));
    step_instr(&mut m); // OR → 0x0F
    assert_eq!(m.reg(16), 0x0F);
    step_instr(&mut m); // EOR → 0x00
    assert_eq!(m.reg(16), 0x00);
}

#[test]
fn test_andi_ori() {
    let mut m = program(&[0x7F0F, 0x6F00]); // ANDI R16,0xFF ; ORI R16,0xF0
    m.set_reg(16, 0x85);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x85);
    assert!(m.flag(Flag::N));
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xF5);
}

// ===== Multiply =====

#[test]
fn test_mul() {
    let mut m = program(&[0x9F01]); // MUL R16, R17
    m.set_reg(16, 200);
    m.set_reg(17, 200);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(0), 40_000);
    assert!(m.flag(Flag::C)); // bit 15 of 40000 is set
    assert!(!m.flag(Flag::Z));
}

#[test]
fn test_muls_negative() {
    let mut m = program(&[0x0201]); // MULS R16, R17
    m.set_reg(16, 0xFF); // -1
    m.set_reg(17, 0x02);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(0), 0xFFFE); // -2
    assert!(m.flag(Flag::C));
}

#[test]
fn test_fmul_shifts_product() {
    let mut m = program(&[0x0309]); // FMUL R16, R17
    m.set_reg(16, 0x40); // 0.5 in 1.7 fixed point
    m.set_reg(17, 0x40);
    step_instr(&mut m);
    // 0x40 * 0x40 = 0x1000, shifted left = 0x2000 (0.25)
    assert_eq!(m.reg_pair(0), 0x2000);
    assert!(!m.flag(Flag::C));
}

// ===== Shifts =====

#[test]
fn test_asr_preserves_sign() {
    let mut m = program(&[0x9505]); // ASR R16
    m.set_reg(16, 0x81);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xC0);
    assert!(m.flag(Flag::C));
    assert!(m.flag(Flag::N));
}

#[test]
fn test_lsr() {
    let mut m = program(&[0x9506]); // LSR R16
    m.set_reg(16, 0x81);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x40);
    assert!(m.flag(Flag::C));
    assert!(!m.flag(Flag::N));
}

#[test]
fn test_ror_through_carry() {
    let mut m = program(&[0x9507, 0x9507]); // ROR R16 ; ROR R16
    m.set_reg(16, 0x01);
    m.set_flag(Flag::C, false);
    step_instr(&mut m);
    // bit 0 went to carry, nothing came in
    assert_eq!(m.reg(16), 0x00);
    assert!(m.flag(Flag::C));
    step_instr(&mut m);
    // carry rotates back in at the top
    assert_eq!(m.reg(16), 0x80);
    assert!(!m.flag(Flag::C));
}

#[test]
fn test_swap() {
    let mut m = program(&[0x9502]); // SWAP R16
    let sreg = m.sreg();
    m.set_reg(16, 0xA5);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x5A);
    assert_eq!(m.sreg(), sreg, "SWAP touches no flags");
}

// ===== Flag and bit operations =====

#[test]
fn test_sei_cli() {
    let mut m = program(&[0x9478, 0x94F8]); // SEI ; CLI
    step_instr(&mut m);
    assert!(m.flag(Flag::I));
    step_instr(&mut m);
    assert!(!m.flag(Flag::I));
}

#[test]
fn test_bst_bld() {
    let mut m = program(&[0xFB06, 0xF910]); // BST R16,6 ; BLD R17,0
    m.set_reg(16, 0x40);
    m.set_reg(17, 0x00);
    run_instrs(&mut m, 2);
    assert!(m.flag(Flag::T));
    assert_eq!(m.reg(17), 0x01);
}

#[test]
fn test_sbi_cbi() {
    let mut m = program(&[0x9A28, 0x9828]); // SBI 0x05,0 ; CBI 0x05,0
    step_instr(&mut m);
    assert_eq!(m.read(addr::PORTB), 0x01);
    step_instr(&mut m);
    assert_eq!(m.read(addr::PORTB), 0x00);
}

// ===== Skips =====

#[test]
fn test_sbrs_skips_16bit() {
    // SBRS R16,0 ; INC R17 ; INC R18
    let mut m = program(&[0xFF00, 0x9513, 0x9523]);
    m.set_reg(16, 0x01);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(17), 0, "skipped");
    assert_eq!(m.reg(18), 1);
}

#[test]
fn test_sbrs_skips_32bit() {
    // SBRS R16,0 over a CALL must advance PC by 6, not 4
    let mut m = program(&[0xFF00, 0x940E, 0x0010, 0x9513]);
    m.set_reg(16, 0x01);
    step_instr(&mut m);
    assert_eq!(m.pc, 6);
}

#[test]
fn test_sbrc_no_skip() {
    let mut m = program(&[0xFD00, 0x9513]); // SBRC R16,0 ; INC R17
    m.set_reg(16, 0x01);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(17), 1, "bit set, no skip");
}

#[test]
fn test_cpse() {
    let mut m = program(&[0x1301, 0x9523, 0x9533]); // CPSE R16,R17 ; INC R18 ; INC R19
    m.set_reg(16, 5);
    m.set_reg(17, 5);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(18), 0);
    assert_eq!(m.reg(19), 1);
}

#[test]
fn test_sbis_sbic() {
    // SBIS 0x05,0 ; INC R17 ; SBIC 0x05,0 ; INC R18
    let mut m = program(&[0x9B28, 0x9513, 0x9928, 0x9523]);
    m.set_bit(addr::PORTB, 0, true);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(17), 0, "SBIS skipped over INC R17");
    assert_eq!(m.reg(18), 0, "SBIC with the bit set does not skip");
    step_instr(&mut m);
    assert_eq!(m.reg(18), 1);
}

// ===== Control transfer =====

#[test]
fn test_rjmp() {
    let mut m = program(&[0xC001, 0x9513, 0x9523]); // RJMP .+1 ; INC R17 ; INC R18
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(17), 0);
    assert_eq!(m.reg(18), 1);
}

#[test]
fn test_brne_loop() {
    // LDI R16, 0xFE ; INC R16 ; BRNE .-2 ; (falls through when R16 wraps)
    let mut m = program(&[0xEF0E, 0x9503, 0xF7F1, 0x9598]);
    run_to_stop(&mut m);
    assert_eq!(m.reg(16), 0x00);
    assert_eq!(m.run_state, RunState::Stopped);
}

#[test]
fn test_breq_taken() {
    let mut m = program(&[0xF009, 0x9513, 0x9523]); // BREQ .+1 ; INC R17 ; INC R18
    m.set_flag(Flag::Z, true);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(17), 0);
    assert_eq!(m.reg(18), 1);
}

#[test]
fn test_call_ret_round_trip() {
    // CALL 0x0008 ; NOP ; NOP ; RET (at byte 8)
    let mut m = program(&[0x940E, 0x0004, 0x0000, 0x0000, 0x9508]);
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.pc, 0x0008);
    assert_eq!(m.sp(), sp0 - 2);
    step_instr(&mut m); // RET
    assert_eq!(m.pc, 0x0004, "resumes after the 32-bit CALL");
    assert_eq!(m.sp(), sp0);
}

#[test]
fn test_call_pushes_3_bytes_on_22bit_pc() {
    let mut m = Mcu::new(DeviceProfile::atmega2560(), 16_000_000);
    load_words(&mut m, 0, &[0x940E, 0x0004, 0x0000, 0x0000, 0x9508]);
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.sp(), sp0 - 3);
    step_instr(&mut m);
    assert_eq!(m.pc, 0x0004);
    assert_eq!(m.sp(), sp0);
}

#[test]
fn test_rcall_ret() {
    // RCALL .+1 ; INC R17 ; RET → RET returns to the INC
    let mut m = program(&[0xD001, 0x9513, 0x9508]);
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.pc, 0x0004);
    assert_eq!(m.sp(), sp0 - 2);
    step_instr(&mut m); // RET
    assert_eq!(m.pc, 0x0002);
    step_instr(&mut m); // INC R17
    assert_eq!(m.reg(17), 1);
}

#[test]
fn test_ijmp_icall() {
    let mut m = program(&[0x9409]); // IJMP
    m.set_z(0x0005); // word address → byte 0x0A
    step_instr(&mut m);
    assert_eq!(m.pc, 0x000A);

    let mut m = program(&[0x9509]); // ICALL
    m.set_z(0x0005);
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.pc, 0x000A);
    assert_eq!(m.sp(), sp0 - 2);
}

#[test]
fn test_jmp() {
    let mut m = program(&[0x940C, 0x0080]); // JMP word 0x80 (byte 0x100)
    step_instr(&mut m);
    assert_eq!(m.pc, 0x0100);
}

#[test]
fn test_reti_sets_i_and_exec_main() {
    let mut m = program(&[0x9518]); // RETI
    m.push_pc(0x0010);
    step_instr(&mut m);
    assert_eq!(m.pc, 0x0010);
    assert!(m.flag(Flag::I));
    assert!(m.exec_main);
}

// ===== Data transfer =====

#[test]
fn test_mov_movw_round_trip() {
    let mut m = program(&[0x0110, 0x0101]); // MOVW R2,R0 ; MOVW R0,R2
    m.set_reg_pair(0, 0xBEEF);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(2), 0xBEEF);
    m.set_reg_pair(0, 0x0000);
    step_instr(&mut m);
    assert_eq!(m.reg_pair(0), 0xBEEF, "MOVW round trip is the identity");
}

#[test]
fn test_push_pop_round_trip() {
    let mut m = program(&[0x930F, 0x911F]); // PUSH R16 ; POP R17
    m.set_reg(16, 0x5A);
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.sp(), sp0 - 1);
    step_instr(&mut m);
    assert_eq!(m.reg(17), 0x5A);
    assert_eq!(m.sp(), sp0);
}

#[test]
fn test_in_out() {
    let mut m = program(&[0xB905, 0xB71F]); // OUT 0x05,R16 ; IN R17,0x3F
    m.set_reg(16, 0xA5);
    step_instr(&mut m);
    assert_eq!(m.read(addr::PORTB), 0xA5);
    m.set_sreg(0x03);
    step_instr(&mut m);
    assert_eq!(m.reg(17), 0x03, "IN from SREG");
}

#[test]
fn test_lds_sts() {
    let mut m = program(&[0x9100, 0x0200, 0x9310, 0x0201]); // LDS R16,0x200 ; STS 0x201,R17
    m.write(0x0200, 0x77);
    m.set_reg(17, 0x88);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x77);
    assert_eq!(m.pc, 4);
    step_instr(&mut m);
    assert_eq!(m.read(0x0201), 0x88);
    assert_eq!(m.pc, 8);
}

#[test]
fn test_ld_x_modes() {
    // LD R16,X+ ; LD R17,X ; LD R18,-X
    let mut m = program(&[0x910D, 0x911C, 0x912E]);
    m.write(0x0200, 0xAA);
    m.write(0x0201, 0xBB);
    m.set_x(0x0200);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xAA);
    assert_eq!(m.x(), 0x0201, "post-increment");
    step_instr(&mut m);
    assert_eq!(m.reg(17), 0xBB);
    assert_eq!(m.x(), 0x0201, "plain access leaves the pointer");
    step_instr(&mut m);
    assert_eq!(m.reg(18), 0xAA);
    assert_eq!(m.x(), 0x0200, "pre-decrement");
}

#[test]
fn test_st_y_post_increment() {
    let mut m = program(&[0x9309]); // ST Y+, R16
    m.set_reg(16, 0xCC);
    m.set_y(0x0300);
    step_instr(&mut m);
    assert_eq!(m.read(0x0300), 0xCC);
    assert_eq!(m.y(), 0x0301);
}

#[test]
fn test_ldd_std_displacement() {
    let mut m = program(&[0x8101, 0x8302]); // LDD R16,Z+1 ; STD Z+2,R16
    m.set_z(0x0200);
    m.write(0x0201, 0x42);
    run_instrs(&mut m, 2);
    assert_eq!(m.reg(16), 0x42);
    assert_eq!(m.read(0x0202), 0x42);
    assert_eq!(m.z(), 0x0200, "displacement mode leaves the pointer");
}

#[test]
fn test_lpm_forms() {
    let mut m = program(&[0x9104, 0x9115, 0x95C8]); // LPM R16,Z ; LPM R17,Z+ ; LPM (R0)
    m.flash[0x20] = 0xDE;
    m.flash[0x21] = 0xAD;
    m.set_z(0x0020);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0xDE);
    assert_eq!(m.z(), 0x0020);
    step_instr(&mut m);
    assert_eq!(m.reg(17), 0xDE);
    assert_eq!(m.z(), 0x0021, "LPM Z+ increments");
    step_instr(&mut m);
    assert_eq!(m.reg(0), 0xAD, "R0 form");
}

#[test]
fn test_elpm_with_rampz() {
    let mut m = Mcu::new(DeviceProfile::atmega2560(), 16_000_000);
    load_words(&mut m, 0, &[0x9107]); // ELPM R16, Z+
    m.flash[0x1_0002] = 0x99;
    m.write(addr::RAMPZ, 0x01);
    m.set_z(0x0002);
    step_instr(&mut m);
    assert_eq!(m.reg(16), 0x99);
    assert_eq!(m.z(), 0x0003);
    assert_eq!(m.rampz(), 0x01);
}

#[test]
fn test_elpm_without_rampz_is_a_fault() {
    let mut m = program(&[0x9106]); // ELPM R16, Z
    step_instr(&mut m);
    assert_eq!(m.run_state, RunState::TestFail);
}

#[test]
fn test_eicall_without_eind_is_a_fault() {
    let mut m = program(&[0x9519]); // EICALL
    let sp0 = m.sp();
    step_instr(&mut m);
    assert_eq!(m.run_state, RunState::TestFail);
    assert_eq!(m.sp(), sp0, "no stack traffic on the fault path");
}

#[test]
fn test_xch_las_lac_lat() {
    let mut m = program(&[0x9304, 0x9315, 0x9326, 0x9337]); // XCH ; LAS R17 ; LAC R18 ; LAT R19
    m.set_z(0x0200);
    m.write(0x0200, 0x0F);
    m.set_reg(16, 0xF0);
    step_instr(&mut m);
    assert_eq!(m.read(0x0200), 0xF0, "XCH stores the register");
    assert_eq!(m.reg(16), 0x0F);

    m.write(0x0200, 0x0F);
    m.set_reg(17, 0xF0);
    step_instr(&mut m);
    assert_eq!(m.read(0x0200), 0xFF, "LAS ors into memory");
    assert_eq!(m.reg(17), 0x0F);

    m.write(0x0200, 0xFF);
    m.set_reg(18, 0x0F);
    step_instr(&mut m);
    assert_eq!(m.read(0x0200), 0xF0, "LAC clears the register mask");
    assert_eq!(m.reg(18), 0xFF);

    m.write(0x0200, 0xFF);
    m.set_reg(19, 0x0F);
    step_instr(&mut m);
    assert_eq!(m.read(0x0200), 0xF0, "LAT toggles");
    assert_eq!(m.reg(19), 0xFF);
}

// ===== MCU control =====

#[test]
fn test_break_stops_without_advancing() {
    let mut m = program(&[0x0000, 0x9598]); // NOP ; BREAK
    step_instr(&mut m);
    m.step().unwrap();
    assert_eq!(m.run_state, RunState::Stopped);
    assert_eq!(m.pc, 2, "PC stays at the BREAK");
}

#[test]
fn test_sleep_needs_enable_bit() {
    let mut m = program(&[0x9588, 0x9588]); // SLEEP ; SLEEP
    step_instr(&mut m);
    assert_eq!(m.run_state, RunState::Running, "SE clear: SLEEP is a no-op");
    m.set_bit(addr::SMCR, 0, true);
    step_instr(&mut m);
    assert_eq!(m.run_state, RunState::Sleeping);
}

#[test]
fn test_wdr_is_a_nop() {
    let mut m = program(&[0x95A8]);
    step_instr(&mut m);
    assert_eq!(m.pc, 2);
}

#[test]
fn test_unknown_instruction() {
    let mut m = program(&[0xFF08]);
    let err = m.step().unwrap_err();
    assert_eq!(err, StepError::UnknownInstruction { pc: 0, word: 0xFF08 });
}

// ===== Self-programming =====

#[test]
fn test_spm_page_erase() {
    // 64-byte pages on the atmega88; erase the page holding 0x0100
    let mut m = Mcu::new(DeviceProfile::atmega88(), 8_000_000);
    load_words(&mut m, 0, &[0x95E8]); // SPM
    for a in 0x00C0..0x0180 {
        m.flash[a] = 0x00;
    }
    m.set_z(0x0100);
    m.write(addr::SPMCSR, 0b011);
    step_instr(&mut m);
    assert!(m.flash[0x0100..0x0140].iter().all(|&b| b == 0xFF));
    assert!(m.flash[0x00C0..0x0100].iter().all(|&b| b == 0x00), "page below untouched");
    assert!(m.flash[0x0140..0x0180].iter().all(|&b| b == 0x00), "page above untouched");
    assert_eq!(m.read(addr::SPMCSR) & 0x07, 0, "command cleared on completion");
}

#[test]
fn test_spm_fill_and_write() {
    let mut m = Mcu::new(DeviceProfile::atmega88(), 8_000_000);
    // SPM (fill) ; SPM (write)
    load_words(&mut m, 0, &[0x95E8, 0x95E8]);
    // fill word 0 of the buffer with R1:R0
    m.set_reg(0, 0x34);
    m.set_reg(1, 0x12);
    m.set_z(0x0140);
    m.write(addr::SPMCSR, 0b001);
    step_instr(&mut m);
    assert_eq!(m.page_buffer[0], 0x34);
    assert_eq!(m.page_buffer[1], 0x12);

    m.write(addr::SPMCSR, 0b101);
    step_instr(&mut m);
    assert_eq!(m.flash[0x0140], 0x34);
    assert_eq!(m.flash[0x0141], 0x12);
    // untouched buffer words wrote erased bytes
    assert_eq!(m.flash[0x0142], 0xFF);
    assert!(m.page_buffer.iter().all(|&b| b == 0xFF), "buffer reset after write");
}

#[test]
fn test_spm_z_plus_increments_pointer() {
    let mut m = Mcu::new(DeviceProfile::atmega88(), 8_000_000);
    load_words(&mut m, 0, &[0x95F8]); // SPM Z+
    m.set_reg_pair(0, 0xAABB);
    m.set_z(0x0000);
    m.write(addr::SPMCSR, 0b001);
    step_instr(&mut m);
    assert_eq!(m.z(), 0x0002);
}
