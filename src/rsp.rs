//! Remote-debug endpoint
//!
//! A byte-stream server speaking the GDB remote serial protocol at the
//! level a debugger needs against the core: register and memory access,
//! software breakpoints, single-step, continue, halt. Packets are framed
//! `$data#cs` with a two-digit modulo-256 checksum.
//!
//! Software breakpoints go through the match-point memory: inserting one
//! saves the original instruction word into the shadow buffer and
//! substitutes BREAK in flash; resuming over it arms the one-shot
//! match-point fetch so the original word executes once.
//!
//! Memory addresses follow the debugger convention for Harvard AVR
//! targets: flash at 0x000000, data memory offset by 0x800000.

use std::collections::HashSet;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use crate::state::{Mcu, RunState};

/// The BREAK instruction word substituted at breakpoints.
pub const BREAK_OPCODE: u16 = 0x9598;

/// Debugger view of data memory starts here.
const DM_OFFSET: u32 = 0x80_0000;

pub struct RspServer {
    listener: TcpListener,
    conn: Option<TcpStream>,
    rx: Vec<u8>,
    breakpoints: HashSet<u32>,
    /// The client resumed the target and is owed a stop reply
    awaiting_stop: bool,
}

impl RspServer {
    /// Bind the listener; port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        log::info!("debug endpoint on port {}", listener.local_addr()?.port());
        Ok(Self {
            listener,
            conn: None,
            rx: Vec::new(),
            breakpoints: HashSet::new(),
            awaiting_stop: false,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Accept a client and process at most one pending command. Called
    /// once per idle pass while the core is halted.
    pub fn poll(&mut self, mcu: &mut Mcu) -> io::Result<()> {
        self.pump()?;
        if let Some(cmd) = self.take_packet() {
            self.send_raw(b"+")?;
            if let Some(reply) = self.execute(mcu, &cmd) {
                self.send_packet(&reply)?;
            }
        }
        Ok(())
    }

    /// Light poll while the core runs: only the asynchronous interrupt
    /// byte (0x03) is honored, everything else waits for the next halt.
    pub fn poll_interrupt(&mut self, mcu: &mut Mcu) -> io::Result<()> {
        self.pump()?;
        if let Some(pos) = self.rx.iter().position(|b| *b == 0x03) {
            self.rx.drain(..=pos);
            mcu.run_state = RunState::Stopped;
            self.awaiting_stop = true;
        }
        Ok(())
    }

    /// Report a halt to a client that resumed the target.
    pub fn notify_stopped(&mut self) -> io::Result<()> {
        if self.awaiting_stop {
            self.awaiting_stop = false;
            self.send_packet(b"S05")?;
        }
        Ok(())
    }

    fn pump(&mut self) -> io::Result<()> {
        if self.conn.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    log::info!("debugger attached from {}", peer);
                    self.conn = Some(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        let mut buf = [0u8; 512];
        if let Some(conn) = &mut self.conn {
            match conn.read(&mut buf) {
                Ok(0) => {
                    log::info!("debugger detached");
                    self.conn = None;
                }
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Extract one well-formed packet payload from the receive buffer.
    fn take_packet(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.rx.first()? {
                b'+' | b'-' => {
                    self.rx.remove(0);
                }
                0x03 => {
                    self.rx.remove(0);
                    return Some(vec![0x03]);
                }
                b'$' => break,
                _ => {
                    self.rx.remove(0);
                }
            }
        }
        let hash = self.rx.iter().position(|b| *b == b'#')?;
        if self.rx.len() < hash + 3 {
            return None;
        }
        let payload: Vec<u8> = self.rx[1..hash].to_vec();
        let want = u8::from_str_radix(
            std::str::from_utf8(&self.rx[hash + 1..hash + 3]).ok()?,
            16,
        )
        .ok()?;
        self.rx.drain(..hash + 3);
        if checksum(&payload) != want {
            log::debug!("dropping packet with bad checksum");
            return None;
        }
        Some(payload)
    }

    fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(conn) = &mut self.conn {
            conn.write_all(bytes)?;
        }
        Ok(())
    }

    fn send_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut pkt = Vec::with_capacity(payload.len() + 4);
        pkt.push(b'$');
        pkt.extend_from_slice(payload);
        pkt.push(b'#');
        pkt.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
        self.send_raw(&pkt)
    }

    /// Run one command against the machine state; `None` means no reply
    /// goes out now (resume commands answer with a stop reply later).
    fn execute(&mut self, mcu: &mut Mcu, cmd: &[u8]) -> Option<Vec<u8>> {
        match cmd.first()? {
            0x03 => {
                mcu.run_state = RunState::Stopped;
                self.awaiting_stop = true;
                None
            }
            b'?' => Some(b"S05".to_vec()),
            b'g' => Some(self.read_registers(mcu)),
            b'G' => self.write_registers(mcu, &cmd[1..]),
            b'm' => self.read_memory(mcu, &cmd[1..]),
            b'M' => self.write_memory(mcu, &cmd[1..]),
            b'Z' => self.insert_breakpoint(mcu, &cmd[1..]),
            b'z' => self.remove_breakpoint(mcu, &cmd[1..]),
            b'c' => {
                self.resume(mcu, RunState::Running);
                None
            }
            b's' => {
                self.resume(mcu, RunState::Step);
                None
            }
            b'k' => {
                mcu.run_state = RunState::Stop;
                None
            }
            b'D' => {
                // detach: free-run the target
                mcu.run_state = RunState::Running;
                self.conn = None;
                None
            }
            b'q' => {
                if cmd.starts_with(b"qSupported") {
                    Some(b"PacketSize=1000".to_vec())
                } else if cmd == b"qAttached" {
                    Some(b"1".to_vec())
                } else {
                    Some(Vec::new())
                }
            }
            b'H' => Some(b"OK".to_vec()),
            _ => Some(Vec::new()),
        }
    }

    fn resume(&mut self, mcu: &mut Mcu, state: RunState) {
        // stepping off a breakpoint executes the saved original word
        if self.breakpoints.contains(&mcu.pc) {
            mcu.fetch_from_mpm = true;
        }
        mcu.run_state = state;
        self.awaiting_stop = true;
    }

    /// `g`: R0..R31, SREG, SP (little-endian), PC (4 bytes little-endian).
    fn read_registers(&self, mcu: &Mcu) -> Vec<u8> {
        let mut s = String::with_capacity(78);
        for r in 0..32 {
            push_hex(&mut s, mcu.reg(r));
        }
        push_hex(&mut s, mcu.sreg());
        let sp = mcu.sp();
        push_hex(&mut s, sp as u8);
        push_hex(&mut s, (sp >> 8) as u8);
        for i in 0..4 {
            push_hex(&mut s, (mcu.pc >> (8 * i)) as u8);
        }
        s.into_bytes()
    }

    fn write_registers(&self, mcu: &mut Mcu, hex: &[u8]) -> Option<Vec<u8>> {
        let bytes = from_hex(hex)?;
        if bytes.len() < 39 {
            return Some(b"E01".to_vec());
        }
        for (r, b) in bytes[..32].iter().enumerate() {
            mcu.set_reg(r as u8, *b);
        }
        mcu.set_sreg(bytes[32]);
        mcu.set_sp(bytes[33] as u16 | (bytes[34] as u16) << 8);
        mcu.pc = u32::from_le_bytes([bytes[35], bytes[36], bytes[37], bytes[38]]);
        Some(b"OK".to_vec())
    }

    fn read_memory(&self, mcu: &Mcu, args: &[u8]) -> Option<Vec<u8>> {
        let (addr, len) = parse_addr_len(args)?;
        let mut s = String::with_capacity(len as usize * 2);
        for i in 0..len {
            let b = match self.locate(mcu, addr + i) {
                Some(Space::Flash(a)) => mcu.flash[a],
                Some(Space::Data(a)) => mcu.read(a),
                None => return Some(b"E01".to_vec()),
            };
            push_hex(&mut s, b);
        }
        Some(s.into_bytes())
    }

    fn write_memory(&self, mcu: &mut Mcu, args: &[u8]) -> Option<Vec<u8>> {
        let colon = args.iter().position(|b| *b == b':')?;
        let (addr, len) = parse_addr_len(&args[..colon])?;
        let data = from_hex(&args[colon + 1..])?;
        if data.len() != len as usize {
            return Some(b"E01".to_vec());
        }
        for (i, byte) in data.iter().enumerate() {
            match self.locate(mcu, addr + i as u32) {
                Some(Space::Flash(a)) => mcu.flash[a] = *byte,
                Some(Space::Data(a)) => mcu.write(a, *byte),
                None => return Some(b"E01".to_vec()),
            }
        }
        Some(b"OK".to_vec())
    }

    fn locate(&self, mcu: &Mcu, addr: u32) -> Option<Space> {
        if addr >= DM_OFFSET {
            let a = addr - DM_OFFSET;
            (a < mcu.dm.len() as u32).then_some(Space::Data(a as u16))
        } else {
            (addr < mcu.profile.flash_size).then_some(Space::Flash(addr as usize))
        }
    }

    /// `Z0,addr,kind`: substitute BREAK in flash, keep the original word
    /// in the match-point memory.
    fn insert_breakpoint(&mut self, mcu: &mut Mcu, args: &[u8]) -> Option<Vec<u8>> {
        let (kind, addr) = parse_breakpoint(args)?;
        if kind != b'0' {
            return Some(Vec::new());
        }
        if addr + 1 >= mcu.profile.flash_size {
            return Some(b"E01".to_vec());
        }
        let a = addr as usize;
        mcu.mpm[a] = mcu.flash[a];
        mcu.mpm[a + 1] = mcu.flash[a + 1];
        mcu.flash[a] = BREAK_OPCODE as u8;
        mcu.flash[a + 1] = (BREAK_OPCODE >> 8) as u8;
        self.breakpoints.insert(addr);
        Some(b"OK".to_vec())
    }

    fn remove_breakpoint(&mut self, mcu: &mut Mcu, args: &[u8]) -> Option<Vec<u8>> {
        let (kind, addr) = parse_breakpoint(args)?;
        if kind != b'0' {
            return Some(Vec::new());
        }
        if self.breakpoints.remove(&addr) {
            let a = addr as usize;
            mcu.flash[a] = mcu.mpm[a];
            mcu.flash[a + 1] = mcu.mpm[a + 1];
        }
        Some(b"OK".to_vec())
    }
}

enum Space {
    Flash(usize),
    Data(u16),
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |a, b| a.wrapping_add(*b))
}

fn push_hex(s: &mut String, b: u8) {
    use std::fmt::Write as _;
    let _ = write!(s, "{:02x}", b);
}

fn from_hex(hex: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(hex).ok()?;
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Parse `addr,len` in hex.
fn parse_addr_len(args: &[u8]) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(args).ok()?;
    let (a, l) = text.split_once(',')?;
    Some((
        u32::from_str_radix(a, 16).ok()?,
        u32::from_str_radix(l, 16).ok()?,
    ))
}

/// Parse `kind,addr,size` from a Z/z packet.
fn parse_breakpoint(args: &[u8]) -> Option<(u8, u32)> {
    let text = std::str::from_utf8(args).ok()?;
    let mut parts = text.split(',');
    let kind = *parts.next()?.as_bytes().first()?;
    let addr = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((kind, addr))
}
