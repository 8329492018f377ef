//! Intel-HEX firmware images
//!
//! Loads a program image into flash. Data records land at their absolute
//! byte address (extended linear/segment records adjust the base); bytes
//! outside record coverage keep whatever the flash held, which is the
//! erased value 0xFF when `reset_flash` was honored.

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("failed to read firmware {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware line {line}: malformed record")]
    Malformed { line: usize },
    #[error("firmware line {line}: checksum mismatch")]
    Checksum { line: usize },
    #[error("firmware line {line}: unsupported record type {kind:#04X}")]
    Unsupported { kind: u8, line: usize },
    #[error("record at {addr:#08X}+{len} exceeds flash size {flash:#08X}")]
    OutOfBounds { addr: u32, len: usize, flash: u32 },
    #[error("firmware has no end-of-file record")]
    MissingEof,
}

/// Load Intel-HEX text into `flash`. Returns the number of data bytes
/// written.
pub fn load_ihex_str(text: &str, flash: &mut [u8]) -> Result<usize, FirmwareError> {
    let mut base: u32 = 0;
    let mut loaded = 0usize;
    let mut saw_eof = false;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let rec = raw.trim();
        if rec.is_empty() {
            continue;
        }
        if saw_eof {
            break;
        }
        let rec = rec
            .strip_prefix(':')
            .ok_or(FirmwareError::Malformed { line })?;
        let bytes = parse_hex_bytes(rec).ok_or(FirmwareError::Malformed { line })?;
        if bytes.len() < 5 {
            return Err(FirmwareError::Malformed { line });
        }

        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err(FirmwareError::Malformed { line });
        }
        let sum: u8 = bytes.iter().fold(0u8, |a, b| a.wrapping_add(*b));
        if sum != 0 {
            return Err(FirmwareError::Checksum { line });
        }

        let offset = (bytes[1] as u32) << 8 | bytes[2] as u32;
        let kind = bytes[3];
        let data = &bytes[4..4 + count];
        match kind {
            0x00 => {
                let addr = base + offset;
                let end = addr as usize + count;
                if end > flash.len() {
                    return Err(FirmwareError::OutOfBounds {
                        addr,
                        len: count,
                        flash: flash.len() as u32,
                    });
                }
                flash[addr as usize..end].copy_from_slice(data);
                loaded += count;
            }
            0x01 => saw_eof = true,
            0x02 => {
                // extended segment address: bits 4..19 of the base
                if count != 2 {
                    return Err(FirmwareError::Malformed { line });
                }
                base = ((data[0] as u32) << 8 | data[1] as u32) << 4;
            }
            0x04 => {
                // extended linear address: upper 16 bits of the base
                if count != 2 {
                    return Err(FirmwareError::Malformed { line });
                }
                base = ((data[0] as u32) << 8 | data[1] as u32) << 16;
            }
            // start-address records carry no data for flash
            0x03 | 0x05 => {}
            _ => return Err(FirmwareError::Unsupported { kind, line }),
        }
    }

    if !saw_eof {
        return Err(FirmwareError::MissingEof);
    }
    log::info!("loaded {} firmware bytes", loaded);
    Ok(loaded)
}

/// Read an Intel-HEX file into `flash`, optionally erasing it first.
pub fn load_ihex_file(
    path: &Path,
    flash: &mut [u8],
    reset_flash: bool,
) -> Result<usize, FirmwareError> {
    let text = fs::read_to_string(path).map_err(|source| FirmwareError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if reset_flash {
        flash.fill(0xFF);
    }
    load_ihex_str(&text, flash)
}

fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
