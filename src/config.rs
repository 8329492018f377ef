//! Simulator configuration file
//!
//! Line-oriented `key value` pairs, `#` starts a comment. Recognized keys:
//!
//! ```text
//! mcu atmega328p          # device name
//! mcu_freq 16000000       # CPU clock in Hz
//! mcu_lfuse 0x62          # fuse bytes
//! mcu_hfuse 0xD9
//! mcu_efuse 0xFF
//! lockbits 0xFF
//! firmware_file blink.hex
//! reset_flash yes         # erase program memory before loading
//! firmware_test no        # run to completion and exit
//! vcd_file trace.vcd
//! dump_regs PORTB,TCNT1,PORTD4
//! rsp_port 12750
//! trap_at_isr no
//! lua_model model.lua     # may repeat
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config line {line}: missing value for '{key}'")]
    MissingValue { line: usize, key: String },
    #[error("config line {line}: unknown option '{key}'")]
    UnknownKey { line: usize, key: String },
    #[error("config line {line}: bad value '{value}' for '{key}'")]
    BadValue {
        line: usize,
        key: String,
        value: String,
    },
}

/// Parsed configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mcu: String,
    pub freq_hz: u64,
    pub lfuse: Option<u8>,
    pub hfuse: Option<u8>,
    pub efuse: Option<u8>,
    pub lockbits: Option<u8>,
    pub firmware_file: Option<PathBuf>,
    pub reset_flash: bool,
    pub firmware_test: bool,
    pub vcd_file: Option<PathBuf>,
    /// Raw `dump_regs` entries; resolved against the device profile when
    /// the trace writer is set up
    pub dump_regs: Vec<String>,
    pub rsp_port: Option<u16>,
    pub trap_at_isr: bool,
    pub lua_models: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mcu: "atmega328p".to_string(),
            freq_hz: 16_000_000,
            lfuse: None,
            hfuse: None,
            efuse: None,
            lockbits: None,
            firmware_file: None,
            reset_flash: true,
            firmware_test: false,
            vcd_file: None,
            dump_regs: Vec::new(),
            rsp_port: None,
            trap_at_isr: false,
            lua_models: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Config, ConfigError> {
        let mut cfg = Config::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let stripped = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if stripped.is_empty() {
                continue;
            }

            let (key, value) = match stripped.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => {
                    return Err(ConfigError::MissingValue {
                        line,
                        key: stripped.to_string(),
                    })
                }
            };

            match key {
                "mcu" => cfg.mcu = value.to_string(),
                "mcu_freq" => cfg.freq_hz = parse_num(line, key, value)?,
                "mcu_lfuse" => cfg.lfuse = Some(parse_byte(line, key, value)?),
                "mcu_hfuse" => cfg.hfuse = Some(parse_byte(line, key, value)?),
                "mcu_efuse" => cfg.efuse = Some(parse_byte(line, key, value)?),
                "lockbits" => cfg.lockbits = Some(parse_byte(line, key, value)?),
                "firmware_file" => cfg.firmware_file = Some(PathBuf::from(value)),
                "reset_flash" => cfg.reset_flash = parse_bool(line, key, value)?,
                "firmware_test" => cfg.firmware_test = parse_bool(line, key, value)?,
                "vcd_file" => cfg.vcd_file = Some(PathBuf::from(value)),
                "dump_regs" => {
                    cfg.dump_regs
                        .extend(value.split(',').map(|s| s.trim().to_string()));
                }
                "rsp_port" => cfg.rsp_port = Some(parse_num(line, key, value)? as u16),
                "trap_at_isr" => cfg.trap_at_isr = parse_bool(line, key, value)?,
                "lua_model" => cfg.lua_models.push(PathBuf::from(value)),
                _ => {
                    return Err(ConfigError::UnknownKey {
                        line,
                        key: key.to_string(),
                    })
                }
            }
        }
        Ok(cfg)
    }
}

fn parse_bool(line: usize, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "yes" | "1" | "true" => Ok(true),
        "no" | "0" | "false" => Ok(false),
        _ => Err(bad(line, key, value)),
    }
}

fn parse_num(line: usize, key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| bad(line, key, value))
}

fn parse_byte(line: usize, key: &str, value: &str) -> Result<u8, ConfigError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| bad(line, key, value))
}

fn bad(line: usize, key: &str, value: &str) -> ConfigError {
    ConfigError::BadValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
    }
}
