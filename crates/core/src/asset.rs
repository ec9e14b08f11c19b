//! Token symbols and asset quantities, as rendered into documents.

use serde::Serialize;
use std::fmt;

use crate::error::{CoreError, Result};

/// A token symbol: precision in the low byte, up to seven uppercase
/// characters in the remaining bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u64);

impl Symbol {
    pub const fn from_u64(value: u64) -> Self {
        Symbol(value)
    }

    pub const fn precision(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn code(&self) -> SymbolCode {
        SymbolCode(self.0 >> 8)
    }

    /// Build from precision and code, validating the character set.
    pub fn new(precision: u8, code: &str) -> Result<Self> {
        let code = SymbolCode::new(code)?;
        Ok(Symbol((code.0 << 8) | u64::from(precision)))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision(), self.code())
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// The character portion of a symbol (`SYS`, `EOS`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolCode(u64);

impl SymbolCode {
    pub const fn from_u64(value: u64) -> Self {
        SymbolCode(value)
    }

    pub fn new(code: &str) -> Result<Self> {
        if code.is_empty() || code.len() > 7 {
            return Err(CoreError::InvalidSymbol(code.to_string()));
        }
        let mut value: u64 = 0;
        for (i, c) in code.bytes().enumerate() {
            if !c.is_ascii_uppercase() {
                return Err(CoreError::InvalidSymbol(code.to_string()));
            }
            value |= u64::from(c) << (8 * i);
        }
        Ok(SymbolCode(value))
    }
}

impl fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut v = self.0;
        while v > 0 {
            let c = (v & 0xff) as u8;
            if c == 0 {
                break;
            }
            f.write_str(
                std::str::from_utf8(&[c]).map_err(|_| fmt::Error)?,
            )?;
            v >>= 8;
        }
        Ok(())
    }
}

impl Serialize for SymbolCode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A token quantity, rendered as `"1.0000 SYS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.symbol.precision() as u32;
        let sign = if self.amount < 0 { "-" } else { "" };
        let magnitude = self.amount.unsigned_abs();
        if precision == 0 {
            write!(f, "{sign}{magnitude} {}", self.symbol.code())
        } else {
            let divisor = 10u64.pow(precision);
            write!(
                f,
                "{sign}{}.{:0width$} {}",
                magnitude / divisor,
                magnitude % divisor,
                self.symbol.code(),
                width = precision as usize
            )
        }
    }
}

impl Serialize for Asset {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
