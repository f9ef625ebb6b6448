//! Key color parsing
//!
//! Supports the formats used for chroma key colors in project config and on
//! the command line:
//! - Hex: `#RGB`, `#RRGGBB` (leading `#` optional)
//! - A handful of named key colors: `magenta`, `green`, `blue`, `cyan`

use image::Rgb;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for color parsing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    /// Input string was empty
    #[error("empty color string")]
    Empty,
    /// Invalid length (must be 3 or 6 hex chars)
    #[error("invalid color length {0}, expected 3 or 6")]
    InvalidLength(usize),
    /// Contains non-hex characters
    #[error("invalid hex character '{0}'")]
    InvalidHex(char),
}

/// An opaque RGB color used as a chroma key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColor(pub Rgb<u8>);

impl KeyColor {
    /// Fully saturated magenta, the conventional generation background.
    pub const MAGENTA: KeyColor = KeyColor(Rgb([255, 0, 255]));

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self(Rgb([r, g, b]))
    }

    pub fn r(&self) -> u8 {
        self.0 .0[0]
    }

    pub fn g(&self) -> u8 {
        self.0 .0[1]
    }

    pub fn b(&self) -> u8 {
        self.0 .0[2]
    }

    /// Format as `#RRGGBB`.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r(), self.g(), self.b())
    }
}

impl Default for KeyColor {
    fn default() -> Self {
        Self::MAGENTA
    }
}

impl fmt::Display for KeyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for KeyColor {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_key_color(s)
    }
}

impl Serialize for KeyColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_key_color(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a key color string.
///
/// # Examples
///
/// ```
/// use spriteforge::color::{parse_key_color, KeyColor};
///
/// assert_eq!(parse_key_color("#FF00FF").unwrap(), KeyColor::MAGENTA);
/// assert_eq!(parse_key_color("f0f").unwrap(), KeyColor::MAGENTA);
/// assert_eq!(parse_key_color("magenta").unwrap(), KeyColor::MAGENTA);
/// ```
pub fn parse_key_color(s: &str) -> Result<KeyColor, ColorError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ColorError::Empty);
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "magenta" | "fuchsia" => return Ok(KeyColor::MAGENTA),
        "green" | "lime" => return Ok(KeyColor::new(0, 255, 0)),
        "blue" => return Ok(KeyColor::new(0, 0, 255)),
        "cyan" | "aqua" => return Ok(KeyColor::new(0, 255, 255)),
        _ => {}
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if let Some(c) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(ColorError::InvalidHex(c));
    }

    let digits: Vec<u8> = hex.bytes().map(hex_value).collect();
    match digits.as_slice() {
        [r, g, b] => Ok(KeyColor::new(r * 17, g * 17, b * 17)),
        [r1, r0, g1, g0, b1, b0] => {
            Ok(KeyColor::new(r1 * 16 + r0, g1 * 16 + g0, b1 * 16 + b0))
        }
        _ => Err(ColorError::InvalidLength(digits.len())),
    }
}

/// Value of an ASCII hex digit already validated by the caller.
fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}
