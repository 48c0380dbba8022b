//! Human-readable formatting of sizes, counts and identifiers.

use rand::distributions::Alphanumeric;
use rand::Rng;

const BYTE_SUFFIXES: &[&str] = &["B", "kiB", "MiB", "GiB", "TiB"];
const DECIMAL_SUFFIXES: &[&str] = &[" ", "k", "M", "G", "T"];

/// Bytes in a decimal gigabyte.
pub const GB: u64 = 1_000_000_000;
/// Bytes in a binary gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Render a byte count with binary units, stopping early at `stop_at`.
pub fn humanize_bytes(bytes: u64, precision: usize, stop_at: Option<&str>) -> String {
    let mut converted = bytes as f64;
    let mut index = 0;

    while converted.abs() >= 1000.0 && index + 1 < BYTE_SUFFIXES.len() {
        converted /= 1024.0;
        index += 1;
        if Some(BYTE_SUFFIXES[index]) == stop_at {
            break;
        }
    }

    format!("{:.*} {}", precision, converted, BYTE_SUFFIXES[index])
}

/// Render a number with decimal units; values under 1000 are printed as-is.
pub fn humanize_decimal(number: i64, precision: usize, stop_at: Option<&str>) -> String {
    if number.abs() < 1000 {
        return number.to_string();
    }

    let mut converted = number as f64;
    let mut index = 0;

    while converted.abs() >= 1000.0 && index + 1 < DECIMAL_SUFFIXES.len() {
        converted /= 1000.0;
        index += 1;
        if Some(DECIMAL_SUFFIXES[index]) == stop_at {
            break;
        }
    }

    format!("{:.*} {}", precision, converted, DECIMAL_SUFFIXES[index])
}

/// Convert a hex WWN (`0x10000090fa34ad72`) to colon form (`10:00:00:90:fa:34:ad:72`).
pub fn humanize_wwn(hex_wwn: &str) -> String {
    let digits = hex_wwn.strip_prefix("0x").unwrap_or(hex_wwn);
    digits
        .as_bytes()
        .chunks(2)
        .take(8)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Canonical WWN used for comparisons: lowercase hex with no separators.
pub fn normalize_wwn(wwn: &str) -> String {
    let trimmed = wwn.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    digits
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

/// Random alphanumeric CHAP secret.
pub fn simple_chap_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// First non-empty line of a multi-line string.
pub fn first_line(value: &str) -> &str {
    value.lines().find(|line| !line.is_empty()).unwrap_or(value)
}
