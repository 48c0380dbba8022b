//! Declarative argument validation.
//!
//! Action argument structs derive [`validator::Validate`] and point each field
//! at one of the check functions below. [`ensure_valid`] runs the checks and
//! turns every failure into a single [`Error::Argument`], one line per field,
//! before any network or SSH traffic happens.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::{Error, Result};
use crate::util::format::normalize_wwn;

/// Highest LUN number the block protocols allow.
pub const MAX_LUN: u32 = 16383;

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{2}(:[0-9a-f]{2}){5}$|^[0-9a-f]{2}(-[0-9a-f]{2}){5}$").expect("Invalid MAC regex")
});

static WWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{16}$").expect("Invalid WWN regex"));

fn invalid(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

/// Run a struct's declared validators and convert failures to an argument error.
pub fn ensure_valid<T: Validate>(args: &T) -> Result<()> {
    args.validate().map_err(|errors| Error::Argument(describe(&errors)))
}

/// Flatten validation errors into `invalid value for <field> - <reason>` lines.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut lines = Vec::new();
    collect_lines("", errors, &mut lines);
    lines.sort();
    lines.join("\n")
}

fn collect_lines(prefix: &str, errors: &ValidationErrors, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let name = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let reason = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    lines.push(format!("invalid value for {} - {}", name, reason));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_lines(&name, inner, lines),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_lines(&format!("{}[{}]", name, index), inner, lines);
                }
            }
        }
    }
}

// ============================================================================
// Field validators
// ============================================================================

pub fn ipv4(value: &str) -> std::result::Result<(), ValidationError> {
    match value.trim().parse::<Ipv4Addr>() {
        Ok(ip) if ip.octets()[0] > 0 && ip.octets()[3] > 0 => Ok(()),
        _ => Err(invalid("ipv4", format!("'{}' does not appear to be a valid address", value))),
    }
}

/// A comma separated list of addresses, or a list field of addresses.
pub fn ipv4_list<S: AsRef<str>>(values: &[S]) -> std::result::Result<(), ValidationError> {
    if values.is_empty() {
        return Err(invalid("ipv4_list", "must have a value"));
    }
    for value in values {
        for piece in value.as_ref().split(',') {
            ipv4(piece.trim())?;
        }
    }
    Ok(())
}

pub fn mac(value: &str) -> std::result::Result<(), ValidationError> {
    if MAC_RE.is_match(&value.to_lowercase()) {
        Ok(())
    } else {
        Err(invalid("mac", format!("'{}' is not a valid MAC address", value)))
    }
}

pub fn wwn(value: &str) -> std::result::Result<(), ValidationError> {
    if WWN_RE.is_match(&normalize_wwn(value)) {
        Ok(())
    } else {
        Err(invalid("wwn", format!("'{}' is not a valid WWN", value)))
    }
}

pub fn iqn(value: &str) -> std::result::Result<(), ValidationError> {
    let lower = value.to_lowercase();
    if (lower.starts_with("iqn.") || lower.starts_with("eui.")) && !lower.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(invalid("iqn", format!("'{}' is not a valid IQN", value)))
    }
}

/// An initiator is either an IQN or a WWN.
pub fn initiator(value: &str) -> std::result::Result<(), ValidationError> {
    iqn(value)
        .or_else(|_| wwn(value))
        .map_err(|_| invalid("initiator", format!("'{}' is not a valid IQN or WWN", value)))
}

pub fn initiator_list(values: &[String]) -> std::result::Result<(), ValidationError> {
    if values.is_empty() {
        return Err(invalid("initiator_list", "must have a value"));
    }
    values.iter().try_for_each(|v| initiator(v))
}

pub fn chap_secret(value: &str) -> std::result::Result<(), ValidationError> {
    let len = value.chars().count();
    if (12..=16).contains(&len) {
        Ok(())
    } else {
        Err(invalid("chap_secret", format!("CHAP secrets must be 12-16 characters (got {})", len)))
    }
}

pub fn positive_id(value: u64) -> std::result::Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid("positive_id", "must be a positive integer"))
    }
}

pub fn positive_id_list(values: &[u64]) -> std::result::Result<(), ValidationError> {
    values.iter().try_for_each(|v| positive_id(*v))
}

pub fn regex_pattern(value: &str) -> std::result::Result<(), ValidationError> {
    Regex::new(value)
        .map(|_| ())
        .map_err(|e| invalid("regex", format!("'{}' is not a valid regex: {}", value, e)))
}

pub fn vlan_tag(value: u32) -> std::result::Result<(), ValidationError> {
    if (1..=4095).contains(&value) {
        Ok(())
    } else {
        Err(invalid("vlan_tag", format!("{} is not a valid VLAN tag (1-4095)", value)))
    }
}

pub fn lun(value: u32) -> std::result::Result<(), ValidationError> {
    if value <= MAX_LUN {
        Ok(())
    } else {
        Err(invalid("lun", format!("LUN {} exceeds the maximum of {}", value, MAX_LUN)))
    }
}

/// Volume size in GB (or GiB); the cluster accepts 1 to 8000.
pub fn volume_size(value: u64) -> std::result::Result<(), ValidationError> {
    if (1..=8000).contains(&value) {
        Ok(())
    } else {
        Err(invalid("volume_size", format!("{} is not a valid volume size (1-8000)", value)))
    }
}

pub fn min_iops(value: u64) -> std::result::Result<(), ValidationError> {
    if (50..=15_000).contains(&value) {
        Ok(())
    } else {
        Err(invalid("min_iops", format!("{} is out of range (50-15000)", value)))
    }
}

/// Max and burst IOPS.
pub fn max_iops(value: u64) -> std::result::Result<(), ValidationError> {
    if (100..=200_000).contains(&value) {
        Ok(())
    } else {
        Err(invalid("max_iops", format!("{} is out of range (100-200000)", value)))
    }
}

/// min <= max <= burst.
pub fn qos_order(min: u64, max: u64, burst: u64) -> Result<()> {
    if min > max {
        return Err(Error::argument("min_iops must be less than or equal to max_iops"));
    }
    if max > burst {
        return Err(Error::argument("max_iops must be less than or equal to burst_iops"));
    }
    Ok(())
}

pub fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(invalid("required", "must have a value"))
    } else {
        Ok(())
    }
}

/// Check a value against a fixed set of choices.
pub fn one_of(value: &str, choices: &[&str]) -> std::result::Result<(), ValidationError> {
    if choices.contains(&value) {
        Ok(())
    } else {
        Err(invalid("choice", format!("'{}' is not a valid choice ({})", value, choices.join(", "))))
    }
}

// ============================================================================
// Name-or-ID selection
// ============================================================================

/// A reference to a cluster object by exactly one of name or ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOrId {
    Name(String),
    Id(u64),
}

impl NameOrId {
    /// Require exactly one of `name` or `id`.
    pub fn from_parts(name: Option<&str>, id: Option<u64>, what: &str) -> Result<Self> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        match (name, id) {
            (Some(_), Some(_)) => Err(Error::argument(format!(
                "Please specify either a name or ID for the {}, not both",
                what
            ))),
            (Some(name), None) => Ok(Self::Name(name.to_string())),
            (None, Some(id)) if id > 0 => Ok(Self::Id(id)),
            _ => Err(Error::argument(format!(
                "Please specify either a name or ID for the {}",
                what
            ))),
        }
    }
}

impl fmt::Display for NameOrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameOrId::Name(name) => write!(f, "{}", name),
            NameOrId::Id(id) => write!(f, "{}", id),
        }
    }
}
