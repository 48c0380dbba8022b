//! Small helpers shared across the crate: timestamps, human-readable
//! formatting and IPv4 arithmetic.

pub mod format;
pub mod net;
pub mod time;

pub use format::{humanize_bytes, humanize_decimal, humanize_wwn, normalize_wwn, simple_chap_secret};
pub use net::{IpRange, IpSubnet};
pub use time::{elapsed_str, now_timestamp, parse_timestamp, seconds_to_elapsed_str, timestamp_to_str};
