//! Time from the network.
//!
//! Some modems can only fetch the time from a time server speaking the
//! RFC 868 time protocol, which answers with four big-endian bytes counting
//! the seconds since 1900-01-01.

use crate::clock::Duration;

/// Seconds between 1900-01-01 and 1970-01-01.
pub const NIST_TO_UNIX_OFFSET: u32 = 2_208_988_800;

/// Time servers ban clients that ask more often than this.
pub const MIN_TIME_REQUEST_INTERVAL: Duration = Duration::from_ticks(4_000);

/// 2019-01-01 00:00:00 UTC
const NIST_VALID_FROM: u32 = 1_546_300_800;
/// 2030-01-01 00:00:00 UTC
const NIST_VALID_UNTIL: u32 = 1_893_456_000;

/// 2020-01-01 00:00:00 UTC
const SANE_FROM: u32 = 1_577_836_800;
/// 2030-01-01 05:00:00 UTC
const SANE_UNTIL: u32 = 1_893_474_000;

/// Clock differences up to this many seconds are not worth a correction.
pub const CLOCK_TOLERANCE_S: u32 = 5;

/// Convert an RFC 868 answer to seconds since the Unix epoch.
///
/// Returns `None` if the result is not between 2019 and 2030, which usually
/// means the bytes were garbled or the answer was something else entirely.
pub fn parse_nist_bytes(bytes: [u8; 4]) -> Option<u32> {
    let since_1900 = u32::from_be_bytes(bytes);
    let unix = since_1900.checked_sub(NIST_TO_UNIX_OFFSET)?;
    if (NIST_VALID_FROM..=NIST_VALID_UNTIL).contains(&unix) {
        Some(unix)
    } else {
        None
    }
}

/// Whether `epoch` is a plausible current time.
pub fn is_epoch_sane(epoch: u32) -> bool {
    (SANE_FROM..=SANE_UNTIL).contains(&epoch)
}

/// Whether the local clock differs enough from the network time to set it.
pub fn clock_needs_update(current: u32, network: u32) -> bool {
    let difference = if current > network {
        current - network
    } else {
        network - current
    };
    difference > CLOCK_TOLERANCE_S
}
