//! 64-bit identifier generation for Jobs, Runners and Triggers.
//!
//! The original system leans on a Sonyflake-style generator to avoid a
//! coordination service; this is a minimal process-local equivalent: the
//! high 42 bits are milliseconds since a fixed epoch, the low 22 bits are a
//! per-process monotonic counter, so ids are strictly increasing within a
//! process and collide only across processes started in the same
//! millisecond with the same low bits (acceptable — a single Master/Worker
//! process is the only id source for its own jobs/runners/triggers).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const EPOCH_MILLIS: u64 = 1_546_300_800_000; // 2019-01-01T00:00:00Z
const COUNTER_BITS: u32 = 22;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new, process-local unique 64-bit id.
pub fn next_id() -> u64 {
    let now_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let elapsed = now_millis.saturating_sub(EPOCH_MILLIS);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;
    (elapsed << COUNTER_BITS) | seq
}

/// Format an id as lowercase hex, matching the on-disk directory naming
/// convention (`jobs/<name>@<id_hex>/<runner_id_hex>/`).
pub fn to_hex(id: u64) -> String {
    format!("{id:x}")
}

/// Parse a hex-formatted id back to its numeric form.
pub fn from_hex(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_within_process() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }

    #[test]
    fn hex_round_trips() {
        let id = next_id();
        assert_eq!(from_hex(&to_hex(id)), Some(id));
    }
}
