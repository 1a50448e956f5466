use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// Chorus epoch: 2025-01-01T00:00:00Z.
const EPOCH: u64 = 1_735_689_600_000;
const SEQ_BITS: u64 = 12;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

// Last issued id as (timestamp << 12 | seq); CAS keeps issuance monotonic
// across threads without a lock.
static LAST: AtomicU64 = AtomicU64::new(0);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock went backwards")
        .as_millis() as u64
        - EPOCH
}

/// Generate a time-ordered 64-bit id, rendered as a decimal string.
pub fn generate() -> String {
    loop {
        let last = LAST.load(Ordering::SeqCst);
        let now = now_ms() << SEQ_BITS;
        let candidate = if now > last {
            now
        } else {
            // Same millisecond (or a clock step backwards): bump the sequence.
            last + 1
        };
        if LAST
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate.to_string();
        }
    }
}

/// Millisecond unix timestamp an id was generated at.
pub fn timestamp_of(id: &str) -> Option<u64> {
    let num: u64 = id.parse().ok()?;
    Some((num >> SEQ_BITS) + EPOCH)
}
