//! Timestamp identifiers used as generated record keys

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Last timestamp handed out, in microseconds
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);
static CLOCK_ID: OnceLock<u64> = OnceLock::new();

/// Generate a new TID: 53 bits of microseconds then 10 bits of clock id,
/// written as 13 base32-sortable chars. Strictly increasing within a process.
pub fn next_tid() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    let micros = loop {
        let candidate = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => break candidate,
            Err(actual) => last = actual,
        }
    };

    let clock_id = *CLOCK_ID.get_or_init(|| rand::thread_rng().gen_range(0..1024));
    encode_tid(micros, clock_id)
}

fn encode_tid(micros: u64, clock_id: u64) -> String {
    let v = ((micros & ((1 << 53) - 1)) << 10) | (clock_id & 0x3ff);
    (0..13)
        .map(|i| ALPHABET[((v >> (60 - 5 * i)) & 0x1f) as usize] as char)
        .collect()
}
