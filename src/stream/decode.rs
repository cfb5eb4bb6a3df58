//! Permissive frame decoding.

use tracing::debug;

/// Decode a text frame carrying a decimal integer.
///
/// Never fails: anything that is not an integer decodes to `0` so a single
/// malformed frame still produces a value downstream.
pub fn decode_int(payload: &str) -> i64 {
    match payload.trim().parse::<i64>() {
        Ok(value) => value,
        Err(e) => {
            debug!("Malformed integer frame {:?}: {}", payload, e);
            0
        }
    }
}
