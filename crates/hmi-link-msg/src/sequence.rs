//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static GLOBAL: SequenceTokens = SequenceTokens::new();

/// Generator for the header's sequence token.
///
/// Tokens are microseconds since the Unix epoch, bumped by one whenever the
/// clock has not advanced since the previous token, so two frames built in the
/// same microsecond (or after a clock step backwards) still differ on the wire.
#[derive(Debug, Default)]
pub struct SequenceTokens {
    last: AtomicU64,
}

impl SequenceTokens {
    /// Create an independent generator.
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Process-wide generator used by [`crate::encode`].
    pub fn global() -> &'static SequenceTokens {
        &GLOBAL
    }

    /// Next raw token value; strictly greater than every value previously
    /// returned by this generator.
    pub fn next_value(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }

    /// Next token formatted for the header.
    pub fn next_token(&self) -> String {
        self.next_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_strictly_increase() {
        let tokens = SequenceTokens::new();
        let mut previous = tokens.next_value();
        for _ in 0..10_000 {
            let next = tokens.next_value();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn tokens_track_wall_clock() {
        let before = Utc::now().timestamp_micros() as u64;
        let value = SequenceTokens::new().next_value();
        assert!(value >= before);
    }

    #[test]
    fn concurrent_tokens_are_unique() {
        let tokens = std::sync::Arc::new(SequenceTokens::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tokens = tokens.clone();
                std::thread::spawn(move || (0..1_000).map(|_| tokens.next_value()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("token thread"))
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
