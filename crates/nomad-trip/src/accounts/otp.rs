//! Short-lived email verification codes.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

pub const OTP_LENGTH: usize = 6;

pub fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{value:0width$}", width = OTP_LENGTH)
}

/// Keyed by normalized email. Entries past their expiry are treated as absent.
pub trait OtpStore: Send + Sync {
    /// Time left on a live code for `email`, if any.
    fn remaining(&self, email: &str, now: DateTime<Utc>) -> Option<Duration>;

    /// Store a code for `email`. Codes already expired at `now` are dropped.
    fn put(&self, email: &str, code: String, now: DateTime<Utc>, expires_at: DateTime<Utc>);

    /// Consume the code when it matches and is still live.
    fn redeem(&self, email: &str, code: &str, now: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryOtpStore {
    codes: Mutex<HashMap<String, PendingCode>>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn codes(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingCode>> {
        self.codes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of codes held, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.codes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OtpStore for MemoryOtpStore {
    fn remaining(&self, email: &str, now: DateTime<Utc>) -> Option<Duration> {
        let mut codes = self.codes();
        match codes.get(email) {
            Some(pending) if pending.expires_at > now => Some(pending.expires_at - now),
            Some(_) => {
                codes.remove(email);
                None
            }
            None => None,
        }
    }

    fn put(&self, email: &str, code: String, now: DateTime<Utc>, expires_at: DateTime<Utc>) {
        let mut codes = self.codes();
        codes.retain(|_, pending| pending.expires_at > now);
        codes.insert(email.to_string(), PendingCode { code, expires_at });
    }

    fn redeem(&self, email: &str, code: &str, now: DateTime<Utc>) -> bool {
        let mut codes = self.codes();
        let valid = codes
            .get(email)
            .is_some_and(|pending| pending.expires_at > now && pending.code == code);
        if valid {
            codes.remove(email);
        }
        valid
    }
}
