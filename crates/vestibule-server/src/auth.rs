//! Credential validation, password hashing and the lockout ledger.
//!
//! Everything here is synchronous and per-key. Hashing and verification
//! are CPU-bound; callers on the connection path run them through
//! `spawn_blocking`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use vestibule_core::{code, token};

use crate::error::RoomError;

type HmacSha256 = Hmac<Sha256>;

pub const MAX_NICKNAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 4;
pub const MAX_PASSWORD_LEN: usize = 64;

const SALT_BYTES: usize = 16;

/// Hashes a password with a fresh random salt. Output is
/// `hex(salt) $ hex(hmac-sha256(salt, password))`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut salt);
    let mut mac = HmacSha256::new_from_slice(&salt).expect("hmac accepts any key length");
    mac.update(password.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("{}${}", hex::encode(salt), hex::encode(digest))
}

/// Constant-time comparison against a stored hash. Malformed stored
/// values verify as false rather than erroring.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(&salt) else {
        return false;
    };
    mac.update(password.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Strips markup-significant characters and caps length on a char
/// boundary.
pub fn sanitize_text(raw: &str, max_len: usize) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\'' | '`'))
        .take(max_len)
        .collect()
}

/// Sanitizes and bounds-checks a nickname, returning the cleaned form.
pub fn validate_nickname(raw: &str) -> Result<String, RoomError> {
    let cleaned = sanitize_text(raw, MAX_NICKNAME_LEN);
    if cleaned.is_empty() {
        return Err(RoomError::InvalidCredentialsFormat(format!(
            "nickname must be 1-{MAX_NICKNAME_LEN} characters"
        )));
    }
    Ok(cleaned)
}

/// Checks room-code shape and returns the canonical uppercase form.
pub fn validate_room_code(raw: &str) -> Result<String, RoomError> {
    if !code::is_valid_room_code(raw) {
        return Err(RoomError::InvalidCredentialsFormat(format!(
            "room code must be {} characters",
            code::ROOM_CODE_LEN
        )));
    }
    Ok(code::normalize_room_code(raw))
}

/// Length bounds for a plaintext password, checked before any hashing.
pub fn validate_password(raw: &str) -> Result<(), RoomError> {
    let len = raw.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(RoomError::InvalidCredentialsFormat(format!(
            "password must be {MIN_PASSWORD_LEN}-{MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Shape check only; never touches the registry.
pub fn validate_invite_token(raw: &str) -> Result<(), RoomError> {
    if !token::is_valid_token_format(raw) {
        return Err(RoomError::InvalidOrExpiredToken);
    }
    Ok(())
}

/// Lockout identifier for credential failures against one room.
pub fn lockout_identifier(room_code: &str, peer: &str) -> String {
    format!("{room_code}:{peer}")
}

/// Outcome of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureStatus {
    pub locked: bool,
    pub remaining_attempts: u32,
}

#[derive(Default)]
struct FailedAttempt {
    count: u32,
    locked_until: Option<Instant>,
}

/// Per-identifier failed-attempt ledger with a fixed threshold and a
/// fixed lockout duration. Expired lockouts are cleared lazily, so the
/// ledger stays correct even if no reset task ever runs.
pub struct AuthGate {
    records: DashMap<String, FailedAttempt>,
    max_failures: u32,
    lockout: Duration,
}

impl AuthGate {
    pub fn new(max_failures: u32, lockout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            max_failures,
            lockout,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        self.lockout
    }

    /// Must be called before any password verification for the
    /// identifier. A live lockout rejects the attempt outright.
    pub fn check(&self, identifier: &str) -> Result<(), RoomError> {
        let stale = match self.records.get(identifier) {
            Some(record) => match record.locked_until {
                Some(until) => {
                    let now = Instant::now();
                    if now < until {
                        let remaining_seconds = (until - now).as_secs().max(1);
                        return Err(RoomError::LockedOut { remaining_seconds });
                    }
                    true
                },
                None => false,
            },
            None => false,
        };
        if stale {
            // Lockout served in full, next attempt starts fresh.
            self.records.remove(identifier);
        }
        Ok(())
    }

    /// Records one failure, locking the identifier once the threshold is
    /// reached.
    pub fn record_failure(&self, identifier: &str) -> FailureStatus {
        let mut record = self
            .records
            .entry(identifier.to_string())
            .or_default();
        if let Some(until) = record.locked_until
            && Instant::now() >= until
        {
            record.count = 0;
            record.locked_until = None;
        }
        record.count += 1;
        if record.count >= self.max_failures {
            record.locked_until = Some(Instant::now() + self.lockout);
            FailureStatus {
                locked: true,
                remaining_attempts: 0,
            }
        } else {
            FailureStatus {
                locked: false,
                remaining_attempts: self.max_failures - record.count,
            }
        }
    }

    /// Clears the ledger entry after a successful authentication.
    pub fn clear(&self, identifier: &str) {
        self.records.remove(identifier);
    }

    /// Drops the entry only if its lockout has fully elapsed. Safe to
    /// run from a scheduled reset racing with fresh failures.
    pub fn expire(&self, identifier: &str) {
        self.records.remove_if(identifier, |_, record| {
            record
                .locked_until
                .is_some_and(|until| Instant::now() >= until)
        });
    }

    /// Drops every ledger entry whose identifier starts with `prefix`.
    /// Identifiers are scoped by room code, so a deleted room takes its
    /// attempt history with it.
    pub fn purge_prefix(&self, prefix: &str) {
        self.records.retain(|key, _| !key.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let stored = hash_password("hunter22");
        assert!(verify_password("hunter22", &stored));
        assert!(!verify_password("hunter23", &stored));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password");
        let b = hash_password("same-password");
        assert_ne!(a, b);
        assert!(verify_password("same-password", &a));
        assert!(verify_password("same-password", &b));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("pw", "no-separator"));
        assert!(!verify_password("pw", "zz$zz"));
        assert!(!verify_password("pw", "$"));
    }

    #[test]
    fn sanitize_strips_markup_and_caps_length() {
        assert_eq!(sanitize_text("  <b>alice</b>  ", 32), "balice/b");
        assert_eq!(sanitize_text("a\"b'c`d&e", 32), "abcde");
        let long = "x".repeat(100);
        assert_eq!(sanitize_text(&long, 10).len(), 10);
    }

    #[test]
    fn nickname_validation() {
        assert_eq!(validate_nickname(" alice ").unwrap(), "alice");
        assert!(validate_nickname("").is_err());
        assert!(validate_nickname("<>&").is_err(), "all-markup nickname sanitizes to empty");
        let long = "n".repeat(100);
        assert_eq!(validate_nickname(&long).unwrap().len(), MAX_NICKNAME_LEN);
    }

    #[test]
    fn room_code_validation_normalizes() {
        assert_eq!(validate_room_code("abc234").unwrap(), "ABC234");
        assert!(validate_room_code("short").is_err());
        assert!(validate_room_code("ABCD340I").is_err());
    }

    #[test]
    fn password_length_bounds() {
        assert!(validate_password("abc").is_err());
        assert!(validate_password("abcd").is_ok());
        assert!(validate_password(&"p".repeat(MAX_PASSWORD_LEN)).is_ok());
        assert!(validate_password(&"p".repeat(MAX_PASSWORD_LEN + 1)).is_err());
    }

    #[test]
    fn token_format_gate() {
        assert!(validate_invite_token(&"a".repeat(32)).is_ok());
        assert!(validate_invite_token("not-hex").is_err());
        assert!(validate_invite_token("").is_err());
    }

    #[test]
    fn lockout_engages_at_threshold() {
        let gate = AuthGate::new(3, Duration::from_secs(60));
        let id = lockout_identifier("ABC234", "10.0.0.1");

        assert!(gate.check(&id).is_ok());
        assert_eq!(
            gate.record_failure(&id),
            FailureStatus { locked: false, remaining_attempts: 2 }
        );
        assert_eq!(
            gate.record_failure(&id),
            FailureStatus { locked: false, remaining_attempts: 1 }
        );
        assert_eq!(
            gate.record_failure(&id),
            FailureStatus { locked: true, remaining_attempts: 0 }
        );
        match gate.check(&id) {
            Err(RoomError::LockedOut { remaining_seconds }) => {
                assert!(remaining_seconds > 0 && remaining_seconds <= 60);
            },
            other => panic!("expected LockedOut, got {other:?}"),
        }
    }

    #[test]
    fn success_clears_the_counter() {
        let gate = AuthGate::new(3, Duration::from_secs(60));
        gate.record_failure("id");
        gate.record_failure("id");
        gate.clear("id");
        assert_eq!(
            gate.record_failure("id"),
            FailureStatus { locked: false, remaining_attempts: 2 }
        );
    }

    #[test]
    fn expired_lockout_starts_fresh() {
        let gate = AuthGate::new(2, Duration::from_millis(10));
        gate.record_failure("id");
        assert_eq!(
            gate.record_failure("id"),
            FailureStatus { locked: true, remaining_attempts: 0 }
        );
        assert!(gate.check("id").is_err());

        std::thread::sleep(Duration::from_millis(20));
        assert!(gate.check("id").is_ok(), "served lockout must clear");
        assert_eq!(
            gate.record_failure("id"),
            FailureStatus { locked: false, remaining_attempts: 1 },
            "count resets after the lockout elapses"
        );
    }

    #[test]
    fn expire_ignores_live_lockouts() {
        let gate = AuthGate::new(1, Duration::from_secs(60));
        gate.record_failure("id");
        gate.expire("id");
        assert!(gate.check("id").is_err(), "a live lockout must survive a stale reset task");
    }

    #[test]
    fn identifiers_are_independent() {
        let gate = AuthGate::new(1, Duration::from_secs(60));
        gate.record_failure(&lockout_identifier("ABC234", "10.0.0.1"));
        assert!(gate.check(&lockout_identifier("ABC234", "10.0.0.2")).is_ok());
        assert!(gate.check(&lockout_identifier("XYZ789", "10.0.0.1")).is_ok());
    }

    #[test]
    fn purge_prefix_scopes_to_one_room() {
        let gate = AuthGate::new(1, Duration::from_secs(60));
        gate.record_failure(&lockout_identifier("ABC234", "10.0.0.1"));
        gate.record_failure(&lockout_identifier("XYZ789", "10.0.0.1"));

        gate.purge_prefix("ABC234:");
        assert!(gate.check(&lockout_identifier("ABC234", "10.0.0.1")).is_ok());
        assert!(gate.check(&lockout_identifier("XYZ789", "10.0.0.1")).is_err());
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_password_roundtrips(password in ".{4,64}") {
                let stored = hash_password(&password);
                prop_assert!(verify_password(&password, &stored));
                let altered = format!("{password}x");
                prop_assert!(!verify_password(&altered, &stored));
            }

            #[test]
            fn sanitized_text_respects_the_cap(raw in ".*", cap in 0usize..64) {
                let cleaned = sanitize_text(&raw, cap);
                prop_assert!(cleaned.chars().count() <= cap);
                prop_assert!(!cleaned.contains(['<', '>', '"', '\'', '`', '&']));
            }

            #[test]
            fn arbitrary_stored_values_never_panic(password in ".{0,16}", stored in ".{0,64}") {
                let _ = verify_password(&password, &stored);
            }
        }
    }
}
