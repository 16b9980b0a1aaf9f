//! Scanner-side token validation.
//!
//! Pure and synchronous: decode, purpose check, freshness check. No I/O, no
//! side effects, safe to retry. The validator is the single freshness
//! authority; generators merely stop minting.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::codec::TokenCodec;
use crate::error::RejectionReason;
use crate::token::PURPOSE_ATTENDANCE;

/// Protocol default freshness window. Exceeds the 30s rotation period by a
/// margin that tolerates scan and transfer latency without opening a
/// meaningful replay window.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(35);

/// A successfully validated identity, ready for the check-in pipeline.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIdentity {
    pub subject_id: i64,
    pub display_name: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenValidator {
    codec: TokenCodec,
    max_age: Duration,
}

impl TokenValidator {
    pub fn new(codec: TokenCodec) -> Self {
        TokenValidator {
            codec,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Validator with an explicit freshness window. `rotation` is the period
    /// the paired generators run at; a window at or below it would expire
    /// tokens before their replacement exists, so that gets a warning.
    pub fn with_max_age(codec: TokenCodec, max_age: Duration, rotation: Duration) -> Self {
        if max_age <= rotation {
            log::warn!(
                "freshness window {}ms does not exceed rotation {}ms; valid scans will be rejected",
                max_age.as_millis(),
                rotation.as_millis()
            );
        }
        TokenValidator { codec, max_age }
    }

    /// Validator sized from the process-wide configuration.
    pub fn from_config(codec: TokenCodec) -> Self {
        let cfg = common::Config::get();
        Self::with_max_age(
            codec,
            Duration::from_secs(cfg.checkin_max_age_seconds),
            Duration::from_secs(cfg.checkin_rotation_seconds),
        )
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Decides whether an envelope identifies a live claimant at `now`.
    pub fn validate(
        &self,
        envelope: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidIdentity, RejectionReason> {
        let token = self
            .codec
            .decode(envelope)
            .map_err(|_| RejectionReason::Malformed)?;

        if token.purpose != PURPOSE_ATTENDANCE {
            return Err(RejectionReason::WrongPurpose);
        }

        let age_ms = now.timestamp_millis() - token.timestamp;
        if age_ms < 0 {
            // clock skew or a forged future timestamp
            return Err(RejectionReason::InvalidTimestamp);
        }
        if age_ms as u128 > self.max_age.as_millis() {
            return Err(RejectionReason::Expired);
        }

        let issued_at = Utc
            .timestamp_millis_opt(token.timestamp)
            .single()
            .ok_or(RejectionReason::InvalidTimestamp)?;

        Ok(ValidIdentity {
            subject_id: token.subject_id,
            display_name: token.display_name(),
            email: token.email,
            issued_at,
        })
    }
}
