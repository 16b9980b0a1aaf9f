use serde::Serialize;
use thiserror::Error;

/// Why a scan or session operation was turned away.
///
/// Every variant is recoverable at the caller level. Display messages are
/// what a client may see; decryption failures stay deliberately vague so the
/// message never reveals whether the key or the ciphertext was at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    #[error("Attendance token could not be read")]
    Malformed,
    #[error("Token was not issued for attendance")]
    WrongPurpose,
    #[error("Token timestamp lies in the future")]
    InvalidTimestamp,
    #[error("Token has expired")]
    Expired,
    #[error("Attendance session is closed")]
    SessionClosed,
    #[error("No active attendance session")]
    NoActiveSession,
    #[error("Student is not enrolled in this class")]
    NotEnrolled,
    #[error("Attendance already recorded")]
    AlreadyMarked,
    #[error("An attendance session is already active for this class and date")]
    AlreadyActive,
}

impl RejectionReason {
    /// Stable wire code, matching the serialized form.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::Malformed => "MALFORMED",
            RejectionReason::WrongPurpose => "WRONG_PURPOSE",
            RejectionReason::InvalidTimestamp => "INVALID_TIMESTAMP",
            RejectionReason::Expired => "EXPIRED",
            RejectionReason::SessionClosed => "SESSION_CLOSED",
            RejectionReason::NoActiveSession => "NO_ACTIVE_SESSION",
            RejectionReason::NotEnrolled => "NOT_ENROLLED",
            RejectionReason::AlreadyMarked => "ALREADY_MARKED",
            RejectionReason::AlreadyActive => "ALREADY_ACTIVE",
        }
    }

    /// Duplicate scans are reported as information, not as an error banner.
    pub fn is_informational(&self) -> bool {
        matches!(self, RejectionReason::AlreadyMarked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_code_matches_serialized_form() {
        let json = serde_json::to_string(&RejectionReason::NoActiveSession).unwrap();
        assert_eq!(json, "\"NO_ACTIVE_SESSION\"");
        assert_eq!(RejectionReason::NoActiveSession.code(), "NO_ACTIVE_SESSION");
    }

    #[test]
    fn malformed_message_does_not_leak_crypto_detail() {
        let msg = RejectionReason::Malformed.to_string();
        assert!(!msg.to_lowercase().contains("key"));
        assert!(!msg.to_lowercase().contains("cipher"));
    }

    #[test]
    fn already_marked_is_informational() {
        assert!(RejectionReason::AlreadyMarked.is_informational());
        assert!(!RejectionReason::Expired.is_informational());
    }
}
