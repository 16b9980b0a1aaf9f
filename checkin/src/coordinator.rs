//! Orchestrates one scan: validate the envelope, then mark atomically.
//!
//! The coordinator never computes lateness; the verifying party supplies the
//! status and the protocol records it as given.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RejectionReason;
use crate::registry::{
    AttendanceRecord, AttendanceStatus, ClassId, SessionId, SessionRegistry, SessionStats,
};
use crate::validator::{TokenValidator, ValidIdentity};

/// A check-in as the surrounding application receives it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub envelope: String,
    pub class_id: ClassId,
    /// Defaults to `present` when the scanner does not say otherwise.
    pub status: Option<AttendanceStatus>,
}

/// An accepted scan: who it was, the record created, and fresh counts so the
/// caller can render progress without a second round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInSuccess {
    pub identity: ValidIdentity,
    pub record: AttendanceRecord,
    pub stats: SessionStats,
}

/// Wire-shaped outcome for the embedding application.
///
/// `stats` rides along whenever the session could be resolved — including
/// informational rejections like a duplicate scan, so the caller can keep
/// rendering live progress. Only an unresolvable session leaves it out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
}

impl CheckInResponse {
    pub fn accepted(stats: SessionStats) -> Self {
        CheckInResponse {
            accepted: true,
            reason: None,
            stats: Some(stats),
        }
    }

    pub fn rejected(reason: RejectionReason, stats: Option<SessionStats>) -> Self {
        CheckInResponse {
            accepted: false,
            reason: Some(reason),
            stats,
        }
    }
}

pub struct CheckInCoordinator {
    validator: TokenValidator,
    registry: Arc<SessionRegistry>,
}

impl CheckInCoordinator {
    pub fn new(validator: TokenValidator, registry: Arc<SessionRegistry>) -> Self {
        CheckInCoordinator {
            validator,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Processes one scan against a known session at the current time.
    pub async fn check_in(
        &self,
        envelope: &str,
        session_id: SessionId,
        requested_status: AttendanceStatus,
        marked_by: i64,
    ) -> Result<CheckInSuccess, RejectionReason> {
        self.check_in_at(envelope, session_id, requested_status, marked_by, Utc::now())
            .await
    }

    /// Like [`check_in`](Self::check_in) with an explicit clock, which is
    /// what the tests drive.
    pub async fn check_in_at(
        &self,
        envelope: &str,
        session_id: SessionId,
        requested_status: AttendanceStatus,
        marked_by: i64,
        now: DateTime<Utc>,
    ) -> Result<CheckInSuccess, RejectionReason> {
        let session = self
            .registry
            .snapshot(session_id)
            .await
            .ok_or(RejectionReason::NoActiveSession)?;
        if !session.state.accepts_check_ins() {
            return Err(RejectionReason::SessionClosed);
        }

        // rejection reasons from validation propagate verbatim
        let identity = self.validator.validate(envelope, now)?;

        // the registry re-checks session state under its write lock, so a
        // concurrent end() between the snapshot above and this call still
        // rejects cleanly
        let (record, stats) = self
            .registry
            .mark(
                session_id,
                identity.subject_id,
                requested_status,
                now,
                marked_by,
            )
            .await?;

        Ok(CheckInSuccess {
            identity,
            record,
            stats,
        })
    }

    /// Scan addressed by class rather than session, the shape the REST
    /// boundary speaks. Resolves the class's active session first.
    pub async fn check_in_for_class(&self, request: &CheckInRequest, marked_by: i64) -> CheckInResponse {
        let Some(session) = self.registry.get_active(request.class_id).await else {
            return CheckInResponse::rejected(RejectionReason::NoActiveSession, None);
        };
        let status = request.status.unwrap_or(AttendanceStatus::Present);
        match self
            .check_in(&request.envelope, session.session_id, status, marked_by)
            .await
        {
            Ok(success) => CheckInResponse::accepted(success.stats),
            Err(reason) => {
                // the session resolved, so the caller still gets live counts
                let stats = self.registry.stats(session.session_id).await.ok();
                CheckInResponse::rejected(reason, stats)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_stats_when_the_session_resolved() {
        let stats = SessionStats {
            enrolled_count: 30,
            marked_count: 12,
            remaining_count: 18,
        };
        let rejected = CheckInResponse::rejected(RejectionReason::AlreadyMarked, Some(stats));
        assert!(!rejected.accepted);

        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["reason"], "ALREADY_MARKED");
        assert_eq!(json["stats"]["markedCount"], 12);
    }

    #[test]
    fn unresolvable_session_omits_stats() {
        let rejected = CheckInResponse::rejected(RejectionReason::NoActiveSession, None);
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["reason"], "NO_ACTIVE_SESSION");
        assert!(json.get("stats").is_none());
        assert!(json.get("reason").is_some());

        let accepted = CheckInResponse::accepted(SessionStats {
            enrolled_count: 1,
            marked_count: 1,
            remaining_count: 0,
        });
        let json = serde_json::to_value(&accepted).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["stats"]["remainingCount"], 0);
    }

    #[test]
    fn request_accepts_optional_status() {
        let req: CheckInRequest =
            serde_json::from_str(r#"{"envelope":"abc","classId":4,"status":"late"}"#).unwrap();
        assert_eq!(req.status, Some(AttendanceStatus::Late));

        let req: CheckInRequest =
            serde_json::from_str(r#"{"envelope":"abc","classId":4}"#).unwrap();
        assert!(req.status.is_none());
    }
}
