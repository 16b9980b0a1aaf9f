//! Lifecycle and marked-set state for live attendance sessions.
//!
//! All mutation happens under one write lock, so the check-then-insert that
//! guards at-most-once marking is a single atomic step. A check-in racing an
//! `end` sees whichever transition acquired the lock first; an ended session
//! rejects rather than silently drops. Events are broadcast before that
//! guard is released, so subscribers see stat snapshots in mutation order:
//! the marked count they observe never decreases except through a clear.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::RejectionReason;
use crate::events::{SessionEvent, SessionEvents};

pub type SessionId = i64;
pub type SubjectId = i64;
pub type ClassId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Active,
    Ended,
    Cleared,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Created, SessionState::Active)
                | (SessionState::Active, SessionState::Ended)
                | (SessionState::Active, SessionState::Cleared)
                | (SessionState::Ended, SessionState::Cleared)
        )
    }

    pub fn accepts_check_ins(self) -> bool {
        self == SessionState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Excused,
    Absent,
}

/// One student's mark inside one session. Created exactly once per
/// (session, subject) pair; only status corrections mutate it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub status: AttendanceStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub marked_at: DateTime<Utc>,
    /// The verifying party that accepted the scan.
    pub marked_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub enrolled_count: u64,
    pub marked_count: u64,
    pub remaining_count: u64,
}

/// Read-only view of a session handed to callers and observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub class_id: ClassId,
    pub date_key: NaiveDate,
    pub state: SessionState,
    pub stats: SessionStats,
}

/// Proof that the caller re-authorized a destructive wipe. Constructing one
/// is the upstream confirmation step; the registry only demands it exists.
#[derive(Debug, Clone)]
pub struct ClearAuthorization {
    actor_id: i64,
}

impl ClearAuthorization {
    pub fn confirmed_by(actor_id: i64) -> Self {
        ClearAuthorization { actor_id }
    }

    pub fn actor_id(&self) -> i64 {
        self.actor_id
    }
}

struct SessionSlot {
    class_id: ClassId,
    date_key: NaiveDate,
    state: SessionState,
    roster: HashSet<SubjectId>,
    marked: HashMap<SubjectId, AttendanceRecord>,
}

impl SessionSlot {
    fn new(class_id: ClassId, date_key: NaiveDate, roster: HashSet<SubjectId>) -> Self {
        SessionSlot {
            class_id,
            date_key,
            state: SessionState::Created,
            roster,
            marked: HashMap::new(),
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<(), RejectionReason> {
        if !self.state.can_transition_to(next) {
            return Err(RejectionReason::SessionClosed);
        }
        self.state = next;
        Ok(())
    }

    fn stats(&self) -> SessionStats {
        let enrolled = self.roster.len() as u64;
        let marked = self.marked.len() as u64;
        SessionStats {
            enrolled_count: enrolled,
            marked_count: marked,
            remaining_count: enrolled.saturating_sub(marked),
        }
    }

    fn snapshot(&self, session_id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            session_id,
            class_id: self.class_id,
            date_key: self.date_key,
            state: self.state,
            stats: self.stats(),
        }
    }
}

struct RegistryInner {
    next_id: SessionId,
    sessions: HashMap<SessionId, SessionSlot>,
}

pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    events: SessionEvents,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            inner: RwLock::new(RegistryInner {
                next_id: 1,
                sessions: HashMap::new(),
            }),
            events: SessionEvents::new(),
        }
    }

    /// The event hub observers subscribe through.
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Opens a session for a class on a date.
    ///
    /// At most one `Active` session may exist per (class, date); a second
    /// start is rejected with `AlreadyActive`.
    pub async fn start(
        &self,
        class_id: ClassId,
        date_key: NaiveDate,
        roster: impl IntoIterator<Item = SubjectId>,
    ) -> Result<SessionSnapshot, RejectionReason> {
        let roster: HashSet<SubjectId> = roster.into_iter().collect();
        let mut inner = self.inner.write().await;

        let conflict = inner.sessions.values().any(|s| {
            s.class_id == class_id && s.date_key == date_key && s.state == SessionState::Active
        });
        if conflict {
            return Err(RejectionReason::AlreadyActive);
        }

        let session_id = inner.next_id;
        inner.next_id += 1;

        let mut slot = SessionSlot::new(class_id, date_key, roster);
        slot.transition(SessionState::Active)?;
        let snapshot = slot.snapshot(session_id);
        inner.sessions.insert(session_id, slot);

        log::info!(
            "attendance session {session_id} started for class {class_id} on {date_key} ({} enrolled)",
            snapshot.stats.enrolled_count
        );
        Ok(snapshot)
    }

    /// The currently `Active` session for a class, if any.
    pub async fn get_active(&self, class_id: ClassId) -> Option<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .find(|(_, s)| s.class_id == class_id && s.state == SessionState::Active)
            .map(|(id, s)| s.snapshot(*id))
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner.sessions.get(&session_id).map(|s| s.snapshot(session_id))
    }

    /// Live counts for a session. Always reflects the latest mark.
    pub async fn stats(&self, session_id: SessionId) -> Result<SessionStats, RejectionReason> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&session_id)
            .map(|s| s.stats())
            .ok_or(RejectionReason::NoActiveSession)
    }

    /// All records of a session, for roll-call views and corrections.
    pub async fn records(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<AttendanceRecord>, RejectionReason> {
        let inner = self.inner.read().await;
        let slot = inner
            .sessions
            .get(&session_id)
            .ok_or(RejectionReason::NoActiveSession)?;
        let mut records: Vec<_> = slot.marked.values().cloned().collect();
        records.sort_by_key(|r| (r.marked_at, r.subject_id));
        Ok(records)
    }

    /// The atomic check-then-insert at the heart of the protocol.
    ///
    /// Roster membership, duplicate detection, and the insert all happen
    /// under one write lock, so concurrent scans of the same subject can
    /// never double-count.
    pub async fn mark(
        &self,
        session_id: SessionId,
        subject_id: SubjectId,
        status: AttendanceStatus,
        now: DateTime<Utc>,
        marked_by: i64,
    ) -> Result<(AttendanceRecord, SessionStats), RejectionReason> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RejectionReason::NoActiveSession)?;
        if !slot.state.accepts_check_ins() {
            return Err(RejectionReason::SessionClosed);
        }
        if !slot.roster.contains(&subject_id) {
            return Err(RejectionReason::NotEnrolled);
        }
        if slot.marked.contains_key(&subject_id) {
            return Err(RejectionReason::AlreadyMarked);
        }

        let record = AttendanceRecord {
            session_id,
            subject_id,
            status,
            marked_at: now,
            marked_by,
        };
        slot.marked.insert(subject_id, record.clone());
        let stats = slot.stats();

        log::debug!(
            "subject {subject_id} marked {:?} in session {session_id} ({}/{})",
            status,
            stats.marked_count,
            stats.enrolled_count
        );
        // published before the write guard drops, so observers receive stats
        // in mark order and the visible count never moves backwards
        self.events
            .publish(
                session_id,
                SessionEvent::Marked {
                    session_id,
                    subject_id,
                    stats,
                },
            )
            .await;
        Ok((record, stats))
    }

    /// Status correction by an authorized party.
    ///
    /// Updates the existing record, or creates one for an unscanned roster
    /// member (manual marking, e.g. an excused absence). Never touches
    /// subjects outside the roster.
    pub async fn correct_status(
        &self,
        session_id: SessionId,
        subject_id: SubjectId,
        status: AttendanceStatus,
        now: DateTime<Utc>,
        actor_id: i64,
    ) -> Result<(AttendanceRecord, SessionStats), RejectionReason> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RejectionReason::NoActiveSession)?;
        if slot.state == SessionState::Cleared {
            return Err(RejectionReason::SessionClosed);
        }
        if !slot.roster.contains(&subject_id) {
            return Err(RejectionReason::NotEnrolled);
        }

        let (record, created) = match slot.marked.entry(subject_id) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().status = status;
                (existing.get().clone(), false)
            }
            Entry::Vacant(vacant) => {
                let record = AttendanceRecord {
                    session_id,
                    subject_id,
                    status,
                    marked_at: now,
                    marked_by: actor_id,
                };
                vacant.insert(record.clone());
                (record, true)
            }
        };
        let stats = slot.stats();

        log::info!(
            "session {session_id}: subject {subject_id} set to {:?} by {actor_id}",
            status
        );
        if created {
            self.events
                .publish(
                    session_id,
                    SessionEvent::Marked {
                        session_id,
                        subject_id,
                        stats,
                    },
                )
                .await;
        }
        Ok((record, stats))
    }

    /// Closes the session; later check-ins get `SessionClosed`.
    pub async fn end(&self, session_id: SessionId) -> Result<SessionSnapshot, RejectionReason> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RejectionReason::NoActiveSession)?;
        slot.transition(SessionState::Ended)?;
        let snapshot = slot.snapshot(session_id);

        log::info!(
            "attendance session {session_id} ended with {}/{} marked",
            snapshot.stats.marked_count,
            snapshot.stats.enrolled_count
        );
        self.events
            .publish(
                session_id,
                SessionEvent::Ended {
                    session_id,
                    stats: snapshot.stats,
                },
            )
            .await;
        Ok(snapshot)
    }

    /// Wipes every record of the session. Destructive; demands the explicit
    /// authorization value and leaves the session in `Cleared`.
    pub async fn clear(
        &self,
        session_id: SessionId,
        authorization: &ClearAuthorization,
    ) -> Result<SessionSnapshot, RejectionReason> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RejectionReason::NoActiveSession)?;
        slot.transition(SessionState::Cleared)?;
        slot.marked.clear();
        let snapshot = slot.snapshot(session_id);

        log::warn!(
            "attendance session {session_id} cleared by user {}",
            authorization.actor_id()
        );
        self.events
            .publish(
                session_id,
                SessionEvent::Cleared {
                    session_id,
                    stats: snapshot.stats,
                },
            )
            .await;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[tokio::test]
    async fn start_creates_active_session_with_empty_marked_set() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2, 3]).await.unwrap();
        assert_eq!(s.state, SessionState::Active);
        assert_eq!(s.stats.enrolled_count, 3);
        assert_eq!(s.stats.marked_count, 0);
        assert_eq!(s.stats.remaining_count, 3);

        let active = registry.get_active(10).await.unwrap();
        assert_eq!(active.session_id, s.session_id);
    }

    #[tokio::test]
    async fn second_start_for_same_class_and_date_conflicts() {
        let registry = SessionRegistry::new();
        registry.start(10, date(), [1]).await.unwrap();
        assert_eq!(
            registry.start(10, date(), [1]).await,
            Err(RejectionReason::AlreadyActive)
        );
        // a different date is fine
        let other = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
        assert!(registry.start(10, other, [1]).await.is_ok());
    }

    #[tokio::test]
    async fn start_allowed_again_after_end() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1]).await.unwrap();
        registry.end(s.session_id).await.unwrap();
        assert!(registry.get_active(10).await.is_none());
        assert!(registry.start(10, date(), [1]).await.is_ok());
    }

    #[tokio::test]
    async fn mark_updates_stats_and_rejects_duplicates() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2]).await.unwrap();

        let (record, stats) = registry
            .mark(s.session_id, 1, AttendanceStatus::Present, at(1_000), 77)
            .await
            .unwrap();
        assert_eq!(record.subject_id, 1);
        assert_eq!(record.marked_by, 77);
        assert_eq!(stats.marked_count, 1);
        assert_eq!(stats.remaining_count, 1);

        assert_eq!(
            registry
                .mark(s.session_id, 1, AttendanceStatus::Late, at(2_000), 77)
                .await,
            Err(RejectionReason::AlreadyMarked)
        );
        assert_eq!(registry.stats(s.session_id).await.unwrap().marked_count, 1);
    }

    #[tokio::test]
    async fn mark_rejects_subjects_outside_the_roster() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2]).await.unwrap();
        assert_eq!(
            registry
                .mark(s.session_id, 99, AttendanceStatus::Present, at(1_000), 77)
                .await,
            Err(RejectionReason::NotEnrolled)
        );
        assert_eq!(registry.stats(s.session_id).await.unwrap().marked_count, 0);
    }

    #[tokio::test]
    async fn ended_session_rejects_marks_without_mutation() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1]).await.unwrap();
        registry.end(s.session_id).await.unwrap();

        assert_eq!(
            registry
                .mark(s.session_id, 1, AttendanceStatus::Present, at(1_000), 77)
                .await,
            Err(RejectionReason::SessionClosed)
        );
        assert_eq!(registry.stats(s.session_id).await.unwrap().marked_count, 0);
    }

    #[tokio::test]
    async fn double_end_is_rejected() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1]).await.unwrap();
        registry.end(s.session_id).await.unwrap();
        assert_eq!(
            registry.end(s.session_id).await,
            Err(RejectionReason::SessionClosed)
        );
    }

    #[tokio::test]
    async fn clear_wipes_marked_set_from_active_or_ended() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2]).await.unwrap();
        registry
            .mark(s.session_id, 1, AttendanceStatus::Present, at(1_000), 77)
            .await
            .unwrap();
        registry.end(s.session_id).await.unwrap();

        let auth = ClearAuthorization::confirmed_by(77);
        let snapshot = registry.clear(s.session_id, &auth).await.unwrap();
        assert_eq!(snapshot.state, SessionState::Cleared);
        assert_eq!(snapshot.stats.marked_count, 0);
        assert_eq!(snapshot.stats.remaining_count, 2);

        // cleared is terminal
        assert_eq!(
            registry.clear(s.session_id, &auth).await,
            Err(RejectionReason::SessionClosed)
        );
    }

    #[tokio::test]
    async fn correct_status_rewrites_existing_record() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1]).await.unwrap();
        registry
            .mark(s.session_id, 1, AttendanceStatus::Present, at(1_000), 77)
            .await
            .unwrap();

        let (record, stats) = registry
            .correct_status(s.session_id, 1, AttendanceStatus::Excused, at(5_000), 88)
            .await
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Excused);
        // the original mark metadata stays
        assert_eq!(record.marked_at, at(1_000));
        assert_eq!(record.marked_by, 77);
        assert_eq!(stats.marked_count, 1);
    }

    #[tokio::test]
    async fn correct_status_can_manually_mark_an_unscanned_student() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2]).await.unwrap();

        let (record, stats) = registry
            .correct_status(s.session_id, 2, AttendanceStatus::Excused, at(3_000), 88)
            .await
            .unwrap();
        assert_eq!(record.marked_by, 88);
        assert_eq!(stats.marked_count, 1);

        assert_eq!(
            registry
                .correct_status(s.session_id, 99, AttendanceStatus::Excused, at(3_000), 88)
                .await,
            Err(RejectionReason::NotEnrolled)
        );
    }

    #[tokio::test]
    async fn records_are_ordered_by_mark_time() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2, 3]).await.unwrap();
        registry
            .mark(s.session_id, 2, AttendanceStatus::Present, at(2_000), 77)
            .await
            .unwrap();
        registry
            .mark(s.session_id, 1, AttendanceStatus::Late, at(1_000), 77)
            .await
            .unwrap();

        let records = registry.records(s.session_id).await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.subject_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn mark_emits_stats_to_observers() {
        let registry = SessionRegistry::new();
        let s = registry.start(10, date(), [1, 2]).await.unwrap();
        let mut rx = registry.events().subscribe(s.session_id).await;

        registry
            .mark(s.session_id, 1, AttendanceStatus::Present, at(1_000), 77)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            SessionEvent::Marked {
                subject_id, stats, ..
            } => {
                assert_eq!(subject_id, 1);
                assert_eq!(stats.marked_count, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
