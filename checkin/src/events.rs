//! Change notification for live session stats.
//!
//! Lazily creates a Tokio broadcast channel per session and drops it again
//! once the last observer is gone. The core only emits typed events; pushing
//! them over a socket, SSE, or polling is the embedding application's job.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::registry::{SessionId, SessionStats, SubjectId};

/// Topic name for a session, for transports that multiplex by string topic.
pub fn session_topic(session_id: SessionId) -> String {
    format!("attendance:session:{session_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    #[serde(rename = "attendance.marked")]
    Marked {
        session_id: SessionId,
        subject_id: SubjectId,
        stats: SessionStats,
    },
    #[serde(rename = "attendance.session_ended")]
    Ended {
        session_id: SessionId,
        stats: SessionStats,
    },
    #[serde(rename = "attendance.session_cleared")]
    Cleared {
        session_id: SessionId,
        stats: SessionStats,
    },
}

/// Per-session broadcast hub.
#[derive(Clone, Default)]
pub struct SessionEvents {
    inner: Arc<RwLock<HashMap<SessionId, broadcast::Sender<SessionEvent>>>>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a session's events, creating the channel if necessary.
    pub async fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<SessionEvent> {
        let mut map = self.inner.write().await;
        map.entry(session_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// Publishes an event to a session's observers.
    ///
    /// No-op for sessions nobody watches; the channel is removed once its
    /// subscriber count drops to zero after sending.
    pub async fn publish(&self, session_id: SessionId, event: SessionEvent) {
        let mut map = self.inner.write().await;
        if let Some(sender) = map.get(&session_id) {
            let _ = sender.send(event);
            if sender.receiver_count() == 0 {
                log::debug!("removing event channel for session {session_id}: no subscribers");
                map.remove(&session_id);
            }
        }
    }
}
