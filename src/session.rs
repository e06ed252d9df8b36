//! Multi-participant sessions with fixed membership.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MeshError, Result};
use crate::monitor::{MonitorSink, NullMonitor, OpTimer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub mode: String,
    /// Participant set, fixed at creation. Order follows the create request
    /// with duplicates dropped.
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.participants.iter().any(|p| p == agent_id)
    }

    /// Everyone except the sender; the delivery set for a broadcast.
    pub fn other_participants(&self, sender: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.as_str() != sender)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub name: String,
    pub topic: String,
    pub mode: String,
    pub participants: Vec<String>,
}

impl CreateSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants = participants.into_iter().map(Into::into).collect();
        self
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    monitor: Arc<dyn MonitorSink>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            monitor: Arc::new(NullMonitor),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorSink>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn create_session(&self, request: CreateSession) -> Result<String> {
        let timer = OpTimer::start(self.monitor.as_ref(), "create_session");

        if request.participants.is_empty() {
            timer.error();
            return Err(MeshError::Validation(format!(
                "session '{}' created without participants",
                request.name
            )));
        }

        let mut participants = Vec::with_capacity(request.participants.len());
        for participant in request.participants {
            if !participants.contains(&participant) {
                participants.push(participant);
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            topic: request.topic,
            mode: request.mode,
            participants,
            created_at: Utc::now(),
        };

        let session_id = session.id.clone();
        debug!(
            session_id = %session_id,
            name = %session.name,
            participants = session.participants.len(),
            "Session created"
        );
        self.sessions.insert(session_id.clone(), session);

        timer.success();
        Ok(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn require(&self, session_id: &str) -> Result<Session> {
        self.get(session_id)
            .ok_or_else(|| MeshError::SessionNotFound(session_id.to_string()))
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_participants() {
        let store = SessionStore::new();
        let result = store.create_session(CreateSession::new("standup"));
        assert!(matches!(result, Err(MeshError::Validation(_))));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_create_and_lookup() {
        let store = SessionStore::new();
        let id = store
            .create_session(
                CreateSession::new("standup")
                    .with_topic("daily sync")
                    .with_mode("collaborative")
                    .with_participants(["dev-0", "triage-0"]),
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.name, "standup");
        assert_eq!(session.topic, "daily sync");
        assert!(session.is_participant("dev-0"));
        assert!(!session.is_participant("ghost-0"));
    }

    #[test]
    fn test_duplicate_participants_dropped() {
        let store = SessionStore::new();
        let id = store
            .create_session(
                CreateSession::new("pairing").with_participants(["dev-0", "dev-0", "triage-0"]),
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.participants, vec!["dev-0", "triage-0"]);
    }

    #[test]
    fn test_other_participants_excludes_sender() {
        let store = SessionStore::new();
        let id = store
            .create_session(
                CreateSession::new("triage").with_participants(["dev-0", "triage-0", "arch-0"]),
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        let others = session.other_participants("triage-0");
        assert_eq!(others, vec!["dev-0", "arch-0"]);
    }

    #[test]
    fn test_require_unknown_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.require("missing"),
            Err(MeshError::SessionNotFound(_))
        ));
    }
}
