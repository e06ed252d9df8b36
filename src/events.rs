//! Explicit publish/subscribe bus for component lifecycle events.
//!
//! Handlers are registered per topic and removed by the exact id returned at
//! registration, so attach/detach stays symmetric and detaching one handler
//! never disturbs the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::orchestrator::MissionProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    MessageSent,
    MessageReceived,
    MissionProgress,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentRegistered => "agent_registered",
            Self::MessageSent => "message_sent",
            Self::MessageReceived => "message_received",
            Self::MissionProgress => "mission_progress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeshEvent {
    AgentRegistered {
        agent_id: String,
        capabilities: Vec<String>,
    },
    MessageSent {
        message_id: String,
        session_id: String,
        from_agent: String,
        to_agent: Option<String>,
    },
    MessageReceived {
        message_id: String,
        session_id: String,
        recipient: String,
    },
    MissionProgress {
        progress: MissionProgress,
    },
}

impl MeshEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentRegistered { .. } => EventKind::AgentRegistered,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MissionProgress { .. } => EventKind::MissionProgress,
        }
    }
}

type Handler = Arc<dyn Fn(&MeshEvent) + Send + Sync>;

/// Token returned by [`EventBus::on`]; pass it back to [`EventBus::off`] to
/// detach exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId {
    kind: EventKind,
    seq: u64,
}

impl HandlerId {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(u64, Handler)>>>,
    next_seq: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&MeshEvent) + Send + Sync + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((seq, Arc::new(handler)));
        HandlerId { kind, seq }
    }

    /// Detach a handler. Returns false if it was already removed.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&id.kind) {
            let before = list.len();
            list.retain(|(seq, _)| *seq != id.seq);
            return list.len() < before;
        }
        false
    }

    pub fn emit(&self, event: &MeshEvent) {
        // Clone handler refs out of the lock so a handler may call on/off
        // without deadlocking.
        let targets: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in targets {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sent_event() -> MeshEvent {
        MeshEvent::MessageSent {
            message_id: "m-1".into(),
            session_id: "s-1".into(),
            from_agent: "dev-0".into(),
            to_agent: None,
        }
    }

    #[test]
    fn test_emit_reaches_registered_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        bus.on(EventKind::MessageSent, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&sent_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_detaches_only_that_handler() {
        let bus = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&first);
        let id1 = bus.on(EventKind::MessageSent, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&second);
        bus.on(EventKind::MessageSent, move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&sent_event());
        assert!(bus.off(id1));
        bus.emit(&sent_event());

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_off_for_one_kind_keeps_other_kinds() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));

        let id = bus.on(EventKind::MessageSent, |_| {});
        let counter = Arc::clone(&received);
        bus.on(EventKind::MessageReceived, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off(id));
        bus.emit(&MeshEvent::MessageReceived {
            message_id: "m-1".into(),
            session_id: "s-1".into(),
            recipient: "triage-0".into(),
        });

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::MessageReceived), 1);
        assert_eq!(bus.handler_count(EventKind::MessageSent), 0);
    }

    #[test]
    fn test_double_off_is_noop() {
        let bus = EventBus::new();
        let id = bus.on(EventKind::AgentRegistered, |_| {});
        assert!(bus.off(id));
        assert!(!bus.off(id));
    }

    #[test]
    fn test_emit_without_handlers() {
        let bus = EventBus::new();
        bus.emit(&sent_event());
    }
}
