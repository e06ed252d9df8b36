//! Session-scoped message bus with ordered history and rate limiting.
//!
//! Sequence numbers are assigned under one lock per session, so they are
//! strictly increasing and never reused. Delivery is synchronous: the
//! `message_sent` event fires once per send, then `message_received` fires
//! once per intended recipient, in recipient order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::message::{Message, SendMessage};
use super::rate_limit::SlidingWindowLimiter;
use crate::audit::{AuditRecord, AuditSink, NullAuditSink};
use crate::config::MessagingConfig;
use crate::error::{MeshError, Result};
use crate::events::{EventBus, MeshEvent};
use crate::monitor::{MonitorSink, NullMonitor, OpTimer};
use crate::session::SessionStore;

struct SessionLog {
    next_sequence: u64,
    messages: VecDeque<Message>,
}

impl SessionLog {
    fn new() -> Self {
        Self {
            next_sequence: 1,
            messages: VecDeque::new(),
        }
    }
}

pub struct MessageBus {
    sessions: Arc<SessionStore>,
    logs: DashMap<String, Arc<Mutex<SessionLog>>>,
    limiter: SlidingWindowLimiter,
    events: Arc<EventBus>,
    subscribers: RwLock<HashMap<String, Arc<Mutex<VecDeque<Message>>>>>,
    audit: Arc<dyn AuditSink>,
    monitor: Arc<dyn MonitorSink>,
    history_limit: usize,
    total_sent: AtomicU64,
}

impl MessageBus {
    pub fn new(sessions: Arc<SessionStore>, config: &MessagingConfig, events: Arc<EventBus>) -> Self {
        Self {
            sessions,
            logs: DashMap::new(),
            limiter: SlidingWindowLimiter::new(config),
            events,
            subscribers: RwLock::new(HashMap::new()),
            audit: Arc::new(NullAuditSink),
            monitor: Arc::new(NullMonitor),
            history_limit: config.history_limit,
            total_sent: AtomicU64::new(0),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorSink>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Send a message inside a session. Validation and rate-limit rejections
    /// leave no trace in history or the sender's quota.
    pub fn send_message(&self, request: SendMessage) -> Result<String> {
        let timer = OpTimer::start(self.monitor.as_ref(), "send_message");
        match self.send_inner(request) {
            Ok(id) => {
                timer.success();
                Ok(id)
            }
            Err(e) => {
                timer.error();
                Err(e)
            }
        }
    }

    /// Send with no specific recipient: delivered to every participant
    /// except the sender.
    pub fn broadcast_message(&self, mut request: SendMessage) -> Result<String> {
        request.to_agent = None;
        self.send_message(request)
    }

    fn send_inner(&self, request: SendMessage) -> Result<String> {
        let session = self.sessions.require(&request.session_id)?;

        if !session.is_participant(&request.from_agent) {
            return Err(MeshError::Validation(format!(
                "sender '{}' is not a participant of session '{}'",
                request.from_agent, session.id
            )));
        }
        if let Some(to_agent) = &request.to_agent {
            if !session.is_participant(to_agent) {
                return Err(MeshError::Validation(format!(
                    "recipient '{}' is not a participant of session '{}'",
                    to_agent, session.id
                )));
            }
        }

        let recipients = match &request.to_agent {
            Some(to_agent) => vec![to_agent.clone()],
            None => session.other_participants(&request.from_agent),
        };

        let now_ms = Utc::now().timestamp_millis();
        if !self.limiter.check_and_record(&request.from_agent, now_ms) {
            return Err(MeshError::RateLimitExceeded {
                agent_id: request.from_agent,
                max_messages: self.limiter.max_events(),
                window_secs: self.limiter.window_secs(),
            });
        }

        let log = self
            .logs
            .entry(session.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionLog::new())))
            .clone();

        let message = {
            let mut log = log.lock();
            let sequence = log.next_sequence;
            log.next_sequence += 1;

            let message = request.into_message(sequence);
            log.messages.push_back(message.clone());
            while log.messages.len() > self.history_limit {
                log.messages.pop_front();
            }
            message
        };

        self.total_sent.fetch_add(1, Ordering::SeqCst);
        debug!(
            message_id = %message.id,
            session_id = %message.session_id,
            from = %message.from_agent,
            sequence = message.sequence,
            broadcast = message.is_broadcast(),
            "Message sent"
        );

        self.events.emit(&MeshEvent::MessageSent {
            message_id: message.id.clone(),
            session_id: message.session_id.clone(),
            from_agent: message.from_agent.clone(),
            to_agent: message.to_agent.clone(),
        });

        for recipient in &recipients {
            self.deliver(recipient, &message);
            self.events.emit(&MeshEvent::MessageReceived {
                message_id: message.id.clone(),
                session_id: message.session_id.clone(),
                recipient: recipient.clone(),
            });
        }

        self.audit.record(
            AuditRecord::new("message_bus", "message", &message.id)
                .with_tags(recipients)
                .with_body(serde_json::to_string(&message).unwrap_or_default()),
        );

        Ok(message.id)
    }

    fn deliver(&self, recipient: &str, message: &Message) {
        let subscribers = self.subscribers.read();
        if let Some(queue) = subscribers.get(recipient) {
            queue.lock().push_back(message.clone());
        }
    }

    /// The most recent `limit` messages in sequence order.
    pub fn message_history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let timer = OpTimer::start(self.monitor.as_ref(), "message_history");
        if let Err(e) = self.sessions.require(session_id) {
            timer.error();
            return Err(e);
        }

        let history = match self.logs.get(session_id) {
            Some(log) => {
                let log = log.lock();
                let skip = log.messages.len().saturating_sub(limit);
                log.messages.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        };

        timer.success();
        Ok(history)
    }

    /// Register a polling inbox for an agent. Messages addressed to the
    /// agent (or broadcast in its sessions) accumulate until drained.
    pub fn subscribe(&self, agent_id: &str) -> BusSubscriber {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        self.subscribers
            .write()
            .insert(agent_id.to_string(), Arc::clone(&queue));
        BusSubscriber {
            agent_id: agent_id.to_string(),
            queue,
        }
    }

    pub fn unsubscribe(&self, agent_id: &str) {
        self.subscribers.write().remove(agent_id);
    }

    pub fn stats(&self) -> BusStats {
        let subscribers = self.subscribers.read();
        let pending = subscribers.values().map(|q| q.lock().len()).sum();
        BusStats {
            subscriber_count: subscribers.len(),
            session_count: self.logs.len(),
            total_messages_sent: self.total_sent.load(Ordering::SeqCst),
            total_pending_messages: pending,
        }
    }
}

/// Polling inbox handle returned by [`MessageBus::subscribe`].
pub struct BusSubscriber {
    agent_id: String,
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl BusSubscriber {
    pub fn try_recv(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    pub fn recv_all(&self) -> Vec<Message> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[derive(Debug, Clone)]
pub struct BusStats {
    pub subscriber_count: usize,
    pub session_count: usize,
    pub total_messages_sent: u64,
    pub total_pending_messages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::MessageType;
    use crate::session::CreateSession;

    fn fixture(max_messages: usize) -> (Arc<SessionStore>, MessageBus, String) {
        let sessions = Arc::new(SessionStore::new());
        let mut config = MessagingConfig::default();
        config.rate_limit_max_messages = max_messages;
        let bus = MessageBus::new(
            Arc::clone(&sessions),
            &config,
            Arc::new(EventBus::new()),
        );
        let session_id = sessions
            .create_session(
                CreateSession::new("triage").with_participants(["dev-0", "triage-0", "arch-0"]),
            )
            .unwrap();
        (sessions, bus, session_id)
    }

    #[test]
    fn test_sequences_strictly_increasing_and_contiguous() {
        let (_sessions, bus, session_id) = fixture(100);

        for i in 0..5 {
            bus.send_message(
                SendMessage::new(&session_id, "dev-0", format!("msg {}", i)).to("triage-0"),
            )
            .unwrap();
        }

        let history = bus.message_history(&session_id, 10).unwrap();
        assert_eq!(history.len(), 5);
        for (i, message) in history.iter().enumerate() {
            assert_eq!(message.sequence, i as u64 + 1);
        }
    }

    #[test]
    fn test_membership_validated_before_append() {
        let (_sessions, bus, session_id) = fixture(100);

        let from_outside = bus.send_message(SendMessage::new(&session_id, "ghost-0", "hi"));
        assert!(matches!(from_outside, Err(MeshError::Validation(_))));

        let to_outside =
            bus.send_message(SendMessage::new(&session_id, "dev-0", "hi").to("ghost-0"));
        assert!(matches!(to_outside, Err(MeshError::Validation(_))));

        assert!(bus.message_history(&session_id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_session_rejected() {
        let (_sessions, bus, _session_id) = fixture(100);
        let result = bus.send_message(SendMessage::new("missing", "dev-0", "hi"));
        assert!(matches!(result, Err(MeshError::SessionNotFound(_))));
    }

    #[test]
    fn test_rate_limit_blocks_without_mutating() {
        let (_sessions, bus, session_id) = fixture(3);

        for _ in 0..3 {
            bus.send_message(SendMessage::new(&session_id, "dev-0", "ping").to("triage-0"))
                .unwrap();
        }

        let blocked =
            bus.send_message(SendMessage::new(&session_id, "dev-0", "ping").to("triage-0"));
        assert!(matches!(blocked, Err(MeshError::RateLimitExceeded { .. })));

        // History unchanged; other senders unaffected.
        assert_eq!(bus.message_history(&session_id, 10).unwrap().len(), 3);
        bus.send_message(SendMessage::new(&session_id, "triage-0", "pong").to("dev-0"))
            .unwrap();
    }

    #[test]
    fn test_rate_limit_is_agent_scoped_across_sessions() {
        let (sessions, bus, session_id) = fixture(2);
        let second_session = sessions
            .create_session(CreateSession::new("retro").with_participants(["dev-0", "arch-0"]))
            .unwrap();

        bus.send_message(SendMessage::new(&session_id, "dev-0", "one").to("triage-0"))
            .unwrap();
        bus.send_message(SendMessage::new(&second_session, "dev-0", "two").to("arch-0"))
            .unwrap();

        let third = bus.send_message(SendMessage::new(&session_id, "dev-0", "three").to("triage-0"));
        assert!(matches!(third, Err(MeshError::RateLimitExceeded { .. })));
    }

    #[test]
    fn test_broadcast_delivers_to_all_other_participants() {
        let (_sessions, bus, session_id) = fixture(100);

        let dev = bus.subscribe("dev-0");
        let triage = bus.subscribe("triage-0");
        let arch = bus.subscribe("arch-0");

        bus.broadcast_message(SendMessage::new(&session_id, "dev-0", "announcement"))
            .unwrap();

        assert_eq!(dev.pending_count(), 0);
        assert_eq!(triage.pending_count(), 1);
        assert_eq!(arch.pending_count(), 1);

        let received = triage.try_recv().unwrap();
        assert!(received.is_broadcast());
        assert_eq!(received.content, "announcement");
    }

    #[test]
    fn test_direct_message_delivers_once() {
        let (_sessions, bus, session_id) = fixture(100);

        let triage = bus.subscribe("triage-0");
        let arch = bus.subscribe("arch-0");

        bus.send_message(
            SendMessage::new(&session_id, "dev-0", "for you")
                .to("triage-0")
                .with_type(MessageType::Question),
        )
        .unwrap();

        assert_eq!(triage.pending_count(), 1);
        assert_eq!(arch.pending_count(), 0);
        assert_eq!(
            triage.try_recv().unwrap().message_type,
            MessageType::Question
        );
    }

    #[test]
    fn test_history_limit_keeps_most_recent() {
        let sessions = Arc::new(SessionStore::new());
        let mut config = MessagingConfig::default();
        config.history_limit = 3;
        let bus = MessageBus::new(Arc::clone(&sessions), &config, Arc::new(EventBus::new()));

        let session_id = sessions
            .create_session(CreateSession::new("s").with_participants(["dev-0", "triage-0"]))
            .unwrap();

        for i in 1..=5 {
            bus.send_message(
                SendMessage::new(&session_id, "dev-0", format!("msg {}", i)).to("triage-0"),
            )
            .unwrap();
        }

        let history = bus.message_history(&session_id, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sequence, 3);
        assert_eq!(history[2].sequence, 5);
    }

    #[test]
    fn test_stats() {
        let (_sessions, bus, session_id) = fixture(100);
        let _sub = bus.subscribe("triage-0");

        bus.send_message(SendMessage::new(&session_id, "dev-0", "hi").to("triage-0"))
            .unwrap();

        let stats = bus.stats();
        assert_eq!(stats.subscriber_count, 1);
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.total_messages_sent, 1);
        assert_eq!(stats.total_pending_messages, 1);
    }
}
