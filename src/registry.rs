//! Agent registration and capability-based discovery.
//!
//! Agents register a descriptor once and refresh it with heartbeats. Agents
//! whose heartbeat age exceeds the timeout are marked offline on the next
//! discovery or sweep pass; eviction never deletes the descriptor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{MeshError, Result};
use crate::events::{EventBus, MeshEvent};
use crate::monitor::{MonitorSink, NullMonitor, OpTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: HashSet::new(),
            status: AgentStatus::Online,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }

    pub fn has_any_capability(&self, query: &[String]) -> bool {
        query.iter().any(|c| self.capabilities.contains(c))
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }
}

pub struct AgentRegistry {
    agents: DashMap<String, AgentDescriptor>,
    heartbeat_timeout: Duration,
    events: Arc<EventBus>,
    monitor: Arc<dyn MonitorSink>,
}

impl AgentRegistry {
    pub fn new(config: &RegistryConfig, events: Arc<EventBus>) -> Self {
        Self {
            agents: DashMap::new(),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            events,
            monitor: Arc::new(NullMonitor),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorSink>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Idempotent upsert by id. Re-registration wins on metadata but keeps
    /// the original registration time.
    pub fn register(&self, mut descriptor: AgentDescriptor) -> Result<String> {
        let timer = OpTimer::start(self.monitor.as_ref(), "register");

        if descriptor.capabilities.is_empty() {
            timer.error();
            return Err(MeshError::Validation(format!(
                "agent '{}' registered without capabilities",
                descriptor.id
            )));
        }

        if let Some(existing) = self.agents.get(&descriptor.id) {
            descriptor.registered_at = existing.registered_at;
        }
        descriptor.status = AgentStatus::Online;
        descriptor.last_heartbeat = Utc::now();

        let agent_id = descriptor.id.clone();
        let capabilities: Vec<String> = descriptor.capabilities.iter().cloned().collect();
        self.agents.insert(agent_id.clone(), descriptor);

        debug!(agent_id = %agent_id, "Agent registered");
        self.events.emit(&MeshEvent::AgentRegistered {
            agent_id: agent_id.clone(),
            capabilities,
        });

        timer.success();
        Ok(agent_id)
    }

    /// Agents whose capability set intersects the query, online only.
    /// An empty query returns every online agent. Stale heartbeats are
    /// swept before matching.
    pub fn discover(&self, capabilities: &[String]) -> Vec<AgentDescriptor> {
        let timer = OpTimer::start(self.monitor.as_ref(), "discover");
        self.sweep_stale(Utc::now());

        let mut matches: Vec<AgentDescriptor> = self
            .agents
            .iter()
            .filter(|entry| entry.is_online())
            .filter(|entry| capabilities.is_empty() || entry.has_any_capability(capabilities))
            .map(|entry| entry.clone())
            .collect();

        matches.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        timer.success();
        matches
    }

    /// Refresh an agent's heartbeat. Returns false for unknown agents.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        if let Some(mut entry) = self.agents.get_mut(agent_id) {
            entry.last_heartbeat = Utc::now();
            if entry.status == AgentStatus::Offline {
                entry.status = AgentStatus::Online;
            }
            true
        } else {
            false
        }
    }

    /// Mark agents offline whose heartbeat age exceeds the timeout.
    /// Explicit tick so tests drive it with synthetic clocks.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        for mut entry in self.agents.iter_mut() {
            if entry.is_online() && entry.heartbeat_age(now) > self.heartbeat_timeout {
                warn!(
                    agent_id = %entry.id,
                    age_secs = entry.heartbeat_age(now).as_secs(),
                    "Agent heartbeat stale, marking offline"
                );
                entry.status = AgentStatus::Offline;
                evicted += 1;
            }
        }
        evicted
    }

    /// Explicit shutdown: mark offline immediately.
    pub fn mark_offline(&self, agent_id: &str) -> bool {
        if let Some(mut entry) = self.agents.get_mut(agent_id) {
            entry.status = AgentStatus::Offline;
            debug!(agent_id, "Agent marked offline");
            true
        } else {
            false
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.get(agent_id).map(|entry| entry.clone())
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    pub fn online_count(&self) -> usize {
        self.agents.iter().filter(|entry| entry.is_online()).count()
    }
}
