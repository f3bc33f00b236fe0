//! Application state shared across components (web, poller).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::google::CredentialExchange;
use crate::sync::store::UserDirectory;
use crate::sync::{CycleSummary, SyncPipeline};

/// Key under which the poller persists its most recent cycle.
pub const KV_LAST_CYCLE: &str = "poller.last_cycle";

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status.clone())
    }

    /// Returns a snapshot of all service statuses with seconds since each update.
    pub fn all(&self) -> Vec<(String, ServiceStatus, u64)> {
        self.inner
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().status.clone(),
                    entry.value().updated_at.elapsed().as_secs(),
                )
            })
            .collect()
    }
}

/// A finished poll cycle and when it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub finished_at: DateTime<Utc>,
    pub summary: CycleSummary,
}

/// Most recent poll cycle, written by the poller and read by `/status`.
#[derive(Debug, Clone, Default)]
pub struct LastCycle {
    inner: Arc<RwLock<Option<CycleRecord>>>,
}

impl LastCycle {
    pub fn new(initial: Option<CycleRecord>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn set(&self, record: CycleRecord) {
        *self.inner.write().await = Some(record);
    }

    pub async fn get(&self) -> Option<CycleRecord> {
        self.inner.read().await.clone()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub pipeline: Arc<SyncPipeline>,
    pub credentials: Arc<dyn CredentialExchange>,
    pub service_statuses: ServiceStatusRegistry,
    pub last_cycle: LastCycle,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        pipeline: Arc<SyncPipeline>,
        credentials: Arc<dyn CredentialExchange>,
        last_cycle: LastCycle,
    ) -> Self {
        Self {
            users,
            pipeline,
            credentials,
            service_statuses: ServiceStatusRegistry::new(),
            last_cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_overwrites_status() {
        let registry = ServiceStatusRegistry::new();
        registry.set("poller", ServiceStatus::Starting);
        registry.set("poller", ServiceStatus::Active);

        assert_eq!(registry.get("poller"), Some(ServiceStatus::Active));
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.get("web"), None);
    }

    #[tokio::test]
    async fn last_cycle_starts_from_persisted_value() {
        let record = CycleRecord {
            finished_at: Utc::now(),
            summary: CycleSummary {
                attempted: 2,
                synced: 2,
                ..Default::default()
            },
        };
        let last = LastCycle::new(Some(record.clone()));
        assert_eq!(last.get().await, Some(record));

        let empty = LastCycle::default();
        assert_eq!(empty.get().await, None);
    }
}
