use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use crate::utils::fmt_duration;

/// Owns every registered service and the token that stops them.
pub struct ServiceManager {
    pending: Vec<Box<dyn Service>>,
    running: JoinSet<(&'static str, anyhow::Result<()>)>,
    shutdown: CancellationToken,
    statuses: ServiceStatusRegistry,
}

impl ServiceManager {
    pub fn new(statuses: ServiceStatusRegistry) -> Self {
        Self {
            pending: Vec::new(),
            running: JoinSet::new(),
            shutdown: CancellationToken::new(),
            statuses,
        }
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        debug!(service = service.name(), "Registered service");
        self.pending.push(service);
    }

    pub fn has_services(&self) -> bool {
        !self.pending.is_empty() || !self.running.is_empty()
    }

    pub fn spawn_all(&mut self) {
        for service in self.pending.drain(..) {
            let name = service.name();
            let token = self.shutdown.child_token();
            self.statuses.set(name, ServiceStatus::Starting);
            self.running
                .spawn(async move { (name, service.run(token).await) });
            info!(service = name, "Service started");
        }
    }

    /// Wait for the next service to stop on its own.
    ///
    /// Returns `None` when nothing is running.
    pub async fn next_exit(&mut self) -> Option<(&'static str, anyhow::Result<()>)> {
        let exit = match self.running.join_next().await? {
            Ok(exit) => exit,
            Err(e) => ("unknown", Err(anyhow::anyhow!("service task failed: {e}"))),
        };
        self.statuses.set(exit.0, ServiceStatus::Error);
        Some(exit)
    }

    /// Cancel every service and wait up to `timeout` for them to finish.
    ///
    /// Returns true if all services stopped cleanly in time.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        let remaining = self.running.len();
        info!(
            services = remaining,
            timeout = fmt_duration(timeout),
            "Stopping services"
        );

        let drain = async {
            let mut clean = true;
            while let Some(joined) = self.running.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => debug!(service = name, "Service stopped"),
                    Ok((name, Err(e))) => {
                        error!(service = name, error = ?e, "Service failed during shutdown");
                        clean = false;
                    }
                    Err(e) => {
                        error!(error = ?e, "Service task panicked during shutdown");
                        clean = false;
                    }
                }
            }
            clean
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(clean) => clean,
            Err(_) => {
                warn!(
                    timeout = fmt_duration(timeout),
                    "Services did not stop in time, aborting"
                );
                false
            }
        }
    }
}
