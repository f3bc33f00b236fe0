use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;

/// Serves the HTTP API.
pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let statuses = self.app_state.service_statuses.clone();
        let router = create_router(self.app_state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Web server listening");
        statuses.set("web", ServiceStatus::Active);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        statuses.set("web", ServiceStatus::Disabled);
        info!("Web server stopped");
        Ok(())
    }
}
