use crate::cli::ServiceName;
use crate::config::Config;
use crate::data::DbContext;
use crate::google::auth::OAuthClientConfig;
use crate::google::{GmailClient, GoogleAuth, GoogleCalendar};
use crate::services::manager::ServiceManager;
use crate::services::poller::{PollTiming, PollerService};
use crate::services::web::WebService;
use crate::state::{AppState, CycleRecord, KV_LAST_CYCLE, LastCycle};
use crate::sync::extract::CommandParser;
use crate::sync::{Collaborators, SyncPipeline};
use anyhow::Context;
use figment::{Figment, providers::Env};
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    db: DbContext,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Read configuration from the process environment.
    pub fn load_config() -> Result<Config, anyhow::Error> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")
    }

    /// Connect to the database, run migrations, and build the collaborators.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;
        let latency = crate::data::health::ping(&db_pool)
            .await
            .context("Database did not answer ping")?;
        info!(
            max_connections = 4,
            acquire_timeout = "4s",
            latency = crate::utils::fmt_duration(latency),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let db = DbContext::new(db_pool.clone());
        let tz = config.tz()?;

        let auth = Arc::new(GoogleAuth::new(
            db_pool.clone(),
            OAuthClientConfig {
                client_id: config.google_client_id.clone(),
                client_secret: config.google_client_secret.clone(),
                redirect_uri: config.google_redirect_uri.clone(),
                auth_url: config.google_auth_url.clone(),
                token_url: config.google_token_url.clone(),
            },
            config.request_timeout,
        )?);
        let gmail = GmailClient::new(
            auth.clone(),
            config.gmail_api_base.clone(),
            config.mail_query.clone(),
            config.request_timeout,
        )?;
        let calendar = GoogleCalendar::new(
            auth.clone(),
            config.calendar_api_base.clone(),
            &config.calendar_id,
            tz,
            config.request_timeout,
        )?;

        let settings = config.sync_settings();
        tokio::fs::create_dir_all(&settings.attachment_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create attachment directory {}",
                    settings.attachment_dir.display()
                )
            })?;
        let pipeline = Arc::new(SyncPipeline::new(
            &settings,
            Collaborators {
                access: auth.clone(),
                mail: Arc::new(gmail),
                parser: Arc::new(CommandParser::new(config.extractor_command.clone())),
                store: Arc::new(db.clone()),
                calendar: Arc::new(calendar),
            },
        ));

        let persisted = match crate::data::kv::get_json::<CycleRecord>(&db_pool, KV_LAST_CYCLE).await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(error = ?e, "Failed to load last poll cycle (non-fatal)");
                None
            }
        };
        if let Some(record) = &persisted {
            info!(finished_at = %record.finished_at, "Loaded last poll cycle summary");
        }

        let app_state = AppState::new(
            Arc::new(db.clone()),
            pipeline,
            auth,
            LastCycle::new(persisted),
        );

        let service_manager = ServiceManager::new(app_state.service_statuses.clone());
        Ok(App {
            config,
            db,
            app_state,
            service_manager,
        })
    }

    /// Setup and register services based on enabled service list
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager.register_service(web_service);
        }

        if services.contains(&ServiceName::Poller) {
            let poller = Box::new(PollerService::new(
                self.db.clone(),
                self.app_state.pipeline.clone(),
                PollTiming {
                    idle_interval: self.config.poll_idle_interval,
                    interval: self.config.poll_interval,
                    concurrency: self.config.sync_concurrency,
                },
                self.app_state.service_statuses.clone(),
                self.app_state.last_cycle.clone(),
            ));
            self.service_manager.register_service(poller);
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
