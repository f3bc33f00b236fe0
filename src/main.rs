use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use ttsync::app::App;
use ttsync::cli::{Args, ServiceName};
use ttsync::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let enabled_services = ServiceName::all();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let config = App::load_config().expect("Failed to load config");
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting ttsync"
    );

    let mut app = App::new(config)
        .await
        .expect("Failed to initialize application");

    info!(
        enabled_services = ?enabled_services,
        "services configuration loaded"
    );
    app.setup_services(&enabled_services)
        .expect("Failed to setup services");

    app.start_services();
    app.run().await
}
