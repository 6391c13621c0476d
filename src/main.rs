//! HostGuard Endpoint Agent - Main Entry Point
//!
//! Bootstrap order: logging, configuration, identity, telemetry worker,
//! then the session loop. Only an invalid controller endpoint may terminate
//! the process; every later failure is absorbed by the reconnect machine.

mod constants;
mod logic;

use logic::config::AgentConfig;
use logic::identity;
use logic::session::Session;
use logic::telemetry::TelemetryClient;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!(
        "Starting {} agent v{}...",
        constants::APP_NAME,
        constants::APP_VERSION
    );

    let config = AgentConfig::from_env();

    let identity = identity::load_or_create(&config.identity);
    log::info!("using stable agent_id={}", identity.id);

    // working directory for persisted rule text
    if let Err(e) = std::fs::create_dir_all(&config.session.rules_dir) {
        log::warn!(
            "failed to create rules dir {:?}: {}",
            config.session.rules_dir,
            e
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    runtime.block_on(async {
        let (telemetry, worker) = TelemetryClient::new(&config.telemetry, &identity.id);
        if telemetry.is_enabled() {
            log::info!("Telemetry: push -> {}", config.telemetry.push_url);
            tokio::spawn(worker.run());
        }

        let session = match Session::new(config.session, identity, telemetry) {
            Ok(session) => session,
            Err(e) => {
                log::error!("invalid controller endpoint: {}", e);
                std::process::exit(1);
            }
        };

        session.run().await;
    });
}
