use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ios_provider_agent::config::AgentConfig;
use ios_provider_agent::control::{self, ControlState};
use ios_provider_agent::coordinator::AgentCoordinator;
use ios_provider_agent::doctor;
use ios_provider_agent::heartbeat::{HeartbeatClient, WsHeartbeatClient};

struct NullHeartbeat;

#[async_trait::async_trait]
impl HeartbeatClient for NullHeartbeat {
    async fn device_update(&self, udid: &str, payload: serde_json::Value) {
        log::info!("device_update({udid}): {payload}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse_args();

    let level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    println!("{}", "ios-provider-agent starting".blue().bold());
    log::info!("control port: {}", config.port);

    let external_helper = AgentConfig::external_helper_selected();
    let manual = AgentConfig::manual_mode_selected();
    let checks = doctor::run_checks(external_helper).await;
    doctor::log_checks(&checks);

    let heartbeat: Arc<dyn HeartbeatClient> = match &config.server {
        Some(addr) => Arc::new(WsHeartbeatClient::new(addr.clone())),
        None => {
            log::warn!("no --server configured; heartbeat updates are logged only");
            Arc::new(NullHeartbeat)
        }
    };

    let coordinator = AgentCoordinator::new(
        heartbeat,
        config.wda_bundle_pattern.clone(),
        external_helper,
        manual,
        std::time::Duration::from_secs(config.wda_ready_timeout),
    );

    let control_state = ControlState {
        supervisors: coordinator.supervisors_handle(),
        cookie_secret: AgentConfig::cookie_secret(),
    };

    let control_router = control::router(control_state);
    let control_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_handler = stop.clone();
    ctrlc::set_handler(move || {
        println!("\n{}", "shutting down...".yellow());
        stop_for_handler.store(true, Ordering::SeqCst);
    })?;

    let coordinator_task = tokio::spawn(coordinator.clone().run());

    let listener = tokio::net::TcpListener::bind(control_addr).await?;
    log::info!("control surface listening on {control_addr}");

    tokio::select! {
        result = axum::serve(listener, control_router) => {
            if let Err(e) = result {
                log::error!("control server exited: {e}");
            }
        }
        _ = wait_for_stop(stop.clone()) => {
            log::info!("stop requested, exiting");
        }
    }

    coordinator_task.abort();
    println!("{}", "ios-provider-agent stopped".green());
    Ok(())
}

async fn wait_for_stop(stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
