use clap::Parser;

/// CLI surface of the agent. Outside the device-supervision core, listed for
/// completeness: the control HTTP port, the heartbeat server address, and
/// debug logging.
#[derive(Parser, Debug, Clone)]
#[command(name = "ios-provider-agent", about = "Per-host iOS device provider agent")]
pub struct AgentConfig {
    /// Listen port for the local control HTTP surface.
    #[arg(long, default_value_t = 4723)]
    pub port: u16,

    /// Heartbeat / control-plane server address, e.g. ws://127.0.0.1:9000.
    #[arg(long)]
    pub server: Option<String>,

    /// Verbose logging.
    #[arg(long)]
    pub debug: bool,

    /// Override the 60s WDA readiness deadline (testing hook).
    #[arg(long, default_value_t = 60)]
    pub wda_ready_timeout: u64,

    /// Bundle-id pattern passed to the external xctest helper, e.g. com.company.*.xctrunner.
    #[arg(long, default_value = "com.facebook.WebDriverAgentRunner.*.xctrunner")]
    pub wda_bundle_pattern: String,
}

impl AgentConfig {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Cookie secret shared with the control plane; `"SECRET:_"` when unset,
    /// matching the original agent's insecure-by-default placeholder.
    pub fn cookie_secret() -> String {
        std::env::var("SECRET").unwrap_or_else(|_| "SECRET:_".to_string())
    }

    /// When set, selects the external-helper WDA launch mode over the
    /// built-in IDE build.
    pub fn external_helper_selected() -> bool {
        std::env::var("TMQ").is_ok()
    }

    /// When set, selects manual WDA launch mode: nothing is spawned, and the
    /// supervisor assumes an externally managed WDA process is already
    /// listening. Takes priority over `TMQ`.
    pub fn manual_mode_selected() -> bool {
        std::env::var("WDA_MANUAL").is_ok()
    }
}
