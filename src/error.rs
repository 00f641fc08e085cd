use thiserror::Error;

/// Domain-level failures a supervisor can act on directly. Everything else
/// threads through `anyhow::Result` with `.context(...)` at IO boundaries.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("required tool `{0}` is not installed")]
    ToolMissing(String),

    #[error("WDA did not become ready within the deadline")]
    LaunchTimedOut,

    #[error("supervisor for {0} was already stopped")]
    AlreadyStopped(String),

    #[error("no free local TCP port available")]
    PortExhausted,

    #[error("launch re-entered with children already running for {0}")]
    LaunchReentrant(String),
}
