use crate::error::AgentError;
use anyhow::Result;
use std::net::TcpListener;

/// Hands out free local TCP ports by binding to port 0 and releasing the
/// socket immediately; the OS won't reuse it for a short grace period so
/// callers racing to bind their own listener land on a free port in practice.
pub fn allocate() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|_| AgentError::PortExhausted)?;
    let port = listener.local_addr().map_err(|_| AgentError::PortExhausted)?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ports() {
        let a = allocate().unwrap();
        let b = allocate().unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }
}
