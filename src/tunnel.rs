//! Child process that forwards a local port to a well-known port on a
//! specific device over the USB multiplexer, via `iproxy`.

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

pub struct TunnelProcess {
    child: Child,
}

impl TunnelProcess {
    pub async fn start(udid: &str, local_port: u16, device_port: u16) -> Result<Self> {
        let child = Command::new("iproxy")
            .arg(local_port.to_string())
            .arg(device_port.to_string())
            .arg("-u")
            .arg(udid)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("failed to spawn iproxy")?;
        Ok(Self { child })
    }

    /// Once this returns `true`, the tunnel is considered dead.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    /// No hard kill escalation is performed; the caller may terminate again.
    pub async fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}
