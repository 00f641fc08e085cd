//! Launches the WebDriverAgent test bundle on a device. Selection of mode is
//! a pure configuration decision; the supervisor treats all three uniformly
//! thereafter. Child output is redirected to null.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdaLaunchMode {
    /// Invoke the IDE build tool (xcodebuild) against the WDA project.
    BuiltinBuild,
    /// Invoke an external xctest helper (`tidevice ... wdaproxy -B <pattern>`).
    ExternalHelper,
    /// Do not launch anything; assume WDA is already running externally.
    Manual,
}

impl WdaLaunchMode {
    pub fn selected(manual_requested: bool, external_helper_requested: bool) -> Self {
        if manual_requested {
            WdaLaunchMode::Manual
        } else if external_helper_requested {
            WdaLaunchMode::ExternalHelper
        } else {
            WdaLaunchMode::BuiltinBuild
        }
    }
}

pub struct WdaRunner;

impl WdaRunner {
    /// Launches WDA for `udid`. For simulators, `wda_port`/`mjpeg_port` are
    /// pushed to the child via `USE_PORT`/`MJPEG_SERVER_PORT`; for physical
    /// devices those ports are reached through tunnels started separately by
    /// the supervisor, and WDA listens on its fixed on-device ports.
    pub async fn start(
        mode: WdaLaunchMode,
        udid: &str,
        is_simulator: bool,
        wda_port: u16,
        mjpeg_port: u16,
        bundle_pattern: &str,
    ) -> Result<Option<Child>> {
        match mode {
            WdaLaunchMode::Manual => Ok(None),
            WdaLaunchMode::BuiltinBuild => {
                let mut cmd = Command::new("xcodebuild");
                cmd.args([
                    "-project",
                    "WebDriverAgent.xcodeproj",
                    "-scheme",
                    "WebDriverAgentRunner",
                    "-destination",
                ])
                .arg(format!("id={udid}"))
                .arg("test")
                .stdout(Stdio::null())
                .stderr(Stdio::null());

                if is_simulator {
                    cmd.env("USE_PORT", wda_port.to_string());
                    cmd.env("MJPEG_SERVER_PORT", mjpeg_port.to_string());
                }

                let child = cmd.spawn().context("failed to spawn xcodebuild")?;
                Ok(Some(child))
            }
            WdaLaunchMode::ExternalHelper => {
                let child = Command::new("tidevice")
                    .arg("-u")
                    .arg(udid)
                    .arg("wdaproxy")
                    .arg("-B")
                    .arg(bundle_pattern)
                    .arg("--port")
                    .arg(wda_port.to_string())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .context("failed to spawn tidevice wdaproxy")?;
                Ok(Some(child))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmq_env_selects_external_helper() {
        assert_eq!(WdaLaunchMode::selected(false, true), WdaLaunchMode::ExternalHelper);
        assert_eq!(WdaLaunchMode::selected(false, false), WdaLaunchMode::BuiltinBuild);
    }

    #[test]
    fn manual_flag_takes_priority_over_external_helper() {
        assert_eq!(WdaLaunchMode::selected(true, true), WdaLaunchMode::Manual);
        assert_eq!(WdaLaunchMode::selected(true, false), WdaLaunchMode::Manual);
    }
}
