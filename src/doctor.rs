//! Structured startup checks. The inventory shell wrapper conflates "tool
//! missing" with "no devices" by design (empty string on any error); this
//! module surfaces tool-missing separately so it's observable without
//! misreading an empty inventory as a healthy, device-free host.

pub struct ToolCheck {
    pub name: &'static str,
    pub found: bool,
}

pub async fn run_checks(external_helper: bool) -> Vec<ToolCheck> {
    let mut tools = vec!["idevice_id", "ideviceinfo", "idevicename", "iproxy", "xcodebuild"];
    if external_helper {
        tools.push("tidevice");
    }

    let mut checks = Vec::with_capacity(tools.len());
    for tool in tools {
        checks.push(ToolCheck {
            name: tool,
            found: which::which(tool).is_ok(),
        });
    }
    checks
}

pub fn log_checks(checks: &[ToolCheck]) {
    for check in checks {
        if check.found {
            log::debug!("doctor: found {}", check.name);
        } else {
            log::warn!("doctor: `{}` not found on PATH; related functionality will be degraded", check.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn includes_tidevice_only_when_external_helper_selected() {
        let checks = run_checks(true).await;
        assert!(checks.iter().any(|c| c.name == "tidevice"));

        let checks = run_checks(false).await;
        assert!(!checks.iter().any(|c| c.name == "tidevice"));
    }
}
