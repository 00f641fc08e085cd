//! One-shot listing of currently attached device identifiers: physical
//! devices via `idevice_id`, booted simulators via `xcrun simctl`.
//!
//! Errors from the underlying tools are swallowed and yield empty output;
//! callers treat empty as "Unknown" (see `doctor` for surfacing tool-missing
//! separately from "no devices").

use std::collections::HashSet;
use std::process::Stdio;
use tokio::process::Command;

async fn run(program: &str, args: &[&str]) -> String {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        }
        Ok(out) => {
            log::debug!(
                "{} {:?} exited with {}: {}",
                program,
                args,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            String::new()
        }
        Err(e) => {
            log::debug!("{} {:?} failed to spawn: {}", program, args, e);
            String::new()
        }
    }
}

/// Physical devices currently attached over USB.
async fn list_physical() -> HashSet<String> {
    run("idevice_id", &["-l"])
        .await
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Booted simulators, parsed by extracting the parenthesized identifier
/// immediately preceding the literal "Booted" on each line of
/// `xcrun simctl list devices`.
async fn list_booted_simulators() -> HashSet<String> {
    let listing = run("xcrun", &["simctl", "list", "devices"]).await;
    parse_booted_simulators(&listing)
}

fn parse_booted_simulators(listing: &str) -> HashSet<String> {
    let mut udids = HashSet::new();
    for line in listing.lines() {
        if !line.contains("(Booted)") {
            continue;
        }
        // "    iPhone 15 (6F1234AB-0000-0000-0000-000000000000) (Booted)"
        let mut parts = line.rsplitn(3, '(');
        let _booted = parts.next();
        if let Some(rest) = parts.next() {
            if let Some(end) = rest.find(')') {
                udids.insert(rest[..end].trim().to_string());
            }
        }
    }
    udids
}

/// One-shot listing of currently attached device identifiers.
pub async fn list() -> HashSet<String> {
    let (physical, simulators) = tokio::join!(list_physical(), list_booted_simulators());
    physical.into_iter().chain(simulators.into_iter()).collect()
}

pub async fn name_of(udid: &str) -> String {
    run("idevicename", &["-u", udid]).await
}

pub async fn product_of(udid: &str) -> String {
    run("ideviceinfo", &["--udid", udid, "--key", "ProductType"]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_booted_line() {
        let listing = "-- iOS 17.0 --\n    iPhone 15 (6F1234AB-0000-0000-0000-000000000000) (Booted)\n    iPhone 15 Pro (AAAA) (Shutdown)\n";
        let udids = parse_booted_simulators(listing);
        assert_eq!(udids.len(), 1);
        assert!(udids.contains("6F1234AB-0000-0000-0000-000000000000"));
    }

    #[test]
    fn ignores_shutdown_simulators() {
        let listing = "    iPhone 14 (BBBB) (Shutdown)\n";
        assert!(parse_booted_simulators(listing).is_empty());
    }

    #[test]
    fn empty_listing_yields_no_devices() {
        assert!(parse_booted_simulators("").is_empty());
    }
}
