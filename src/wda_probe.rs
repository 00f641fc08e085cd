//! HTTP client for WDA's `/status`, `/screenshot`, `/wda/healthcheck`.

use base64::Engine;
use serde_json::Value;
use std::time::Duration;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub struct WdaProbe {
    base_url: String,
    client: reqwest::Client,
}

impl WdaProbe {
    pub fn new(wda_port: u16) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client build");

        Self {
            base_url: format!("http://127.0.0.1:{wda_port}"),
            client,
        }
    }

    /// Fetches `/status`; returns `None` on any HTTP, connection, or parse
    /// error.
    pub async fn status(&self) -> Option<Value> {
        let resp = self.client.get(format!("{}/status", self.base_url)).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<Value>().await.ok()
    }

    /// Fetches `/screenshot`; true iff the base64-decoded `value` begins with
    /// the PNG magic bytes.
    pub async fn screenshot_ok(&self) -> bool {
        let Ok(resp) = self.client.get(format!("{}/screenshot", self.base_url)).send().await else {
            return false;
        };
        if !resp.status().is_success() {
            return false;
        }
        let Ok(body) = resp.json::<Value>().await else {
            return false;
        };
        let Some(encoded) = body.get("value").and_then(Value::as_str) else {
            return false;
        };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            return false;
        };
        bytes.starts_with(&PNG_MAGIC)
    }

    /// Best-effort; errors surface to the caller.
    pub async fn healthcheck(&self) -> anyhow::Result<()> {
        self.client
            .get(format!("{}/wda/healthcheck", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn alive(&self) -> bool {
        self.status().await.is_some() && self.screenshot_ok().await
    }
}

/// `value.ios.ip`, `value.os.version`, `value.os.sdkVersion` read out of a
/// cached `/status` response.
pub struct WdaInfo<'a>(pub &'a Value);

impl<'a> WdaInfo<'a> {
    pub fn ip(&self) -> Option<&'a str> {
        self.0.pointer("/value/ios/ip").and_then(Value::as_str)
    }

    pub fn os_version(&self) -> Option<&'a str> {
        self.0.pointer("/value/os/version").and_then(Value::as_str)
    }

    pub fn sdk_version(&self) -> Option<&'a str> {
        self.0.pointer("/value/os/sdkVersion").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_gate_accepts_real_signature() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC);
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert!(bytes.starts_with(&PNG_MAGIC));
    }

    #[test]
    fn png_gate_rejects_non_png() {
        let bytes = b"not a png".to_vec();
        assert!(!bytes.starts_with(&PNG_MAGIC));
    }

    #[test]
    fn wda_info_reads_nested_paths() {
        let v: Value = serde_json::json!({
            "value": {"ios": {"ip": "10.0.0.5"}, "os": {"version": "17.0", "sdkVersion": "17.0"}}
        });
        let info = WdaInfo(&v);
        assert_eq!(info.ip(), Some("10.0.0.5"));
        assert_eq!(info.os_version(), Some("17.0"));
        assert_eq!(info.sdk_version(), Some("17.0"));
    }

    #[test]
    fn wda_info_missing_paths_are_none() {
        let v: Value = serde_json::json!({"value": {}});
        let info = WdaInfo(&v);
        assert_eq!(info.ip(), None);
    }
}
