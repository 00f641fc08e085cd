//! Consumes the presence tracker's event stream, spawns/retires supervisors,
//! holds the global WDA-start lock, translates supervisor status transitions
//! into heartbeat updates.

use crate::device::is_sentinel_udid;
use crate::heartbeat::HeartbeatClient;
use crate::inventory;
use crate::presence;
use crate::supervisor::{DeviceSupervisor, GlobalStartLock, StatusSink, SupervisorStatus};
use crate::wda_probe::WdaInfo;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct HeartbeatSink {
    heartbeat: Arc<dyn HeartbeatClient>,
    device_name: String,
    product: String,
}

#[async_trait::async_trait]
impl StatusSink for HeartbeatSink {
    async fn on_status(&self, udid: &str, status: SupervisorStatus) {
        let payload = match status {
            SupervisorStatus::Preparing => json!({
                "colding": false,
                "provider": null,
                "properties": {
                    "name": self.device_name,
                    "product": self.product,
                    "brand": "Apple",
                },
            }),
            SupervisorStatus::Ready { info, wda_url } => {
                let wda = WdaInfo(&info);
                json!({
                    "colding": false,
                    "provider": { "wdaUrl": wda_url },
                    "properties": {
                        "ip": wda.ip(),
                        "version": wda.os_version(),
                        "sdkVersion": wda.sdk_version(),
                    },
                })
            }
            SupervisorStatus::Fatal => json!({ "provider": null }),
        };
        self.heartbeat.device_update(udid, payload).await;
    }
}

pub struct AgentCoordinator {
    supervisors: Arc<Mutex<HashMap<String, Arc<DeviceSupervisor>>>>,
    start_lock: GlobalStartLock,
    heartbeat: Arc<dyn HeartbeatClient>,
    bundle_pattern: String,
    external_helper: bool,
    manual: bool,
    ready_deadline: Duration,
}

impl AgentCoordinator {
    pub fn new(
        heartbeat: Arc<dyn HeartbeatClient>,
        bundle_pattern: String,
        external_helper: bool,
        manual: bool,
        ready_deadline: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisors: Arc::new(Mutex::new(HashMap::new())),
            start_lock: Arc::new(Mutex::new(())),
            heartbeat,
            bundle_pattern,
            external_helper,
            manual,
            ready_deadline,
        })
    }

    /// Drains the presence tracker forever. Intended to be spawned as its
    /// own task.
    pub async fn run(self: Arc<Self>) {
        let (mut events, _stop) = presence::spawn();
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&self, event: crate::device::PresenceEvent) {
        if event.present {
            if is_sentinel_udid(&event.udid) {
                log::debug!("ignoring sentinel udid {}", event.udid);
                return;
            }
            self.spawn_supervisor(event.udid).await;
        } else {
            self.retire_supervisor(&event.udid).await;
        }
    }

    async fn spawn_supervisor(&self, udid: String) {
        let name = inventory::name_of(&udid).await;
        let product = inventory::product_of(&udid).await;
        let is_simulator = product.is_empty();

        let sink = Arc::new(HeartbeatSink {
            heartbeat: self.heartbeat.clone(),
            device_name: if name.is_empty() { "Unknown".to_string() } else { name.clone() },
            product: if product.is_empty() { "Unknown".to_string() } else { product.clone() },
        });

        let supervisor = DeviceSupervisor::new(
            udid.clone(),
            name,
            product,
            is_simulator,
            self.bundle_pattern.clone(),
            self.external_helper,
            self.manual,
            self.ready_deadline,
            self.start_lock.clone(),
            sink,
        );

        {
            let mut map = self.supervisors.lock().await;
            map.insert(udid.clone(), supervisor.clone());
        }

        tokio::spawn(supervisor.run());
    }

    async fn retire_supervisor(&self, udid: &str) {
        let supervisor = {
            let mut map = self.supervisors.lock().await;
            map.remove(udid)
        };
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.stop().await {
                log::debug!("stop({}) returned {}", udid, e);
            }
        }
    }

    pub async fn supervisor_count(&self) -> usize {
        self.supervisors.lock().await.len()
    }

    /// Shared handle used to build the control-surface router.
    pub fn supervisors_handle(&self) -> Arc<Mutex<HashMap<String, Arc<DeviceSupervisor>>>> {
        self.supervisors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_filter_matches_scenario_s6() {
        assert!(is_sentinel_udid("ffffffffffffffffff0000000000000000"));
    }
}
