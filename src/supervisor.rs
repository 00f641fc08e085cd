//! Per-device state machine: preparing → ready → fatal, with restart policy
//! and teardown.

use crate::error::AgentError;
use crate::ports;
use crate::reverse_proxy::{self, ProxyTargets};
use crate::tunnel::TunnelProcess;
use crate::wda_probe::WdaProbe;
use crate::wda_runner::{WdaLaunchMode, WdaRunner};
use anyhow::Result;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{Mutex, Notify};

const PREPARING_BACKOFF: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(60);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const ENVIRONMENTAL_FAILURE_THRESHOLD: Duration = Duration::from_secs(3);
/// `retry_count > 3` moves the supervisor to fatal, i.e. the 4th consecutive
/// failed launch is the last one tolerated.
const MAX_LAUNCH_RETRIES: u32 = 3;
/// Three consecutive failed health probes drop the supervisor back to
/// `preparing` (§4.8's prose reading of the health loop, taken over the
/// ASCII sketch's `fail_count > 3` which would require a fourth failure).
const MAX_HEALTH_FAILURES: u32 = 2;

/// Shared across all supervisors; lent during the launch critical section
/// only, released as soon as `wait_until_ready` returns.
pub type GlobalStartLock = Arc<Mutex<()>>;

#[derive(Debug, Clone)]
pub enum SupervisorStatus {
    Preparing,
    Ready { info: Value, wda_url: String },
    Fatal,
}

#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn on_status(&self, udid: &str, status: SupervisorStatus);
}

struct Children {
    wda: Option<Child>,
    wda_tunnel: Option<TunnelProcess>,
    mjpeg_tunnel: Option<TunnelProcess>,
    proxy: Option<Child>,
}

impl Children {
    fn new() -> Self {
        Self {
            wda: None,
            wda_tunnel: None,
            mjpeg_tunnel: None,
            proxy: None,
        }
    }

    fn any_exited(&mut self) -> bool {
        let wda_exited = self
            .wda
            .as_mut()
            .map(|c| matches!(c.try_wait(), Ok(Some(_)) | Err(_)))
            .unwrap_or(false);
        let wda_tunnel_exited = self.wda_tunnel.as_mut().map(|t| t.has_exited()).unwrap_or(false);
        let mjpeg_tunnel_exited = self.mjpeg_tunnel.as_mut().map(|t| t.has_exited()).unwrap_or(false);
        let proxy_exited = self
            .proxy
            .as_mut()
            .map(|c| matches!(c.try_wait(), Ok(Some(_)) | Err(_)))
            .unwrap_or(false);
        wda_exited || wda_tunnel_exited || mjpeg_tunnel_exited || proxy_exited
    }

    fn any_present(&self) -> bool {
        self.wda.is_some() || self.wda_tunnel.is_some() || self.mjpeg_tunnel.is_some() || self.proxy.is_some()
    }

    /// Sends `terminate` to each tracked child and clears the list. Safe to
    /// call more than once.
    async fn destroy(&mut self) {
        if let Some(mut child) = self.wda.take() {
            let _ = child.start_kill();
        }
        if let Some(mut t) = self.wda_tunnel.take() {
            t.terminate().await;
        }
        if let Some(mut t) = self.mjpeg_tunnel.take() {
            t.terminate().await;
        }
        if let Some(mut child) = self.proxy.take() {
            let _ = child.start_kill();
        }
    }
}

pub struct DeviceSupervisor {
    udid: String,
    device_name: String,
    product: String,
    is_simulator: bool,
    bundle_pattern: String,
    external_helper: bool,
    manual: bool,
    ready_deadline: Duration,
    start_lock: GlobalStartLock,
    status_sink: Arc<dyn StatusSink>,
    stop_flag: Arc<AtomicBool>,
    finished: Arc<Notify>,
    stopped_once: AtomicBool,
}

impl DeviceSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        udid: String,
        device_name: String,
        product: String,
        is_simulator: bool,
        bundle_pattern: String,
        external_helper: bool,
        manual: bool,
        ready_deadline: Duration,
        start_lock: GlobalStartLock,
        status_sink: Arc<dyn StatusSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            udid,
            device_name,
            product,
            is_simulator,
            bundle_pattern,
            external_helper,
            manual,
            ready_deadline,
            start_lock,
            status_sink,
            stop_flag: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(Notify::new()),
            stopped_once: AtomicBool::new(false),
        })
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Idempotent error on double-stop. Sets the stop signal and awaits the
    /// `finished` latch.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped_once.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyStopped(self.udid.clone()).into());
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        self.finished.notified().await;
        Ok(())
    }

    /// Drives the whole state machine to completion (until `fatal`).
    pub async fn run(self: Arc<Self>) {
        let mut retry_count: u32 = 0;
        let mut children = Children::new();

        loop {
            if self.should_stop() {
                break;
            }

            self.status_sink
                .on_status(&self.udid, SupervisorStatus::Preparing)
                .await;

            let launch_started = Instant::now();
            let launch_result = self.launch(&mut children).await;
            let elapsed = launch_started.elapsed();

            match launch_result {
                Ok((info, wda_port, wda_url)) => {
                    retry_count = 0;
                    let became_fatal = self.ready_loop(wda_port, info, wda_url).await;
                    if became_fatal {
                        break;
                    }
                    // health loop dropped back to preparing: destroy and retry
                    children.destroy().await;
                    continue;
                }
                Err(_) => {
                    children.destroy().await;
                    retry_count += 1;

                    if retry_count > MAX_LAUNCH_RETRIES || elapsed < ENVIRONMENTAL_FAILURE_THRESHOLD {
                        break;
                    }

                    if self.sleep_unless_stopped(PREPARING_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            }
        }

        children.destroy().await;
        self.status_sink.on_status(&self.udid, SupervisorStatus::Fatal).await;
        children.destroy().await;
        // notify_one stores a permit when no waiter is registered yet, unlike
        // notify_waiters which would silently drop the wakeup if stop()'s
        // caller hasn't reached `finished.notified().await` yet.
        self.finished.notify_one();
    }

    /// Launch sequence, entered under the `GlobalStartLock`, released as soon
    /// as `wait_until_ready` returns.
    async fn launch(&self, children: &mut Children) -> Result<(Value, u16, String)> {
        if children.any_present() {
            return Err(AgentError::LaunchReentrant(self.udid.clone()).into());
        }

        let _permit = self.start_lock.lock().await;

        let wda_port = ports::allocate()?;
        let mjpeg_port = ports::allocate()?;

        let mode = WdaLaunchMode::selected(self.manual, self.external_helper);
        let wda_child = WdaRunner::start(
            mode,
            &self.udid,
            self.is_simulator,
            wda_port,
            mjpeg_port,
            &self.bundle_pattern,
        )
        .await?;
        children.wda = wda_child;

        if !self.is_simulator {
            // tidevice's `wdaproxy --port` already binds and forwards the WDA
            // port itself; starting an iproxy tunnel on the same local port
            // would lose the race to bind it.
            if mode != WdaLaunchMode::ExternalHelper {
                children.wda_tunnel = Some(TunnelProcess::start(&self.udid, wda_port, 8100).await?);
            }
            children.mjpeg_tunnel = Some(TunnelProcess::start(&self.udid, mjpeg_port, 9100).await?);
        }

        let public_addr = self.restart_proxy(children, wda_port, mjpeg_port).await?;
        log::info!("{}: reverse proxy listening on {}", self.udid, public_addr);

        let info = self.wait_until_ready(children, wda_port).await?;
        Ok((info, wda_port, format!("http://{public_addr}")))
    }

    async fn restart_proxy(&self, children: &mut Children, wda_port: u16, mjpeg_port: u16) -> Result<SocketAddr> {
        if let Some(mut child) = children.proxy.take() {
            let _ = child.start_kill();
        }
        let targets = ProxyTargets {
            wda_url: format!("http://127.0.0.1:{wda_port}"),
            mjpeg_url: format!("http://127.0.0.1:{mjpeg_port}"),
        };
        let (addr, child) = reverse_proxy::restart(targets).await?;
        children.proxy = Some(child);
        Ok(addr)
    }

    /// Every 1s: if any child has exited, fail immediately; else if
    /// `status()` succeeds, succeed. Honors stop.
    async fn wait_until_ready(&self, children: &mut Children, wda_port: u16) -> Result<Value> {
        let probe = WdaProbe::new(wda_port);
        let deadline = Instant::now() + self.ready_deadline;

        while Instant::now() < deadline {
            if self.should_stop() {
                anyhow::bail!("stop requested during launch");
            }
            if children.any_exited() {
                anyhow::bail!(AgentError::LaunchTimedOut);
            }
            if let Some(status) = probe.status().await {
                return Ok(status);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        anyhow::bail!(AgentError::LaunchTimedOut)
    }

    /// Returns `true` if the device reached `fatal` (stop requested),
    /// `false` if it should fall back to `preparing`.
    async fn ready_loop(&self, wda_port: u16, initial_info: Value, wda_url: String) -> bool {
        let probe = WdaProbe::new(wda_port);

        let mut last_ip = crate::wda_probe::WdaInfo(&initial_info)
            .ip()
            .map(|s| s.to_string());
        self.status_sink
            .on_status(
                &self.udid,
                SupervisorStatus::Ready { info: initial_info, wda_url: wda_url.clone() },
            )
            .await;

        let mut fail_count: u32 = 0;

        loop {
            if self.should_stop() {
                return true;
            }
            if self.sleep_unless_stopped(HEALTH_POLL_INTERVAL).await {
                return true;
            }
            if self.should_stop() {
                return true;
            }

            // The health loop uses the full `alive()` definition
            // (status + screenshot), stricter than the status-only check
            // used to enter `ready`.
            let status_info = probe.status().await;
            let alive = status_info.is_some() && probe.screenshot_ok().await;

            match status_info.filter(|_| alive) {
                Some(info) => {
                    fail_count = 0;
                    let ip = crate::wda_probe::WdaInfo(&info).ip().map(|s| s.to_string());
                    if ip != last_ip {
                        last_ip = ip;
                        self.status_sink
                            .on_status(
                                &self.udid,
                                SupervisorStatus::Ready { info, wda_url: wda_url.clone() },
                            )
                            .await;
                    }
                }
                None => {
                    fail_count += 1;
                    if fail_count > MAX_HEALTH_FAILURES {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleeps for `duration`, polling the stop flag at 1s granularity so
    /// cancellation is honored well before the sleep completes. Returns
    /// `true` if stop was observed.
    async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let step = Duration::from_secs(1).min(duration);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.should_stop() {
                return true;
            }
            let this_step = step.min(remaining);
            tokio::time::sleep(this_step).await;
            remaining = remaining.saturating_sub(this_step);
        }
        self.should_stop()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn product(&self) -> &str {
        &self.product
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn double_stop_is_an_error() {
        struct NullSink;
        #[async_trait::async_trait]
        impl StatusSink for NullSink {
            async fn on_status(&self, _udid: &str, _status: SupervisorStatus) {}
        }

        let sup = DeviceSupervisor::new(
            "udid-1".into(),
            "name".into(),
            "".into(),
            true,
            "com.example.*.xctrunner".into(),
            false,
            false,
            Duration::from_secs(60),
            Arc::new(Mutex::new(())),
            Arc::new(NullSink),
        );

        // Mark finished directly to avoid running the full state machine in
        // a unit test; exercises only the idempotency guard. notify_one
        // stores a permit here even though nothing is awaiting yet, so the
        // stop() call below observes it immediately rather than blocking.
        sup.stop_flag.store(true, Ordering::SeqCst);
        sup.finished.notify_one();
        assert!(sup.stop().await.is_ok());
        assert!(sup.stop().await.is_err());
    }
}
