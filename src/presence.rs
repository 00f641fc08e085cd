//! Diffs successive inventories into a lazy event sequence of presence
//! changes. Runs as its own task, pushing events down an mpsc channel so the
//! coordinator can consume them as an async stream.

use crate::device::PresenceEvent;
use crate::inventory;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TICK: Duration = Duration::from_secs(1);

/// Cooperative stop signal: honored between emissions and at every sleep.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Computes `(backs, gones)` for one tick: `backs = currs - lasts`,
/// `gones = lasts - currs`.
fn diff(lasts: &HashSet<String>, currs: &HashSet<String>) -> (Vec<String>, Vec<String>) {
    let mut backs: Vec<String> = currs.difference(lasts).cloned().collect();
    let mut gones: Vec<String> = lasts.difference(currs).cloned().collect();
    backs.sort();
    gones.sort();
    (backs, gones)
}

/// Spawns the tracker loop; returns a receiver of presence events and a
/// handle to request cooperative shutdown.
pub fn spawn() -> (mpsc::UnboundedReceiver<PresenceEvent>, StopSignal) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stop = StopSignal::new();
    let stop_for_task = stop.clone();

    tokio::spawn(async move {
        let mut lasts: HashSet<String> = HashSet::new();
        loop {
            if stop_for_task.is_set() {
                return;
            }

            // inventory::list() spawns child processes through tokio::process,
            // which is itself non-blocking, so no separate worker-thread hop
            // is needed to keep the event loop responsive.
            let currs = inventory::list().await;

            let (backs, gones) = diff(&lasts, &currs);
            lasts = currs;

            for udid in backs {
                if tx.send(PresenceEvent { present: true, udid }).is_err() {
                    return;
                }
            }
            for udid in gones {
                if tx.send(PresenceEvent { present: false, udid }).is_err() {
                    return;
                }
            }

            if stop_for_task.is_set() {
                return;
            }
            tokio::time::sleep(TICK).await;
        }
    });

    (rx, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hotplug_sequence_emits_back_then_gone() {
        let empty = set(&[]);
        let with_a = set(&["A"]);

        let (backs, gones) = diff(&empty, &with_a);
        assert_eq!(backs, vec!["A".to_string()]);
        assert!(gones.is_empty());

        let (backs, gones) = diff(&with_a, &with_a);
        assert!(backs.is_empty());
        assert!(gones.is_empty());

        let (backs, gones) = diff(&with_a, &empty);
        assert!(backs.is_empty());
        assert_eq!(gones, vec!["A".to_string()]);
    }

    #[test]
    fn multi_device_ticks_sort_for_determinism() {
        let lasts = set(&[]);
        let currs = set(&["B", "A"]);
        let (backs, _) = diff(&lasts, &currs);
        assert_eq!(backs, vec!["A".to_string(), "B".to_string()]);
    }
}
