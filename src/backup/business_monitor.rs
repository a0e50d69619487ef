use super::coordinator::GlobalCoordinator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Answers whether a named process is currently running.
pub trait ProcessProbe: Send + Sync {
    /// Never fails; lookup problems read as "not running".
    fn is_running(&self, process_name: &str) -> bool;
}

/// `ProcessProbe` backed by the host process table.
pub struct SystemProcessProbe {
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_running(&self, process_name: &str) -> bool {
        let wanted = normalize_process_name(process_name);
        if wanted.is_empty() {
            return false;
        }

        let mut system = self.system.lock();
        system.refresh_processes();
        let found = system
            .processes()
            .values()
            .any(|process| normalize_process_name(process.name()) == wanted);
        found
    }
}

/// Case-insensitive, and `calc` matches `calc.exe`.
fn normalize_process_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Samples a `ProcessProbe` at a fixed interval and mirrors the answer into
/// the coordinator's business-pause flag. It never stops or resumes jobs
/// itself.
pub struct BusinessProcessMonitor {
    probe: Arc<dyn ProcessProbe>,
    process_name: String,
    interval: Duration,
}

impl BusinessProcessMonitor {
    pub fn new(probe: Arc<dyn ProcessProbe>, process_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            probe,
            process_name: process_name.into(),
            // A zero interval would make tokio panic
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Start the sampling loop. It stops when `cancel` fires and clears the
    /// pause flag on the way out.
    pub fn spawn(self, coordinator: Arc<GlobalCoordinator>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Business process monitor watching {:?} every {:?}",
                self.process_name, self.interval
            );
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let probe = self.probe.clone();
                let name = self.process_name.clone();
                let detected = tokio::task::spawn_blocking(move || probe.is_running(&name))
                    .await
                    .unwrap_or(false);

                if detected != coordinator.is_business_paused() {
                    if detected {
                        info!("Business process {:?} detected, pausing transfers", self.process_name);
                    } else {
                        info!("Business process {:?} gone, resuming transfers", self.process_name);
                    }
                }
                debug!("Business process {:?} running: {}", self.process_name, detected);
                coordinator.set_business_paused(detected);
            }

            coordinator.set_business_paused(false);
            debug!("Business process monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeProbe(AtomicBool);

    impl ProcessProbe for FakeProbe {
        fn is_running(&self, _process_name: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_process_name(" Calc.EXE "), "calc");
        assert_eq!(normalize_process_name("firefox"), "firefox");
    }

    #[test]
    fn empty_name_is_never_running() {
        assert!(!SystemProcessProbe::new().is_running(""));
        assert!(!SystemProcessProbe::new().is_running("   "));
    }

    #[test]
    fn unknown_process_is_not_running() {
        let probe = SystemProcessProbe::new();
        assert!(!probe.is_running("definitely-not-a-real-process-4242"));
    }

    #[tokio::test]
    async fn mirrors_probe_into_coordinator() {
        let probe = Arc::new(FakeProbe(AtomicBool::new(true)));
        let coordinator = Arc::new(GlobalCoordinator::new(0));
        let cancel = CancellationToken::new();

        let monitor = BusinessProcessMonitor::new(probe.clone(), "calc", Duration::from_millis(5));
        let handle = monitor.spawn(coordinator.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(coordinator.is_business_paused());

        probe.0.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!coordinator.is_business_paused());

        probe.0.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(!coordinator.is_business_paused());
    }
}
