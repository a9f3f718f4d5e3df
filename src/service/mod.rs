// # Service Loop
//
// Daemonization: the reconfigurable interval scheduler, the optional
// startup delay and the signal plumbing. SIGHUP raises a reload flag
// consumed at the top of the next cycle; SIGINT requests a graceful exit.
// A cycle in flight finishes its current chunk before the process leaves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::{Config, IntervalFormat, Loader, ServiceConfig};
use crate::error::Result;
use crate::logging::LogHandle;
use crate::pipeline::{self, CycleOptions, CycleOutcome};

/// Signal state shared with the running cycle.
pub struct Signals {
    reload: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Signals {
    /// Install SIGHUP and SIGINT listeners.
    pub fn install() -> Result<Self> {
        let reload = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let mut hangup = signal(SignalKind::hangup())?;
        let reload_flag = reload.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("Received SIGHUP; configuration will be reloaded at the next cycle");
                reload_flag.store(true, Ordering::SeqCst);
            }
        });

        let mut interrupt = signal(SignalKind::interrupt())?;
        let shutdown_flag = shutdown.clone();
        let shutdown_notify = notify.clone();
        tokio::spawn(async move {
            while interrupt.recv().await.is_some() {
                info!("Received SIGINT; shutting down gracefully");
                shutdown_flag.store(true, Ordering::SeqCst);
                shutdown_notify.notify_waiters();
            }
        });

        Ok(Signals {
            reload,
            shutdown,
            notify,
        })
    }

    /// Consume the reload flag.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    async fn wait_shutdown(&self) {
        self.notify.notified().await;
    }
}

/// Translate a schedule shape into a sleep duration.
pub fn interval_duration(format: IntervalFormat, value: u64) -> Duration {
    match format {
        IntervalFormat::Hours => Duration::from_secs(value * 3600),
        IntervalFormat::Minutes => Duration::from_secs(value * 60),
    }
}

/// Honor the optional startup delay.
pub async fn startup_delay(service: &ServiceConfig) {
    if !service.delay.enable || service.delay.time == 0 {
        return;
    }
    let duration = interval_duration(service.delay.format, service.delay.time);
    info!("Delaying startup by {} seconds", duration.as_secs());
    tokio::time::sleep(duration).await;
}

/// The main service loop: run cycles until the daemon is asked to stop, or
/// exactly one cycle when daemon mode is off.
pub async fn run(
    api: Arc<dyn crate::api::ClusterApi>,
    loader: Loader,
    mut config: Config,
    cli: &Cli,
    log: &LogHandle,
) -> Result<()> {
    let signals = Signals::install()?;

    loop {
        if signals.take_reload() {
            info!("Reloading configuration");
            config = loader.load()?;
            config.proxmox_api.scrub_secrets();
            log.set_level(&config.service.log_level);
        }

        let options = CycleOptions {
            dry_run: cli.dry_run,
            json: cli.json,
            best_node: cli.best_node,
            shutdown: Some(signals.shutdown_flag()),
        };
        match pipeline::run_cycle(api.clone(), &config, &options).await? {
            CycleOutcome::BestNode(node) => {
                // CLI affordance: report the choice on stdout and stop.
                println!("{}", node.unwrap_or_default());
                return Ok(());
            }
            CycleOutcome::Completed(_) => {}
        }

        if !config.service.daemon {
            debug!("Daemon mode disabled; exiting after one cycle");
            return Ok(());
        }
        if signals.shutdown_requested() {
            return Ok(());
        }

        let interval = interval_duration(
            config.service.schedule.format,
            config.service.schedule.interval,
        );
        info!("Next cycle in {} seconds", interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = signals.wait_shutdown() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Delay;

    #[test]
    fn test_interval_duration() {
        assert_eq!(
            interval_duration(IntervalFormat::Hours, 2),
            Duration::from_secs(7200)
        );
        assert_eq!(
            interval_duration(IntervalFormat::Minutes, 30),
            Duration::from_secs(1800)
        );
    }

    #[tokio::test]
    async fn test_disabled_delay_returns_immediately() {
        let service = ServiceConfig::default();
        // Would hang the test if the delay were honored while disabled.
        tokio::time::timeout(Duration::from_millis(50), startup_delay(&service))
            .await
            .unwrap();

        let with_zero_time = ServiceConfig {
            delay: Delay {
                enable: true,
                time: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        tokio::time::timeout(Duration::from_millis(50), startup_delay(&with_zero_time))
            .await
            .unwrap();
    }
}
