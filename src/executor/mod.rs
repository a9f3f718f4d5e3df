// # Migration Executor
//
// Issues the planned migrations in chunks and waits for each chunk to drain
// before the next one starts. Within a chunk up to `parallel_jobs`
// migrations run concurrently; dispatch order follows guest iteration
// order, completion order is not guaranteed. Polling is cooperative and the
// executor never cancels a remote task: a job that outlives the soft
// timeout is abandoned with a warning.
//
// ```text
// dispatched → running → stopped/OK        (success)
//                      → stopped/<error>   (failure)
//                      → abandoned         (soft timeout)
// ```

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::api::{ClusterApi, CtMigration, VmMigration};
use crate::config::BalancingConfig;
use crate::model::{GuestKind, WorldState};

/// Task type of an HA-wrapped migration; the underlying qemu-migrate task
/// must be resolved before its status means anything.
const HA_MIGRATE_TASK: &str = "hamigrate";

/// Terminal state of one migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Abandoned,
    DispatchFailed,
}

/// Counters for one executor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct MigrationJob {
    name: String,
    id: u64,
    kind: GuestKind,
    source: String,
    target: String,
    ha_managed: bool,
}

#[derive(Clone)]
struct JobOptions {
    live: bool,
    with_local_disks: bool,
    with_conntrack_state: bool,
    poll_interval: Duration,
    max_job_validation: u32,
}

/// Chunked parallel migration driver.
pub struct Executor {
    api: Arc<dyn ClusterApi>,
    chunk_size: usize,
    balance_types: Vec<GuestKind>,
    options: JobOptions,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Executor {
    pub fn new(api: Arc<dyn ClusterApi>, balancing: &BalancingConfig) -> Self {
        let chunk_size = if balancing.parallel {
            balancing.parallel_jobs.max(1)
        } else {
            1
        };
        Executor {
            api,
            chunk_size,
            balance_types: balancing.balance_types.clone(),
            options: JobOptions {
                live: balancing.live,
                with_local_disks: balancing.with_local_disks,
                with_conntrack_state: balancing.with_conntrack_state,
                poll_interval: Duration::from_secs(10),
                max_job_validation: balancing.max_job_validation,
            },
            shutdown: None,
        }
    }

    /// Override the poll interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Stop dispatching new chunks once the flag is set; the current chunk
    /// still drains.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Execute all planned migrations, chunk by chunk.
    pub async fn execute(&self, world: &WorldState) -> MigrationReport {
        let mut report = MigrationReport::default();
        let mut jobs = self.collect_jobs(world, &mut report);
        if jobs.is_empty() {
            info!("No migrations to execute");
            return report;
        }
        self.resolve_ha_managed(&mut jobs).await;

        let chunk_count = jobs.len().div_ceil(self.chunk_size);
        info!(
            "Executing {} migrations in {} chunk(s) of up to {}",
            jobs.len(),
            chunk_count,
            self.chunk_size
        );

        for (index, chunk) in jobs.chunks(self.chunk_size).enumerate() {
            if self
                .shutdown
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                warn!(
                    "Shutdown requested; {} migrations were not dispatched",
                    jobs.len() - report.dispatched
                );
                break;
            }

            debug!("Dispatching chunk {}/{}", index + 1, chunk_count);
            let handles: Vec<_> = chunk
                .iter()
                .map(|job| {
                    let api = self.api.clone();
                    let job = job.clone();
                    let options = self.options.clone();
                    tokio::spawn(async move { run_job(api, job, options).await })
                })
                .collect();
            report.dispatched += handles.len();

            // Barrier: every job in this chunk reaches a terminal or
            // abandoned state before the next chunk starts.
            for joined in join_all(handles).await {
                match joined {
                    Ok(JobOutcome::Succeeded) => report.succeeded += 1,
                    Ok(JobOutcome::Failed) | Ok(JobOutcome::DispatchFailed) => report.failed += 1,
                    Ok(JobOutcome::Abandoned) => report.abandoned += 1,
                    Err(e) => {
                        error!("Migration task aborted: {}", e);
                        report.failed += 1;
                    }
                }
            }
            debug!("Chunk {}/{} drained", index + 1, chunk_count);
        }

        info!(
            "Migration summary: {} dispatched, {} succeeded, {} failed, {} abandoned, {} skipped",
            report.dispatched, report.succeeded, report.failed, report.abandoned, report.skipped
        );
        report
    }

    fn collect_jobs(&self, world: &WorldState, report: &mut MigrationReport) -> Vec<MigrationJob> {
        let mut jobs = Vec::new();
        for guest in world.guests.values() {
            if !guest.wants_migration() || guest.ignore {
                continue;
            }
            if !self.balance_types.contains(&guest.kind) {
                debug!(
                    "Guest {} of type {} is excluded by balance_types; skipping",
                    guest.name, guest.kind
                );
                report.skipped += 1;
                continue;
            }
            jobs.push(MigrationJob {
                name: guest.name.clone(),
                id: guest.id,
                kind: guest.kind,
                source: guest.node_current.clone(),
                target: guest.node_target.clone(),
                ha_managed: false,
            });
        }
        jobs
    }

    /// Mark jobs whose guest is HA-managed; their migrations surface as
    /// HA-wrapped tasks. Best effort: without HA status nothing is marked.
    async fn resolve_ha_managed(&self, jobs: &mut [MigrationJob]) {
        let ha_guests: BTreeSet<u64> = match self.api.ha_status().await {
            Ok(entries) => entries.iter().filter_map(|entry| entry.vmid()).collect(),
            Err(e) => {
                debug!("HA status unavailable: {}", e);
                return;
            }
        };
        for job in jobs {
            if ha_guests.contains(&job.id) {
                debug!("Guest {} is HA managed; expecting an HA-wrapped task", job.name);
                job.ha_managed = true;
            }
        }
    }
}

async fn run_job(api: Arc<dyn ClusterApi>, job: MigrationJob, options: JobOptions) -> JobOutcome {
    debug!(
        "Starting to migrate guest {} of type {} from {} to {}",
        job.name, job.kind, job.source, job.target
    );
    if job.ha_managed {
        debug!(
            "Guest {} is under HA management; the migration task will be HA-wrapped",
            job.name
        );
    }

    let dispatched = match job.kind {
        GuestKind::Vm => {
            let migration = VmMigration {
                target: job.target.clone(),
                online: options.live,
                with_local_disks: options.with_local_disks,
                with_conntrack_state: options.with_conntrack_state,
            };
            api.migrate_vm(&job.source, job.id, &migration).await
        }
        GuestKind::Ct => {
            let migration = CtMigration {
                target: job.target.clone(),
                restart: true,
            };
            api.migrate_container(&job.source, job.id, &migration).await
        }
    };

    let upid = match dispatched {
        Ok(upid) => upid,
        Err(e) => {
            error!(
                "Failed to migrate guest {}: {}. Please check if the resource is locked or similar.",
                job.name, e
            );
            return JobOutcome::DispatchFailed;
        }
    };

    wait_for_task(api, &job, upid, &options).await
}

/// Poll a migration task to a terminal state, unwrapping HA-managed tasks
/// and abandoning after the configured number of iterations.
async fn wait_for_task(
    api: Arc<dyn ClusterApi>,
    job: &MigrationJob,
    upid: String,
    options: &JobOptions,
) -> JobOutcome {
    let mut task_id = upid;
    let mut retry_counter: u32 = 1;

    loop {
        let status = match api.task_status(&job.source, &task_id).await {
            Ok(status) => status,
            Err(e) => {
                // Other operators share the cluster; a vanished task
                // surfaces as failure and the next cycle reassesses.
                error!(
                    "Job ID {} (guest: {}) could not be queried: {}",
                    task_id, job.name, e
                );
                return JobOutcome::Failed;
            }
        };

        if status.task_type == HA_MIGRATE_TASK {
            match api.find_migration_task(&job.source, job.id).await {
                Ok(Some(task)) => {
                    debug!(
                        "Job ID {} (guest: {}) is HA-wrapped; following task {}",
                        task_id, job.name, task.upid
                    );
                    task_id = task.upid;
                    continue;
                }
                Ok(None) => {
                    debug!(
                        "Underlying migration task for guest {} not visible yet",
                        job.name
                    );
                }
                Err(e) => {
                    warn!(
                        "Could not resolve HA-wrapped task for guest {}: {}",
                        job.name, e
                    );
                }
            }
        } else if status.status == "stopped" {
            return if status.exitstatus.as_deref() == Some("OK") {
                debug!("Job ID {} (guest: {}) was successful", task_id, job.name);
                JobOutcome::Succeeded
            } else {
                error!(
                    "Job ID {} (guest: {}) went into an error! Please check manually.",
                    task_id, job.name
                );
                JobOutcome::Failed
            };
        }

        sleep(options.poll_interval).await;
        retry_counter += 1;
        if retry_counter >= options.max_job_validation {
            warn!(
                "Job ID {} (guest: {}) for migration took too long. Please check manually.",
                task_id, job.name
            );
            return JobOutcome::Abandoned;
        }
        debug!(
            "Job ID {} (guest: {}) for migration is still running... (Run: {})",
            task_id, job.name, retry_counter
        );
    }
}
