//! One planning cycle, stage by stage.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::ClusterApi;
use crate::config::Config;
use crate::error::Result;
use crate::executor::{Executor, MigrationReport};
use crate::report::Phase;
use crate::{features, grouping, inventory, planner, power, report, scoring};

/// Per-invocation switches carried in from the CLI.
#[derive(Debug, Default, Clone)]
pub struct CycleOptions {
    pub dry_run: bool,
    pub json: bool,
    pub best_node: bool,
    /// When set, the executor stops dispatching new chunks on shutdown.
    pub shutdown: Option<Arc<AtomicBool>>,
}

/// What a cycle produced.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(MigrationReport),
    /// `--best-node`: the pipeline stopped after scoring.
    BestNode(Option<String>),
}

/// Run one full cycle: inventory, gating, grouping, scoring, planning and
/// (unless dry-running) execution.
pub async fn run_cycle(
    api: Arc<dyn ClusterApi>,
    config: &Config,
    options: &CycleOptions,
) -> Result<CycleOutcome> {
    let mut world = inventory::collect_world(&*api, config).await?;

    // Power management marks surplus nodes before grouping so their guests
    // land on the maintenance migration list.
    power::evaluate(&mut world, &config.power_management);
    grouping::build_groups(&mut world);
    features::gate(&mut world);

    report::record_usage(&mut world, Phase::Before);
    scoring::set_node_assignments(&mut world);
    scoring::set_node_hot(&mut world);
    scoring::set_guest_hot(&mut world);

    if options.best_node {
        return Ok(CycleOutcome::BestNode(planner::most_free_node(&world, None)));
    }

    scoring::detect_affinity_violations(&mut world);
    planner::drain_maintenance(&mut world);
    scoring::decide_balance(&mut world);
    planner::relocate(&mut world);
    report::record_usage(&mut world, Phase::After);

    let mut migration_report = MigrationReport::default();
    if world.meta.balancing.enable {
        if options.dry_run {
            let planned = world.guests.values().filter(|g| g.wants_migration()).count();
            info!("Dry-run: skipping execution of {} planned migration(s)", planned);
        } else {
            let mut executor = Executor::new(api.clone(), &world.meta.balancing);
            if let Some(flag) = &options.shutdown {
                executor = executor.with_shutdown_flag(flag.clone());
            }
            migration_report = executor.execute(&world).await;
            power::shutdown_flagged(&*api, &world).await;
        }
    } else {
        debug!("Balancing is not enabled; nothing to execute");
    }

    if options.json {
        println!("{}", report::render_world(&world)?);
    }

    debug!("Cycle finished");
    Ok(CycleOutcome::Completed(migration_report))
}
