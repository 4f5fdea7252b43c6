//! Drives one fault-injection scenario end to end against an in-process store
//! and simulated cluster members, and exits non-zero if the cluster does not
//! converge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shardwalk::admin::StoreClusterAdmin;
use shardwalk::calculator::RendezvousCalculator;
use shardwalk::command::CommandOutcome;
use shardwalk::keys;
use shardwalk::registry::{ClusterShape, SessionRegistry};
use shardwalk::settings::{HarnessConfig, LogFormat};
use shardwalk::sim::SimProcessFactory;
use shardwalk::store::{CoordinationStore, MemoryStore};
use shardwalk::trace;
use shardwalk::verifier::ConvergenceCheck;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "shardwalk")]
#[command(about = "Walk a simulated cluster toward a partial ideal state and verify it converges")]
struct Args {
    /// Path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Session name; the cluster is named after it
    #[arg(long, default_value = "driver")]
    session: String,

    /// Number of resources
    #[arg(long, default_value = "1")]
    resources: u32,

    /// Partitions per resource
    #[arg(long, default_value = "10")]
    partitions: u32,

    /// Number of participant nodes
    #[arg(long, default_value = "5")]
    nodes: u32,

    /// Replicas per partition, including the primary
    #[arg(long, default_value = "3")]
    replica: u32,

    /// How far (0-100) toward the target the pushed ideal state should be
    #[arg(long, default_value = "50")]
    percentage: u32,

    /// Delay in milliseconds before the ideal state is pushed
    #[arg(long, default_value = "0")]
    push_at_ms: u64,

    /// Participant id to stop after the ideal state converged
    #[arg(long)]
    stop_node: Option<u32>,

    /// Delay in milliseconds before the participant is stopped
    #[arg(long, default_value = "0")]
    stop_at_ms: u64,

    /// Print every resource's ideal state and external view as JSON before teardown
    #[arg(long)]
    dump_state: bool,

    /// Log output format; overrides the config file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = HarnessConfig::load(args.config.as_deref())?;
    if let Some(format) = args.log_format {
        cfg.logging.format = format;
    }
    trace::init(cfg.logging.format)?;

    anyhow::ensure!(args.percentage <= 100, "--percentage must be within 0..=100");

    let model = cfg.naming.state_model.to_model();
    let store = Arc::new(MemoryStore::new(cfg.store.address.clone()));
    let calculator = Arc::new(RendezvousCalculator);
    let admin = Arc::new(StoreClusterAdmin::new(
        store.clone(),
        calculator.clone(),
        model.clone(),
    ));
    let factory = Arc::new(SimProcessFactory::new(model, cfg.timing.sim_tick()));
    let registry = SessionRegistry::new(cfg, store.clone(), factory, admin, calculator);

    let shape = ClusterShape {
        num_resources: args.resources,
        partitions_per_resource: args.partitions,
        num_nodes: args.nodes,
        replica: args.replica,
    };
    let converged = run_scenario(&registry, &args, shape).await;
    if args.dump_state {
        dump_state(store.as_ref(), &registry, &args.session, &shape).await?;
    }
    registry.stop_cluster(&args.session).await?;

    if !converged? {
        error!(session = %args.session, "cluster did not converge");
        anyhow::bail!("cluster did not converge");
    }
    info!(session = %args.session, "scenario passed");
    Ok(())
}

async fn run_scenario(
    registry: &SessionRegistry,
    args: &Args,
    shape: ClusterShape,
) -> anyhow::Result<bool> {
    let session = args.session.as_str();
    // Pushed ideal states are merged, so start from an empty assignment.
    registry
        .setup_cluster_without_rebalance(session, shape)
        .await?;
    let node_ids: Vec<u32> = (0..shape.num_nodes).collect();
    registry.start_participants(session, &node_ids).await?;
    registry.start_controller(session).await?;

    if !registry.verify_cluster(session, Duration::ZERO).await? {
        return Ok(false);
    }

    let batch = registry
        .set_ideal_state(
            session,
            Duration::from_millis(args.push_at_ms),
            args.percentage,
        )
        .await?;
    for outcome in batch.outcomes().await {
        if outcome != CommandOutcome::Completed {
            error!(?outcome, "ideal state push did not complete");
            return Ok(false);
        }
    }
    if !registry.verify_cluster(session, Duration::ZERO).await? {
        return Ok(false);
    }

    let Some(node_id) = args.stop_node else {
        return Ok(true);
    };
    let stop_at = Duration::from_millis(args.stop_at_ms);
    if let Some(batch) = registry.stop_participant(session, stop_at, node_id).await? {
        batch.outcomes().await;
    }
    Ok(registry
        .verify_cluster_with(session, Duration::ZERO, ConvergenceCheck::LiveInstancesMatch)
        .await?)
}

async fn dump_state(
    store: &dyn CoordinationStore,
    registry: &SessionRegistry,
    session: &str,
    shape: &ClusterShape,
) -> anyhow::Result<()> {
    let cluster = registry.config().naming.cluster_name(session);
    for resource in registry.resource_names(shape) {
        let ideal = store.read(&keys::ideal_state_path(&cluster, &resource)).await?;
        let external = store
            .read(&keys::external_view_path(&cluster, &resource))
            .await?;
        let dump = serde_json::json!({
            "cluster": cluster,
            "resource": resource,
            "ideal_state": ideal,
            "external_view": external,
        });
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }
    Ok(())
}
