//! Committee simulator for floating-point state-variable consensus.
//!
//! Runs a whole validator committee in one process: every validator has
//! its own engine and its own noisy risk model, proposals travel through a
//! shared in-memory mempool, and blocks are produced on a fixed interval.
//! Useful for watching rounds start, agree and get superseded with real
//! logs before wiring the engine into a node.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `floatvar-sim.yaml` or the path argument
//! 3. Build one engine per validator and register the risk variable
//! 4. Produce blocks: tick, finish calculations, deliver proposals, end
//! 5. Log the agreed values

mod committee;
mod config;
mod risk;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use chrono::{DateTime, TimeDelta};
use floatvar_core::Engine;
use floatvar_types::{EventType, NodeId};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::committee::{CommitteeTopology, LoggingBus, LoopbackBroadcaster, Mempool};
use crate::config::SimConfig;
use crate::risk::{NAME, NoisyRiskModel, RiskFactorConverter, RiskFactors};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "floatvar-sim.yaml";

/// Calculation tasks spawned during the current block.
type Tasks = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Values agreed by each validator.
type Agreements = Arc<Mutex<Vec<(NodeId, RiskFactors)>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // 2. Load configuration.
    let config = load_config()?;
    info!(
        validators = config.committee.voting_powers.len(),
        blocks = config.run.blocks,
        update_frequency_secs = config.statevar.update_frequency_secs,
        vote_required = %config.statevar.validators_vote_required,
        "Configuration loaded"
    );

    // 3. Build the committee.
    let mempool = Arc::new(Mempool::default());
    let tasks: Tasks = Arc::default();
    let agreements: Agreements = Arc::default();
    let mut engines = build_committee(&config, &mempool, &tasks, &agreements)?;

    // 4. Produce blocks.
    let start = DateTime::from_timestamp(config.run.start_unix_secs, 0)
        .context("run.start_unix_secs is out of range")?;
    let interval = TimeDelta::seconds(i64::from(config.run.block_interval_secs));
    let mut block_time = start;
    for height in 0..config.run.blocks {
        for engine in &mut engines {
            engine.on_tick(block_time);
            if height == 0 {
                engine.ready_for_time_trigger(&config.risk.asset, &config.risk.market);
                engine.new_event(
                    &config.risk.asset,
                    &config.risk.market,
                    EventType::MarketEnactment,
                );
            }
        }

        join_calculations(&tasks).await?;
        deliver_proposals(&mempool, &mut engines);
        for engine in &mut engines {
            engine.on_block_end();
        }

        block_time = block_time
            .checked_add_signed(interval)
            .context("block time overflow")?;
    }

    // 5. Report.
    let agreements = std::mem::take(&mut *agreements.lock().unwrap_or_else(PoisonError::into_inner));
    for (node, factors) in &agreements {
        info!(node = %node, short = %factors.short, long = %factors.long, "Agreed risk factors");
    }
    info!(agreements = agreements.len(), "Simulation finished");
    Ok(())
}

/// Read the configuration from the path argument, or from the default file
/// when present, or fall back to defaults.
fn load_config() -> anyhow::Result<SimConfig> {
    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        SimConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))
    } else if path == Path::new(DEFAULT_CONFIG_PATH) {
        info!("Config file not found, using defaults");
        Ok(SimConfig::default())
    } else {
        anyhow::bail!("config file {} does not exist", path.display())
    }
}

/// One engine per configured validator, each with the risk variable
/// registered.
fn build_committee(
    config: &SimConfig,
    mempool: &Arc<Mempool>,
    tasks: &Tasks,
    agreements: &Agreements,
) -> anyhow::Result<Vec<Engine>> {
    let powers: Arc<BTreeMap<NodeId, i64>> = Arc::new(
        config
            .committee
            .voting_powers
            .iter()
            .enumerate()
            .map(|(index, power)| (validator_id(index), *power))
            .collect(),
    );

    let mut engines = Vec::with_capacity(powers.len());
    for (seed, node) in (0_u64..).zip(powers.keys()) {
        let mut engine = Engine::new(
            &config.statevar,
            Arc::new(CommitteeTopology::new(node.clone(), Arc::clone(&powers))),
            Arc::new(LoopbackBroadcaster::new(node.clone(), Arc::clone(mempool))),
            Arc::new(LoggingBus::new(node.clone())),
        );

        let model = NoisyRiskModel::new(&config.risk, seed, Arc::clone(tasks));
        let sink = Arc::clone(agreements);
        let owner = node.clone();
        engine
            .register_state_variable(
                &config.risk.asset,
                &config.risk.market,
                NAME,
                RiskFactorConverter::new(config.risk.tolerance),
                move |handle| model.start(handle),
                &[EventType::MarketEnactment, EventType::TimeTrigger],
                move |factors: RiskFactors| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((owner.clone(), factors));
                },
            )
            .with_context(|| format!("registering {NAME} on {node}"))?;
        engines.push(engine);
    }
    Ok(engines)
}

fn validator_id(index: usize) -> NodeId {
    NodeId::new(format!("validator-{index}"))
}

/// Wait for every calculation started in this block.
async fn join_calculations(tasks: &Tasks) -> anyhow::Result<()> {
    let pending = std::mem::take(&mut *tasks.lock().unwrap_or_else(PoisonError::into_inner));
    for task in pending {
        task.await.context("calculation task failed")?;
    }
    Ok(())
}

/// Include every queued proposal in the block, delivering it to every
/// engine in the same order.
fn deliver_proposals(mempool: &Mempool, engines: &mut [Engine]) {
    for (sender, proposal) in mempool.drain() {
        for engine in engines.iter_mut() {
            if let Err(err) = engine.proposed_value_received(
                &proposal.state_var_id,
                &sender,
                &proposal.event_id,
                proposal.bundle.clone(),
            ) {
                warn!(%err, sender = %sender, "Proposal rejected");
            }
        }
    }
}
