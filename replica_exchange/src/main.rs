use std::{env, io, sync::Arc};

use log::{info, warn};
use orchestrator::NodePool;
use replica_exchange::{ReplicaExchange, ReplicaSet, RunConfig};
use tokio::signal;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .ok_or_else(|| io::Error::other("usage: replica_exchange <run.json>"))?;
    let config = RunConfig::load(&path)?;
    info!(path = path.as_str(); "loaded run configuration");

    let pool = if config.node_addrs.is_empty() {
        NodePool::local(config.local_nodes, Arc::new(replica_exchange::unit_registry()))
    } else {
        NodePool::connect(config.node_addrs.as_slice())
            .await
            .map_err(io::Error::other)?
    };

    let mut set = ReplicaSet::from_ladder(config.well.build(), config.ensembles.clone())
        .map_err(io::Error::other)?;
    let mut exchange = ReplicaExchange::new(config.exchange.clone());

    tokio::select! {
        ret = exchange.move_replicas(&pool, &mut set, config.moves, true) => {
            ret.map_err(io::Error::other)?;
        }
        _ = signal::ctrl_c() => {
            warn!("interrupted, leaving the current move unfinished");
            return Ok(());
        }
    }

    println!(
        "accepted {} of {} exchanges ({:.3})",
        exchange.n_accepted(),
        exchange.n_accepted() + exchange.n_rejected(),
        exchange.acceptance_ratio()
    );

    for (i, ensemble) in set.ensembles().enumerate() {
        let pair = exchange.pair_stats(i);
        println!(
            "ensemble {i} (T = {} K, lambda = {:?}): state {:?}, pair acceptance {:.3}",
            ensemble.temperature,
            ensemble.lambda_value,
            set.state_index(i),
            pair.ratio()
        );
    }

    pool.shutdown().await;
    info!("wrapping up");
    Ok(())
}
