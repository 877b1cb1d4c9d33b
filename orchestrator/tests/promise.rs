use std::{sync::Arc, thread, time::Duration};

use comms::{
    UnitRegistry,
    unit::{ChunkError, FailureCause, UnitType, WorkUnit, decode_as, encode_unit},
};
use orchestrator::{NodePool, Phase, PromiseError};
use serde::{Deserialize, Serialize};

/// Ticks up to `target`, one tick per chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ticker {
    ticks: u32,
    target: u32,
    nap_ms: u64,
    fail_at: Option<u32>,
}

impl Ticker {
    fn new(target: u32) -> Self {
        Self {
            ticks: 0,
            target,
            nap_ms: 0,
            fail_at: None,
        }
    }

    fn slow(target: u32) -> Self {
        Self {
            nap_ms: 2,
            ..Self::new(target)
        }
    }
}

impl WorkUnit for Ticker {
    fn run_chunk(&mut self) -> Result<(), ChunkError> {
        if self.fail_at == Some(self.ticks) {
            return Err(format!("tick {} went wrong", self.ticks).into());
        }

        if self.nap_ms > 0 {
            thread::sleep(Duration::from_millis(self.nap_ms));
        }

        self.ticks += 1;
        Ok(())
    }

    fn has_finished(&self) -> bool {
        self.ticks >= self.target
    }

    fn progress(&self) -> f32 {
        100. * self.ticks as f32 / self.target.max(1) as f32
    }
}

impl UnitType for Ticker {
    const TYPE_NAME: &'static str = "ticker";
}

fn pool(size: usize) -> NodePool {
    let mut registry = UnitRegistry::new();
    registry.register::<Ticker>();
    NodePool::local(size, Arc::new(registry))
}

async fn wait_until_idle(pool: &NodePool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.counts().busy != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("nodes never became free");
}

#[tokio::test]
async fn finished_job_yields_its_final_state() {
    let pool = pool(2);
    let node = pool.acquire().await.unwrap();

    let promise = node.dispatch_unit(&Ticker::new(5)).await.unwrap();
    let result = promise.final_result().await.unwrap();

    let ticker: Ticker = decode_as(&result).unwrap();
    assert_eq!(ticker.ticks, 5);
    assert!(promise.is_finished());
    assert_eq!(promise.progress().await.unwrap(), 100.);
    assert_eq!(promise.node(), node.info());
    assert_eq!(pool.dispatched(), 1);
}

#[tokio::test]
async fn stop_keeps_the_last_checkpoint_and_is_idempotent() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();

    let promise = node.dispatch_unit(&Ticker::slow(1_000_000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(promise.stop().await.unwrap(), Phase::Stopped);
    assert_eq!(promise.stop().await.unwrap(), Phase::Stopped);
    assert_eq!(promise.abort().await.unwrap(), Phase::Stopped);

    let checkpoint: Ticker = decode_as(&promise.final_result().await.unwrap()).unwrap();
    assert!(checkpoint.ticks < checkpoint.target);

    let interim: Ticker = decode_as(&promise.interim_result().await.unwrap()).unwrap();
    assert_eq!(interim, checkpoint);
}

#[tokio::test]
async fn aborted_job_gives_back_the_initial_state() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();
    let work = encode_unit(&Ticker::slow(1_000_000)).unwrap();

    let promise = node.dispatch(work.clone()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(promise.abort().await.unwrap(), Phase::Aborted);
    assert!(promise.is_aborted());
    assert_eq!(&*promise.final_result().await.unwrap(), &work[..]);
    assert_eq!(&*promise.interim_result().await.unwrap(), &work[..]);
    assert_eq!(promise.initial_data(), &work[..]);
}

#[tokio::test]
async fn running_job_reports_progress_and_interim_state() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();

    let promise = node.dispatch_unit(&Ticker::slow(1_000_000)).await.unwrap();
    assert!(promise.is_running());

    let progress = promise.progress().await.unwrap();
    assert!((0.0..100.0).contains(&progress));

    let interim: Ticker = decode_as(&promise.interim_result().await.unwrap()).unwrap();
    assert_eq!(interim.target, 1_000_000);
    assert!(promise.is_running());

    assert!(!promise.wait_timeout(Duration::from_millis(5)).await);
    promise.abort().await.unwrap();
    assert!(promise.wait_timeout(Duration::from_millis(5)).await);
}

#[tokio::test]
async fn remote_failures_are_rethrown() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();
    let unit = Ticker {
        fail_at: Some(2),
        ..Ticker::new(10)
    };

    let promise = node.dispatch_unit(&unit).await.unwrap();

    match promise.final_result().await {
        Err(PromiseError::Remote(e)) => {
            assert_eq!(e.cause, FailureCause::Chunk);
            assert!(e.message.contains("tick 2 went wrong"));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }

    assert!(promise.is_error());
    assert!(promise.interim_result().await.is_err());
}

#[tokio::test]
async fn node_stays_busy_until_its_job_is_over() {
    let pool = pool(2);
    let node = pool.acquire().await.unwrap();

    let promise = node.dispatch_unit(&Ticker::slow(1_000_000)).await.unwrap();
    drop(node);
    assert_eq!(pool.counts().busy, 1);

    promise.abort().await.unwrap();
    wait_until_idle(&pool).await;
    assert_eq!(pool.counts().free, 2);
}

#[tokio::test]
async fn release_waits_for_the_job_to_drain() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();

    let promise = node.dispatch_unit(&Ticker::slow(20)).await.unwrap();
    node.release().await;

    assert!(promise.is_finished());
    assert_eq!(pool.counts().free, 1);
}

#[tokio::test]
async fn dropped_promise_leaves_the_job_running() {
    let pool = pool(1);
    let node = pool.acquire().await.unwrap();

    drop(node.dispatch_unit(&Ticker::slow(10)).await.unwrap());
    node.release().await;
    assert_eq!(pool.counts().free, 1);

    // The node is usable again afterwards.
    let node = pool.acquire().await.unwrap();
    let promise = node.dispatch_unit(&Ticker::new(3)).await.unwrap();
    let ticker: Ticker = decode_as(&promise.final_result().await.unwrap()).unwrap();
    assert_eq!(ticker.ticks, 3);
    assert_eq!(pool.dispatched(), 2);
}

#[tokio::test]
async fn shutdown_waits_for_leases_and_stops_workers() {
    let pool = pool(2);
    let node = pool.acquire().await.unwrap();

    let closer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!closer.is_finished());

    drop(node);
    closer.await.unwrap();
    assert!(pool.acquire().await.is_err());
}
