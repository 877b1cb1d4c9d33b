use std::{borrow::Cow, sync::Arc, thread, time::Duration};

use comms::{
    OnoReceiver, OnoSender, UnitRegistry,
    msg::{Command, Msg, SessionTag},
    unit::{ChunkError, FailureCause, UnitType, WorkUnit, decode_as, encode_unit},
    packet::UnitError,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};

use worker::Worker;

const TAG: SessionTag = SessionTag { comm: 0xabc, job: 1 };

/// Counts up to `target`, one step per chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: u64,
    target: u64,
    nap_ms: u64,
    fail_at: Option<u64>,
    panic_at: Option<u64>,
}

impl Counter {
    fn new(target: u64) -> Self {
        Self {
            count: 0,
            target,
            nap_ms: 0,
            fail_at: None,
            panic_at: None,
        }
    }

    fn slow(target: u64) -> Self {
        Self {
            nap_ms: 2,
            ..Self::new(target)
        }
    }
}

impl WorkUnit for Counter {
    fn run_chunk(&mut self) -> Result<(), ChunkError> {
        if self.fail_at == Some(self.count) {
            return Err(format!("refusing to count past {}", self.count).into());
        }

        if self.panic_at == Some(self.count) {
            panic!("counter blew up at {}", self.count);
        }

        if self.nap_ms > 0 {
            thread::sleep(Duration::from_millis(self.nap_ms));
        }

        self.count = (self.count + 1).min(self.target);
        Ok(())
    }

    fn has_finished(&self) -> bool {
        self.count >= self.target
    }

    fn progress(&self) -> f32 {
        if self.target == 0 {
            return 100.;
        }

        100. * self.count as f32 / self.target as f32
    }
}

impl UnitType for Counter {
    const TYPE_NAME: &'static str = "counter";
}

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

fn spawn_worker() -> (Rx, Tx, JoinHandle<worker::Result<()>>) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let (wk_rx, wk_tx) = comms::channel(rx1, tx1);
    let (rx, tx) = comms::channel(rx2, tx2);

    let mut registry = UnitRegistry::new();
    registry.register::<Counter>();

    let worker = Worker::new(0, Arc::new(registry));
    let handle = tokio::spawn(worker.serve(wk_rx, wk_tx));
    (rx, tx, handle)
}

async fn start(tx: &mut Tx, tag: SessionTag, unit: &Counter) -> std::io::Result<()> {
    let work = encode_unit(unit).unwrap();
    tx.send(&Msg::new(tag, Command::Start(Cow::Owned(work))))
        .await
}

async fn recv(rx: &mut Rx) -> std::io::Result<Msg<'static>> {
    let mut buf = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await?;
    Ok(msg.into_owned())
}

#[tokio::test]
async fn worker_finishes_unit_and_returns_final_state() -> std::io::Result<()> {
    let (mut rx, mut tx, handle) = spawn_worker();

    start(&mut tx, TAG, &Counter::new(5)).await?;

    let msg = recv(&mut rx).await?;
    assert_eq!(msg.tag, TAG);
    let Command::Finished(result) = msg.cmd else {
        panic!("unexpected message");
    };

    let counter: Counter = decode_as(&result).unwrap();
    assert_eq!(counter.count, 5);
    assert!(counter.has_finished());

    tx.send(&Msg::new(TAG, Command::Shutdown)).await?;
    handle.await.unwrap().unwrap();
    Ok(())
}

#[tokio::test]
async fn worker_stops_with_latest_checkpoint() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();

    start(&mut tx, TAG, &Counter::slow(1_000_000)).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(&Msg::new(TAG, Command::Stop)).await?;

    let msg = recv(&mut rx).await?;
    let Command::Stopped { state, progress } = msg.cmd else {
        panic!("unexpected message");
    };

    let counter: Counter = decode_as(&state).unwrap();
    assert!(!counter.has_finished());
    assert_eq!(counter.progress(), progress);
    Ok(())
}

#[tokio::test]
async fn worker_aborts_on_request() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();

    start(&mut tx, TAG, &Counter::slow(1_000_000)).await?;
    tx.send(&Msg::new(TAG, Command::Abort)).await?;

    let msg = recv(&mut rx).await?;
    assert_eq!(msg, Msg::new(TAG, Command::Aborted));
    Ok(())
}

#[tokio::test]
async fn worker_answers_progress_and_interim_requests_in_place() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();

    start(&mut tx, TAG, &Counter::slow(1_000_000)).await?;
    tx.send(&Msg::new(TAG, Command::RequestProgress)).await?;

    let msg = recv(&mut rx).await?;
    let Command::Progress(progress) = msg.cmd else {
        panic!("unexpected message");
    };
    assert!((0.0..100.0).contains(&progress));

    tx.send(&Msg::new(TAG, Command::RequestInterim)).await?;
    let msg = recv(&mut rx).await?;
    let Command::Interim { state, .. } = msg.cmd else {
        panic!("unexpected message");
    };
    let counter: Counter = decode_as(&state).unwrap();
    assert_eq!(counter.target, 1_000_000);

    // Still running: the next reply must come from this session.
    tx.send(&Msg::new(TAG, Command::Abort)).await?;
    assert_eq!(recv(&mut rx).await?.cmd, Command::Aborted);
    Ok(())
}

#[tokio::test]
async fn worker_discards_messages_from_other_sessions() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();
    let stale = SessionTag { job: 0, ..TAG };

    // Idle: nothing is running, so this must be dropped silently.
    tx.send(&Msg::new(stale, Command::Abort)).await?;

    start(&mut tx, TAG, &Counter::slow(1_000_000)).await?;
    tx.send(&Msg::new(stale, Command::Stop)).await?;
    tx.send(&Msg::new(TAG, Command::RequestProgress)).await?;

    let msg = recv(&mut rx).await?;
    assert_eq!(msg.tag, TAG);
    assert!(matches!(msg.cmd, Command::Progress(_)));

    tx.send(&Msg::new(TAG, Command::Abort)).await?;
    assert_eq!(recv(&mut rx).await?.cmd, Command::Aborted);
    Ok(())
}

#[tokio::test]
async fn worker_ignores_shutdown_from_another_communicator() -> std::io::Result<()> {
    let (mut rx, mut tx, handle) = spawn_worker();
    let foreign = SessionTag { comm: 0xdead, job: 0 };

    start(&mut tx, TAG, &Counter::slow(1_000_000)).await?;
    tx.send(&Msg::new(foreign, Command::Shutdown)).await?;
    tx.send(&Msg::new(SessionTag { comm: 0xdead, ..TAG }, Command::Abort))
        .await?;
    tx.send(&Msg::new(TAG, Command::RequestProgress)).await?;

    let msg = recv(&mut rx).await?;
    assert_eq!(msg.tag, TAG);
    assert!(matches!(msg.cmd, Command::Progress(_)));

    tx.send(&Msg::new(TAG, Command::Abort)).await?;
    assert_eq!(recv(&mut rx).await?.cmd, Command::Aborted);

    // Idle again: still bound to the communicator of the last job.
    tx.send(&Msg::new(foreign, Command::Shutdown)).await?;
    let next = SessionTag { job: 2, ..TAG };
    start(&mut tx, next, &Counter::new(2)).await?;
    let msg = recv(&mut rx).await?;
    assert_eq!(msg.tag, next);
    assert!(matches!(msg.cmd, Command::Finished(_)));
    assert!(!handle.is_finished());

    tx.send(&Msg::new(SessionTag { job: 0, ..TAG }, Command::Shutdown))
        .await?;
    handle.await.unwrap().unwrap();
    Ok(())
}

#[tokio::test]
async fn worker_packages_chunk_errors_as_error_units() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();
    let unit = Counter {
        fail_at: Some(3),
        ..Counter::new(10)
    };

    start(&mut tx, TAG, &unit).await?;

    let msg = recv(&mut rx).await?;
    let Command::Finished(result) = msg.cmd else {
        panic!("unexpected message");
    };

    match decode_as::<Counter>(&result) {
        Err(UnitError::Remote(e)) => {
            assert_eq!(e.cause, FailureCause::Chunk);
            assert_eq!(e.unit_type.as_deref(), Some("counter"));
            assert!(e.message.contains("refusing to count past 3"));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn worker_survives_a_panicking_unit() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();
    let unit = Counter {
        panic_at: Some(1),
        ..Counter::new(10)
    };

    start(&mut tx, TAG, &unit).await?;

    let Command::Finished(result) = recv(&mut rx).await?.cmd else {
        panic!("expected a finished message");
    };
    let Err(UnitError::Remote(e)) = decode_as::<Counter>(&result) else {
        panic!("expected a remote error");
    };
    assert_eq!(e.cause, FailureCause::Panic);
    assert!(e.message.contains("counter blew up at 1"));

    // The worker is back to idle and takes the next job.
    let next = SessionTag { job: 2, ..TAG };
    start(&mut tx, next, &Counter::new(2)).await?;
    let msg = recv(&mut rx).await?;
    assert_eq!(msg.tag, next);
    assert!(matches!(msg.cmd, Command::Finished(_)));
    Ok(())
}

#[tokio::test]
async fn worker_reports_units_it_cannot_reconstruct() -> std::io::Result<()> {
    let (mut rx, mut tx, _handle) = spawn_worker();

    let work = comms::packet::encode("unheard_of", b"{}").unwrap();
    tx.send(&Msg::new(TAG, Command::Start(Cow::Owned(work))))
        .await?;

    let Command::Finished(result) = recv(&mut rx).await?.cmd else {
        panic!("expected a finished message");
    };
    let Err(UnitError::Remote(e)) = decode_as::<Counter>(&result) else {
        panic!("expected a remote error");
    };
    assert_eq!(e.cause, FailureCause::Decode);
    assert_eq!(e.unit_type.as_deref(), Some("unheard_of"));
    Ok(())
}

#[tokio::test]
async fn worker_exits_when_dispatcher_goes_away() {
    let (rx, tx, handle) = spawn_worker();

    drop(tx);
    drop(rx);

    handle.await.unwrap().unwrap();
}
