use std::{borrow::Cow, io, sync::Arc};

use comms::{
    msg::{Command, Msg, SessionTag},
    unit::{ErrorUnit, decode_as},
};
use log::{debug, warn};
use tokio::sync::{OwnedMutexGuard, mpsc::UnboundedReceiver, watch};

use crate::{
    Node, PromiseError,
    link::Link,
    promise::{Control, Phase, Snapshot},
};

/// Drives one job on `node` until it reaches a terminal phase.
///
/// Holding both the node and its link for the whole job is what keeps the node
/// busy until the job drained, even if every other handle of it was dropped.
///
/// # Arguments
/// * `node` - The node running the job.
/// * `link` - Exclusive access to the node connection.
/// * `tag` - The session tag of the job.
/// * `work` - The packet to run.
/// * `state` - Where the job state is published.
/// * `control` - Requests coming from the promise.
pub(crate) async fn drive(
    node: Node,
    mut link: OwnedMutexGuard<Link>,
    tag: SessionTag,
    work: Arc<[u8]>,
    state: watch::Sender<Snapshot>,
    mut control: UnboundedReceiver<Control>,
) {
    let rank = node.info().rank;

    if let Err(e) = run(&mut link, rank, tag, &work, &state, &mut control).await {
        warn!(rank = rank, job = tag.job; "lost the node mid job: {e}");
        state.send_modify(|s| s.fail(PromiseError::Transport(e.to_string())));
    }

    drop(node);
    drop(link);
}

async fn run(
    link: &mut Link,
    rank: usize,
    tag: SessionTag,
    work: &[u8],
    state: &watch::Sender<Snapshot>,
    control: &mut UnboundedReceiver<Control>,
) -> io::Result<()> {
    let Link { tx, inbox } = link;

    tx.send(&Msg::new(tag, Command::Start(Cow::Borrowed(work))))
        .await?;
    debug!(rank = rank, job = tag.job; "job started");

    let mut control_open = true;

    loop {
        tokio::select! {
            request = control.recv(), if control_open => match request {
                Some(request) => {
                    tx.send(&Msg::new(tag, request.command())).await?;
                }
                None => {
                    debug!(rank = rank, job = tag.job; "promise dropped, draining job");
                    control_open = false;
                }
            },
            msg = inbox.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "node link closed",
                        ));
                    }
                };

                if msg.tag != tag {
                    debug!(
                        rank = rank, job = msg.tag.job;
                        "discarding stale {}", msg.cmd.name()
                    );
                    continue;
                }

                if apply(state, msg.cmd, rank, tag) {
                    return Ok(());
                }
            }
        }
    }
}

/// Publishes a reply of the node.
///
/// # Returns
/// Whether the reply ended the job.
fn apply(
    state: &watch::Sender<Snapshot>,
    cmd: Command<'static>,
    rank: usize,
    tag: SessionTag,
) -> bool {
    match cmd {
        Command::Progress(progress) => {
            state.send_modify(|s| s.update_progress(progress));
            false
        }
        Command::Interim { state: bytes, progress } => {
            let bytes: Arc<[u8]> = Arc::from(bytes.into_owned());
            state.send_modify(|s| s.update_interim(bytes, progress));
            false
        }
        Command::Stopped { state: bytes, progress } => {
            let bytes: Arc<[u8]> = Arc::from(bytes.into_owned());
            debug!(rank = rank, job = tag.job; "job stopped at {progress}%");
            state.send_modify(|s| {
                s.update_interim(bytes, progress);
                s.phase = Phase::Stopped;
            });
            true
        }
        Command::Aborted => {
            debug!(rank = rank, job = tag.job; "job aborted");
            state.send_modify(|s| s.phase = Phase::Aborted);
            true
        }
        Command::Finished(bytes) if ErrorUnit::is_error_packet(&bytes) => {
            let failure = match decode_as::<ErrorUnit>(&bytes) {
                Ok(unit) => PromiseError::Remote(unit.into_error()),
                Err(e) => PromiseError::Transport(format!("unreadable error unit: {e}")),
            };

            debug!(rank = rank, job = tag.job; "job failed: {failure}");
            state.send_modify(|s| s.fail(failure));
            true
        }
        Command::Finished(bytes) => {
            let bytes: Arc<[u8]> = Arc::from(bytes.into_owned());
            debug!(rank = rank, job = tag.job; "job finished");
            state.send_modify(|s| {
                s.update_progress(100.);
                s.result = Some(bytes);
                s.phase = Phase::Finished;
            });
            true
        }
        other => {
            warn!(rank = rank, job = tag.job; "unexpected {} from node", other.name());
            false
        }
    }
}
