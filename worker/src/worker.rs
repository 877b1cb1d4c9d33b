use std::{any::Any, borrow::Cow, io, sync::Arc};

use comms::{
    Inbox, OnoReceiver, OnoSender, UnitRegistry,
    msg::{Command, Msg, SessionTag},
    packet,
    unit::{AnyUnit, ErrorUnit, FailureCause, encode_unit},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::error::TryRecvError,
    task,
};

use crate::Result;

/// How a session handed control back to the serve loop.
enum SessionEnd {
    Idle,
    Shutdown,
    Disconnected,
}

/// Worker-side runtime of a compute node.
///
/// A worker serves one dispatcher connection. It sits idle until it's sent a work
/// unit, then alternates between running one chunk of it and draining the control
/// messages that arrived meanwhile, so stop, abort and progress requests are
/// observed with at most one chunk of latency.
pub struct Worker {
    rank: usize,
    registry: Arc<UnitRegistry>,
}

impl Worker {
    /// Creates a new `Worker`.
    ///
    /// # Arguments
    /// * `rank` - Identifier used for observability.
    /// * `registry` - The unit types this worker is able to run.
    ///
    /// # Returns
    /// A new `Worker` instance.
    pub fn new(rank: usize, registry: Arc<UnitRegistry>) -> Self {
        Self { rank, registry }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Serves work units sent through the given channel until the dispatcher sends
    /// `Shutdown` or goes away.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the dispatcher channel.
    /// * `tx` - Sending end of the dispatcher channel.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures of the link.
    pub async fn serve<R, W>(self, rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let rank = self.rank;
        let mut inbox = Inbox::spawn(rank, rx);
        // Communicator of the last accepted job, shutdowns from any other are ignored.
        let mut comm = None;
        info!(rank = rank; "worker ready");

        loop {
            let msg = match inbox.recv().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Some(Err(e)) => return Err(e.into()),
                None => break,
            };

            match msg.cmd {
                Command::Start(work) => {
                    comm = Some(msg.tag.comm);
                    match self.run_session(msg.tag, &work, &mut inbox, &mut tx).await? {
                        SessionEnd::Idle => {}
                        SessionEnd::Shutdown => return Ok(()),
                        SessionEnd::Disconnected => break,
                    }
                }
                Command::Shutdown if comm.is_none_or(|comm| comm == msg.tag.comm) => {
                    info!(rank = rank; "shutdown received");
                    return Ok(());
                }
                other => {
                    debug!(
                        rank = rank, job = msg.tag.job;
                        "discarding {} for an inactive session", other.name()
                    );
                }
            }
        }

        info!(rank = rank; "dispatcher disconnected");
        Ok(())
    }

    /// Runs a single work unit until it finishes or the dispatcher ends it.
    async fn run_session<W>(
        &self,
        tag: SessionTag,
        work: &[u8],
        inbox: &mut Inbox,
        tx: &mut OnoSender<W>,
    ) -> Result<SessionEnd>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let rank = self.rank;

        let mut unit = match self.registry.decode(work) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(rank = rank, job = tag.job; "failed to reconstruct work unit: {e}");
                let unit_type = packet::peek_type(work).ok();
                let error = ErrorUnit::new(FailureCause::Decode, unit_type, e.to_string());
                send_error(tx, tag, &error).await?;
                return Ok(SessionEnd::Idle);
            }
        };

        let unit_type = unit.type_name();
        debug!(rank = rank, job = tag.job; "running {unit_type}");

        loop {
            loop {
                let msg = match inbox.try_recv() {
                    Ok(Ok(msg)) => msg,
                    Ok(Err(e)) => {
                        warn!(rank = rank, job = tag.job; "link failed mid session: {e}");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ok(SessionEnd::Disconnected),
                };

                if msg.tag.comm != tag.comm {
                    debug!(
                        rank = rank, job = tag.job;
                        "discarding {} from communicator {:016x}", msg.cmd.name(), msg.tag.comm
                    );
                    continue;
                }

                if msg.cmd == Command::Shutdown {
                    warn!(rank = rank, job = tag.job; "shutdown received mid session, aborting");
                    send(tx, tag, Command::Aborted).await?;
                    return Ok(SessionEnd::Shutdown);
                }

                if msg.tag.job != tag.job {
                    debug!(
                        rank = rank, job = msg.tag.job;
                        "discarding stale {}", msg.cmd.name()
                    );
                    continue;
                }

                match msg.cmd {
                    Command::Stop => {
                        let cmd = match snapshot(unit.as_ref()) {
                            Ok(state) => Command::Stopped {
                                state: Cow::Owned(state),
                                progress: unit.progress(),
                            },
                            Err(error) => return self.fail(tx, tag, &error).await,
                        };

                        debug!(rank = rank, job = tag.job; "stopped at {}%", unit.progress());
                        send(tx, tag, cmd).await?;
                        return Ok(SessionEnd::Idle);
                    }
                    Command::Abort => {
                        debug!(rank = rank, job = tag.job; "aborted");
                        send(tx, tag, Command::Aborted).await?;
                        return Ok(SessionEnd::Idle);
                    }
                    Command::RequestProgress => {
                        send(tx, tag, Command::Progress(unit.progress())).await?;
                    }
                    Command::RequestInterim => {
                        let cmd = match snapshot(unit.as_ref()) {
                            Ok(state) => Command::Interim {
                                state: Cow::Owned(state),
                                progress: unit.progress(),
                            },
                            Err(error) => return self.fail(tx, tag, &error).await,
                        };

                        send(tx, tag, cmd).await?;
                    }
                    other => {
                        warn!(
                            rank = rank, job = tag.job;
                            "unexpected {} while running", other.name()
                        );
                    }
                }
            }

            if unit.has_finished() {
                let result = match snapshot(unit.as_ref()) {
                    Ok(result) => result,
                    Err(error) => return self.fail(tx, tag, &error).await,
                };

                debug!(rank = rank, job = tag.job; "finished {unit_type}");
                send(tx, tag, Command::Finished(Cow::Owned(result))).await?;
                return Ok(SessionEnd::Idle);
            }

            let chunk = task::spawn_blocking(move || {
                let mut unit = unit;
                let res = unit.run_chunk();
                (unit, res)
            });

            unit = match chunk.await {
                Ok((unit, Ok(()))) => unit,
                Ok((_, Err(e))) => {
                    let error = ErrorUnit::new(FailureCause::Chunk, Some(unit_type), e.to_string());
                    return self.fail(tx, tag, &error).await;
                }
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    let error = ErrorUnit::new(FailureCause::Panic, Some(unit_type), message);
                    return self.fail(tx, tag, &error).await;
                }
                Err(e) => {
                    let error = ErrorUnit::new(FailureCause::Chunk, Some(unit_type), e.to_string());
                    return self.fail(tx, tag, &error).await;
                }
            };
        }
    }

    async fn fail<W>(
        &self,
        tx: &mut OnoSender<W>,
        tag: SessionTag,
        error: &ErrorUnit,
    ) -> Result<SessionEnd>
    where
        W: AsyncWrite + Unpin + Send,
    {
        warn!(rank = self.rank, job = tag.job; "work unit failed: {}", error.error());
        send_error(tx, tag, error).await?;
        Ok(SessionEnd::Idle)
    }
}

/// Encodes the current state of `unit`, or the error unit reporting why it couldn't.
fn snapshot(unit: &dyn AnyUnit) -> std::result::Result<Vec<u8>, ErrorUnit> {
    encode_unit(unit).map_err(|e| {
        ErrorUnit::new(FailureCause::Encode, Some(unit.type_name()), e.to_string())
    })
}

async fn send<W>(tx: &mut OnoSender<W>, tag: SessionTag, cmd: Command<'_>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    tx.send(&Msg::new(tag, cmd)).await?;
    Ok(())
}

async fn send_error<W>(tx: &mut OnoSender<W>, tag: SessionTag, error: &ErrorUnit) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let bytes = encode_unit(error)?;
    send(tx, tag, Command::Finished(Cow::Owned(bytes))).await
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "work unit panicked".to_string(),
        },
    }
}
