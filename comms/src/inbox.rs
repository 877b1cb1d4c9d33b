use std::io;

use log::{debug, warn};
use tokio::{
    io::AsyncRead,
    sync::mpsc::{self, UnboundedReceiver, error::TryRecvError},
    task::JoinHandle,
};

use crate::{OnoReceiver, msg::Msg};

/// A queue of decoded messages filled by a background reading task.
///
/// Reading a frame is not cancellation safe, so every endpoint that needs to wait
/// on its peer and something else at the same time, or to probe for a message
/// without blocking, reads through an `Inbox` instead of its `OnoReceiver`.
pub struct Inbox {
    source: UnboundedReceiver<io::Result<Msg<'static>>>,
    handle: JoinHandle<()>,
}

impl Inbox {
    /// Spawns the reading task for `rx`.
    ///
    /// Frames that fail to decode are logged and dropped. The first stream error is
    /// forwarded and ends the reading task.
    ///
    /// # Arguments
    /// * `id` - An identifier used for observability.
    /// * `rx` - The receiving end of the communication.
    pub fn spawn<R>(id: usize, mut rx: OnoReceiver<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (sink, source) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut buf = Vec::new();

            loop {
                match rx.recv_into::<Msg>(&mut buf).await {
                    Ok(msg) => {
                        if sink.send(Ok(msg.into_owned())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!(inbox = id; "discarding malformed frame: {e}");
                    }
                    Err(e) => {
                        debug!(inbox = id; "stream closed: {e}");
                        let _ = sink.send(Err(e));
                        break;
                    }
                }
            }
        });

        Self { source, handle }
    }

    /// Waits for the next message.
    ///
    /// # Returns
    /// `None` once the stream is over and every queued message was consumed.
    pub async fn recv(&mut self) -> Option<io::Result<Msg<'static>>> {
        self.source.recv().await
    }

    /// Takes the next queued message without waiting for one.
    pub fn try_recv(&mut self) -> Result<io::Result<Msg<'static>>, TryRecvError> {
        self.source.try_recv()
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
