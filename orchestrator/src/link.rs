use std::io;

use comms::{
    Inbox, OnoSender,
    msg::{Command, Msg, SessionTag},
};
use tokio::io::{AsyncRead, AsyncWrite};

type NetTx = OnoSender<Box<dyn AsyncWrite + Unpin + Send>>;

/// The dispatcher end of the connection to a single node.
///
/// Whoever holds the link owns the node's session: the pool hands it to one
/// dispatching task at a time, which is what keeps two jobs from sharing a node.
pub(crate) struct Link {
    pub tx: NetTx,
    pub inbox: Inbox,
}

impl Link {
    /// Wraps the two halves of a node connection.
    ///
    /// # Arguments
    /// * `rank` - The rank of the node on the other end, used for observability.
    /// * `rx` - The readable half of the connection.
    /// * `tx` - The writable half of the connection.
    pub fn open<R, W>(rank: usize, rx: R, tx: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let tx: Box<dyn AsyncWrite + Unpin + Send> = Box::new(tx);
        let (rx, tx) = comms::channel(rx, tx);

        Self {
            tx,
            inbox: Inbox::spawn(rank, rx),
        }
    }

    /// Tells the worker on the other end to leave its serve loop.
    pub async fn shutdown(&mut self, comm: u64) -> io::Result<()> {
        let msg = Msg::new(SessionTag::new(comm, 0), Command::Shutdown);
        self.tx.send(&msg).await?;
        self.tx.shutdown().await
    }
}
