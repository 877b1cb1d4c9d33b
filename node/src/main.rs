use std::{env, io, sync::Arc};

use log::{info, warn};
use tokio::{net::TcpListener, signal};
use worker::Worker;

const DEFAULT_HOST: &str = "127.0.0.1";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").map_err(io::Error::other)?,
    );

    let registry = Arc::new(replica_exchange::unit_registry());
    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    tokio::select! {
        ret = serve(listener, registry) => ret?,
        _ = signal::ctrl_c() => info!("received SIGTERM"),
    }

    Ok(())
}

/// Serves every dispatcher that connects, each on its own worker.
async fn serve(listener: TcpListener, registry: Arc<comms::UnitRegistry>) -> io::Result<()> {
    for session in 0usize.. {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(session = session; "dispatcher connected from {peer}");

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        let worker = Worker::new(session, Arc::clone(&registry));

        tokio::spawn(async move {
            match worker.serve(rx, tx).await {
                Ok(()) => info!(session = session; "dispatcher session over"),
                Err(e) => warn!(session = session; "dispatcher session failed: {e}"),
            }
        });
    }

    Ok(())
}
