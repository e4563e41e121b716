//! TCP server and client glue.
//!
//! Each accepted connection gets a reader that decodes frames with
//! [`PacketCodec`] and hands every packet to the router on the blocking pool
//! (backends may block), and a writer task draining the connection's queue in
//! the [`ConnectionRegistry`]. Packets from one connection are routed in
//! arrival order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, FramedRead};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::PacketCodec;
use crate::error::Result;
use crate::protocol::authority::ConnectionId;
use crate::protocol::dispatcher::Router;
use crate::transport::ConnectionRegistry;

/// Bind the configured address and serve until CTRL+C.
#[instrument(skip_all, fields(address = %config.address))]
pub async fn start_server(
    config: ServerConfig,
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let listener = TcpListener::bind(&config.address).await?;
    serve(listener, config, router, registry, shutdown_rx).await
}

/// Serve connections from `listener` until `shutdown_rx` fires.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!(address = %listener.local_addr()?, "Telescope server listening");

    let active = Arc::new(AtomicUsize::new(0));
    let mut next_connection: ConnectionId = 1;
    let pump = tokio::spawn(acquisition_pump(
        Arc::clone(&router),
        config.acquisition_poll_interval,
    ));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                pump.abort();

                let timeout = tokio::time::sleep(config.shutdown_timeout);
                tokio::pin!(timeout);

                loop {
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {
                            let connections = active.load(Ordering::Relaxed);
                            if connections == 0 {
                                info!("All connections closed, shutting down");
                                break;
                            }
                            debug!(connections, "Waiting for connections to close");
                        }
                    }
                }

                router.metrics().log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        if active.load(Ordering::Relaxed) >= config.max_connections {
                            warn!(peer = %peer, limit = config.max_connections, "Connection limit reached, refusing");
                            router.metrics().connection_error();
                            continue;
                        }

                        let connection = next_connection;
                        next_connection += 1;

                        let active = Arc::clone(&active);
                        let router = Arc::clone(&router);
                        let registry = Arc::clone(&registry);
                        active.fetch_add(1, Ordering::Relaxed);

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, connection, &router, &registry).await {
                                error!(connection, error = %e, "Connection handler failed");
                            }
                            active.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        router.metrics().connection_error();
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

#[instrument(skip(stream, peer, router, registry), fields(peer = %peer))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    router: &Arc<Router>,
    registry: &Arc<ConnectionRegistry>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    let mut queue = registry.register(connection)?;
    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!(connection, error = %e, "Writer stopped");
                break;
            }
        }
    });

    if let Err(e) = router.open_session(connection, peer.to_string()) {
        registry.unregister(connection)?;
        return Err(e);
    }

    let mut frames = FramedRead::new(read_half, PacketCodec);
    while let Some(item) = frames.next().await {
        match item {
            Ok(packet) => {
                let router = Arc::clone(router);
                if let Err(e) =
                    tokio::task::spawn_blocking(move || router.route(connection, packet)).await
                {
                    error!(connection, error = %e, "Router task failed");
                    break;
                }
            }
            Err(e) => {
                router.metrics().framing_error();
                warn!(connection, error = %e, "Unrecoverable framing error, closing");
                break;
            }
        }
    }

    registry.unregister(connection)?;
    router.close_session(connection)?;
    let _ = writer.await;
    info!(connection, "Connection closed");
    Ok(())
}

/// Publish spectra while acquisition is active.
async fn acquisition_pump(router: Arc<Router>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !router.acquisition_active() {
            continue;
        }

        let router = Arc::clone(&router);
        match tokio::task::spawn_blocking(move || router.poll_acquisition()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "Spectrum poll failed"),
            Err(e) => {
                error!(error = %e, "Acquisition pump task failed");
                return;
            }
        }
    }
}

/// Connect to a telescope server.
#[instrument]
pub async fn connect(address: &str) -> Result<Framed<TcpStream, PacketCodec>> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, PacketCodec))
}
