//! TCP accept loop.
//!
//! Every accepted connection runs the full server session on its own task.
//! A failing connection is logged and never stops the loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use ucp_services::session;
use ucp_services::{AccountServices, HelperSpawner, ProxySettings};

pub struct ConnectionListener<A, H> {
    listener: TcpListener,
    services: Arc<A>,
    spawner: Arc<H>,
    settings: Arc<ProxySettings>,
    shutdown: broadcast::Receiver<()>,
}

impl<A, H> ConnectionListener<A, H>
where
    A: AccountServices + 'static,
    H: HelperSpawner + 'static,
{
    pub fn new(
        listener: TcpListener,
        services: Arc<A>,
        spawner: Arc<H>,
        settings: ProxySettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            services,
            spawner,
            settings: Arc::new(settings),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("listener shutting down");
                    return;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            // Out of descriptors and similar; don't spin.
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };
                    tracing::debug!(peer = %peer, "connection accepted");
                    tokio::spawn(handle(
                        stream,
                        peer,
                        self.services.clone(),
                        self.spawner.clone(),
                        self.settings.clone(),
                    ));
                }
            }
        }
    }
}

async fn handle<A, H>(
    stream: TcpStream,
    peer: SocketAddr,
    services: Arc<A>,
    spawner: Arc<H>,
    settings: Arc<ProxySettings>,
) where
    A: AccountServices,
    H: HelperSpawner,
{
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
    }

    match session::serve(stream, &*services, &*spawner, &settings).await {
        Ok(served) => tracing::info!(
            peer = %peer,
            user = %served.user,
            direction = ?served.info.direction,
            file = %served.info.file_name,
            bytes = served.stats.bytes,
            chunks = served.stats.chunks,
            "transfer complete"
        ),
        Err(e) => tracing::warn!(peer = %peer, error = %e, "session failed"),
    }
}
