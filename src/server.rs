use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::command::Dispatcher;
use crate::config::Config;
use crate::connection::ClientState;
use crate::resp::{RespParser, RespValue};
use crate::store::{CacheAsideStore, DirectStore, KvStore, LocalCache};
use crate::ttl::TtlNormalizer;

/// The RESP front end: accepts clients and feeds their commands to the
/// dispatcher.
pub struct Proxy {
    config: Config,
    dispatcher: Dispatcher,
    cache: Option<Arc<LocalCache>>,
}

impl Proxy {
    /// Wire the store variant picked by `config.use_cache` onto `backend`.
    pub fn new(config: Config, backend: Arc<dyn Backend>, ttl: TtlNormalizer) -> Self {
        let mut cache = None;
        let store: Arc<dyn KvStore> = if config.use_cache {
            let local = Arc::new(LocalCache::new(config.cache_lifetime()));
            info!("Local cache enabled, record lifetime {}s", config.cache_ttl);
            cache = Some(local.clone());
            Arc::new(CacheAsideStore::new(backend, local))
        } else {
            Arc::new(DirectStore::new(backend))
        };

        Proxy {
            config,
            dispatcher: Dispatcher::new(store, ttl),
            cache,
        }
    }

    pub fn cache(&self) -> Option<&Arc<LocalCache>> {
        self.cache.as_ref()
    }

    /// Bind the configured listen address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve clients on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        info!("docproxy listening on {}", listener.local_addr()?);

        if let Some(cache) = &self.cache {
            if !cache.lifetime().is_zero() {
                let cache = cache.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    cache_sweep_loop(cache, token).await;
                });
            }
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = result?;
                    info!("Client connected: {peer}");

                    let dispatcher = self.dispatcher.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let result = handle_connection(stream, peer, dispatcher, shutdown).await;
                        if let Err(e) = result {
                            debug!("Connection error from {peer}: {e}");
                        }
                        info!("Client disconnected: {peer}");
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down...");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    let mut client = ClientState::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut out = BytesMut::with_capacity(4096);

    loop {
        // Answer every complete request in the buffer, then flush once.
        loop {
            match RespParser::parse(&mut buf) {
                Ok(Some(request)) => {
                    let reply = dispatcher.dispatch(request, &mut client).await;
                    reply.write_to(&mut out);
                    if client.should_close {
                        stream.write_all(&out).await?;
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    RespValue::error(format!("ERR Protocol error: {e}")).write_to(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }
        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }

        tokio::select! {
            result = stream.read_buf(&mut buf) => {
                if result? == 0 {
                    debug!(
                        "Client {} ({peer}) closed after {} commands",
                        client.id, client.commands_processed
                    );
                    return Ok(());
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

/// Drops expired cache records every cache lifetime, at most once a second.
async fn cache_sweep_loop(cache: Arc<LocalCache>, shutdown: CancellationToken) {
    let every = cache.lifetime().max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let swept = cache.sweep().await;
                if swept > 0 {
                    debug!("Swept {swept} expired cache records");
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
