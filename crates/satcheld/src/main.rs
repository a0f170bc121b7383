//! satcheld — the Satchel mail-exchange daemon.
//!
//! One UDP socket, one receive loop: every datagram is decoded, dispatched,
//! and answered (when the command has a reply) before the next is read.
//! The protocol is best effort by design; nothing here retransmits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use satchel_core::config::SatchelConfig;
use satchel_services::{Dispatcher, FsMailbox, MailboxStore, Reassembler, SessionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SatchelConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SatchelConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SatchelConfig::default()
    });

    // Shared state
    let store: Arc<dyn MailboxStore> = Arc::new(
        FsMailbox::new(config.storage.root.clone()).context("failed to open mailbox root")?,
    );
    tracing::info!(root = %config.storage.root.display(), "mailbox store ready");

    let idle_timeout = Duration::from_secs(config.reassembly.idle_timeout_secs);
    let reassembler = Arc::new(Reassembler::new(
        store.clone(),
        idle_timeout,
        config.reassembly.max_chunks,
    ));
    let dispatcher = Dispatcher::new(store, reassembler.clone(), SessionRegistry::new());

    let bind = format!("{}:{}", config.network.bind, config.network.port);
    let socket = UdpSocket::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %socket.local_addr()?, "satcheld listening");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // Periodic reassembly sweep. Idle transfers are also evicted on ingest,
    // so this only matters when traffic goes quiet entirely.
    let sweep_task = {
        let reassembler = reassembler.clone();
        let mut shutdown = shutdown_tx.subscribe();
        let period = (idle_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {
                        reassembler.evict_idle();
                        let pending = reassembler.in_progress();
                        if pending > 0 {
                            tracing::info!(pending, "transfers in flight");
                        }
                    }
                }
            }
        })
    };

    // ── Receive loop ─────────────────────────────────────────────────────────
    // One datagram is processed to completion before the next is read.

    let mut buf = vec![0u8; config.network.max_datagram];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                break;
            }

            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };

                if let Some(reply) = dispatcher.handle(&buf[..len], peer) {
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        tracing::warn!(peer = %peer, error = %e, "failed to send reply");
                    }
                }
            }
        }
    }

    sweep_task.abort();
    Ok(())
}
