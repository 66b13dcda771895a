//! perimeshd: peripheral-sharing daemon.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use perimesh_core::config::PerimeshConfig;
use perimesh_core::wire::MULTICAST_ADDR;
use perimesh_services::{LocalBench, Node, SharingPolicy, Transport};

mod link;
mod peripherals;

// Single control thread: handlers and call continuations never run in parallel.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PerimeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = PerimeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PerimeshConfig::default()
    });
    if let Some(interface) = std::env::args().nth(1) {
        config.network.interface = interface;
    }

    let identity = config.identity.resolve();
    tracing::info!(
        node = %identity.id,
        label = %identity.label,
        interface = %config.network.interface,
        "perimeshd starting"
    );

    // Link
    let interface_index = link::if_index(&config.network.interface)?;
    let group: Ipv6Addr = MULTICAST_ADDR.parse().context("bad multicast group")?;
    let transport: Arc<dyn Transport> = Arc::new(link::UdpTransport::bind(
        identity.id,
        group,
        config.network.port,
        interface_index,
    )?);

    // Local peripherals
    let bench = LocalBench::new();
    let attached = if config.peripherals.is_empty() {
        peripherals::defaults(identity.id)
    } else {
        peripherals::build_all(&config.peripherals, identity.id)
    };
    for p in attached {
        bench.attach(p);
    }
    let policy = SharingPolicy::excluding(config.sharing.excluded_types.iter().cloned());

    let node = Node::new(
        identity,
        Arc::new(bench),
        policy,
        transport,
        config.client.clone(),
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let announce_interval = Duration::from_secs(config.sharing.announce_interval_secs);
    let mut tasks = node.start(announce_interval, &shutdown_tx);

    {
        let node = node.clone();
        tokio::spawn(async move {
            match node.client.discover().await {
                Some(first) => tracing::info!(first = %first, "initial discovery answered"),
                None => tracing::info!("no peers answered initial discovery"),
            }
        });
    }

    let api_port = config.network.api_port;
    let api_task = {
        let state = perimesh_api::ApiState::new(node.clone(), shutdown_tx.clone());
        tokio::spawn(async move {
            if let Err(e) = perimesh_api::serve(state, api_port).await {
                tracing::error!(error = %e, "control API failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    let events_task = tasks.remove(0);

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = events_task        => tracing::error!("event loop exited: {:?}", r),
        r = api_task           => tracing::error!("control API exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
