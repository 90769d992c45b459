//! Three electors contend for one lock on a shared in-memory store. The
//! winner is stopped after a few seconds and another elector takes over once
//! the abandoned lease expires.
//!
//! Run with `RUST_LOG=praborrow_leader=debug` for the full election trace.

use praborrow_leader::{Elector, ElectorBuilder, LeaderEvent, MemoryStore};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = MemoryStore::new();
    let mut electors: Vec<Elector<MemoryStore>> = Vec::new();

    for name in ["alpha", "beta", "gamma"] {
        let elector = ElectorBuilder::new()
            .store(store.clone())
            .lock_name("demo")
            .lease_duration(Duration::from_secs(2))
            .retry_interval(Duration::from_millis(250))
            .build()?;

        let mut events = elector.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    LeaderEvent::Elected => tracing::info!(elector = name, "elected"),
                    LeaderEvent::Revoked => tracing::info!(elector = name, "revoked"),
                    LeaderEvent::Error(e) => tracing::warn!(elector = name, error = %e, "error"),
                }
            }
        });

        elector.start().await?;
        electors.push(elector);
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut leader = None;
    for (i, elector) in electors.iter().enumerate() {
        if elector.is_leader().await? {
            leader = Some(i);
        }
    }
    let Some(leader) = leader else {
        return Err("no elector holds the lease".into());
    };

    tracing::info!(index = leader, "Stopping current leader");
    electors[leader].stop();

    tokio::time::sleep(Duration::from_secs(4)).await;

    for (i, elector) in electors.iter().enumerate() {
        if i != leader && elector.is_leader().await? {
            tracing::info!(index = i, "Failover complete");
            println!("{}", elector.metrics().to_prometheus_text());
        }
    }

    for elector in &electors {
        elector.stop();
    }

    Ok(())
}
