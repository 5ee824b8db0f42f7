use background_dispatch::{
    broadcast::{BroadcastSink, ChangeBroadcast, MemoryTaskStore, SnapshotBroadcast},
    Config, DispatchPool,
};
use chrono::{Days, Local};
use std::{sync::Arc, time::Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let now = Instant::now();
    let pool = Arc::new(DispatchPool::start(Config::from_env()?)?);
    let sink = Arc::new(BroadcastSink::new(64));
    let store = Arc::new(MemoryTaskStore::new());

    let mut events = sink.subscribe()?;
    let shutdown = pool.shutdown_token();
    let listener = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = events.recv() => match msg {
                    Ok(event) => info!(event = %event.name, payload = %event.payload, "live update"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "listener lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    });

    let due = Local::now().date_naive() + Days::new(7);
    let mut report = store.create("Write the quarterly report", false, due);
    pool.submit(ChangeBroadcast::added(sink.clone(), &report)?)?;

    let review = store.create("Review open pull requests", false, due);
    pool.submit(ChangeBroadcast::added(sink.clone(), &review)?)?;

    report.completed = true;
    store.update(report.clone());
    pool.submit(ChangeBroadcast::updated(sink.clone(), &report)?)?;

    store.remove(review.id);
    pool.submit(ChangeBroadcast::deleted(sink.clone(), review.id))?;

    // A client connecting gets the full list.
    pool.submit(SnapshotBroadcast::new(store.clone(), sink.clone()))?;

    let blocking = Arc::clone(&pool);
    tokio::task::spawn_blocking(move || {
        blocking.drain();
        blocking.stop();
    })
    .await?;
    listener.await?;

    info!(metrics = ?pool.metrics(), "elapsed: {:?}", now.elapsed());
    Ok(())
}
