use std::time::Duration;

use courier::store::sqlite::SqliteStore;
use courier::transport::{self, Transport};
use courier::{Completion, RequestQueue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    let options = SqliteConnectOptions::new()
        .filename("courier-demo.db")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .unwrap();
    let store = SqliteStore::try_new(pool).await.unwrap();

    // Starts offline; the "network" comes back a few seconds in.
    let network = transport::InMemory::offline();
    let (completions_tx, mut completions) = broadcast::channel::<Completion>(64);
    let queue = RequestQueue::builder(store, Transport::new(network.clone()))
        .notifier(completions_tx)
        .build();

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    let cancel_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        cancel_signal.cancel();
    });

    let (online_tx, online_rx) = mpsc::unbounded_channel::<()>();
    let _timer = queue.sync_periodically(Duration::from_secs(30), cancel.clone());
    let _events = queue.sync_on_events(UnboundedReceiverStream::new(online_rx), cancel.clone());

    let cancel_network = cancel.clone();
    let network_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(3)) => {
                tracing::info!("Network is back");
                network.go_online();
                let _ = online_tx.send(());
            }
            _ = cancel_network.cancelled() => {}
        }
    });

    let client = reqwest::Client::new();
    let submit_queue = queue.clone();
    let cancel_submit = cancel.clone();
    let submit_handle = tokio::spawn(async move {
        let mut revision = 0;
        loop {
            // Every note is rewritten in place, so only the latest revision
            // of each survives in the queue while offline.
            for note in 1..=3 {
                let request = client
                    .put(format!("https://notes.example.com/notes/{note}"))
                    .header("content-type", "application/json")
                    .body(format!(r#"{{"revision":{revision}}}"#))
                    .build()
                    .unwrap();
                let ack = submit_queue
                    .submit(&request)
                    .await
                    .expect("Failed to queue request");
                tracing::info!(note, revision, status = %ack.status(), "Submitted");
            }
            revision += 1;

            let queued = submit_queue.list_queued().await.unwrap();
            tracing::info!(queued = queued.len(), "Queue snapshot");

            tokio::time::sleep(Duration::from_millis(500)).await;
            if cancel_submit.is_cancelled() {
                break;
            }
        }
    });

    let completion_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                completion = completions.recv() => match completion {
                    Ok(completion) => tracing::info!(
                        method = completion.request.method(),
                        url = completion.request.url(),
                        status = %completion.status,
                        "Delivered",
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed completions")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    });

    tokio::try_join!(
        cancel_handle,
        network_handle,
        submit_handle,
        completion_handle
    )
    .unwrap();
}
