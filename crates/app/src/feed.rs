//! Publishes the filtered transactions into a `watch` channel.

use engine::{Transaction, TransactionFilter};
use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle};

/// Latest list of filtered transactions, `None` until the first result.
pub type Feed = watch::Receiver<Option<Vec<Transaction>>>;

/// Spawns a task forwarding every emission of `filter` into the returned
/// feed. The task ends when the filter stream ends or every receiver is
/// dropped.
pub fn spawn(filter: &TransactionFilter) -> (Feed, JoinHandle<()>) {
    let (sender, feed) = watch::channel(None);
    let mut transactions = filter.transactions();
    let task = tokio::spawn(async move {
        while let Some(item) = transactions.next().await {
            match item {
                Ok(list) => {
                    tracing::debug!(
                        generation = transactions.generation(),
                        count = list.len(),
                        "feed updated"
                    );
                    if sender.send(Some(list)).is_err() {
                        break;
                    }
                }
                Err(err) => tracing::error!("failed to load transactions: {err}"),
            }
        }
        tracing::debug!("feed closed");
    });
    (feed, task)
}
