use std::collections::HashMap;

use anyhow::{anyhow, Result};
use futures_util::stream::StreamExt;
use tokio::{sync::mpsc, time};
use tokio_tungstenite::tungstenite::Message;

use super::{ListerWatcher, Store};
use crate::{models::watch::WatchEvent, objects::Object};

/// How often the reflector re-lists and asks controllers to resync.
const RESYNC_PERIOD: std::time::Duration = std::time::Duration::from_secs(120);
/// Backoff before reopening a broken watch connection.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub(super) struct Reflector<T> {
    pub(super) lw: ListerWatcher<T>,
    pub(super) store: Store<T>,
}

#[derive(Debug)]
pub(super) enum ReflectorNotification<T> {
    Add(T),
    /// old value, new value
    Update(T, T),
    Delete(T),
    Resync,
}

impl<T: Object> Reflector<T> {
    pub(super) async fn run(&self, tx: mpsc::Sender<ReflectorNotification<T>>) -> Result<()> {
        self.relist().await?;
        // Let controllers pick up the initial working set
        tx.send(ReflectorNotification::Resync).await?;

        let mut resync_ticker = time::interval(RESYNC_PERIOD);
        resync_ticker.tick().await;

        loop {
            let stream = match (self.lw.watcher)(()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to open watch connection: {:#}, retrying", e);
                    time::sleep(RECONNECT_DELAY).await;
                    continue;
                },
            };
            let (_, mut receiver) = stream.split();

            loop {
                tokio::select! {
                    msg = receiver.next() => {
                        let msg: Message = match msg {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                tracing::warn!("Watch connection error: {:#}", e);
                                break;
                            },
                            None => {
                                tracing::warn!("Watch connection closed by api-server");
                                break;
                            },
                        };
                        if msg.is_close() {
                            tracing::warn!("Api-server watch disconnect");
                            break;
                        }
                        if let Message::Text(msg) = msg {
                            self.handle_watch_event(serde_json::from_str(msg.as_str())?, &tx)
                                .await?;
                        }
                    },
                    _ = resync_ticker.tick() => {
                        self.relist().await?;
                        tx.send(ReflectorNotification::Resync).await?;
                    },
                }
            }
            time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn handle_watch_event(
        &self,
        event: WatchEvent<T>,
        tx: &mpsc::Sender<ReflectorNotification<T>>,
    ) -> Result<()> {
        match event {
            WatchEvent::Put(e) => {
                if let Some(old) = self.store.insert(e.key, e.object.clone()) {
                    tx.send(ReflectorNotification::Update(old, e.object))
                        .await
                        .map_err(|_| anyhow!("Reflector notification channel closed"))?;
                } else {
                    tx.send(ReflectorNotification::Add(e.object))
                        .await
                        .map_err(|_| anyhow!("Reflector notification channel closed"))?;
                }
            },
            WatchEvent::Delete(e) => {
                if let Some(old) = self.store.remove(&e.key) {
                    tx.send(ReflectorNotification::Delete(old.1))
                        .await
                        .map_err(|_| anyhow!("Reflector notification channel closed"))?;
                } else {
                    tracing::warn!("Watch inconsistent, key {} already deleted", e.key);
                }
            },
        }
        Ok(())
    }

    /// Bring the store in line with a fresh listing.
    /// Changes missed while disconnected are reconciled by the
    /// controllers' resync paths, not replayed one by one.
    async fn relist(&self) -> Result<()> {
        let objects: Vec<T> = (self.lw.lister)(()).await?;
        let mut fresh = HashMap::with_capacity(objects.len());
        for object in objects {
            fresh.insert(object.uri(), object);
        }
        self.store.retain(|key, _| fresh.contains_key(key));
        for (key, object) in fresh {
            self.store.insert(key, object);
        }
        Ok(())
    }
}
