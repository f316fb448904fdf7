use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use reflector::{Reflector, ReflectorNotification};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::objects::Object;

mod reflector;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type Store<T> = Arc<DashMap<String, T>>;

pub type CLS<ARG, RES> = Box<dyn Fn(ARG) -> BoxFuture<'static, Result<RES>> + Send + Sync>;

/// Lists all objects of one kind and opens a watch stream for them.
pub struct ListerWatcher<T> {
    pub lister: CLS<(), Vec<T>>,
    pub watcher: CLS<(), WsStream>,
}

/// Closures invoked for every observed change.
pub struct EventHandler<T> {
    pub add_cls: CLS<T, ()>,
    pub update_cls: CLS<(T, T), ()>,
    pub delete_cls: CLS<T, ()>,
}

/// Invoked after every periodic re-list, so controllers can
/// re-enqueue the full working set (level triggering).
pub struct ResyncHandler(pub CLS<(), ()>);

/// Informer keeps a local store in sync with the API server through
/// a reflector, and dispatches change notifications to the registered
/// handlers. One informer per watched kind.
pub struct Informer<T> {
    reflector: Arc<Reflector<T>>,
    eh: EventHandler<T>,
    rh: ResyncHandler,
}

impl<T: Object> Informer<T> {
    pub fn new(lw: ListerWatcher<T>, eh: EventHandler<T>, rh: ResyncHandler) -> Self {
        let store = Arc::new(DashMap::new());
        let reflector = Reflector {
            lw,
            store,
        };
        Self {
            reflector: Arc::new(reflector),
            eh,
            rh,
        }
    }

    pub fn get_store(&self) -> Store<T> {
        self.reflector.store.clone()
    }

    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<ReflectorNotification<T>>(16);
        let r = self.reflector.clone();
        let reflector_handle = tokio::spawn(async move { r.run(tx).await });

        tracing::info!("Informer started");
        while let Some(n) = rx.recv().await {
            match n {
                ReflectorNotification::Add(new) => (self.eh.add_cls)(new)
                    .await
                    .with_context(|| "Add handler error")?,
                ReflectorNotification::Update(old, new) => (self.eh.update_cls)((old, new))
                    .await
                    .with_context(|| "Update handler error")?,
                ReflectorNotification::Delete(old) => (self.eh.delete_cls)(old)
                    .await
                    .with_context(|| "Delete handler error")?,
                ReflectorNotification::Resync => {
                    (self.rh.0)(()).await.with_context(|| "Resync handler error")?
                },
            }
        }

        reflector_handle.await?
    }
}
