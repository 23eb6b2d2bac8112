//! Zenoh implementation of [`Sink`].
//!
//! Publishes are queued and written by a single task owned by the sink, so
//! values for a key reach Zenoh in the order they were published. Non-retained
//! messages are plain `put`s. Retained messages go through a zenoh-ext
//! advanced publisher per key with a one-sample cache, so late joining
//! subscribers that ask for history receive the last value.
//!
//! Zenoh has no connection callback of its own; [`ZenohSink::watch_connectivity`]
//! polls the session's router and peer lists and fires the registered
//! connected handlers whenever connectivity is (re)gained.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use zenoh::Session;
use zenoh::pubsub::Subscriber;
use zenoh::qos::CongestionControl;
use zenoh::sample::SampleKind;
use zenoh_ext::{AdvancedPublisher, AdvancedPublisherBuilderExt, CacheConfig};

use crate::error::{BridgeError, Result};
use crate::sink::{ConnectedHandler, MessageHandler, Qos, Sink};

/// Number of samples kept per retained key.
const RETAINED_CACHE_SIZE: usize = 1;

/// A [`Sink`] backed by a Zenoh session.
#[derive(Clone)]
pub struct ZenohSink {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<Session>,
    runtime: Handle,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    subscribers: Mutex<Vec<Subscriber<()>>>,
    connected_handlers: RwLock<Vec<ConnectedHandler>>,
}

enum Outgoing {
    Publish {
        topic: String,
        qos: Qos,
        retained: bool,
        payload: Vec<u8>,
    },
    /// Drop retained publishers once everything queued before is written.
    Close(oneshot::Sender<()>),
}

impl std::fmt::Debug for ZenohSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenohSink")
            .field("zid", &self.inner.session.zid())
            .finish_non_exhaustive()
    }
}

fn congestion_control(qos: Qos) -> CongestionControl {
    match qos {
        Qos::AtMostOnce => CongestionControl::Drop,
        Qos::AtLeastOnce | Qos::ExactlyOnce => CongestionControl::Block,
    }
}

impl ZenohSink {
    /// Create a sink over an open session.
    ///
    /// Must be called from within a Tokio runtime; the writer task and
    /// subscriptions are spawned onto that runtime.
    pub fn new(session: Arc<Session>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| BridgeError::worker(format!("No Tokio runtime available: {}", e)))?;

        let (outgoing, queue) = mpsc::unbounded_channel();
        let writer = Writer {
            session: session.clone(),
            retained: HashMap::new(),
        };
        runtime.spawn(writer.run(queue));

        Ok(Self {
            inner: Arc::new(Inner {
                session,
                runtime,
                outgoing,
                subscribers: Mutex::new(Vec::new()),
                connected_handlers: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Invoke every registered connected handler.
    pub fn notify_connected(&self) {
        let handlers = self.inner.connected_handlers.read().unwrap().clone();
        tracing::debug!(handlers = handlers.len(), "Notifying connected handlers");
        for handler in handlers {
            handler();
        }
    }

    /// Fire connected handlers now and on every later regain of connectivity.
    ///
    /// Runs until `cancel` is triggered.
    pub async fn watch_connectivity(self, cancel: CancellationToken, interval: Duration) {
        let mut connected = true;
        self.notify_connected();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let now = self.has_remotes().await;
            if now && !connected {
                tracing::info!("Zenoh connectivity regained");
                self.notify_connected();
            } else if !now && connected {
                tracing::debug!("No Zenoh routers or peers reachable");
            }
            connected = now;
        }
    }

    async fn has_remotes(&self) -> bool {
        let info = self.inner.session.info();
        let routers = info.routers_zid().await.count();
        let peers = info.peers_zid().await.count();
        routers + peers > 0
    }

    /// Write every queued publish, then drop retained publishers and
    /// subscriptions.
    pub async fn close(&self) {
        let (done, flushed) = oneshot::channel();
        if self.inner.outgoing.send(Outgoing::Close(done)).is_ok() {
            let _ = flushed.await;
        }
        self.inner.subscribers.lock().unwrap().clear();
    }
}

/// Owns the write side of the session; the only place publishes happen.
struct Writer {
    session: Arc<Session>,
    retained: HashMap<String, AdvancedPublisher<'static>>,
}

impl Writer {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Outgoing>) {
        while let Some(item) = queue.recv().await {
            match item {
                Outgoing::Publish {
                    topic,
                    qos,
                    retained,
                    payload,
                } => {
                    let len = payload.len();
                    match self.put(&topic, qos, retained, payload).await {
                        Ok(()) => tracing::debug!(key = %topic, bytes = len, retained, "Published"),
                        Err(e) => tracing::warn!(error = %e, "Dropping publish"),
                    }
                }
                Outgoing::Close(done) => {
                    self.retained.clear();
                    let _ = done.send(());
                }
            }
        }
        tracing::trace!("Sink writer stopped");
    }

    async fn put(&mut self, topic: &str, qos: Qos, retained: bool, payload: Vec<u8>) -> Result<()> {
        let publish_error = |e: zenoh::Error| BridgeError::Publish {
            key: topic.to_string(),
            message: e.to_string(),
        };

        if !retained {
            return self
                .session
                .put(topic, payload)
                .congestion_control(congestion_control(qos))
                .await
                .map_err(publish_error);
        }

        if !self.retained.contains_key(topic) {
            let publisher: AdvancedPublisher<'static> = self
                .session
                .declare_publisher(topic.to_string())
                .congestion_control(congestion_control(qos))
                .cache(CacheConfig::default().max_samples(RETAINED_CACHE_SIZE))
                .publisher_detection()
                .await
                .map_err(publish_error)?;

            tracing::debug!(key = %topic, "Declared retained publisher");
            self.retained.insert(topic.to_string(), publisher);
        }

        match self.retained.get(topic) {
            Some(publisher) => publisher.put(payload).await.map_err(publish_error),
            None => Ok(()),
        }
    }
}

impl Sink for ZenohSink {
    fn publish(&self, topic: &str, qos: Qos, retained: bool, payload: Vec<u8>) {
        let item = Outgoing::Publish {
            topic: topic.to_string(),
            qos,
            retained,
            payload,
        };
        if self.inner.outgoing.send(item).is_err() {
            tracing::warn!(key = %topic, "Sink writer stopped, dropping publish");
        }
    }

    fn subscribe(&self, topic: &str, _qos: Qos, handler: MessageHandler) {
        let inner = self.inner.clone();
        let topic = topic.to_string();

        self.inner.runtime.spawn(async move {
            let result = inner
                .session
                .declare_subscriber(topic.clone())
                .callback(move |sample| {
                    if sample.kind() == SampleKind::Delete {
                        return;
                    }
                    let payload = sample.payload().to_bytes();
                    handler(sample.key_expr().as_str(), &payload);
                })
                .await;

            match result {
                Ok(subscriber) => {
                    tracing::debug!(key = %topic, "Subscribed");
                    inner.subscribers.lock().unwrap().push(subscriber);
                }
                Err(e) => {
                    let err = BridgeError::Subscribe {
                        key: topic,
                        message: e.to_string(),
                    };
                    tracing::warn!(error = %err, "Subscription failed");
                }
            }
        });
    }

    fn register_connected_handler(&self, handler: ConnectedHandler) {
        self.inner.connected_handlers.write().unwrap().push(handler);
    }
}
