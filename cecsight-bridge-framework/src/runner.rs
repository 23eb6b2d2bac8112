//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zenoh::liveliness::LivelinessToken;

use cecsight_common::{LoggingConfig, connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::sink::Sink;
use crate::status::StatusPublisher;
use crate::zenoh_sink::ZenohSink;

/// How often the sink checks for regained connectivity.
const CONNECTIVITY_INTERVAL: Duration = Duration::from_secs(5);

type ShutdownStep = (String, Box<dyn FnOnce() + Send>);

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection and the bridge liveliness token
/// - Task spawning, cancellation and management
/// - Ordered shutdown steps on Ctrl+C / SIGTERM
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// use cecsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
///
///     let sink = runner.sink();
///     runner.spawn(async move {
///         // Worker logic here
///     });
///     runner.on_shutdown("save state", move || save());
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Zenoh session.
    session: Arc<zenoh::Session>,
    /// Sink over the session.
    sink: Arc<ZenohSink>,
    /// Status publisher (optional).
    status_publisher: Option<Arc<StatusPublisher>>,
    /// Root cancellation token; children are handed to workers.
    cancel: CancellationToken,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
    /// Steps run in order after workers stop.
    shutdown_steps: Vec<ShutdownStep>,
    /// Held for the lifetime of the bridge; dropping it signals absence.
    _alive: LivelinessToken,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Connect to Zenoh
    /// 3. Declare the bridge liveliness token
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.clone()) {
            Some(level) => LoggingConfig {
                level,
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        let alive_key = format!("{}/@/alive", config.base_topic());
        let alive = session
            .liveliness()
            .declare_token(alive_key.clone())
            .await
            .map_err(|e| BridgeError::liveliness(format!("Failed to declare bridge token: {}", e)))?;
        tracing::info!(key = %alive_key, "Bridge liveliness token declared");

        let sink = Arc::new(ZenohSink::new(session.clone())?);

        Ok(Self {
            name,
            version,
            config,
            session,
            sink,
            status_publisher: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            shutdown_steps: Vec::new(),
            _alive: alive,
        })
    }

    /// Enable status publishing.
    ///
    /// "running" is published on every (re)connection, "offline" on shutdown.
    /// With `availability = Some((topic, birth, will))` the birth and will
    /// messages are also published as plain text on `topic`.
    pub fn with_status_publishing(mut self, availability: Option<(String, String, String)>) -> Self {
        let mut status = StatusPublisher::new(
            self.sink(),
            self.config.base_topic(),
            &self.name,
            &self.version,
        );
        if let Some((topic, birth, will)) = availability {
            status = status.with_availability(topic, birth, will);
        }

        let status = Arc::new(status);
        status.install();
        self.status_publisher = Some(status);
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get the sink as a trait object.
    pub fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }

    /// Get the status publisher, when status publishing is enabled.
    pub fn status_publisher(&self) -> Option<&Arc<StatusPublisher>> {
        self.status_publisher.as_ref()
    }

    /// A token cancelled when the bridge shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: String, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
        });
        self.tasks.push(handle);
    }

    /// Register a step to run during shutdown.
    ///
    /// Steps run in registration order, after all workers are cancelled and
    /// before the session closes.
    pub fn on_shutdown<F>(&mut self, name: impl Into<String>, step: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_steps.push((name.into(), Box::new(step)));
    }

    /// Run the bridge until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Start watching connectivity (fires connected handlers, incl. status)
    /// 2. Wait for a shutdown signal
    /// 3. Cancel and abort all spawned tasks
    /// 4. Run the shutdown steps in order
    /// 5. Publish "offline" status (if enabled)
    /// 6. Close the Zenoh session
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the bridge with custom status metadata.
    pub async fn run_with_metadata(mut self, metadata: Option<serde_json::Value>) -> Result<()> {
        if let (Some(status), Some(meta)) = (&self.status_publisher, metadata) {
            status.set_metadata(meta);
        }

        let watcher = (*self.sink).clone();
        let token = self.cancel.child_token();
        self.spawn(watcher.watch_connectivity(token, CONNECTIVITY_INTERVAL));

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        wait_for_signal().await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }

        // Wait briefly for tasks to clean up
        tokio::time::sleep(Duration::from_millis(100)).await;

        for (name, step) in self.shutdown_steps.drain(..) {
            tracing::info!(step = %name, "Running shutdown step");
            step();
        }

        if let Some(ref status) = self.status_publisher {
            status.publish_offline();
        }

        // Flushes queued publishes, including the offline status
        self.sink.close().await;

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
