use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mediafleet_catalog::Catalog;
use mediafleet_config::ManagerConfig;
use mediafleet_download::DownloadQueue;
use mediafleet_events::{ConsumerRegistry, LocalBus, MessageBus, Publisher, RetryPolicy};
use mediafleet_nodes::{
    ConnectivityWatcher, ConsulRegistry, HttpContentClient, NodeContentClient, NodeRegistry,
    NodeRemoved, ServiceRegistration, manager_node_id,
};
use mediafleet_saga::{
    ArchiveStore, Changeset, ChangesetCoordinator, FileStore, RecordStore, Transfer,
    TransferCoordinator, TransferDeps,
};
use mediafleet_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, record_app_mode};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::handlers::{HandlerContext, register_handlers};
use crate::media::MediaService;
use crate::sync::SyncCoordinator;

/// Delay before a failed connectivity poll is retried.
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Collaborators the manager services are assembled from.
pub struct ServiceDeps {
    /// Registry id of this manager; the default transfer target.
    pub manager_id: String,
    /// Fleet membership and health.
    pub registry: Arc<dyn NodeRegistry>,
    /// Per-node content access.
    pub client: Arc<dyn NodeContentClient>,
    /// Message transport.
    pub bus: Arc<dyn MessageBus>,
    /// Outbound publish retry.
    pub retry: RetryPolicy,
    /// Changeset persistence.
    pub changeset_store: Arc<dyn RecordStore<Changeset>>,
    /// Transfer persistence.
    pub transfer_store: Arc<dyn RecordStore<Transfer>>,
    /// Archives of transfers targeting the manager.
    pub archives: ArchiveStore,
    /// How long a transfer and its archive live.
    pub transfer_lifetime: chrono::Duration,
    /// Delay before a failed connectivity poll is retried.
    pub watch_retry: Duration,
    /// Metrics handle.
    pub metrics: Metrics,
}

/// Manager services wired to each other.
pub struct Services {
    /// Merged fleet catalog.
    pub catalog: Arc<Catalog>,
    /// Catalog reconciliation.
    pub sync: Arc<SyncCoordinator>,
    /// Node liveness watches.
    pub watcher: ConnectivityWatcher,
    /// Query and media operations.
    pub media: Arc<MediaService>,
    /// Changeset saga.
    pub changesets: Arc<ChangesetCoordinator>,
    /// Transfer saga.
    pub transfers: Arc<TransferCoordinator>,
    /// Metrics handle.
    pub metrics: Metrics,
    registry: Arc<dyn NodeRegistry>,
    bus: Arc<dyn MessageBus>,
}

impl Services {
    /// Build every service from its dependencies. Nothing is started.
    ///
    /// Returns the services and the stream of node removals raised by the
    /// watcher, to be handed to [`spawn_removal_subscriber`].
    #[must_use]
    pub fn wire(deps: ServiceDeps) -> (Self, UnboundedReceiver<NodeRemoved>) {
        let ServiceDeps {
            manager_id,
            registry,
            client,
            bus,
            retry,
            changeset_store,
            transfer_store,
            archives,
            transfer_lifetime,
            watch_retry,
            metrics,
        } = deps;

        let catalog = Arc::new(Catalog::new());
        let publisher = Publisher::new(Arc::clone(&bus), retry, metrics.clone());
        let queue = DownloadQueue::new(Arc::clone(&client), metrics.clone());
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&client),
            Arc::clone(&catalog),
            metrics.clone(),
        ));
        let (watcher, removals) =
            ConnectivityWatcher::new(Arc::clone(&registry), metrics.clone(), watch_retry);
        let changesets = Arc::new(ChangesetCoordinator::new(
            changeset_store,
            Arc::clone(&catalog),
            publisher.clone(),
            metrics.clone(),
        ));
        let transfers = Arc::new(TransferCoordinator::new(
            TransferDeps {
                store: transfer_store,
                catalog: Arc::clone(&catalog),
                registry: Arc::clone(&registry),
                queue: queue.clone(),
                archives,
                publisher: publisher.clone(),
                metrics: metrics.clone(),
            },
            manager_id,
            transfer_lifetime,
        ));
        let media = Arc::new(MediaService::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            client,
            queue,
            Arc::clone(&transfers),
            publisher,
        ));

        let services = Self {
            catalog,
            sync,
            watcher,
            media,
            changesets,
            transfers,
            metrics,
            registry,
            bus,
        };
        (services, removals)
    }

    /// Register every handler, then attach to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Bus`] if handler registration fails.
    pub fn start_consuming(&self) -> AppResult<JoinHandle<()>> {
        let mut consumers = ConsumerRegistry::new(self.metrics.clone());
        register_handlers(
            &mut consumers,
            &HandlerContext {
                sync: Arc::clone(&self.sync),
                watcher: self.watcher.clone(),
                transfers: Arc::clone(&self.transfers),
                changesets: Arc::clone(&self.changesets),
            },
        )?;
        Ok(consumers.spawn(self.bus.as_ref()))
    }

    /// Start a connectivity watch for every node the registry knows.
    /// Returns how many watches were started.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Node`] when the registry cannot list the fleet.
    pub async fn watch_known_nodes(&self) -> AppResult<usize> {
        let nodes = self
            .registry
            .list_nodes()
            .await
            .map_err(|err| AppError::node("watcher.list_nodes", err))?;
        let mut started = 0;
        for node in nodes {
            if self.watcher.watch(&node.id, &node.name).await {
                started += 1;
            }
        }
        Ok(started)
    }
}

/// Delete catalog rows of every node the watcher reports removed.
#[must_use]
pub fn spawn_removal_subscriber(
    sync: Arc<SyncCoordinator>,
    mut removals: UnboundedReceiver<NodeRemoved>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(removed) = removals.recv().await {
            let rows = sync.remove_node(&removed.node_id).await;
            info!(
                node_id = %removed.node_id,
                node_name = %removed.node_name,
                rows,
                "node left the fleet"
            );
        }
        info!("removal subscriber stopped");
    })
}

/// Periodically expire complete transfers whose lifetime has passed.
#[must_use]
pub fn spawn_expiry_sweep(transfers: Arc<TransferCoordinator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            match transfers.sweep_expired(Utc::now()).await {
                Ok(expired) if expired.is_empty() => {}
                Ok(expired) => info!(count = expired.len(), "expired transfers swept"),
                Err(err) => error!(error = %err, "transfer expiry sweep failed"),
            }
        }
    })
}

/// Dependencies required to bootstrap the manager.
pub(crate) struct BootstrapDependencies {
    config: ManagerConfig,
    logging: LoggingConfig,
    registry: Arc<ConsulRegistry>,
    client: Arc<HttpContentClient>,
    bus: Arc<LocalBus>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from a validated configuration.
    pub(crate) fn from_config(config: ManagerConfig) -> AppResult<Self> {
        let format = match config.logging.format.as_deref() {
            Some(format) => format
                .parse::<LogFormat>()
                .map_err(|err| AppError::telemetry("telemetry.log_format", err))?,
            None => LogFormat::infer(),
        };
        let logging = LoggingConfig {
            level: config.logging.level.clone(),
            format,
            ..LoggingConfig::default()
        };

        let registry = ConsulRegistry::new(
            config.registry.base_url(),
            config.registry.media_host_tag.clone(),
            config.node_client.timeout(),
            config.registry.watch_wait(),
        )
        .map_err(|err| AppError::node("registry.new", err))?;
        let client = HttpContentClient::new(config.node_client.timeout())
            .map_err(|err| AppError::node("content_client.new", err))?;
        let bus = LocalBus::with_capacity(config.bus.capacity);
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

        Ok(Self {
            config,
            logging,
            registry: Arc::new(registry),
            client: Arc::new(client),
            bus: Arc::new(bus),
            metrics,
        })
    }
}

/// Entry point for the manager boot sequence.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or startup fails.
pub async fn run_app(config_path: &Path) -> AppResult<()> {
    let config =
        mediafleet_config::load(config_path).map_err(|err| AppError::config("config.load", err))?;
    let dependencies = BootstrapDependencies::from_config(config)?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        logging,
        registry,
        client,
        bus,
        metrics,
    } = dependencies;

    mediafleet_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(&config.name, "bootstrap");
    info!(name = %config.name, "mediafleet manager bootstrap starting");

    for dir in [&config.storage.download_dir, &config.storage.record_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| AppError::io("storage.create_dir", Some(dir.clone()), err))?;
    }
    let changeset_store = FileStore::<Changeset>::open(&config.storage.record_dir)
        .await
        .map_err(|err| AppError::saga("changeset_store.open", err))?;
    let transfer_store = FileStore::<Transfer>::open(&config.storage.record_dir)
        .await
        .map_err(|err| AppError::saga("transfer_store.open", err))?;
    let archives = ArchiveStore::open(config.storage.download_dir.clone())
        .await
        .map_err(|err| AppError::saga("archive_store.open", err))?;

    let manager_id = manager_node_id(&config.name);
    let (services, removals) = Services::wire(ServiceDeps {
        manager_id: manager_id.clone(),
        registry: Arc::clone(&registry) as Arc<dyn NodeRegistry>,
        client,
        bus,
        retry: RetryPolicy {
            attempts: config.bus.publish_attempts,
            backoff: config.bus.publish_backoff(),
        },
        changeset_store: Arc::new(changeset_store),
        transfer_store: Arc::new(transfer_store),
        archives,
        transfer_lifetime: chrono::Duration::hours(i64::from(config.transfer.expiry_hours)),
        watch_retry: WATCH_RETRY_DELAY,
        metrics,
    });

    let consumer = services.start_consuming()?;

    let registration = ServiceRegistration::manager(
        manager_id.clone(),
        config.name.clone(),
        &config.scheme,
        config.address.clone(),
        config.port,
        config.registry.manager_tag.clone(),
    );
    registry
        .register_self(&registration)
        .await
        .map_err(|err| AppError::node("registry.register_self", err))?;
    info!(manager_id = %manager_id, "manager registered");

    match services.watch_known_nodes().await {
        Ok(started) => info!(nodes = started, "connectivity watches started"),
        Err(err) => error!(error = %err, "could not start connectivity watches"),
    }
    if let Err(err) = services.sync.full_sync().await {
        error!(error = %err, "initial catalog sync failed");
    }

    let removal_task = spawn_removal_subscriber(Arc::clone(&services.sync), removals);
    let sweep_task =
        spawn_expiry_sweep(Arc::clone(&services.transfers), config.transfer.sweep_interval());

    record_app_mode("running");
    info!("mediafleet manager running");

    let signal = tokio::signal::ctrl_c().await;
    record_app_mode("shutdown");
    info!("mediafleet manager shutting down");

    for (name, task) in [
        ("expiry sweep", sweep_task),
        ("removal subscriber", removal_task),
        ("message consumer", consumer),
    ] {
        if !task.is_finished() {
            task.abort();
        }
        if let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(task = name, error = %err, "background task join failed");
        }
    }
    services.watcher.shutdown().await;
    if let Err(err) = registry.deregister(&manager_id).await {
        warn!(error = %err, manager_id = %manager_id, "manager deregistration failed");
    }

    signal.map_err(|err| AppError::io("signal.ctrl_c", None, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediafleet_saga::MemoryStore;
    use mediafleet_test_support::{FakeContentClient, FakeRegistry, media_item, node};

    async fn wired(
        registry: &Arc<FakeRegistry>,
        client: &Arc<FakeContentClient>,
        dir: &Path,
    ) -> anyhow::Result<(Services, UnboundedReceiver<NodeRemoved>)> {
        Ok(Services::wire(ServiceDeps {
            manager_id: "manager".into(),
            registry: Arc::clone(registry) as Arc<dyn NodeRegistry>,
            client: Arc::clone(client) as Arc<dyn NodeContentClient>,
            bus: Arc::new(LocalBus::new()),
            retry: RetryPolicy::default(),
            changeset_store: Arc::new(MemoryStore::<Changeset>::new()),
            transfer_store: Arc::new(MemoryStore::<Transfer>::new()),
            archives: ArchiveStore::open(dir).await?,
            transfer_lifetime: chrono::Duration::hours(24),
            watch_retry: Duration::from_millis(10),
            metrics: Metrics::new()?,
        }))
    }

    #[test]
    fn production_dependencies_follow_config() -> anyhow::Result<()> {
        let config = ManagerConfig {
            name: "manager".into(),
            logging: mediafleet_config::LoggingSettings {
                level: "debug".into(),
                format: Some("json".into()),
            },
            ..ManagerConfig::default()
        };
        let deps = BootstrapDependencies::from_config(config)?;
        assert_eq!(deps.logging.format, LogFormat::Json);
        assert_eq!(deps.logging.level, "debug");

        let bad = ManagerConfig {
            name: "manager".into(),
            logging: mediafleet_config::LoggingSettings {
                level: "info".into(),
                format: Some("yaml".into()),
            },
            ..ManagerConfig::default()
        };
        assert!(matches!(
            BootstrapDependencies::from_config(bad),
            Err(AppError::Telemetry {
                operation: "telemetry.log_format",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn removed_nodes_leave_the_catalog() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = Arc::new(FakeRegistry::with_nodes([node("n1"), node("n2")]));
        let client = Arc::new(FakeContentClient::default());
        client
            .with_listing("n1", vec![media_item("n1", "m1", "a", "mp3")])
            .with_listing("n2", vec![media_item("n2", "m2", "b", "mp3")]);
        let (services, removals) = wired(&registry, &client, dir.path()).await?;
        services.sync.full_sync().await?;
        let subscriber = spawn_removal_subscriber(Arc::clone(&services.sync), removals);

        assert_eq!(services.watch_known_nodes().await?, 2);
        assert_eq!(services.watch_known_nodes().await?, 0);
        registry.remove("n2");

        tokio::time::timeout(Duration::from_secs(5), async {
            while services.catalog.len().await != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert_eq!(services.catalog.snapshot().await[0].id, "m1");
        assert_eq!(services.watcher.watched().await, vec!["n1".to_string()]);

        services.watcher.shutdown().await;
        subscriber.abort();
        Ok(())
    }

    #[tokio::test]
    async fn handlers_cannot_be_registered_twice() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = Arc::new(FakeRegistry::default());
        let client = Arc::new(FakeContentClient::default());
        let (services, _removals) = wired(&registry, &client, dir.path()).await?;
        let context = HandlerContext {
            sync: Arc::clone(&services.sync),
            watcher: services.watcher.clone(),
            transfers: Arc::clone(&services.transfers),
            changesets: Arc::clone(&services.changesets),
        };
        let mut consumers = ConsumerRegistry::new(services.metrics.clone());

        register_handlers(&mut consumers, &context)?;
        assert_eq!(consumers.topics().len(), 5);
        assert!(matches!(
            register_handlers(&mut consumers, &context),
            Err(AppError::Bus { .. })
        ));
        Ok(())
    }
}
