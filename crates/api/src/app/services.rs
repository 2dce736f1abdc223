//! Service wiring: backends, workers, subscribers, and the hub.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use flowra_events::{
    AggregateType, EventBus, InMemoryEventBus, SubscriberConfig, SubscriberHandle,
    spawn_subscriber,
};
use flowra_identity::{
    HttpIdentityProvider, IdentitySyncConfig, IdentitySyncWorker, InMemoryUserDirectory,
    PostgresUserDirectory, UserDirectory,
};
use flowra_infra::event_bus::RedisEventBus;
use flowra_infra::{
    ChatListProjector, ChatListRow, EventStore, InMemoryEventStore, InMemoryReadModelStore,
    InMemoryRepairQueue, Outbox, OutboxWorker, OutboxWorkerConfig, PostgresEventStore,
    PostgresOutbox, PostgresReadModelStore, PostgresRepairQueue, ProjectorHandler, ReadModelStore,
    RepairQueue, RepairWorker, RepairWorkerConfig, TaskBoardProjector, TaskBoardRow, WorkerHandle,
};
use flowra_notifications::{
    HubFeed, InMemoryNotificationRepository, NotificationPipeline, NotificationRepository,
    PostgresNotificationRepository,
};
use flowra_realtime::{ClientConfig, Hub, HubHandle};

use crate::config::{AppMode, Config};

/// Everything the routes need, behind trait objects so `mock` and `real`
/// wiring share one shape.
#[derive(Clone)]
pub struct AppServices {
    mode: AppMode,
    store: Arc<dyn EventStore>,
    outbox: Arc<dyn Outbox>,
    bus: Arc<dyn EventBus>,
    task_rows: Arc<dyn ReadModelStore<TaskBoardRow>>,
    chat_rows: Arc<dyn ReadModelStore<ChatListRow>>,
    repair: Arc<dyn RepairQueue>,
    notifications: Arc<dyn NotificationRepository>,
    directory: Arc<dyn UserDirectory>,
    pool: Option<PgPool>,
    redis: Option<Arc<RedisEventBus>>,
}

impl AppServices {
    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    pub fn repair(&self) -> &Arc<dyn RepairQueue> {
        &self.repair
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationRepository> {
        &self.notifications
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub fn task_rows(&self) -> &Arc<dyn ReadModelStore<TaskBoardRow>> {
        &self.task_rows
    }

    pub fn chat_rows(&self) -> &Arc<dyn ReadModelStore<ChatListRow>> {
        &self.chat_rows
    }

    pub async fn store_healthy(&self) -> bool {
        match &self.pool {
            Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            None => true,
        }
    }

    pub async fn bus_healthy(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.ping().await.is_ok(),
            None => true,
        }
    }

    async fn build(config: &Config) -> anyhow::Result<Self> {
        match config.mode {
            AppMode::Mock => {
                info!("wiring in-memory backends (mock mode)");
                let store = Arc::new(InMemoryEventStore::new());
                let outbox = store.outbox();
                Ok(Self {
                    mode: AppMode::Mock,
                    outbox: Arc::new(outbox),
                    store: store.clone(),
                    bus: Arc::new(InMemoryEventBus::new()),
                    task_rows: Arc::new(InMemoryReadModelStore::new()),
                    chat_rows: Arc::new(InMemoryReadModelStore::new()),
                    repair: Arc::new(InMemoryRepairQueue::new()),
                    notifications: Arc::new(InMemoryNotificationRepository::new()),
                    directory: Arc::new(InMemoryUserDirectory::new()),
                    pool: None,
                    redis: None,
                })
            }
            AppMode::Real => {
                let database = config
                    .database
                    .as_ref()
                    .context("real mode requires DATABASE_URL")?;
                info!("connecting to postgres");
                let pool = PgPoolOptions::new()
                    .max_connections(database.max_connections)
                    .acquire_timeout(database.acquire_timeout)
                    .connect(&database.url)
                    .await
                    .context("postgres connection failed")?;

                let bus: Arc<dyn EventBus>;
                let mut redis = None;
                match &config.redis_url {
                    Some(url) => {
                        info!("connecting to redis");
                        let redis_bus = Arc::new(
                            RedisEventBus::new(url, &config.bus_channel_prefix)
                                .context("redis connection failed")?,
                        );
                        redis = Some(redis_bus.clone());
                        bus = redis_bus;
                    }
                    None => {
                        warn!("REDIS_URL not set; using in-process event bus");
                        bus = Arc::new(InMemoryEventBus::new());
                    }
                }

                Ok(Self {
                    mode: AppMode::Real,
                    store: Arc::new(PostgresEventStore::new(pool.clone())),
                    outbox: Arc::new(PostgresOutbox::new(pool.clone())),
                    bus,
                    task_rows: Arc::new(PostgresReadModelStore::new(pool.clone())),
                    chat_rows: Arc::new(PostgresReadModelStore::new(pool.clone())),
                    repair: Arc::new(PostgresRepairQueue::new(pool.clone())),
                    notifications: Arc::new(PostgresNotificationRepository::new(pool.clone())),
                    directory: Arc::new(PostgresUserDirectory::new(pool.clone())),
                    pool: Some(pool),
                    redis,
                })
            }
        }
    }
}

/// Shared axum state.
#[derive(Clone)]
pub struct AppState {
    pub services: AppServices,
    pub hub: Hub,
    pub ws_config: ClientConfig,
}

/// The assembled process: router plus every background component, with the
/// shutdown ordering the components expect.
pub struct RunningApp {
    router: axum::Router,
    pub hub: Hub,
    hub_handle: HubHandle,
    workers: Vec<WorkerHandle>,
    subscribers: Vec<SubscriberHandle>,
    pool: Option<PgPool>,
}

impl RunningApp {
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Stop everything: workers finish their in-flight batch, the hub
    /// closes all client channels, subscribers drain, pools close.
    pub async fn shutdown(self) {
        info!("shutting down workers");
        for worker in self.workers {
            worker.shutdown().await;
        }

        info!("closing hub");
        self.hub_handle.shutdown().await;

        info!("stopping bus subscribers");
        for subscriber in self.subscribers {
            subscriber.shutdown().await;
        }

        if let Some(pool) = self.pool {
            pool.close().await;
        }
        info!("shutdown complete");
    }
}

/// Assemble services, projectors, pipelines, workers, and routes.
pub async fn build_app(config: &Config) -> anyhow::Result<RunningApp> {
    let services = AppServices::build(config).await?;
    let (hub, hub_handle) = Hub::spawn();

    // Projectors.
    let task_projector = Arc::new(TaskBoardProjector::new(
        AggregateType::Task,
        services.store.clone(),
        services.task_rows.clone(),
        services.repair.clone(),
    ));
    let chat_projector = Arc::new(ChatListProjector::new(
        AggregateType::Chat,
        services.store.clone(),
        services.chat_rows.clone(),
        services.repair.clone(),
    ));

    // Bus subscribers: projectors, the notification pipeline, and the push
    // feed.
    let subscriber_config = SubscriberConfig::default();
    let pipeline = Arc::new(NotificationPipeline::new(
        services.notifications.clone(),
        services.bus.clone(),
    ));
    let subscribers = vec![
        spawn_subscriber(
            Arc::new(ProjectorHandler::new("task-board", task_projector.clone())),
            services.bus.subscribe("task.*"),
            subscriber_config.clone(),
        ),
        spawn_subscriber(
            Arc::new(ProjectorHandler::new("chat-list", chat_projector.clone())),
            services.bus.subscribe("chat.*"),
            subscriber_config.clone(),
        ),
        spawn_subscriber(
            pipeline.clone(),
            services.bus.subscribe("task.*"),
            subscriber_config.clone(),
        ),
        spawn_subscriber(
            pipeline,
            services.bus.subscribe("chat.*"),
            subscriber_config.clone(),
        ),
        spawn_subscriber(
            Arc::new(HubFeed::new(hub.clone())),
            services.bus.subscribe("notification.created"),
            subscriber_config,
        ),
    ];

    // Workers.
    let mut workers = Vec::new();
    workers.push(
        OutboxWorker::new(
            services.outbox.clone(),
            services.bus.clone(),
            OutboxWorkerConfig::default(),
        )
        .spawn(),
    );

    if config.repair_worker_disabled {
        warn!("repair worker disabled by configuration");
    } else {
        workers.push(
            RepairWorker::new(services.repair.clone(), RepairWorkerConfig::default())
                .register(task_projector)
                .register(chat_projector)
                .spawn(),
        );
    }

    if config.user_sync_disabled {
        warn!("identity sync disabled by configuration");
    } else if let Some(idp) = &config.idp {
        let provider = HttpIdentityProvider::new(
            &idp.url,
            &idp.realm,
            &idp.client_id,
            &idp.client_secret,
        )
        .context("idp client construction failed")?;
        workers.push(
            IdentitySyncWorker::new(
                provider,
                services.directory.clone(),
                IdentitySyncConfig {
                    interval: config.user_sync_interval,
                    batch_size: 100,
                },
            )
            .spawn(),
        );
    } else {
        warn!("IDP_URL/IDP_REALM not set; identity sync not started");
    }

    let state = AppState {
        services: services.clone(),
        hub: hub.clone(),
        ws_config: ClientConfig {
            read_deadline: config.read_timeout,
            write_deadline: config.write_timeout,
            ..ClientConfig::default()
        },
    };
    let router = crate::app::routes::router(state);

    Ok(RunningApp {
        router,
        hub,
        hub_handle,
        workers,
        subscribers,
        pool: services.pool,
    })
}
