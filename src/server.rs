/// Server setup and initialization
///
/// Wires together all components: entity store, repositories, planner, result
/// sink, queue, scheduler, and HTTP routes. Provides the main application
/// factory function for creating the Axum app.

use crate::{
    api::{
        schedules::create_schedule_routes, workers::create_worker_routes,
        workflows::create_workflow_routes, AppState,
    },
    config::Config,
    runtime::{
        ExecutionPlanner, ExecutionQueue, LocalImageBuilder, ResultSink, ScheduleService,
        StatisticsSink,
    },
    store::Datastore,
    workflow::storage::WorkflowStorage,
    workflow::types::{Environment, User},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Create the main Axum application with all routes
///
/// Initializes the store, seeds bootstrap entities, starts the schedule
/// service, and wires the HTTP surface.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Opening entity store in {}", config.database.data_dir);
    let store = Datastore::connect(&config.database.data_dir).await?;
    let storage = WorkflowStorage::new(store);

    seed_defaults(&storage, &config).await?;

    tracing::info!("⚙️ Initializing execution engine");
    let stats = StatisticsSink::new(storage.clone());
    let queue = ExecutionQueue::new(storage.clone());
    let planner = Arc::new(ExecutionPlanner::new(
        storage.clone(),
        queue.clone(),
        Arc::new(LocalImageBuilder),
        stats.clone(),
        config.engine.base_image_name.clone(),
    ));
    let sink = ResultSink::new(storage.clone(), stats.clone());

    tracing::info!("⏰ Initializing schedule service");
    let scheduler = Arc::new(ScheduleService::new(storage.clone(), Arc::clone(&planner)).await?);

    // Re-arm persisted schedules in the background
    let scheduler_clone = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            tracing::error!("❌ Failed to start schedule service: {}", e);
        }
    });

    let app_state = AppState {
        storage,
        planner,
        sink,
        queue,
        scheduler,
        stats,
        cleanup_days: config.engine.cleanup_days,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow management and execution control
        .merge(create_workflow_routes())
        // Schedule management
        .merge(create_schedule_routes())
        // Worker queue and result streams
        .merge(create_worker_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Seed the default environment and, when configured, the admin user
async fn seed_defaults(storage: &WorkflowStorage, config: &Config) -> Result<()> {
    if storage.list_environments().await?.is_empty() {
        storage
            .set_environment(&Environment {
                name: "onprem".to_string(),
                description: "Default on-prem worker environment".to_string(),
            })
            .await?;
        tracing::info!("🌍 Seeded default environment \"onprem\"");
    }

    if let Some(api_key) = &config.engine.admin_api_key {
        if storage.user_by_api_key(api_key).await?.is_none() {
            storage
                .save_user(&User {
                    id: Uuid::new_v4().to_string(),
                    username: "admin".to_string(),
                    role: "admin".to_string(),
                    api_key: api_key.clone(),
                    active: true,
                })
                .await?;
            tracing::info!("👤 Seeded admin user from CONFLUX_ADMIN_APIKEY");
        }
    }

    Ok(())
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Conflux server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
