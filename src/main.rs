/// Conflux: security automation engine for distributed workflow execution
///
/// Main entry point for the Conflux server. Initializes configuration and starts
/// the HTTP server with workflow management, execution, and worker queue endpoints.

use conflux::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with default configuration and starts listening for requests.
/// The server provides:
/// - Workflow management and execution API at /api/v1/workflows/*
/// - Worker queue and result streams at /api/v1/workflows/queue and /api/v1/streams
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3007 and a SQLite store under ./data)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
