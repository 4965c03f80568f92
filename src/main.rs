//! SQL agent gateway - main entry point.
//!
//! Serves the guarded SQL tools over MCP on stdio or streamable HTTP.

use sql_agent_gateway::config::{Config, TransportMode};
use sql_agent_gateway::db::{Database, QueryExecutor};
use sql_agent_gateway::mcp::GatewayService;
use sql_agent_gateway::transport::{HttpTransport, StdioTransport, Transport};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(config: &Config) {
    if !config.enable_logs {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        "Starting SQL agent gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_config = config.parse_database()?;
    let connection_config = db_config.into_connection_config();

    let database = Database::connect(
        &connection_config,
        config.statement_timeout_duration(),
        config.effective_row_limit(),
    )
    .await?;

    let service = GatewayService::new(QueryExecutor::new(database), config.agent_config());

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(service).run().await,
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                service,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
