//! MockStack Server - local emulator for a set of cloud service APIs.
//!
//! Every built-in service mock is reachable through one HTTP endpoint. The
//! gateway picks the target service from the request's credential scope or
//! `X-Amz-Target` header and falls back to object storage.
//!
//! # Usage
//!
//! ```text
//! GATEWAY_LISTEN=0.0.0.0:4566 SERVICES=s3,sqs mockstack-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:4566` | Bind address |
//! | `SERVICES` | *(empty = all)* | Comma-separated list of services to enable |
//! | `DEFAULT_REGION` | `us-east-1` | Region embedded in resource ARNs and URLs |
//! | `DEFAULT_ACCOUNT_ID` | `000000000000` | Account embedded in resource ARNs and URLs |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use anyhow::{Context, Result};
use mockstack_core::MockStackConfig;
use mockstack_gateway::{HEALTH_PATH, MockServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Listen address when `GATEWAY_LISTEN` is unset. The library default binds
/// loopback only; the binary is usually run inside a container.
const DEFAULT_LISTEN: &str = "0.0.0.0:4566";

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Load the configuration, applying the binary's listen default.
fn load_config() -> Result<MockStackConfig> {
    let mut config = MockStackConfig::from_env().context("invalid configuration")?;
    if std::env::var("GATEWAY_LISTEN").is_err() {
        DEFAULT_LISTEN.clone_into(&mut config.gateway_listen);
    }
    Ok(config)
}

/// Request the health endpoint over a raw connection.
///
/// Succeeds if the response is 200 OK and reports at least one running
/// service.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;
    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET {HEALTH_PATH} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Handle --health-check flag for Docker HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let addr = config.gateway_listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config.log_level)?;
    info!(
        region = %config.default_region,
        account = %config.default_account,
        "loaded configuration"
    );

    let server = MockServer::new(config)
        .start()
        .await
        .context("failed to start gateway")?;
    info!(endpoint = %server.endpoint_url(), "MockStack ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, draining connections");

    server.stop().await;
    Ok(())
}
