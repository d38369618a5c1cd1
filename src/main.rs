//! grpc-bridge - serves the built-in echo service over gRPC and gRPC-Web.
//!
//! Handy for smoke-testing gRPC-Web clients and proxies:
//! - `/grpc.bridge.v1.EchoService/Echo`
//! - `/grpc.bridge.v1.EchoService/Split`
//! - `/grpc.bridge.v1.EchoService/Fail`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use grpc_bridge::backend::echo::echo_table;
use grpc_bridge::observability::{self, LogFormat};
use grpc_bridge::{Bridge, Config};

#[derive(Debug, Parser)]
#[command(name = "grpc-bridge", version, about)]
struct Args {
    /// JSON config file. Flags below override its values.
    #[arg(long, env = "GRPC_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Native gRPC bind address.
    #[arg(long, env = "GRPC_BRIDGE_NATIVE_ADDR")]
    native_addr: Option<String>,

    /// gRPC-Web bind address.
    #[arg(long, env = "GRPC_BRIDGE_WEB_ADDR")]
    web_addr: Option<String>,

    /// Allowed CORS origin; repeatable. Defaults to any origin.
    #[arg(long = "allowed-origin", env = "GRPC_BRIDGE_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Log format: text or json.
    #[arg(long, env = "GRPC_BRIDGE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl Args {
    fn into_config(self) -> grpc_bridge::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        if let Some(addr) = self.native_addr {
            config.native_addr = addr;
        }
        if let Some(addr) = self.web_addr {
            config.web_addr = addr;
        }
        if !self.allowed_origins.is_empty() {
            config.web.allowed_origins = self.allowed_origins;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    observability::init_tracing_with(args.log_format);

    let config = args.into_config()?;
    let backend = Arc::new(echo_table()?);
    let bridge = Bridge::start(config, backend).await?;

    tracing::info!(
        native = %bridge.native_addr(),
        web = %bridge.web_addr(),
        "serving echo service; ctrl-c to stop"
    );
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    bridge.close().await?;
    Ok(())
}
