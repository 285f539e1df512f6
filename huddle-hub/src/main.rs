//! Huddle hub — development server for Huddle clients.
//!
//! ```bash
//! # Run on the default address
//! cargo run --bin huddle-hub
//!
//! # Custom bind address
//! cargo run --bin huddle-hub -- --bind 127.0.0.1:9200
//! ```

use clap::Parser;

use huddle_hub::hub;

/// Command-line arguments for the hub.
#[derive(Debug, Parser)]
#[command(name = "huddle-hub", about = "Development hub for Huddle clients")]
struct HubCliArgs {
    /// Address to listen on.
    #[arg(long, env = "HUDDLE_HUB_BIND", default_value = "127.0.0.1:9100")]
    bind: String,

    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match hub::start_server(&cli.bind).await {
        Ok((bound_addr, _state, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "hub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
