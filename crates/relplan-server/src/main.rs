//! # relplan-server: HTTP Service for the Relational Planner
//!
//! This binary exposes the planner as a network service. A resolver that has
//! already bound names and types sends a logical tree as JSON and receives the
//! converted physical tree back.
//!
//! ## Architecture
//!
//! ```text
//! Resolver
//!   |
//!   | HTTP POST /plan (JSON logical tree)
//!   v
//! relplan-server (this binary)
//!   |
//!   +-> build and validate RelNodes
//!   +-> rewrite programs to fixpoint (logical, pruning, calc)
//!   +-> convert to the stream backend, adapt the root
//!   |
//!   | HTTP response (JSON physical tree, explain text, stats)
//!   v
//! Resolver
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health` - Health check
//! - `GET  /rules`  - Registered rules per group, in application order
//! - `GET  /config` - Default planner configuration
//! - `POST /plan`   - Plan a logical tree
//!
//! ## Configuration
//!
//! `--manifest` replaces the built-in rule manifest and `--config` the planner
//! defaults; both are TOML. Logging is controlled by `RUST_LOG` (defaults to
//! `relplan=debug`).

mod routes;
mod state;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::state::{AppState, StartupError};

#[derive(Parser)]
#[command(version, about = "Rule-driven relational planning service")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: String,
    /// Rule manifest (TOML) to use instead of the built-in one.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Planner configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relplan=debug")),
        )
        .init();

    let args = Args::parse();
    let state = Arc::new(AppState::load(
        args.manifest.as_deref(),
        args.config.as_deref(),
    )?);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!("relplan-server listening on http://{}", args.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
