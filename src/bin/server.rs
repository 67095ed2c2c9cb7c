// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use jarpay::api::{AppState, router};
use jarpay::config::ServerConfig;
use jarpay::Engine;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Jarpay API server.
///
/// Serves the contribution/payout endpoints, the payment-gateway webhook,
/// and the admin repair sweeps. Fee percentages and the admin token come
/// from the environment (PROVIDER_FEE_PERCENT, PLATFORM_FEE_PERCENT,
/// TRANSFER_FEE_PERCENT, PLATFORM_TRANSFER_SHARE_PERCENT, ADMIN_TOKEN).
#[derive(Parser, Debug)]
#[command(name = "jarpay-server")]
#[command(about = "Jar contribution/payout settlement API", long_about = None)]
struct Args {
    /// Bind address, overriding BIND_ADDR
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let state = AppState::new(Arc::new(Engine::new()), &config);
    let app = router(state);

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding {}: {e}", config.bind_addr);
            process::exit(1);
        }
    };
    info!(addr = %config.bind_addr, "jarpay API listening");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {e}");
        process::exit(1);
    }
}
