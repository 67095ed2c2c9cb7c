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

//! Server configuration loaded from environment variables.
//!
//! Fee percentages land in a [`FeeConfig`] value that is passed explicitly
//! into engine operations; nothing reads them as ambient global state.

use crate::fees::FeeConfig;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP API.
    pub bind_addr: String,
    /// Bearer token required by admin endpoints and jar deletion.
    pub admin_token: String,
    pub fees: FeeConfig,
}

impl ServerConfig {
    /// Reads configuration from the environment, with development-grade
    /// defaults for everything but the fee sanity check.
    pub fn from_env() -> Result<Self, ConfigError> {
        let fees = FeeConfig {
            provider_fee_percent: env_decimal("PROVIDER_FEE_PERCENT", "1.95")?,
            platform_fee_percent: env_decimal("PLATFORM_FEE_PERCENT", "2")?,
            transfer_fee_percent: env_decimal("TRANSFER_FEE_PERCENT", "0.5")?,
            platform_transfer_share_percent: env_decimal(
                "PLATFORM_TRANSFER_SHARE_PERCENT",
                "0.25",
            )?,
        };
        fees.validate()
            .map_err(|_| ConfigError::Invalid("fee percentages"))?;

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            admin_token: std::env::var("ADMIN_TOKEN").unwrap_or_else(|_| "dev-admin".to_string()),
            fees,
        })
    }
}

fn env_decimal(key: &'static str, default: &str) -> Result<Decimal, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key))
}
