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

//! HTTP API surface.
//!
//! ## Endpoints
//!
//! - `POST /users` - Register a user
//! - `POST /jars` - Create a jar
//! - `GET /jars/{id}` - Jar snapshot including cached totals
//! - `PATCH /jars/{id}` - Update creator-editable fields
//! - `DELETE /jars/{id}` - Delete a jar (guarded, admin token)
//! - `POST /jars/{id}/contributions` - Record a contribution
//! - `POST /jars/{id}/payouts` - Initiate a payout
//! - `GET /jars/{id}/transactions` - Ledger slice for one jar
//! - `POST /webhooks/payments` - Gateway status callback
//! - `POST /admin/jars/{id}/freeze` / `.../unfreeze` - Admin jar controls
//! - `POST /admin/recalculate-charges` - Bulk charge repair sweep
//! - `POST /admin/recalculate-totals` - Bulk jar total sweep
//!
//! Responses use the `{ "success": true, "data": ... }` envelope;
//! failures carry `{ "success": false, "message": ... }`. The webhook
//! endpoint answers 200 even for duplicate or out-of-order reports so the
//! gateway stops retrying; only a malformed payload earns a 4xx.

use crate::base::{JarId, TransactionId, UserId};
use crate::config::ServerConfig;
use crate::engine::{Engine, NewContribution, NewJar, NewPayout};
use crate::error::EngineError;
use crate::fees::{FeeConfig, FeePayer};
use crate::gateway::WebhookNotification;
use crate::jar::{Actor, JarUpdate};
use crate::transaction::{PaymentMethod, Transaction};
use crate::user::WithdrawalAccount;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub withdrawal_account: Option<WithdrawalAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJarRequest {
    pub name: String,
    pub currency: String,
    pub creator: UserId,
    pub who_pays_platform_fees: FeePayer,
    pub goal_amount: Option<Decimal>,
    pub deadline_unix: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRequest {
    pub contributor_name: Option<String>,
    pub contributor_phone_number: String,
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    #[serde(default)]
    pub via_payment_link: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub linked_contribution_id: Option<TransactionId>,
}

#[derive(Debug, Deserialize)]
pub struct FreezeRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct SweepSummary {
    pub affected: usize,
}

// === Application State ===

/// Shared application state: the engine plus request-scoped fee settings.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub fees: FeeConfig,
    admin_token: String,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, config: &ServerConfig) -> Self {
        Self {
            engine,
            fees: config.fees,
            admin_token: config.admin_token.clone(),
        }
    }
}

// === Error Handling ===

/// Wrapper converting [`EngineError`] into the HTTP error envelope.
pub struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidAmount => StatusCode::BAD_REQUEST,
            EngineError::Gateway(_) => StatusCode::BAD_REQUEST,
            EngineError::AccountNotConfigured => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Permission => StatusCode::FORBIDDEN,
            EngineError::JarNotFound
            | EngineError::TransactionNotFound
            | EngineError::UserNotFound => StatusCode::NOT_FOUND,
            EngineError::JarNotOpen
            | EngineError::JarFrozen
            | EngineError::JarNotEmpty
            | EngineError::DuplicateTransaction => StatusCode::CONFLICT,
            EngineError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.admin_token);
    if authorized {
        Ok(())
    } else {
        Err(AppError(EngineError::Permission))
    }
}

/// Resolves the acting user: a valid admin bearer token outranks the
/// `x-user-id` header.
fn resolve_actor(state: &AppState, headers: &HeaderMap) -> Result<Actor, AppError> {
    if require_admin(state, headers).is_ok() {
        return Ok(Actor::admin(UserId(0)));
    }
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .map(|id| Actor::user(UserId(id)))
        .ok_or(AppError(EngineError::Permission))
}

// === Handlers ===

async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> (StatusCode, Json<Envelope<UserId>>) {
    let id = state
        .engine
        .create_user(request.name, request.withdrawal_account);
    (StatusCode::CREATED, Json(Envelope::new(id)))
}

async fn create_jar(
    State(state): State<AppState>,
    Json(request): Json<CreateJarRequest>,
) -> Result<(StatusCode, Json<Envelope<JarId>>), AppError> {
    let id = state.engine.create_jar(NewJar {
        name: request.name,
        currency: request.currency,
        creator: request.creator,
        who_pays_platform_fees: request.who_pays_platform_fees,
        goal_amount: request.goal_amount,
        deadline_unix: request.deadline_unix,
    })?;
    Ok((StatusCode::CREATED, Json(Envelope::new(id))))
}

async fn get_jar(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Value>, AppError> {
    let jar = state
        .engine
        .get_jar(&JarId(id))
        .ok_or(EngineError::JarNotFound)?;
    let snapshot = serde_json::to_value(&*jar)
        .map_err(|err| EngineError::Aggregation(err.to_string()))?;
    Ok(Json(serde_json::json!({ "success": true, "data": snapshot })))
}

async fn update_jar(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(update): Json<JarUpdate>,
) -> Result<StatusCode, AppError> {
    let actor = resolve_actor(&state, &headers)?;
    state.engine.update_jar(JarId(id), actor, update)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_jar(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;
    state.engine.delete_jar(JarId(id), Actor::admin(UserId(0)))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_contribution(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<ContributionRequest>,
) -> Result<(StatusCode, Json<Envelope<Transaction>>), AppError> {
    let transaction = state.engine.create_contribution(
        NewContribution {
            jar_id: JarId(id),
            amount: request.amount,
            method: request.payment_method,
            contributor_name: request.contributor_name,
            contributor_phone: Some(request.contributor_phone_number),
            collector: None,
            via_payment_link: request.via_payment_link,
        },
        &state.fees,
    )?;
    Ok((StatusCode::CREATED, Json(Envelope::new(transaction))))
}

async fn create_payout(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<Envelope<Transaction>>), AppError> {
    let transaction = state.engine.create_payout(
        NewPayout {
            jar_id: JarId(id),
            amount: request.amount,
            linked_contribution: request.linked_contribution_id,
            collector: None,
        },
        &state.fees,
    )?;
    Ok((StatusCode::CREATED, Json(Envelope::new(transaction))))
}

async fn list_jar_transactions(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Envelope<Vec<Transaction>>>, AppError> {
    let jar_id = JarId(id);
    if state.engine.get_jar(&jar_id).is_none() {
        return Err(AppError(EngineError::JarNotFound));
    }
    Ok(Json(Envelope::new(state.engine.jar_transactions(jar_id))))
}

/// Gateway callback. Duplicate and out-of-order reports acknowledge with
/// `applied: false`; only an unusable payload is rejected.
async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Envelope<WebhookAck>>, AppError> {
    let notification = WebhookNotification::from_payload(&payload).map_err(|err| {
        error!(error = %err, "malformed gateway payload");
        err
    })?;
    let outcome = state
        .engine
        .apply_status_report(notification.reference, notification.status)?;
    Ok(Json(Envelope::new(WebhookAck {
        applied: outcome.applied(),
    })))
}

async fn freeze_jar(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(request): Json<FreezeRequest>,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;
    state
        .engine
        .freeze_jar(JarId(id), Actor::admin(UserId(0)), request.reason)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unfreeze_jar(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;
    state
        .engine
        .unfreeze_jar(JarId(id), Actor::admin(UserId(0)))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recalculate_charges(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<SweepSummary>>, AppError> {
    require_admin(&state, &headers)?;
    let affected = state.engine.recalculate_charges(&state.fees);
    Ok(Json(Envelope::new(SweepSummary { affected })))
}

async fn recalculate_totals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<SweepSummary>>, AppError> {
    require_admin(&state, &headers)?;
    let affected = state.engine.recalculate_all_jar_totals();
    Ok(Json(Envelope::new(SweepSummary { affected })))
}

// === Router ===

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/jars", post(create_jar))
        .route(
            "/jars/{id}",
            get(get_jar).patch(update_jar).delete(delete_jar),
        )
        .route("/jars/{id}/contributions", post(create_contribution))
        .route("/jars/{id}/payouts", post(create_payout))
        .route("/jars/{id}/transactions", get(list_jar_transactions))
        .route("/webhooks/payments", post(payment_webhook))
        .route("/admin/jars/{id}/freeze", post(freeze_jar))
        .route("/admin/jars/{id}/unfreeze", post(unfreeze_jar))
        .route("/admin/recalculate-charges", post(recalculate_charges))
        .route("/admin/recalculate-totals", post(recalculate_totals))
        .with_state(state)
}
