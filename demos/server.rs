//! Simple REST API server example for the points economy engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /users/{id}` - Get or create a user
//! - `GET /users` - List all users
//! - `GET /users/{id}` - Get a user by id
//! - `POST /users/{id}/credit` - Credit points
//! - `POST /orders` - Create a generation order (charges points)
//! - `POST /orders/{no}/transition` - Apply a fulfillment report
//! - `GET /orders/{no}` - Get an order
//! - `POST /payments` - Create a payment from a package
//! - `POST /payments/{no}/link` - Attach the gateway redirect URL
//! - `POST /payments/{no}/complete` - Apply a gateway confirmation
//! - `POST /payments/{no}/fail` - Mark a payment failed
//! - `GET /payments/{no}` - Get a payment
//! - `POST /referrals` - Apply a referral code for a user
//!
//! ## Example Usage
//!
//! ```bash
//! # Create a user and credit points
//! curl -X POST http://localhost:3000/users/1
//! curl -X POST http://localhost:3000/users/1/credit \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 100, "reason": "signup gift"}'
//!
//! # Order an image generation (5 points)
//! curl -X POST http://localhost:3000/orders \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 1, "kind": "image", "cost": 5}'
//!
//! # Buy the 55-point package over alipay
//! curl -X POST http://localhost:3000/payments \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 1, "package": "55", "method": "alipay"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use points_engine_rs::{
    EconomyError, Engine, OrderKind, OrderNo, OrderSnapshot, OrderTransition, PaymentMethod,
    PaymentNo, PaymentSnapshot, ReferralOutcome, UserId, UserSnapshot, build_referral_link,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub user_id: u64,
    pub kind: OrderKind,
    /// Points to charge; defaults to the reference cost for the kind.
    pub cost: Option<i64>,
}

/// Fulfillment report body.
///
/// ```json
/// {"type": "completed", "result_url": "https://cdn.example/i/1.png"}
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransitionRequest {
    Started,
    Completed { result_url: String },
    Failed { error: String },
}

impl TransitionRequest {
    fn into_transition(self) -> OrderTransition {
        match self {
            Self::Started => OrderTransition::Started,
            Self::Completed { result_url } => OrderTransition::Completed { result_url },
            Self::Failed { error } => OrderTransition::Failed { error },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub user_id: u64,
    pub package: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReferralRequest {
    pub user_id: u64,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: UserSnapshot,
    /// Share link for this user's referral code.
    pub referral_link: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: u64,
    pub balance: i64,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

const BOT_USERNAME: &str = "genbot";

// === Application State ===

/// Shared application state containing the economy engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `EconomyError` into HTTP responses.
pub struct AppError(EconomyError);

impl From<EconomyError> for AppError {
    fn from(err: EconomyError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EconomyError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            EconomyError::InvalidPackage => (StatusCode::BAD_REQUEST, "INVALID_PACKAGE"),
            EconomyError::InsufficientFunds => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            EconomyError::InvalidTransition => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            EconomyError::PaymentExpired => (StatusCode::GONE, "PAYMENT_EXPIRED"),
            EconomyError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            EconomyError::OrderNotFound => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            EconomyError::PaymentNotFound => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
            EconomyError::ReferenceExhausted => {
                (StatusCode::INTERNAL_SERVER_ERROR, "REFERENCE_EXHAUSTED")
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn not_found(code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not found".to_string(),
            code: code.to_string(),
        }),
    )
}

// === Handlers ===

/// POST /users/{id} - Get or create a user.
async fn upsert_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let (user, created) = state.engine.get_or_create_user(UserId(id), Utc::now())?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let referral_link = build_referral_link(BOT_USERNAME, &user.referral_code);
    Ok((status, Json(UserResponse { user, referral_link })))
}

/// GET /users - List all users.
async fn list_users(State(state): State<AppState>) -> Json<Vec<UserSnapshot>> {
    let mut users = state.engine.users();
    users.sort_by_key(|user| user.user_id);
    Json(users)
}

/// GET /users/{id} - Get user by id.
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<UserSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .get_user(&UserId(id))
        .map(Json)
        .ok_or_else(|| not_found("USER_NOT_FOUND"))
}

/// POST /users/{id}/credit - Credit points.
async fn credit_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CreditRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state
        .engine
        .credit(UserId(id), request.amount, &request.reason, Utc::now())?;
    Ok(Json(BalanceResponse {
        user_id: id,
        balance,
    }))
}

/// POST /orders - Create a generation order.
async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<OrderSnapshot>), AppError> {
    let cost = request.cost.unwrap_or(request.kind.default_cost());
    let order = state
        .engine
        .create_order(UserId(request.user_id), request.kind, cost, Utc::now())?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /orders/{no}/transition - Apply a fulfillment report.
async fn transition_order(
    State(state): State<AppState>,
    Path(no): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<OrderSnapshot>, AppError> {
    let order = state.engine.transition_order(
        &OrderNo(no),
        request.into_transition(),
        Utc::now(),
    )?;
    Ok(Json(order))
}

/// GET /orders/{no} - Get order by reference.
async fn get_order(
    State(state): State<AppState>,
    Path(no): Path<String>,
) -> Result<Json<OrderSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .get_order(&OrderNo(no))
        .map(Json)
        .ok_or_else(|| not_found("ORDER_NOT_FOUND"))
}

/// POST /payments - Create a payment.
async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentSnapshot>), AppError> {
    let payment = state.engine.create_payment(
        UserId(request.user_id),
        &request.package,
        request.method,
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// POST /payments/{no}/link - Attach the gateway redirect URL.
async fn attach_payment_link(
    State(state): State<AppState>,
    Path(no): Path<String>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<PaymentSnapshot>, AppError> {
    let payment = state
        .engine
        .attach_payment_link(&PaymentNo(no), &request.url)?;
    Ok(Json(payment))
}

/// POST /payments/{no}/complete - Apply a gateway confirmation.
async fn complete_payment(
    State(state): State<AppState>,
    Path(no): Path<String>,
) -> Result<Json<PaymentSnapshot>, AppError> {
    let now = Utc::now();
    let payment = state.engine.complete_payment(&PaymentNo(no), now, now)?;
    Ok(Json(payment))
}

/// POST /payments/{no}/fail - Mark a payment failed.
async fn fail_payment(
    State(state): State<AppState>,
    Path(no): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<PaymentSnapshot>, AppError> {
    let payment = state.engine.fail_payment(&PaymentNo(no), &request.reason)?;
    Ok(Json(payment))
}

/// GET /payments/{no} - Get payment by reference.
async fn get_payment(
    State(state): State<AppState>,
    Path(no): Path<String>,
) -> Result<Json<PaymentSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .get_payment(&PaymentNo(no))
        .map(Json)
        .ok_or_else(|| not_found("PAYMENT_NOT_FOUND"))
}

/// POST /referrals - Apply a referral code for a user.
async fn apply_referral(
    State(state): State<AppState>,
    Json(request): Json<ReferralRequest>,
) -> Result<Json<ReferralOutcome>, AppError> {
    let outcome =
        state
            .engine
            .process_referral(&request.code, UserId(request.user_id), Utc::now())?;
    Ok(Json(outcome))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", post(upsert_user).get(get_user))
        .route("/users/{id}/credit", post(credit_user))
        .route("/orders", post(create_order))
        .route("/orders/{no}", get(get_order))
        .route("/orders/{no}/transition", post(transition_order))
        .route("/payments", post(create_payment))
        .route("/payments/{no}", get(get_payment))
        .route("/payments/{no}/link", post(attach_payment_link))
        .route("/payments/{no}/complete", post(complete_payment))
        .route("/payments/{no}/fail", post(fail_payment))
        .route("/referrals", post(apply_referral))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Points economy API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /users/{{id}}              - Get or create a user");
    println!("  GET  /users                   - List all users");
    println!("  POST /users/{{id}}/credit       - Credit points");
    println!("  POST /orders                  - Create a generation order");
    println!("  POST /orders/{{no}}/transition  - Apply a fulfillment report");
    println!("  POST /payments                - Create a payment");
    println!("  POST /payments/{{no}}/complete  - Apply a gateway confirmation");
    println!("  POST /referrals               - Apply a referral code");

    axum::serve(listener, app).await.unwrap();
}
