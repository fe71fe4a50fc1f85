//! Leash Gateway - One-command policy-constrained card server
//!
//! The single binary that fronts the Leash engine:
//! - Card issuance with immutable spend policies
//! - Synchronous authorization webhook (idempotent)
//! - Revocation and card status
//! - Background expiry sweeps
//!
//! # Quick Start
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8080)
//! leash-gateway
//!
//! # Custom port and tighter intent timeout
//! leash-gateway --port 9090 --intent-timeout-ms 250
//!
//! # Issue a card
//! curl -X POST localhost:8080/api/cards -H 'Content-Type: application/json' \
//!   -d '{"name":"Stylist session","policy":{"hard_limit":"300","merchant_type":"fashion","intent_validation":{"type":"prompt-match","instruction":"Wedding Guest Outfit"}}}'
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use leash_engine::AuthorizationEngine;
use leash_ledger::FundingLedger;
use leash_policy::Verifier;
use leash_registry::{CredentialRegistry, RegistryConfig};
use leash_types::{
    Amount, AuthorizationRequest, CardRequest, Credential, CredentialId, LeashError,
    MerchantCategory, TransactionId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Leash Gateway - Policy-Constrained Payment Credentials
#[derive(Parser, Debug)]
#[command(
    name = "leash-gateway",
    about = "Leash - ephemeral virtual cards on a policy leash",
    long_about = "Issue single-purpose virtual cards bound to hard limits, merchant scopes, and purchase intent. Every authorization is checked and funded just-in-time.\n\nVisit https://www.leashpay.dev for documentation.",
    version
)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "LEASH_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "LEASH_PORT")]
    port: u16,

    /// Time budget for the intent matcher, per authorization
    #[arg(long, default_value = "500", env = "LEASH_INTENT_TIMEOUT_MS")]
    intent_timeout_ms: u64,

    /// Default card validity horizon when a request does not set one
    #[arg(long, default_value = "30", env = "LEASH_CARD_VALIDITY_DAYS")]
    card_validity_days: u32,

    /// Seconds between background expiry sweeps
    #[arg(long, default_value = "60", env = "LEASH_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,
}

/// Shared application state
struct AppState {
    engine: AuthorizationEngine,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    print_banner();

    tracing::info!("Bootstrapping Leash engine...");
    let registry = Arc::new(CredentialRegistry::new(RegistryConfig {
        default_validity_days: args.card_validity_days,
    }));
    let ledger = Arc::new(FundingLedger::new(registry.clone()));
    let verifier = Verifier::with_keyword_matcher(Duration::from_millis(args.intent_timeout_ms));
    let engine = AuthorizationEngine::new(registry, ledger, verifier);

    tracing::info!(
        intent_timeout_ms = args.intent_timeout_ms,
        card_validity_days = args.card_validity_days,
        "Engine ready, receipts signed with key {}",
        engine.ledger().public_key()
    );

    let state = Arc::new(AppState { engine });

    // Background expiry sweep
    let sweep_state = state.clone();
    let sweep_interval = args.sweep_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
        ticker.tick().await; // first tick completes immediately
        loop {
            ticker.tick().await;
            let expired = sweep_state.engine.sweep_expired().await;
            if expired > 0 {
                tracing::info!(expired, "Expiry sweep transitioned credentials");
            }
        }
    });

    // Build router
    let app = Router::new()
        .route("/", get(api_info))
        // Card lifecycle
        .route("/api/cards", post(api_create_card).get(api_list_cards))
        .route("/api/cards/:id", get(api_card_status))
        .route("/api/cards/:id/revoke", post(api_revoke_card))
        // Authorization webhook
        .route("/api/authorize", post(api_authorize))
        // System
        .route("/api/status", get(api_status))
        .route("/api/health", get(api_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Leash Gateway running at http://{}:{}", args.host, args.port);
    tracing::info!("Issue cards:  POST http://localhost:{}/api/cards", args.port);
    tracing::info!("Authorize:    POST http://localhost:{}/api/authorize", args.port);
    tracing::info!("Status:       http://localhost:{}/api/status", args.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn print_banner() {
    eprintln!(
        r#"
 ╔═══════════════════════════════════════════════╗
 ║                                               ║
 ║   ██╗     ███████╗ █████╗ ███████╗██╗  ██╗    ║
 ║   ██║     ██╔════╝██╔══██╗██╔════╝██║  ██║    ║
 ║   ██║     █████╗  ███████║███████╗███████║    ║
 ║   ██║     ██╔══╝  ██╔══██║╚════██║██╔══██║    ║
 ║   ███████╗███████╗██║  ██║███████║██║  ██║    ║
 ║   ╚══════╝╚══════╝╚═╝  ╚═╝╚══════╝╚═╝  ╚═╝    ║
 ║                                               ║
 ║   Cards that can only do what you said        ║
 ║   https://www.leashpay.dev                    ║
 ║                                               ║
 ╚═══════════════════════════════════════════════╝
"#
    );
}

// ============================================================================
// Error mapping
// ============================================================================

struct ApiError(LeashError);

impl From<LeashError> for ApiError {
    fn from(err: LeashError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LeashError::CredentialNotFound { .. } => StatusCode::NOT_FOUND,
            LeashError::InvalidPolicy { .. }
            | LeashError::InvalidAmount { .. }
            | LeashError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            LeashError::CredentialLocked { .. } | LeashError::InsufficientHeadroom { .. } => {
                StatusCode::CONFLICT
            }
            LeashError::IntentUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = AxumJson(serde_json::json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
        }));
        (status, body).into_response()
    }
}

fn parse_credential_id(raw: &str) -> Result<CredentialId, ApiError> {
    CredentialId::parse(raw).map_err(|_| {
        ApiError(LeashError::invalid_input(
            "credential_id",
            "not a valid card identifier",
        ))
    })
}

// ============================================================================
// Card lifecycle
// ============================================================================

async fn api_create_card(
    State(state): State<Arc<AppState>>,
    AxumJson(request): AxumJson<CardRequest>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let issued = state.engine.issue_card(request)?;
    // The unmasked card data appears exactly once, in this response.
    Ok(AxumJson(serde_json::json!({
        "credential_id": issued.credential_id.to_string(),
        "card": {
            "number": issued.card.pan,
            "cvv": issued.card.cvv,
            "expiry": issued.card.expiry,
        },
        "policy": {
            "hard_limit": issued.policy.hard_limit.to_decimal(),
            "merchant_type": issued.policy.merchant_scope.to_string(),
            "intent_validation": issued.policy.intent_rule,
        },
        "expires_at": issued.expires_at,
    })))
}

async fn api_list_cards(State(state): State<Arc<AppState>>) -> AxumJson<serde_json::Value> {
    let cards = state.engine.list_cards().await;
    let summaries: Vec<serde_json::Value> = cards.iter().map(card_summary).collect();
    AxumJson(serde_json::json!({
        "cards": summaries,
        "count": summaries.len(),
    }))
}

async fn api_card_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let id = parse_credential_id(&id)?;
    let card = state.engine.card_status(&id).await?;
    Ok(AxumJson(card_summary(&card)))
}

async fn api_revoke_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let id = parse_credential_id(&id)?;
    let state_after = state.engine.revoke_card(&id).await?;
    Ok(AxumJson(serde_json::json!({
        "credential_id": id.to_string(),
        "state": state_after.label(),
    })))
}

fn card_summary(card: &Credential) -> serde_json::Value {
    serde_json::json!({
        "credential_id": card.id.to_string(),
        "name": card.holder,
        "state": card.state.label(),
        "card_number": card.card.masked_pan(),
        "hard_limit": card.policy.hard_limit.to_decimal(),
        "spent_to_date": card.spent_to_date.to_decimal(),
        "remaining": card.remaining().to_decimal(),
        "merchant_type": card.policy.merchant_scope.to_string(),
        "intent_validation": card.policy.intent_rule,
        "created_at": card.created_at,
        "expires_at": card.expires_at,
    })
}

// ============================================================================
// Authorization webhook
// ============================================================================

#[derive(Deserialize)]
struct AuthorizeBody {
    transaction_id: String,
    credential_id: String,
    amount: Decimal,
    merchant_category: String,
    merchant_label: String,
}

async fn api_authorize(
    State(state): State<Arc<AppState>>,
    AxumJson(body): AxumJson<AuthorizeBody>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let credential_id = parse_credential_id(&body.credential_id)?;
    let amount = Amount::from_decimal(body.amount)?;
    let category = MerchantCategory::parse(&body.merchant_category)?;
    let request = AuthorizationRequest::new(
        TransactionId::new(body.transaction_id),
        credential_id,
        amount,
        category,
        body.merchant_label,
    )?;

    let decision = state.engine.authorize(request).await;
    Ok(AxumJson(serde_json::json!({
        "transaction_id": decision.transaction_id.to_string(),
        "credential_id": decision.credential_id.to_string(),
        "approved": decision.is_approved(),
        "reasons": decision.reasons.iter().map(|r| r.code()).collect::<Vec<_>>(),
        "funded_amount": decision.funded_amount.map(|a| a.to_decimal()),
        "decided_at": decision.decided_at,
    })))
}

// ============================================================================
// System endpoints
// ============================================================================

async fn api_status(State(state): State<Arc<AppState>>) -> AxumJson<serde_json::Value> {
    let cards = state.engine.list_cards().await;
    let active = cards.iter().filter(|c| c.is_active()).count();
    let total_spent = cards
        .iter()
        .fold(Amount::zero(), |acc, c| acc.saturating_add(c.spent_to_date));

    AxumJson(serde_json::json!({
        "name": "Leash Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "cards": {
            "total": cards.len(),
            "active": active,
        },
        "funding": {
            "journal_entries": state.engine.ledger().journal_len().await,
            "total_funded": total_spent.to_decimal(),
        },
        "receipt_signer": state.engine.ledger().public_key(),
    }))
}

async fn api_health() -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "healthy",
    }))
}

async fn api_info() -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "name": "Leash",
        "description": "Policy-constrained payment credentials for AI agents",
        "version": env!("CARGO_PKG_VERSION"),
        "homepage": "https://www.leashpay.dev",
        "repository": "https://github.com/leashpay/leash",
        "license": "Apache-2.0",
        "endpoints": {
            "create_card": "POST /api/cards",
            "list_cards": "GET /api/cards",
            "card_status": "GET /api/cards/{id}",
            "revoke_card": "POST /api/cards/{id}/revoke",
            "authorize": "POST /api/authorize",
            "status": "GET /api/status",
            "health": "GET /api/health"
        },
        "capabilities": [
            "Ephemeral virtual cards with Luhn-valid numbers",
            "Immutable spend policies (hard limit, merchant scope, intent rule)",
            "Idempotent synchronous authorization webhook",
            "Exactly-once just-in-time funding",
            "Ed25519-signed funding receipts",
            "Fail-closed intent validation with pluggable matchers"
        ]
    }))
}
