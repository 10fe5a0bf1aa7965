//! Application state and router builder
//!
//! # Example
//!
//! ```no_run
//! use sonara_api::{app::{build_router, AppState}, config::Config};
//! use sonara_shared::clock::SystemClock;
//! use sonara_shared::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let state = AppState::new(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock))?;
//! let app = build_router(state);
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::middleware::{entitlement::require_entitlement, session::require_session};
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use sonara_shared::auth::jwt::{JwtError, TokenService};
use sonara_shared::billing::{EntitlementGate, LedgerPolicy, PaymentReconciler, SubscriptionLedger};
use sonara_shared::clock::Clock;
use sonara_shared::store::{BillingStore, UserStore};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor; every field
/// is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,

    /// Identity persistence
    pub users: Arc<dyn UserStore>,

    /// Subscription and payment persistence
    pub billing: Arc<dyn BillingStore>,

    pub tokens: TokenService,
    pub ledger: SubscriptionLedger,
    pub reconciler: PaymentReconciler,
    pub gate: EntitlementGate,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the services around one store and one clock
    ///
    /// # Errors
    ///
    /// Returns `JwtError::MissingSecret` if no signing secret is configured,
    /// and `JwtError::CreateError` for unusable token lifetimes.
    pub fn new<S>(config: Config, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self, JwtError>
    where
        S: UserStore + BillingStore + 'static,
    {
        let tokens = TokenService::with_lifetimes(
            &config.jwt.secret,
            clock.clone(),
            Duration::minutes(config.jwt.access_ttl_minutes),
            Duration::days(config.jwt.refresh_ttl_days),
        )?;

        let users: Arc<dyn UserStore> = store.clone();
        let billing: Arc<dyn BillingStore> = store;

        let policy =
            LedgerPolicy::from_days(config.billing.trial_days, config.billing.billing_period_days);
        let ledger = SubscriptionLedger::new(billing.clone(), clock.clone(), policy);
        let reconciler = PaymentReconciler::new(billing.clone(), ledger.clone());
        let gate = EntitlementGate::new(ledger.clone());

        Ok(Self {
            config: Arc::new(config),
            users,
            billing,
            tokens,
            ledger,
            reconciler,
            gate,
            clock,
        })
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                        # Health check (public)
/// └── /v1/
///     ├── /auth/                     # Public
///     │   ├── POST /register
///     │   ├── POST /login
///     │   └── POST /refresh
///     ├── GET  /me                   # Session
///     ├── /subscriptions/            # Session
///     │   ├── GET  /                 # History
///     │   ├── POST /                 # Purchase
///     │   ├── POST /trial
///     │   ├── POST /cancel
///     │   └── GET  /me
///     ├── /payments/
///     │   ├── POST /                 # Session: record pending payment
///     │   └── POST /callback         # Public: provider callback
///     └── /premium/                  # Session + entitlement
///         └── GET /lessons
/// ```
///
/// # Middleware Stack
///
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
/// 3. Session, then entitlement (per route group)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    let me_routes = Router::new()
        .route("/me", get(routes::users::me))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let subscription_routes = Router::new()
        .route(
            "/",
            get(routes::subscriptions::history).post(routes::subscriptions::purchase),
        )
        .route("/trial", post(routes::subscriptions::start_trial))
        .route("/cancel", post(routes::subscriptions::cancel))
        .route("/me", get(routes::subscriptions::current))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let payment_routes = Router::new()
        .route("/", post(routes::payments::create_payment))
        .route_layer(from_fn_with_state(state.clone(), require_session))
        .route("/callback", post(routes::payments::callback));

    // Layers run outermost-last: the session is established before the
    // entitlement check reads it.
    let premium_routes = Router::new()
        .route("/lessons", get(routes::premium::list_lessons))
        .route_layer(from_fn_with_state(state.clone(), require_entitlement))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(me_routes)
        .nest("/subscriptions", subscription_routes)
        .nest("/payments", payment_routes)
        .nest("/premium", premium_routes);

    let wildcard = state.config.api.cors_origins.iter().any(|o| o == "*");
    let cors = if wildcard && !state.config.api.production {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter(|origin| origin.as_str() != "*")
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
