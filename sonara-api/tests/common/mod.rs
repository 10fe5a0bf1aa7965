//! Common test utilities for router tests
//!
//! Each `TestContext` owns a fresh in-memory store and a manual clock, so tests
//! run without PostgreSQL and can move time to exact boundaries.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use sonara_api::app::{build_router, AppState};
use sonara_api::config::Config;
use sonara_shared::clock::{Clock, ManualClock};
use sonara_shared::models::user::{CreateUser, User};
use sonara_shared::store::{MemoryStore, UserStore};
use sonara_shared::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tower::Service as _;

pub const TEST_SECRET: &str = "router-test-secret-at-least-32-bytes";
pub const TEST_PASSWORD: &str = "correct horse battery";

/// Test context containing the router and the handles behind it
pub struct TestContext {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

/// Instant every context starts at
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("DATABASE_URL", "postgresql://unused/sonara_test"),
        ("JWT_SECRET", TEST_SECRET),
        ("PAYMENT_CHECKOUT_URL", "https://pay.test/checkout/"),
    ]
    .into_iter()
    .collect();

    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let state = AppState::new(test_config(), store.clone(), clock.clone()).unwrap();
        let app = build_router(state.clone());

        Self {
            app,
            state,
            store,
            clock,
        }
    }

    /// Inserts a user directly, bypassing password hashing
    pub async fn create_user(&self, email: &str) -> User {
        self.store
            .create_user(
                CreateUser {
                    email: email.to_string(),
                    password_hash: "test_hash".to_string(),
                    first_name: Some("Test".to_string()),
                    last_name: Some("User".to_string()),
                    locale: None,
                },
                self.clock.now(),
            )
            .await
            .unwrap()
    }

    /// Fresh access token signed at the current clock time
    pub fn access_token(&self, user_id: UserId) -> String {
        self.state.tokens.issue_access_token(user_id).unwrap().token
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Sends one request and returns the status and the parsed JSON body
    ///
    /// A body that is not JSON comes back as `Value::Null`.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.call(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().call(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}
