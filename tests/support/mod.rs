//! In-process stand-in for the dashboard backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct BackendState {
    status: Vec<Reply>,
    checkout: Vec<Reply>,
    portal: Vec<Reply>,
    authorization: Vec<String>,
    checkout_bodies: Vec<serde_json::Value>,
    hits: usize,
}

/// Scripted backend. Each endpoint replies with its queued replies in
/// order, repeating the last one once the queue runs dry.
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().status.push(reply);
        self
    }

    pub fn checkout(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().checkout.push(reply);
        self
    }

    pub fn portal(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().portal.push(reply);
        self
    }

    pub fn authorization_headers(&self) -> Vec<String> {
        self.state.lock().unwrap().authorization.clone()
    }

    pub fn checkout_bodies(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().checkout_bodies.clone()
    }

    pub fn hits(&self) -> usize {
        self.state.lock().unwrap().hits
    }

    /// Serve on an ephemeral loopback port and return the base URL.
    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/api/subscription/status", get(status))
            .route("/api/stripe/create-checkout-session", post(checkout))
            .route("/api/stripe/create-portal-session", post(portal))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn record(&self, headers: &HeaderMap) {
        let mut state = self.state.lock().unwrap();
        state.hits += 1;
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            state.authorization.push(value.to_str().unwrap().to_string());
        }
    }

    fn next(&self, pick: fn(&mut BackendState) -> &mut Vec<Reply>) -> Reply {
        let mut state = self.state.lock().unwrap();
        let queue = pick(&mut *state);
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue
                .first()
                .cloned()
                .unwrap_or_else(|| Reply::raw(404, ""))
        }
    }
}

async fn respond(reply: Reply) -> impl IntoResponse {
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }
    (
        StatusCode::from_u16(reply.status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
}

async fn status(State(backend): State<Backend>, headers: HeaderMap) -> impl IntoResponse {
    backend.record(&headers);
    respond(backend.next(|s| &mut s.status)).await
}

async fn checkout(
    State(backend): State<Backend>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    backend.record(&headers);
    if let Ok(value) = serde_json::from_str(&body) {
        backend.state.lock().unwrap().checkout_bodies.push(value);
    }
    respond(backend.next(|s| &mut s.checkout)).await
}

async fn portal(State(backend): State<Backend>, headers: HeaderMap) -> impl IntoResponse {
    backend.record(&headers);
    respond(backend.next(|s| &mut s.portal)).await
}

/// Status body for a user partway through a trial.
pub fn trial_body(days_remaining: u32, leads_today: u32) -> serde_json::Value {
    serde_json::json!({
        "plan": "trial",
        "hasActiveSubscription": false,
        "isInTrial": true,
        "isTrialExpired": false,
        "daysRemaining": days_remaining,
        "trialEndsAt": "2026-11-01T00:00:00Z",
        "usage": usage_body(leads_today, 20)
    })
}

/// Status body for a paying user.
pub fn pro_body() -> serde_json::Value {
    serde_json::json!({
        "plan": "pro",
        "hasActiveSubscription": true,
        "currentPeriodEnd": "2026-11-19T00:00:00Z",
        "usage": usage_body(50, -1)
    })
}

pub fn usage_body(leads_today: u32, leads_limit: i64) -> serde_json::Value {
    serde_json::json!({
        "leadsCreatedToday": leads_today,
        "leadsLimitPerDay": leads_limit,
        "totalProperties": 3,
        "propertiesLimit": 10,
        "valuationLookupsToday": 1,
        "valuationLookupsLimitPerDay": 5,
        "aiScoringCallsToday": 0,
        "aiScoringLimitPerDay": 10,
        "messagingAllowed": true
    })
}
