#![allow(dead_code)]
//! Integration-test doubles. The clock and scripted source match the
//! unit-test ones in `src/test_support.rs`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Local, TimeDelta, Utc};
use loyalty::application::accrual_client::{AccrualClient, AccrualClientConfig};
use loyalty::application::engine::LoyaltyEngine;
use loyalty::application::reconciler::{Reconciler, ReconcilerConfig};
use loyalty::domain::accrual::{AccrualError, AccrualReply, AccrualStatus};
use loyalty::domain::order::OrderNumber;
use loyalty::domain::ports::{AccrualSource, AccrualSourceRef, Stores};
use loyalty::infrastructure::in_memory::InMemoryStore;
use mockable::Clock;
use rust_decimal::Decimal;
use tokio::sync::Notify;

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => panic!("failed to convert Duration to TimeDelta: {error}"),
        };
        *self.0.lock().unwrap() += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub type Reply = Result<AccrualReply, AccrualError>;

pub fn processed(order: &str, accrual: Decimal) -> Reply {
    Ok(AccrualReply::Status {
        order: order.to_string(),
        status: AccrualStatus::Processed,
        accrual: Some(accrual),
    })
}

pub fn invalid(order: &str) -> Reply {
    Ok(AccrualReply::Status {
        order: order.to_string(),
        status: AccrualStatus::Invalid,
        accrual: None,
    })
}

pub fn rate_limited(secs: u64) -> Reply {
    Ok(AccrualReply::RateLimited {
        retry_after: Some(Duration::from_secs(secs)),
    })
}

/// Replays queued replies in order, then repeats `fallback` forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(fallback: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualSource for ScriptedSource {
    async fn fetch(&self, _number: &OrderNumber) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// A source whose queries never complete. `entered` fires once a query
/// is in flight.
#[derive(Default)]
pub struct BlockingSource {
    pub entered: Notify,
}

#[async_trait]
impl AccrualSource for BlockingSource {
    async fn fetch(&self, _number: &OrderNumber) -> Reply {
        self.entered.notify_one();
        std::future::pending().await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<MutableClock>,
    pub engine: LoyaltyEngine,
    pub reconciler: Arc<Reconciler>,
}

pub fn harness(source: AccrualSourceRef) -> Harness {
    harness_with(source, AccrualClientConfig::default())
}

pub fn harness_with(source: AccrualSourceRef, client_config: AccrualClientConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(MutableClock::new(Utc::now()));
    let stores = Stores::from_backend(store.clone());
    let engine = LoyaltyEngine::new(&stores, clock.clone());
    let client = Arc::new(AccrualClient::new(source, clock.clone(), client_config));
    let reconciler = Arc::new(Reconciler::new(
        stores.orders.clone(),
        client,
        clock.clone(),
        ReconcilerConfig {
            tick_interval: Duration::from_millis(20),
            batch_size: 100,
        },
    ));
    Harness {
        store,
        clock,
        engine,
        reconciler,
    }
}

/// How the fake authority answers for one order number.
#[derive(Clone, Debug)]
pub enum FakeReply {
    /// `200` with `PROCESSED` and the given raw JSON accrual.
    Processed(&'static str),
    /// `200` with `INVALID`.
    Invalid,
    NoContent,
    /// `429`, with `Retry-After` when seconds are given.
    RateLimited(Option<u64>),
    /// `500` with a plain-text body.
    ServerError,
}

#[derive(Clone)]
struct AuthorityState {
    fallback: FakeReply,
    overrides: Arc<HashMap<String, FakeReply>>,
}

async fn order_status(
    State(state): State<AuthorityState>,
    Path(number): Path<String>,
) -> Response {
    let reply = state
        .overrides
        .get(&number)
        .unwrap_or(&state.fallback)
        .clone();
    let json = |body: String| ([(header::CONTENT_TYPE, "application/json")], body).into_response();
    match reply {
        FakeReply::Processed(accrual) => json(format!(
            r#"{{"order":"{number}","status":"PROCESSED","accrual":{accrual}}}"#
        )),
        FakeReply::Invalid => json(format!(r#"{{"order":"{number}","status":"INVALID"}}"#)),
        FakeReply::NoContent => StatusCode::NO_CONTENT.into_response(),
        FakeReply::RateLimited(Some(secs)) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs.to_string())],
        )
            .into_response(),
        FakeReply::RateLimited(None) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        FakeReply::ServerError => {
            (StatusCode::INTERNAL_SERVER_ERROR, "authority unavailable").into_response()
        }
    }
}

/// Serves `GET /api/orders/{number}` on a background runtime. Every order is
/// reported `PROCESSED` with `accrual`.
pub fn spawn_fake_authority(accrual: &'static str) -> SocketAddr {
    spawn_scripted_authority(FakeReply::Processed(accrual), Vec::new())
}

/// Like [`spawn_fake_authority`], with per-order replies taking precedence
/// over `fallback`.
pub fn spawn_scripted_authority(
    fallback: FakeReply,
    overrides: impl IntoIterator<Item = (&'static str, FakeReply)>,
) -> SocketAddr {
    let state = AuthorityState {
        fallback,
        overrides: Arc::new(
            overrides
                .into_iter()
                .map(|(number, reply)| (number.to_string(), reply))
                .collect(),
        ),
    };
    let app = Router::new()
        .route("/api/orders/{number}", get(order_status))
        .with_state(state);

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    rx.recv().unwrap()
}
