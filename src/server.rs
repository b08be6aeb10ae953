//! HTTP trigger that authorizes the mailbox and starts the scheduler
//!
//! `GET /` is fire-and-forget: the first call spawns a startup task that
//! runs the authorization check and then finishes startup (label resolution,
//! scheduler launch) in the background. The handler only waits for the
//! authorization outcome; dropping the request leaves the startup task alone.
//! Errors that make the responder useless are sent on the fatal channel so
//! the binary can shut down and exit non-zero.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::auth::MailboxConnector;
use crate::client::GmailClient;
use crate::composer::ReplyComposer;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::label_resolver::LabelResolver;
use crate::scheduler::{IntervalBounds, Scheduler, SchedulerHandle};
use crate::triage::TriageLoop;

/// Lifecycle of the trigger, as reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Idle,
    Starting,
    Running,
    Stopped,
}

enum TriggerState {
    Idle,
    /// Startup task in flight, aborted if shutdown wins the race
    Starting(AbortHandle),
    Running(SchedulerHandle),
    Stopped,
}

impl TriggerState {
    fn status(&self) -> TriggerStatus {
        match self {
            TriggerState::Idle => TriggerStatus::Idle,
            TriggerState::Starting(_) => TriggerStatus::Starting,
            TriggerState::Running(_) => TriggerStatus::Running,
            TriggerState::Stopped => TriggerStatus::Stopped,
        }
    }
}

/// Shared state behind the trigger routes
pub struct Responder {
    config: Config,
    bounds: IntervalBounds,
    connector: Arc<dyn MailboxConnector>,
    state: Mutex<TriggerState>,
    fatal_tx: mpsc::UnboundedSender<GmailError>,
}

impl Responder {
    /// Interval bounds are checked here so a bad config fails before serving
    pub fn new(
        config: Config,
        connector: Arc<dyn MailboxConnector>,
        fatal_tx: mpsc::UnboundedSender<GmailError>,
    ) -> Result<Self> {
        let bounds = IntervalBounds::new(
            config.schedule.min_interval_secs,
            config.schedule.max_interval_secs,
        )?;
        Ok(Self {
            config,
            bounds,
            connector,
            state: Mutex::new(TriggerState::Idle),
            fatal_tx,
        })
    }

    pub async fn status(&self) -> TriggerStatus {
        self.state.lock().await.status()
    }

    /// Ticks started by the scheduler, zero until it runs
    pub async fn ticks(&self) -> u64 {
        match &*self.state.lock().await {
            TriggerState::Running(handle) => handle.ticks(),
            _ => 0,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.config.schedule.shutdown_grace()
    }

    /// Stop the scheduler or a pending startup and refuse any later trigger
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, TriggerState::Stopped);
        match previous {
            TriggerState::Running(mut handle) => {
                info!("Stopping scheduler");
                handle.stop().await;
            }
            TriggerState::Starting(startup) => {
                info!("Abandoning startup in progress");
                startup.abort();
            }
            TriggerState::Idle | TriggerState::Stopped => {}
        }
    }

    fn raise_fatal(&self, err: GmailError) {
        if self.fatal_tx.send(err).is_err() {
            warn!("Fatal error raised with nobody listening");
        }
    }

    async fn reset_unless_stopped(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, TriggerState::Stopped) {
            *state = TriggerState::Idle;
        }
    }

    /// Authorize, report the outcome on `authorized`, then activate.
    /// Runs detached from the request that spawned it.
    async fn start_up(self: Arc<Self>, authorized: oneshot::Sender<bool>) {
        match self.connector.connect().await {
            Ok(client) => {
                let _ = authorized.send(true);
                self.activate(client).await;
            }
            Err(e) => {
                error!("Authorization failed: {}", e);
                self.reset_unless_stopped().await;
                self.raise_fatal(e);
                let _ = authorized.send(false);
            }
        }
    }

    /// Resolve the label and launch the scheduler
    async fn activate(self: Arc<Self>, client: Arc<dyn GmailClient>) {
        let resolver = LabelResolver::new(Arc::clone(&client), self.config.label.visibility());
        let label_id = match resolver.resolve_label(&self.config.label.name).await {
            Ok(resolution) => resolution.into_id(),
            Err(e) => {
                error!("Could not resolve label '{}': {}", self.config.label.name, e);
                self.reset_unless_stopped().await;
                self.raise_fatal(e);
                return;
            }
        };

        let composer = ReplyComposer::new(&self.config.reply.from, &self.config.reply.body);
        let triage = Arc::new(TriageLoop::new(client, composer, label_id));

        let mut state = self.state.lock().await;
        if matches!(*state, TriggerState::Stopped) {
            info!("Shutdown requested during startup, scheduler not started");
            return;
        }
        let handle = Scheduler::new(triage, self.bounds, self.config.schedule.shutdown_grace()).start();
        *state = TriggerState::Running(handle);
    }
}

pub fn router(responder: Arc<Responder>) -> Router {
    Router::new()
        .route("/", get(trigger))
        .route("/health", get(health))
        .with_state(responder)
}

/// Bind, serve until `shutdown` resolves, then stop the scheduler
pub async fn serve<F>(responder: Arc<Responder>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Trigger listening on http://{}", listener.local_addr()?);
    serve_on(responder, listener, shutdown).await
}

/// Serve on an already bound listener.
///
/// Once `shutdown` resolves the responder is stopped first, which releases
/// any request still waiting on authorization. Connections that stay open
/// longer than the shutdown grace period are dropped.
pub async fn serve_on<F>(
    responder: Arc<Responder>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let grace = responder.shutdown_grace();
    let (draining_tx, mut draining_rx) = watch::channel(false);

    let stopping = Arc::clone(&responder);
    let signal = async move {
        shutdown.await;
        info!("Shutdown requested, stopping responder");
        stopping.shutdown().await;
        let _ = draining_tx.send(true);
    };

    let server = axum::serve(listener, router(Arc::clone(&responder)))
        .with_graceful_shutdown(signal)
        .into_future();

    let serve_result = tokio::select! {
        result = server => result,
        _ = async {
            let draining = draining_rx.wait_for(|draining| *draining).await.is_ok();
            if draining {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                "Open connections did not close within {}s, dropping them",
                grace.as_secs()
            );
            Ok(())
        }
    };

    // covers the server failing before the signal fired
    responder.shutdown().await;
    serve_result?;
    Ok(())
}

async fn trigger(State(responder): State<Arc<Responder>>) -> Response {
    let authorized = {
        let mut state = responder.state.lock().await;
        match *state {
            TriggerState::Idle => {
                let (authorized_tx, authorized_rx) = oneshot::channel();
                let startup = tokio::spawn(Arc::clone(&responder).start_up(authorized_tx));
                *state = TriggerState::Starting(startup.abort_handle());
                authorized_rx
            }
            TriggerState::Stopped => {
                return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
            }
            TriggerState::Starting(_) => {
                return (StatusCode::OK, "Vacation responder starting").into_response();
            }
            TriggerState::Running(_) => {
                return (StatusCode::OK, "Vacation responder already active").into_response();
            }
        }
    };

    match authorized.await {
        Ok(true) => (StatusCode::OK, "Vacation responder started").into_response(),
        Ok(false) => (StatusCode::INTERNAL_SERVER_ERROR, "Authorization failed").into_response(),
        // startup task aborted by shutdown
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response(),
    }
}

async fn health(State(responder): State<Arc<Responder>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "responder": responder.status().await,
        "ticks": responder.ticks().await,
    });
    (StatusCode::OK, Json(body))
}
