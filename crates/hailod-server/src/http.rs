//! Read-only HTTP status server.
//!
//! A single route, `GET /v1/device/status`, mirrors the `status` payload of
//! the socket protocol so CLIs and monitoring see every loaded model across
//! the host without speaking the device protocol. The handler reads the
//! executor's watch snapshot; it never enqueues, so it stays responsive while
//! an inference is in flight. Every other route or method is a 404 with a
//! small JSON body.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use flume::Sender;
use hailod_core::{status_response, Command, DaemonInfo, LoadedModel};
use salvo::catcher::Catcher;
use salvo::conn::tcp::TcpAcceptor;
use salvo::prelude::*;
use tokio::sync::watch;

/// State injected into the status handler.
#[derive(Clone)]
pub struct StatusState {
    pub info: Arc<DaemonInfo>,
    pub snapshot: watch::Receiver<Vec<LoadedModel>>,
    pub queue: Sender<Command>,
}

#[handler]
async fn device_status(depot: &mut Depot, res: &mut Response) {
    let state = depot.obtain::<StatusState>().expect("status state injected");
    let models = state.snapshot.borrow().clone();
    let payload = status_response(&state.info, &models, state.queue.len());
    res.render(Json(payload));
}

#[handler]
async fn not_found(res: &mut Response, ctrl: &mut FlowCtrl) {
    if matches!(
        res.status_code,
        Some(StatusCode::NOT_FOUND) | Some(StatusCode::METHOD_NOT_ALLOWED)
    ) {
        res.status_code(StatusCode::NOT_FOUND);
        res.render(Json(serde_json::json!({ "error": "not found" })));
        ctrl.skip_rest();
    }
}

fn service(state: StatusState) -> Service {
    let router = Router::new()
        .hoop(salvo::affix_state::inject(state))
        .push(Router::with_path("v1/device/status").get(device_status));
    Service::new(router).catcher(Catcher::default().hoop(not_found))
}

/// Bind the status listener. Failures here are startup errors.
pub async fn bind(addr: SocketAddr) -> Result<TcpAcceptor> {
    TcpListener::new(addr)
        .try_bind()
        .await
        .with_context(|| format!("binding HTTP status server on {addr}"))
}

/// Serve until the task is aborted at shutdown.
pub async fn serve(acceptor: TcpAcceptor, state: StatusState) {
    Server::new(acceptor).serve(service(state)).await;
}
