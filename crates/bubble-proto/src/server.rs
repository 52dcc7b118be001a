//! `axum` routers exposing a [`MasterApi`]/[`WorkerApi`] implementation over
//! the same `/rpc/<name>` paths [`crate::client::HttpAsyncCall`] posts to.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::call::{MasterApi, WorkerApi};
use crate::types::*;

pub fn serve_master(api: Arc<dyn MasterApi>) -> Router {
    async fn register(State(api): State<Arc<dyn MasterApi>>, Json(req): Json<RegisterRequest>) -> Json<Ack> {
        Json(api.register(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn on_finish(State(api): State<Arc<dyn MasterApi>>, Json(req): Json<OnFinishRequest>) -> Json<Ack> {
        Json(api.on_finish(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn on_progress(State(api): State<Arc<dyn MasterApi>>, Json(req): Json<OnProgressRequest>) -> Json<Ack> {
        Json(api.on_progress(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn on_broadcast(State(api): State<Arc<dyn MasterApi>>, Json(req): Json<OnBroadcastRequest>) -> Json<Ack> {
        Json(api.on_broadcast(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }

    Router::new()
        .route("/rpc/register", post(register))
        .route("/rpc/on_finish", post(on_finish))
        .route("/rpc/on_progress", post(on_progress))
        .route("/rpc/on_broadcast", post(on_broadcast))
        .with_state(api)
}

pub fn serve_worker(api: Arc<dyn WorkerApi>) -> Router {
    async fn execute(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<ExecuteRequest>) -> Json<Ack> {
        Json(api.execute(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn cancel(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<CancelRequest>) -> Json<Ack> {
        Json(api.cancel(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn clean(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<CleanRequest>) -> Json<Ack> {
        Json(api.clean(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn before_send(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<BeforeSendRequest>) -> Json<Ack> {
        Json(api.before_send(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn before_receive(
        State(api): State<Arc<dyn WorkerApi>>,
        Json(req): Json<BeforeReceiveRequest>,
    ) -> Json<Ack> {
        Json(api.before_receive(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn send(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<SendRequest>) -> Json<Ack> {
        Json(api.send(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn receive(State(api): State<Arc<dyn WorkerApi>>, Json(req): Json<ReceiveRequest>) -> Json<Ack> {
        Json(api.receive(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }
    async fn after_receive(
        State(api): State<Arc<dyn WorkerApi>>,
        Json(req): Json<AfterReceiveRequest>,
    ) -> Json<Ack> {
        Json(api.after_receive(req).await.unwrap_or_else(|e| Ack::err(e.to_string())))
    }

    Router::new()
        .route("/rpc/execute", post(execute))
        .route("/rpc/cancel", post(cancel))
        .route("/rpc/clean", post(clean))
        .route("/rpc/before_send", post(before_send))
        .route("/rpc/before_receive", post(before_receive))
        .route("/rpc/send", post(send))
        .route("/rpc/receive", post(receive))
        .route("/rpc/after_receive", post(after_receive))
        .with_state(api)
}
