//! Round-trips a call through a real `axum` server and the `reqwest` client,
//! the same shape as typical client/server RPC integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::call::WorkerApi;
use crate::client::HttpAsyncCall;
use crate::error::ProtoError;
use crate::server::serve_worker;
use crate::types::*;

struct EchoWorker;

#[async_trait]
impl WorkerApi for EchoWorker {
    async fn execute(&self, _req: ExecuteRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn cancel(&self, _req: CancelRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn clean(&self, _req: CleanRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn before_send(&self, _req: BeforeSendRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn before_receive(&self, _req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn send(&self, _req: SendRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn receive(&self, _req: ReceiveRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::ok())
    }
    async fn after_receive(&self, _req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
        Ok(Ack::err("rejected"))
    }
}

#[tokio::test]
async fn execute_round_trips_through_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = serve_worker(Arc::new(EchoWorker));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let base = format!("http://{addr}/").parse().unwrap();
    let client = HttpAsyncCall::new(base);

    let ack = client
        .execute(ExecuteRequest {
            action: "shell".into(),
            master_id: 1,
            last_worker_id: 0,
            last_worker_base: String::new(),
            runner_id: 42,
            disk: String::new(),
            script_b64: String::new(),
            variables_b64: String::new(),
            target: String::new(),
            env_b64: String::new(),
        })
        .await
        .unwrap();
    assert!(ack.ok);

    let ack = client.after_receive(AfterReceiveRequest { runner_id: 42 }).await.unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.error.as_deref(), Some("rejected"));
}
