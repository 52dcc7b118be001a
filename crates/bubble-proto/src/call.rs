//! The two RPC surfaces, abstracted as async traits so `bubble-master` and
//! `bubble-worker` depend only on a shape, not on the HTTP transport that
//! happens to implement it.

use async_trait::async_trait;

use crate::error::ProtoError;
use crate::types::*;

/// Calls a Worker makes on the Master.
#[async_trait]
pub trait MasterApi: Send + Sync {
    async fn register(&self, req: RegisterRequest) -> Result<Ack, ProtoError>;
    async fn on_finish(&self, req: OnFinishRequest) -> Result<Ack, ProtoError>;
    async fn on_progress(&self, req: OnProgressRequest) -> Result<Ack, ProtoError>;
    async fn on_broadcast(&self, req: OnBroadcastRequest) -> Result<Ack, ProtoError>;
}

/// Calls the Master (or a peer Worker, for handoff) makes on a Worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn execute(&self, req: ExecuteRequest) -> Result<Ack, ProtoError>;
    async fn cancel(&self, req: CancelRequest) -> Result<Ack, ProtoError>;
    async fn clean(&self, req: CleanRequest) -> Result<Ack, ProtoError>;
    async fn before_send(&self, req: BeforeSendRequest) -> Result<Ack, ProtoError>;
    async fn before_receive(&self, req: BeforeReceiveRequest) -> Result<Ack, ProtoError>;
    async fn send(&self, req: SendRequest) -> Result<Ack, ProtoError>;
    async fn receive(&self, req: ReceiveRequest) -> Result<Ack, ProtoError>;
    async fn after_receive(&self, req: AfterReceiveRequest) -> Result<Ack, ProtoError>;
}
