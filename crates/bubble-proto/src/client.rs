//! `reqwest`-backed implementation of [`MasterApi`]/[`WorkerApi`], one POST
//! per call under `/rpc/<name>`.

use reqwest::{Client, Url};

use crate::call::{MasterApi, WorkerApi};
use crate::error::ProtoError;
use crate::types::*;

#[derive(Clone)]
pub struct HttpAsyncCall {
    client: Client,
    base: Url,
}

impl HttpAsyncCall {
    pub fn new(base: Url) -> Self {
        HttpAsyncCall { client: Client::new(), base }
    }

    async fn post<Req: serde::Serialize + Sync, Resp: serde::de::DeserializeOwned>(
        &self,
        rpc: &str,
        req: &Req,
    ) -> Result<Resp, ProtoError> {
        let url = self.base.join(&format!("rpc/{rpc}")).expect("rpc path is always valid");
        tracing::debug!(%url, "async call");
        let resp = self.client.post(url).json(req).send().await?.error_for_status()?;
        Ok(resp.json::<Resp>().await?)
    }
}

#[async_trait::async_trait]
impl MasterApi for HttpAsyncCall {
    async fn register(&self, req: RegisterRequest) -> Result<Ack, ProtoError> {
        self.post("register", &req).await
    }

    async fn on_finish(&self, req: OnFinishRequest) -> Result<Ack, ProtoError> {
        self.post("on_finish", &req).await
    }

    async fn on_progress(&self, req: OnProgressRequest) -> Result<Ack, ProtoError> {
        self.post("on_progress", &req).await
    }

    async fn on_broadcast(&self, req: OnBroadcastRequest) -> Result<Ack, ProtoError> {
        self.post("on_broadcast", &req).await
    }
}

#[async_trait::async_trait]
impl WorkerApi for HttpAsyncCall {
    async fn execute(&self, req: ExecuteRequest) -> Result<Ack, ProtoError> {
        self.post("execute", &req).await
    }

    async fn cancel(&self, req: CancelRequest) -> Result<Ack, ProtoError> {
        self.post("cancel", &req).await
    }

    async fn clean(&self, req: CleanRequest) -> Result<Ack, ProtoError> {
        self.post("clean", &req).await
    }

    async fn before_send(&self, req: BeforeSendRequest) -> Result<Ack, ProtoError> {
        self.post("before_send", &req).await
    }

    async fn before_receive(&self, req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
        self.post("before_receive", &req).await
    }

    async fn send(&self, req: SendRequest) -> Result<Ack, ProtoError> {
        self.post("send", &req).await
    }

    async fn receive(&self, req: ReceiveRequest) -> Result<Ack, ProtoError> {
        self.post("receive", &req).await
    }

    async fn after_receive(&self, req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
        self.post("after_receive", &req).await
    }
}
