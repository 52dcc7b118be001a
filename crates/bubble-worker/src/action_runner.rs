//! Per-action-name runner pool: one per advertised action kind, holding the
//! validated Factory and the live instance for every in-flight runner id.
//!
//! Grounded on `worker/runner.go`'s `runner{name, conf, procsLocker, procs}`.
//! `procs` stores `Arc<dyn Action>` rather than a bare boxed instance so a
//! concurrent `Cancel` RPC can reach the same instance an `execute` call is
//! still running against, per [`bubble_actions::Action`]'s `&self` methods.

use std::sync::Arc;

use bubble_actions::{Action, ActionFactory};
use bubble_env::Env;
use dashmap::DashMap;

use crate::error::WorkerError;

pub struct ActionRunner {
    name: String,
    factory: Box<dyn ActionFactory>,
    config_b64: String,
    procs: DashMap<u64, Arc<dyn Action>>,
}

impl ActionRunner {
    pub fn new(name: String, factory: Box<dyn ActionFactory>, config_b64: String) -> Self {
        ActionRunner { name, factory, config_b64, procs: DashMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// base64(yaml config), advertised to the Master in `Register.supports`.
    pub fn config_b64(&self) -> &str {
        &self.config_b64
    }

    pub fn workload(&self) -> u32 {
        self.procs.len() as u32
    }

    /// Build a fresh instance, run its one-time `init` while still
    /// exclusively owned, then publish it for `cancel` to find.
    pub async fn spawn(&self, runner_id: u64, env: &mut Env) -> Result<Arc<dyn Action>, WorkerError> {
        let mut instance = self.factory.create();
        instance.init(runner_id, env).await?;
        let action: Arc<dyn Action> = Arc::from(instance);
        self.procs.insert(runner_id, action.clone());
        Ok(action)
    }

    pub fn remove(&self, runner_id: u64) {
        self.procs.remove(&runner_id);
    }

    pub async fn cancel(&self, runner_id: u64) -> Result<(), WorkerError> {
        let action = self.procs.get(&runner_id).map(|e| e.clone());
        match action {
            Some(action) => Ok(action.cancel().await?),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_tracks_the_instance_until_removed() {
        let factory = bubble_actions::create("shell").unwrap();
        let runner = ActionRunner::new("shell".into(), factory, String::new());
        assert_eq!(runner.workload(), 0);

        let mut env = Env::new();
        let runner_id = bubble_env::next_id();
        runner.spawn(runner_id, &mut env).await.unwrap();
        assert_eq!(runner.workload(), 1);

        runner.remove(runner_id);
        assert_eq!(runner.workload(), 0);
    }

    #[tokio::test]
    async fn cancel_on_an_unknown_runner_id_is_a_no_op() {
        let factory = bubble_actions::create("shell").unwrap();
        let runner = ActionRunner::new("shell".into(), factory, String::new());
        runner.cancel(bubble_env::next_id()).await.unwrap();
    }
}
