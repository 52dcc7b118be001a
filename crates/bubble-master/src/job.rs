//! One named job: its current script, the Runners it has produced, and its
//! own per-directory Cron (each fire starts a fresh Runner against the
//! job's current script).
//!
//! Grounded on `master/job.go`: `job{master,id,name,script,locker,runners,
//! cron}`, `Trigger()` spawning a fresh Runner, `Dir()` =
//! `<exeDir>/jobs/<name>@<id_hex>/`, and the job acting as its own
//! repeating cron job (`cron.NewCron(func() cron.ICronJob { return j }, ...)`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bubble_cron::{Cron, CronJob, JobFactory, Type as CronType};
use tokio::sync::Mutex;

use crate::error::MasterError;
use crate::master::Master;
use crate::runner::Runner;

const BUBBLEFILE: &str = ".bubble.yml";
const CRONFILE: &str = ".bubble.crons";
const DEFAULT_SCRIPT: &[u8] = b"[]\n";

pub const PAGE_SIZE: usize = 20;

pub struct Job {
    id: u64,
    name: String,
    dir: PathBuf,
    master: Weak<Master>,
    script: Mutex<Vec<u8>>,
    runners: Mutex<BTreeMap<u64, Arc<Runner>>>,
    cron: Mutex<Option<Arc<Cron>>>,
}

impl Job {
    pub fn dir_for(root: &Path, name: &str, id: u64) -> PathBuf {
        root.join(format!("{name}@{}", bubble_env::to_hex(id)))
    }

    /// Create a brand-new job directory seeded with an empty script.
    pub async fn create(root: &Path, name: &str, master: Weak<Master>) -> Result<Arc<Self>, MasterError> {
        let id = bubble_env::next_id();
        let dir = Self::dir_for(root, name, id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(BUBBLEFILE), DEFAULT_SCRIPT).await?;
        Self::load(dir, id, name.to_string(), master).await
    }

    /// Reconstruct a job from an existing `<name>@<id_hex>` directory:
    /// load its script, rehydrate every prior Runner subdirectory, and
    /// re-arm its Cron.
    pub async fn load(dir: PathBuf, id: u64, name: String, master: Weak<Master>) -> Result<Arc<Self>, MasterError> {
        let script = tokio::fs::read(dir.join(BUBBLEFILE)).await.unwrap_or_else(|_| DEFAULT_SCRIPT.to_vec());

        let mut runners = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(runner_id) = entry.file_name().to_str().and_then(bubble_env::from_hex) else {
                continue;
            };
            match Runner::load(entry.path(), runner_id, name.clone()).await {
                Ok(runner) => {
                    runners.insert(runner_id, Arc::new(runner));
                }
                Err(err) => tracing::warn!(?err, runner = runner_id, "failed to reload runner, skipping"),
            }
        }

        let job = Arc::new(Job {
            id,
            name,
            dir: dir.clone(),
            master,
            script: Mutex::new(script),
            runners: Mutex::new(runners),
            cron: Mutex::new(None),
        });

        let factory: JobFactory = {
            let job = job.clone();
            Arc::new(move || Box::new(JobTrigger { job: job.clone() }) as Box<dyn CronJob>)
        };
        let cron = Cron::load(factory, dir.join(CRONFILE)).await;
        cron.start_all().await;
        *job.cron.lock().await = Some(cron);

        Ok(job)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn script(&self) -> Vec<u8> {
        self.script.lock().await.clone()
    }

    pub async fn set_script(&self, bytes: Vec<u8>) -> Result<(), MasterError> {
        tokio::fs::write(self.dir.join(BUBBLEFILE), &bytes).await?;
        *self.script.lock().await = bytes;
        Ok(())
    }

    pub async fn add_cron(&self, t: CronType) -> u64 {
        self.cron.lock().await.as_ref().expect("cron is set during load").add(t).await
    }

    pub async fn remove_cron(&self, id: u64) -> Result<(), MasterError> {
        self.cron.lock().await.as_ref().expect("cron is set during load").remove(id).await?;
        Ok(())
    }

    pub async fn cron_ids(&self) -> Vec<u64> {
        self.cron.lock().await.as_ref().expect("cron is set during load").ids().await
    }

    /// Spawn a fresh Runner against the job's current script and kick off
    /// its command loop in the background. Returns the new runner id.
    pub async fn trigger(self: &Arc<Self>) -> Result<u64, MasterError> {
        let master = self.master.upgrade().ok_or_else(|| MasterError::JobNotFound(self.name.clone()))?;

        let runner_id = bubble_env::next_id();
        let dir = self.dir.join(bubble_env::to_hex(runner_id));
        tokio::fs::create_dir_all(&dir).await?;
        let script_bytes = self.script().await;
        tokio::fs::write(dir.join(BUBBLEFILE), &script_bytes).await?;

        let runner = Arc::new(Runner::new(runner_id, self.name.clone(), dir, &script_bytes)?);
        self.runners.lock().await.insert(runner_id, runner.clone());

        tokio::spawn(async move {
            runner.run(master).await;
        });

        Ok(runner_id)
    }

    pub async fn runner(&self, id: u64) -> Option<Arc<Runner>> {
        self.runners.lock().await.get(&id).cloned()
    }

    /// Newest-first page of runner ids, [`PAGE_SIZE`] per page.
    pub async fn list_runners(&self, page_index: usize) -> Vec<u64> {
        let runners = self.runners.lock().await;
        let mut ids: Vec<u64> = runners.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.into_iter().skip(page_index * PAGE_SIZE).take(PAGE_SIZE).collect()
    }

    /// Stop this job's cron and interrupt every still-running Runner, as
    /// when the job is deleted or the Master shuts down.
    pub async fn destroy(&self) {
        if let Some(cron) = self.cron.lock().await.as_ref() {
            cron.destroy().await;
        }
        for runner in self.runners.lock().await.values() {
            runner.interrupt().await;
        }
    }
}

struct JobTrigger {
    job: Arc<Job>,
}

impl CronJob for JobTrigger {
    fn repeat(&self) -> bool {
        true
    }

    fn execute(&mut self) {
        let job = self.job.clone();
        tokio::spawn(async move {
            if let Err(err) = job.trigger().await {
                tracing::error!(?err, job = %job.name, "cron-triggered job run failed to start");
            }
        });
    }

    fn from_bytes(&mut self, _bytes: &[u8]) {}

    fn to_bytes(&self) -> Vec<u8> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::Master;

    fn tmp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bubble-master-job-test-{label}-{}", bubble_env::next_id()))
    }

    #[tokio::test]
    async fn create_persists_an_empty_script_to_disk() {
        let dir = tmp_dir("create");
        let master = Master::new(dir.clone());
        master.create_job("demo").await.unwrap();
        let job = master.get_job("demo").unwrap();
        assert_eq!(job.script().await, DEFAULT_SCRIPT);
        assert!(job.dir().join(BUBBLEFILE).exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn creating_a_duplicate_job_name_fails() {
        let dir = tmp_dir("dup");
        let master = Master::new(dir.clone());
        master.create_job("demo").await.unwrap();
        assert!(matches!(master.create_job("demo").await, Err(MasterError::JobExists(_))));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn reloading_master_rehydrates_a_jobs_current_script() {
        let dir = tmp_dir("reload");
        {
            let master = Master::new(dir.clone());
            master.create_job("demo").await.unwrap();
            let job = master.get_job("demo").unwrap();
            job.set_script(b"- action: shell\n".to_vec()).await.unwrap();
        }

        let master = Master::new(dir.clone());
        master.load_jobs().await.unwrap();
        let job = master.get_job("demo").unwrap();
        assert_eq!(job.script().await, b"- action: shell\n");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn trigger_creates_a_runner_directory_and_registers_it() {
        let dir = tmp_dir("trigger");
        let master = Master::new(dir.clone());
        master.create_job("demo").await.unwrap();
        let job = master.get_job("demo").unwrap();

        let runner_id = job.trigger().await.unwrap();

        assert!(job.runner(runner_id).await.is_some());
        assert!(job.dir().join(bubble_env::to_hex(runner_id)).join(BUBBLEFILE).exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn list_runners_is_newest_first_and_paginated() {
        let dir = tmp_dir("page");
        let master = Master::new(dir.clone());
        master.create_job("demo").await.unwrap();
        let job = master.get_job("demo").unwrap();

        let mut ids = Vec::new();
        for _ in 0..PAGE_SIZE + 1 {
            ids.push(job.trigger().await.unwrap());
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let page0 = job.list_runners(0).await;
        assert_eq!(page0.len(), PAGE_SIZE);
        assert_eq!(page0, &ids[..PAGE_SIZE]);

        let page1 = job.list_runners(1).await;
        assert_eq!(page1, &ids[PAGE_SIZE..]);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn delete_job_removes_its_directory() {
        let dir = tmp_dir("delete");
        let master = Master::new(dir.clone());
        master.create_job("demo").await.unwrap();
        let job_dir = master.get_job("demo").unwrap().dir().to_path_buf();

        master.delete_job("demo").await.unwrap();

        assert!(master.get_job("demo").is_none());
        assert!(!job_dir.exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn deleting_an_unknown_job_fails() {
        let dir = tmp_dir("delete-missing");
        let master = Master::new(dir.clone());
        assert!(matches!(master.delete_job("nope").await, Err(MasterError::JobNotFound(_))));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
