//! Worker-to-worker disk handoff, per spec.md §4.7: when a Runner's next
//! command lands on a different Worker than the one that owns the current
//! working directory, the destination pulls it from the source before
//! running the command.
//!
//! Grounded on `worker/executor.go` (the destination's receive side),
//! `worker/provider.go` (the source's send side) and `worker/share.go`
//! (chunk size / work-folder constants). The Go original's `AfterReceive`
//! busy-spin-wait is replaced throughout with `tokio::sync::Notify` plus a
//! bounded timeout — one "how long do we wait for someone else" constant,
//! shared with `Master::select`'s bounded wait (§9 design notes).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bubble_proto::{
    AfterReceiveRequest, BeforeReceiveRequest, BeforeSendRequest, ExecuteRequest, HttpAsyncCall, ReceiveRequest,
    SendRequest, WorkerApi,
};
use dashmap::DashMap;
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{Mutex, Notify};

use crate::error::WorkerError;

pub const CHUNK_SIZE: u64 = 30 * 1024;
const WORK_FOLDER: &str = ".prov";
const WORK_FILE: &str = "streamdisk.zip";
const HANDOFF_TIMEOUT: Duration = Duration::from_secs(60);

fn runner_cwd(jobs_root: &Path, runner_id: u64) -> PathBuf {
    jobs_root.join(bubble_env::to_hex(runner_id))
}

// --- destination side: pull a handoff in ---

struct Receive {
    info: Mutex<Option<(u64, u32, String)>>,
    file: Mutex<Option<File>>,
    remaining: AtomicU32,
    ready: Notify,
    chunks_complete: Notify,
    done: Notify,
    failed: Mutex<Option<String>>,
}

impl Default for Receive {
    fn default() -> Self {
        Receive {
            info: Mutex::new(None),
            file: Mutex::new(None),
            remaining: AtomicU32::new(0),
            ready: Notify::new(),
            chunks_complete: Notify::new(),
            done: Notify::new(),
            failed: Mutex::new(None),
        }
    }
}

/// Owned by the destination Worker: drives `BeforeSend` through unpacking
/// the archive for every handoff this worker is currently receiving.
pub struct HandoffReceiver {
    dest_id: u64,
    dest_base: String,
    jobs_root: PathBuf,
    pending: DashMap<u64, Arc<Receive>>,
}

impl HandoffReceiver {
    pub fn new(dest_id: u64, dest_base: String, jobs_root: PathBuf) -> Self {
        HandoffReceiver { dest_id, dest_base, jobs_root, pending: DashMap::new() }
    }

    /// Pull `disk` from `source_base` into this runner's working directory.
    /// Drives the whole protocol and leaves the unpacked files in place.
    pub async fn pull(&self, runner_id: u64, disk: &str, source_base: &str) -> Result<(), WorkerError> {
        let source_url: reqwest::Url =
            source_base.parse().map_err(|_| WorkerError::HandoffNotFound(runner_id))?;
        let source = HttpAsyncCall::new(source_url);

        let state = Arc::new(Receive::default());
        self.pending.insert(runner_id, state.clone());
        let result = self.run_pull(runner_id, disk, &source, &state).await;
        self.pending.remove(&runner_id);
        result
    }

    async fn run_pull(
        &self,
        runner_id: u64,
        disk: &str,
        source: &HttpAsyncCall,
        state: &Arc<Receive>,
    ) -> Result<(), WorkerError> {
        let ready = state.ready.notified();
        source
            .before_send(BeforeSendRequest {
                dest_worker_id: self.dest_id,
                dest_base: self.dest_base.clone(),
                runner_id,
                disk: disk.to_string(),
            })
            .await?;
        tokio::time::timeout(HANDOFF_TIMEOUT, ready)
            .await
            .map_err(|_| WorkerError::HandoffTimeout(runner_id))?;

        let (_length, _chunks, checksum) =
            state.info.lock().await.clone().ok_or(WorkerError::HandoffNotFound(runner_id))?;

        let done = state.done.notified();
        source.send(SendRequest { dest_worker_id: self.dest_id, runner_id }).await?;
        tokio::time::timeout(HANDOFF_TIMEOUT, done)
            .await
            .map_err(|_| WorkerError::HandoffTimeout(runner_id))?;

        if let Some(reason) = state.failed.lock().await.take() {
            return Err(WorkerError::ChecksumMismatch(runner_id, checksum, reason));
        }

        let cwd = runner_cwd(&self.jobs_root, runner_id);
        let prov = cwd.join(WORK_FOLDER);
        let zip_path = prov.join(WORK_FILE);

        let bytes = tokio::fs::read(&zip_path).await?;
        let digest = hex::encode(Md5::digest(&bytes));
        if digest != checksum {
            return Err(WorkerError::ChecksumMismatch(runner_id, checksum, digest));
        }

        unzip_into(&bytes, &cwd)?;
        tokio::fs::remove_dir_all(&prov).await.ok();
        Ok(())
    }

    /// `BeforeReceive` RPC handler: stash the transfer's shape and open the
    /// destination file.
    pub async fn before_receive(
        &self,
        runner_id: u64,
        length: u64,
        chunks: u32,
        checksum: String,
    ) -> Result<(), WorkerError> {
        let state = self.pending.get(&runner_id).map(|e| e.clone()).ok_or(WorkerError::HandoffNotFound(runner_id))?;

        let cwd = runner_cwd(&self.jobs_root, runner_id);
        let prov = cwd.join(WORK_FOLDER);
        tokio::fs::create_dir_all(&prov).await?;
        let file = File::create(prov.join(WORK_FILE)).await?;
        file.set_len(length).await?;

        *state.info.lock().await = Some((length, chunks, checksum));
        *state.file.lock().await = Some(file);
        state.remaining.store(chunks, Ordering::SeqCst);
        state.ready.notify_one();
        Ok(())
    }

    /// `Receive` RPC handler: write one chunk at its offset.
    pub async fn receive(&self, runner_id: u64, index: u32, data: &[u8]) -> Result<(), WorkerError> {
        let state = self.pending.get(&runner_id).map(|e| e.clone()).ok_or(WorkerError::HandoffNotFound(runner_id))?;
        {
            let mut guard = state.file.lock().await;
            let file = guard.as_mut().ok_or(WorkerError::HandoffNotFound(runner_id))?;
            file.seek(SeekFrom::Start(index as u64 * CHUNK_SIZE)).await?;
            file.write_all(data).await?;
        }
        if state.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            state.chunks_complete.notify_one();
        }
        Ok(())
    }

    /// `AfterReceive` RPC handler: wait (bounded) for every chunk write to
    /// have landed, then release the puller in [`HandoffReceiver::pull`].
    pub async fn after_receive(&self, runner_id: u64) -> Result<(), WorkerError> {
        let state = self.pending.get(&runner_id).map(|e| e.clone()).ok_or(WorkerError::HandoffNotFound(runner_id))?;

        if state.remaining.load(Ordering::SeqCst) != 0 {
            let complete = state.chunks_complete.notified();
            if state.remaining.load(Ordering::SeqCst) != 0
                && tokio::time::timeout(HANDOFF_TIMEOUT, complete).await.is_err()
            {
                *state.failed.lock().await = Some("timed out waiting for every chunk to arrive".into());
                state.done.notify_one();
                return Err(WorkerError::HandoffTimeout(runner_id));
            }
        }

        if let Some(mut file) = state.file.lock().await.take() {
            file.flush().await.ok();
        }
        state.done.notify_one();
        Ok(())
    }
}

// --- source side: serve a handoff out ---

#[derive(Default)]
struct Send {
    go: Notify,
}

/// Owned by the source Worker: zips the requested directory and streams it
/// to the destination once it signals it is ready to receive.
pub struct HandoffSender {
    id: u64,
    jobs_root: PathBuf,
    pending: DashMap<u64, Arc<Send>>,
}

impl HandoffSender {
    pub fn new(id: u64, jobs_root: PathBuf) -> Arc<Self> {
        Arc::new(HandoffSender { id, jobs_root, pending: DashMap::new() })
    }

    /// `BeforeSend` RPC handler: zip `disk` in the background and announce
    /// it to the destination, then wait for its `Send` before streaming.
    pub fn before_send(self: &Arc<Self>, dest_worker_id: u64, dest_base: String, runner_id: u64, disk: String) {
        let state = Arc::new(Send::default());
        self.pending.insert(runner_id, state.clone());
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.prepare_and_stream(dest_worker_id, dest_base, runner_id, &disk, &state).await {
                tracing::error!(?err, runner_id, "disk handoff send failed");
            }
            this.pending.remove(&runner_id);
        });
    }

    async fn prepare_and_stream(
        &self,
        _dest_worker_id: u64,
        dest_base: String,
        runner_id: u64,
        disk: &str,
        state: &Arc<Send>,
    ) -> Result<(), WorkerError> {
        let cwd = runner_cwd(&self.jobs_root, runner_id);
        let bytes = zip_dir(cwd, disk.to_string()).await?;
        let checksum = hex::encode(Md5::digest(&bytes));
        let length = bytes.len() as u64;
        let chunks = length.div_ceil(CHUNK_SIZE).max(1) as u32;

        let dest_url: reqwest::Url =
            dest_base.parse().map_err(|_| WorkerError::HandoffNotFound(runner_id))?;
        let dest = HttpAsyncCall::new(dest_url);

        let go = state.go.notified();
        dest.before_receive(BeforeReceiveRequest {
            source_worker_id: self.id,
            runner_id,
            length,
            chunks,
            checksum,
        })
        .await?;
        tokio::time::timeout(HANDOFF_TIMEOUT, go)
            .await
            .map_err(|_| WorkerError::HandoffTimeout(runner_id))?;

        for index in 0..chunks {
            let start = (index as u64) * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(length);
            let chunk = &bytes[start as usize..end as usize];
            dest.receive(ReceiveRequest { runner_id, index, data_b64: BASE64.encode(chunk) }).await?;
        }
        dest.after_receive(AfterReceiveRequest { runner_id }).await?;
        Ok(())
    }

    /// `Send` RPC handler: the destination is ready, release the streaming
    /// loop waiting in [`HandoffSender::prepare_and_stream`].
    pub fn send(&self, runner_id: u64) -> Result<(), WorkerError> {
        let state = self.pending.get(&runner_id).map(|e| e.clone()).ok_or(WorkerError::HandoffNotFound(runner_id))?;
        state.go.notify_one();
        Ok(())
    }
}

async fn zip_dir(cwd: PathBuf, disk: String) -> Result<Vec<u8>, WorkerError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, WorkerError> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            add_to_zip(&mut writer, &cwd, &disk)?;
            writer.finish()?;
        }
        Ok(buf)
    })
    .await
    .map_err(|err| WorkerError::Io(std::io::Error::other(err)))?
}

fn add_to_zip<W: std::io::Write + std::io::Seek>(
    writer: &mut zip::ZipWriter<W>,
    cwd: &Path,
    rel: &str,
) -> Result<(), WorkerError> {
    let path = cwd.join(rel);
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if meta.is_dir() {
        for entry in std::fs::read_dir(&path)?.flatten() {
            let child_rel = format!("{rel}/{}", entry.file_name().to_string_lossy());
            add_to_zip(writer, cwd, &child_rel)?;
        }
    } else {
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file(rel, options)?;
        let mut f = std::fs::File::open(&path)?;
        std::io::copy(&mut f, writer)?;
    }
    Ok(())
}

fn unzip_into(bytes: &[u8], cwd: &Path) -> Result<(), WorkerError> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else { continue };
        let out_path = cwd.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bubble_proto::{serve_worker, Ack, CancelRequest, CleanRequest, ProtoError};
    use tokio::net::TcpListener;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bubble-worker-handoff-test-{label}-{}", bubble_env::next_id()))
    }

    /// Reserve a local port without yet knowing the `WorkerApi` it will
    /// serve — handoff setup needs the destination's own base URL (to hand
    /// to the source) before the destination's `HandoffReceiver` exists.
    async fn reserve_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{addr}/"))
    }

    fn spawn_server(listener: TcpListener, api: Arc<dyn WorkerApi>) {
        let router = serve_worker(api);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
    }

    struct SourceShim(Arc<HandoffSender>);

    #[async_trait]
    impl WorkerApi for SourceShim {
        async fn execute(&self, _req: ExecuteRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn cancel(&self, _req: CancelRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn clean(&self, _req: CleanRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn before_send(&self, req: BeforeSendRequest) -> Result<Ack, ProtoError> {
            self.0.before_send(req.dest_worker_id, req.dest_base, req.runner_id, req.disk);
            Ok(Ack::ok())
        }
        async fn before_receive(&self, _req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn send(&self, req: SendRequest) -> Result<Ack, ProtoError> {
            self.0.send(req.runner_id).map_err(|e| ProtoError::Remote(e.to_string()))?;
            Ok(Ack::ok())
        }
        async fn receive(&self, _req: ReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn after_receive(&self, _req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
    }

    struct DestShim(Arc<HandoffReceiver>);

    #[async_trait]
    impl WorkerApi for DestShim {
        async fn execute(&self, _req: ExecuteRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn cancel(&self, _req: CancelRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn clean(&self, _req: CleanRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn before_send(&self, _req: BeforeSendRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn before_receive(&self, req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
            self.0
                .before_receive(req.runner_id, req.length, req.chunks, req.checksum)
                .await
                .map_err(|e| ProtoError::Remote(e.to_string()))?;
            Ok(Ack::ok())
        }
        async fn send(&self, _req: SendRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by the handoff test")
        }
        async fn receive(&self, req: ReceiveRequest) -> Result<Ack, ProtoError> {
            let data = BASE64.decode(req.data_b64.as_bytes()).unwrap();
            self.0.receive(req.runner_id, req.index, &data).await.map_err(|e| ProtoError::Remote(e.to_string()))?;
            Ok(Ack::ok())
        }
        async fn after_receive(&self, req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
            self.0.after_receive(req.runner_id).await.map_err(|e| ProtoError::Remote(e.to_string()))?;
            Ok(Ack::ok())
        }
    }

    #[tokio::test]
    async fn pulls_a_directory_from_a_peer_worker_over_http() {
        let runner_id = bubble_env::next_id();
        let source_root = temp_dir("source");
        let dest_root = temp_dir("dest");

        let source_disk_dir = runner_cwd(&source_root, runner_id).join("workspace");
        tokio::fs::create_dir_all(&source_disk_dir).await.unwrap();
        tokio::fs::write(source_disk_dir.join("output.txt"), b"hello from the source worker").await.unwrap();

        let sender = HandoffSender::new(1, source_root.clone());
        let (source_listener, source_base) = reserve_server().await;
        spawn_server(source_listener, Arc::new(SourceShim(sender)));

        let (dest_listener, dest_base) = reserve_server().await;
        let receiver = Arc::new(HandoffReceiver::new(2, dest_base, dest_root.clone()));
        spawn_server(dest_listener, Arc::new(DestShim(receiver.clone())));

        receiver.pull(runner_id, "workspace", &source_base).await.unwrap();

        let pulled = tokio::fs::read(runner_cwd(&dest_root, runner_id).join("workspace").join("output.txt"))
            .await
            .unwrap();
        assert_eq!(pulled, b"hello from the source worker");

        tokio::fs::remove_dir_all(&source_root).await.ok();
        tokio::fs::remove_dir_all(&dest_root).await.ok();
    }

    #[test]
    fn zip_and_unzip_round_trips_a_directory_tree() {
        let root = temp_dir("ziproundtrip");
        let src = root.join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), b"top level").unwrap();
        std::fs::write(src.join("nested").join("b.txt"), b"nested file").unwrap();

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            add_to_zip(&mut writer, &src, "a.txt").unwrap();
            add_to_zip(&mut writer, &src, "nested").unwrap();
            writer.finish().unwrap();
        }

        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();
        unzip_into(&buf, &out).unwrap();

        assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"top level");
        assert_eq!(std::fs::read(out.join("nested").join("b.txt")).unwrap(), b"nested file");

        std::fs::remove_dir_all(&root).ok();
    }
}
