//! Bounded worker-pool scheduler for chunk uploads.
//!
//! The scheduler owns all of its state explicitly (queues, per-chunk
//! states, pause signal); there is no ambient/static state. A pass runs up
//! to `max_concurrent` workers, each looping on "pop next index, attempt
//! the transfer with bounded retries, report the outcome". Indices that
//! exhaust their retries are re-queued with priority over fresh pending
//! work, so a pass only terminates once the pending queue, the retry
//! queue, and the active count are all empty.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkferry_protocol::{
    CHUNK_SIZE, ChunkState, FinalizeRequest, FinalizeResponse, InitUploadRequest,
    InitUploadResponse, UploadChunkRequest, UploadChunkResponse, UploadProgress,
};
use chunkferry_transfer::{ChunkReader, SpeedCalculator};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::transport::ChunkTransport;

/// Tuning knobs for a scheduling pass.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub chunk_size: u64,
    /// Maximum simultaneous chunk transfers.
    pub max_concurrent: usize,
    /// In-place attempts per chunk before it is re-queued.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_concurrent: 3,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

struct SchedState {
    pending: VecDeque<u32>,
    retry: VecDeque<u32>,
    /// Per-index state, indexed by chunk index.
    states: Vec<ChunkState>,
    /// Indices confirmed received by the server (init resume set + our
    /// acknowledged sends). Never removed once inserted.
    confirmed: HashSet<u32>,
    bytes_confirmed: u64,
    active: usize,
}

/// Shared context handed to each worker.
struct WorkerShared {
    transport: Arc<dyn ChunkTransport>,
    reader: Arc<ChunkReader>,
    state: Arc<Mutex<SchedState>>,
    speed: Arc<SpeedCalculator>,
    upload_id: String,
    max_retries: u32,
    base_delay: Duration,
}

/// Concurrent chunk upload scheduler.
pub struct UploadScheduler {
    config: SchedulerConfig,
    transport: Arc<dyn ChunkTransport>,
    reader: Arc<ChunkReader>,
    filename: String,
    upload_id: Mutex<Option<String>>,
    state: Arc<Mutex<SchedState>>,
    speed: Arc<SpeedCalculator>,
    /// Cancelled = paused. Replaced with a fresh token on resume.
    pause: Mutex<CancellationToken>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

impl UploadScheduler {
    /// Creates a scheduler for one source file.
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        reader: Arc<ChunkReader>,
        filename: impl Into<String>,
        config: SchedulerConfig,
    ) -> Self {
        let total = reader.total_chunks() as usize;
        Self {
            config,
            transport,
            reader,
            filename: filename.into(),
            upload_id: Mutex::new(None),
            state: Arc::new(Mutex::new(SchedState {
                pending: VecDeque::new(),
                retry: VecDeque::new(),
                states: vec![ChunkState::Pending; total],
                confirmed: HashSet::new(),
                bytes_confirmed: 0,
                active: 0,
            })),
            speed: Arc::new(SpeedCalculator::new(None, None)),
            pause: Mutex::new(CancellationToken::new()),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Initializes (or resumes) the session and computes the pending set.
    ///
    /// Indices the server already holds are marked `Success` and excluded
    /// from scheduling.
    pub async fn init(&self) -> Result<InitUploadResponse, ClientError> {
        let req = InitUploadRequest {
            filename: self.filename.clone(),
            total_size: self.reader.total_size(),
            total_chunks: self.reader.total_chunks(),
        };
        let resp = self.transport.init(&req).await?;

        *self.upload_id.lock().unwrap() = Some(resp.upload_id.clone());

        let mut s = self.state.lock().unwrap();
        s.pending.clear();
        s.retry.clear();
        s.confirmed.clear();
        s.bytes_confirmed = 0;
        for &index in &resp.uploaded_chunks {
            if (index as usize) < s.states.len() && s.confirmed.insert(index) {
                s.states[index as usize] = ChunkState::Success;
                s.bytes_confirmed += self.chunk_len(index);
            }
        }
        for index in 0..self.reader.total_chunks() {
            if !s.confirmed.contains(&index) {
                s.states[index as usize] = ChunkState::Pending;
                s.pending.push_back(index);
            }
        }

        info!(
            session = %resp.upload_id,
            resumed = resp.uploaded_chunks.len(),
            pending = s.pending.len(),
            "upload session initialized"
        );
        Ok(resp)
    }

    /// Starts a scheduling pass: spawns the worker pool and returns.
    ///
    /// Use [`drain`](Self::drain) to wait for the pass to finish. Requires
    /// a prior successful [`init`](Self::init).
    pub async fn submit(&self) -> Result<(), ClientError> {
        let upload_id = self
            .upload_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotInitialized)?;

        let token = {
            let mut pause = self.pause.lock().unwrap();
            if pause.is_cancelled() {
                *pause = CancellationToken::new();
            }
            pause.clone()
        };

        let shared = Arc::new(WorkerShared {
            transport: Arc::clone(&self.transport),
            reader: Arc::clone(&self.reader),
            state: Arc::clone(&self.state),
            speed: Arc::clone(&self.speed),
            upload_id,
            max_retries: self.config.max_retries,
            base_delay: self.config.base_delay,
        });

        let mut workers = self.workers.lock().await;
        for _ in 0..self.config.max_concurrent {
            workers.spawn(run_worker(Arc::clone(&shared), token.clone()));
        }
        Ok(())
    }

    /// Waits until every worker of the current pass has exited.
    pub async fn drain(&self) {
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }

    /// Stops dispatching new transfers.
    ///
    /// In-flight transfers run to completion and are recorded; cancelling
    /// them mid-write would orphan their server-side claims.
    pub fn pause(&self) {
        self.pause.lock().unwrap().cancel();
        info!("upload paused; in-flight chunks will complete");
    }

    /// Recomputes the pending set from confirmed state and restarts
    /// scheduling. Confirmed indices are never re-sent.
    pub async fn resume(&self) -> Result<(), ClientError> {
        {
            let mut s = self.state.lock().unwrap();
            s.pending.clear();
            s.retry.clear();
            for index in 0..self.reader.total_chunks() {
                if !s.confirmed.contains(&index) {
                    s.states[index as usize] = ChunkState::Pending;
                    s.pending.push_back(index);
                }
            }
            debug!(pending = s.pending.len(), "resuming upload");
        }
        self.submit().await
    }

    /// `true` once every chunk has been confirmed by the server.
    pub fn is_complete(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.confirmed.len() == self.reader.total_chunks() as usize
    }

    /// `true` while dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.pause.lock().unwrap().is_cancelled()
    }

    /// Number of transfers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Requests server-side finalization.
    ///
    /// Refuses to call the server unless the local pass reached a clean
    /// terminal state (every chunk confirmed).
    pub async fn finalize(&self) -> Result<FinalizeResponse, ClientError> {
        let upload_id = self
            .upload_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotInitialized)?;

        let (uploaded, total) = {
            let s = self.state.lock().unwrap();
            (s.confirmed.len() as u32, self.reader.total_chunks())
        };
        if uploaded != total {
            return Err(ClientError::Incomplete { uploaded, total });
        }

        let resp = self.transport.finalize(&FinalizeRequest { upload_id }).await?;
        info!(hash = %resp.hash, entries = resp.entries.len(), "upload finalized");
        Ok(resp)
    }

    /// Snapshot of progress, rate, and ETA.
    ///
    /// Completion order is unordered by design; all figures derive from the
    /// confirmed set, never from index order.
    pub fn progress(&self) -> UploadProgress {
        let s = self.state.lock().unwrap();
        let total = self.reader.total_chunks();
        let fraction = if total == 0 {
            0.0
        } else {
            s.confirmed.len() as f64 / f64::from(total)
        };
        let remaining = self.reader.total_size() - s.bytes_confirmed;
        UploadProgress {
            upload_id: self.upload_id.lock().unwrap().clone().unwrap_or_default(),
            fraction,
            bytes_per_second: self.speed.bytes_per_second(),
            eta_seconds: self.speed.eta(remaining).map(|d| d.as_secs_f64()),
            uploaded_chunks: s.confirmed.len() as u32,
            total_chunks: total,
        }
    }

    /// Per-index chunk states (for a status grid).
    pub fn chunk_states(&self) -> Vec<ChunkState> {
        self.state.lock().unwrap().states.clone()
    }

    fn chunk_len(&self, index: u32) -> u64 {
        let offset = u64::from(index) * self.config.chunk_size;
        self.config.chunk_size.min(self.reader.total_size() - offset)
    }
}

/// Worker loop: pop next index (retry queue first), attempt with bounded
/// retries, report, repeat. Exits when both queues are empty or dispatch is
/// paused.
async fn run_worker(shared: Arc<WorkerShared>, pause: CancellationToken) {
    loop {
        if pause.is_cancelled() {
            break;
        }

        let index = {
            let mut s = shared.state.lock().unwrap();
            let next = loop {
                let candidate = match s.retry.pop_front() {
                    Some(i) => Some(i),
                    None => s.pending.pop_front(),
                };
                match candidate {
                    // Stale queue entry for an already-confirmed index.
                    Some(i) if s.confirmed.contains(&i) => continue,
                    other => break other,
                }
            };
            match next {
                Some(i) => {
                    s.active += 1;
                    s.states[i as usize] = ChunkState::Uploading;
                    i
                }
                None => break,
            }
        };

        let result = attempt_with_retries(&shared, index).await;

        let mut s = shared.state.lock().unwrap();
        s.active -= 1;
        match result {
            Ok(bytes) => {
                s.states[index as usize] = ChunkState::Success;
                if s.confirmed.insert(index) {
                    s.bytes_confirmed += bytes;
                    drop(s);
                    // Full chunk size counts toward progress exactly once.
                    shared.speed.add_sample(bytes);
                }
            }
            Err(e) => {
                warn!(chunk = index, error = %e, "chunk transfer failed; re-queued");
                s.states[index as usize] = ChunkState::Error;
                s.retry.push_back(index);
            }
        }
    }
}

/// One chunk transfer with in-place retries and exponential backoff
/// (`base_delay * 2^(attempt-1)`).
async fn attempt_with_retries(shared: &WorkerShared, index: u32) -> Result<u64, ClientError> {
    let mut attempt: u32 = 1;
    loop {
        match attempt_once(shared, index).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt >= shared.max_retries => return Err(e),
            Err(e) => {
                let delay = shared.base_delay * 2u32.pow(attempt - 1);
                debug!(
                    chunk = index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying chunk transfer"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn attempt_once(shared: &WorkerShared, index: u32) -> Result<u64, ClientError> {
    let chunk = {
        let reader = Arc::clone(&shared.reader);
        tokio::task::spawn_blocking(move || reader.read_chunk(index))
            .await
            .map_err(|e| ClientError::TaskJoin(e.to_string()))??
    };

    let req = UploadChunkRequest {
        upload_id: shared.upload_id.clone(),
        chunk_index: index,
        checksum: chunk.checksum.clone(),
    };
    let bytes = chunk.data.len() as u64;
    shared.transport.upload_chunk(&req, &chunk.data).await?;
    Ok(bytes)
}
