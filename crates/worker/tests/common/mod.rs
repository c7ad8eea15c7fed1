//! In-memory fakes for the coordinator and compute seams.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aibrush_coordinator::{Coordinator, CoordinatorError, PayloadKind};
use aibrush_core::job::{Job, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_core::model::ModelKind;
use aibrush_sandbox::{ComputeFactory, Generator, Ranker, SandboxError};
use aibrush_worker::config::WorkerConfig;
use aibrush_worker::killswitch::KillSwitch;
use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCoordinator {
    claims: Mutex<VecDeque<Option<Job>>>,
    pub claim_filters: Mutex<Vec<Option<ModelKind>>>,
    pub updates: Mutex<Vec<JobUpdate>>,
    pub metrics: Mutex<Vec<MetricEvent>>,
    pub pings: AtomicUsize,
    payloads: Mutex<HashMap<(String, &'static str), Vec<u8>>>,
    pub reject_claims: AtomicBool,
    pub reject_payloads: AtomicBool,
}

impl FakeCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the answer to a future claim. Unscripted claims return `None`.
    pub fn script_claim(&self, job: Option<Job>) {
        self.claims.lock().unwrap().push_back(job);
    }

    pub fn set_payload(&self, job_id: &str, kind: PayloadKind, data: &[u8]) {
        self.payloads
            .lock()
            .unwrap()
            .insert((job_id.to_string(), kind.as_str()), data.to_vec());
    }

    pub fn claim_count(&self) -> usize {
        self.claim_filters.lock().unwrap().len()
    }

    pub fn updates(&self) -> Vec<JobUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn claim_job(&self, model: Option<ModelKind>) -> Result<Option<Job>, CoordinatorError> {
        self.claim_filters.lock().unwrap().push(model);
        if self.reject_claims.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Api {
                status: 401,
                body: "invalid token".into(),
            });
        }
        Ok(self.claims.lock().unwrap().pop_front().flatten())
    }

    async fn fetch_payload(
        &self,
        job_id: &str,
        kind: PayloadKind,
    ) -> Result<Option<Vec<u8>>, CoordinatorError> {
        if self.reject_payloads.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Api {
                status: 403,
                body: "forbidden".into(),
            });
        }
        Ok(self
            .payloads
            .lock()
            .unwrap()
            .get(&(job_id.to_string(), kind.as_str()))
            .cloned())
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<Job, CoordinatorError> {
        self.updates.lock().unwrap().push(update.clone());
        let mut job = Job::warmup(ModelKind::StableDiffusionText2Im);
        job.id = update.id.clone();
        job.warmup = false;
        job.status = update.status;
        Ok(job)
    }

    async fn push_metrics(&self, batch: &[MetricEvent]) -> Result<(), CoordinatorError> {
        self.metrics.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

/// Counters shared by every generator a [`FakeFactory`] hands out.
#[derive(Default)]
pub struct ComputeStats {
    pub generations: AtomicUsize,
    pub terminations: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// Generator that writes a fake image where the real child would.
pub struct FakeGenerator {
    work_dir: PathBuf,
    stats: Arc<ComputeStats>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeGenerator {
    async fn run(&self, args: &serde_json::Value) -> Result<bool, SandboxError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| SandboxError::ComputeFault("gate".into()))?;
        }

        let prompt = args["prompt"].as_str().unwrap_or_default();
        if prompt.contains("explode") {
            return Err(SandboxError::ComputeFault("fake".into()));
        }

        match args["output_image"].as_str() {
            // Upscaler: a real, oversized JPEG so the resize step has work.
            Some(relative) => {
                let path = self.work_dir.join(relative);
                tokio::task::spawn_blocking(move || {
                    ImageBuffer::from_pixel(64, 64, Rgb([10u8, 20, 30]))
                        .save_with_format(&path, ImageFormat::Jpeg)
                        .map_err(|e| SandboxError::Protocol(e.to_string()))
                })
                .await
                .map_err(|e| SandboxError::Protocol(e.to_string()))??;
            }
            None => {
                let name = args["filename"].as_str().unwrap_or("out.jpg");
                tokio::fs::write(self.work_dir.join("images").join(name), b"FAKEJPEG").await?;
            }
        }
        Ok(prompt.contains("nude"))
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&mut self, args: &serde_json::Value) -> Result<bool, SandboxError> {
        self.stats.generations.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.run(args).await;

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn terminate(&mut self) {
        self.stats.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeRanker {
    texts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Ranker for FakeRanker {
    async fn rank(&mut self, text: &str, image_path: &Path) -> Result<f32, SandboxError> {
        assert!(image_path.exists(), "ranker called before output exists");
        self.texts.lock().unwrap().push(text.to_string());
        Ok(0.25)
    }
}

pub struct FakeFactory {
    work_dir: PathBuf,
    gate: Option<Arc<Semaphore>>,
    pub spawned: Mutex<Vec<ModelKind>>,
    pub stats: Arc<ComputeStats>,
    pub ranked_texts: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(work_dir: &Path) -> Arc<Self> {
        Arc::new(Self::build(work_dir, None))
    }

    /// Generators block until the returned semaphore hands out permits.
    pub fn gated(work_dir: &Path) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self::build(work_dir, Some(Arc::clone(&gate)))), gate)
    }

    fn build(work_dir: &Path, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            gate,
            spawned: Mutex::new(Vec::new()),
            stats: Arc::new(ComputeStats::default()),
            ranked_texts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn spawned(&self) -> Vec<ModelKind> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn ranked_texts(&self) -> Vec<String> {
        self.ranked_texts.lock().unwrap().clone()
    }

    pub fn generations(&self) -> usize {
        self.stats.generations.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.stats.terminations.load(Ordering::SeqCst)
    }
}

impl ComputeFactory for FakeFactory {
    fn generator(&self, model: ModelKind) -> Result<Box<dyn Generator>, SandboxError> {
        self.spawned.lock().unwrap().push(model);
        Ok(Box::new(FakeGenerator {
            work_dir: self.work_dir.clone(),
            stats: Arc::clone(&self.stats),
            gate: self.gate.clone(),
        }))
    }

    fn ranker(&self) -> Result<Box<dyn Ranker>, SandboxError> {
        Ok(Box::new(FakeRanker {
            texts: Arc::clone(&self.ranked_texts),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("aibrush-worker-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("images")).unwrap();
    dir
}

pub fn test_config(work_dir: &Path) -> WorkerConfig {
    let mut config = WorkerConfig::from_lookup(|key| match key {
        "WORKER_TOKEN" => Some("test-token".into()),
        "API_URL" => Some("http://127.0.0.1:9".into()),
        _ => None,
    })
    .unwrap();
    config.work_dir = work_dir.to_path_buf();
    config.metrics_flush_interval = Duration::from_millis(50);
    config
}

/// Kill switch that counts exits instead of terminating the test binary.
pub fn kill_switch(max_count: usize) -> (Arc<KillSwitch>, Arc<AtomicUsize>) {
    let exits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exits);
    let ks = KillSwitch::new(Duration::from_secs(60), max_count, Duration::from_secs(1))
        .with_exit_action(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    (Arc::new(ks), exits)
}

pub fn job(id: &str, model: ModelKind, phrases: &[&str]) -> Job {
    let mut job = Job::warmup(model);
    job.id = id.to_string();
    job.warmup = false;
    job.iterations = 20;
    job.phrases = phrases.iter().map(|p| p.to_string()).collect();
    job
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Future resolving once `condition` holds, for use as a shutdown trigger.
pub fn when<F>(condition: F) -> impl Future<Output = ()>
where
    F: Fn() -> bool,
{
    async move { wait_until(condition).await }
}
