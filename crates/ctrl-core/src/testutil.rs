//! In-memory substrate for unit tests.
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use ctrl_model::{ExecutionResult, ExecutionStatus, JobSpec};
use tokio::sync::mpsc;

use crate::{
    completion::{ActivityRegistry, CompletionChannel},
    error::SubstrateError,
    substrate::{JobSubstrate, JobWatch},
};

type Outcome = Box<dyn Fn(&JobSpec) -> Option<(Duration, ExecutionStatus)> + Send + Sync>;

pub struct FakeSubstrate {
    created_tx: mpsc::UnboundedSender<JobSpec>,
    created_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobSpec>>,
    created: AtomicUsize,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    create_error: Mutex<Option<String>>,
    deletes: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    auto: Option<(ActivityRegistry, Outcome)>,
}

impl FakeSubstrate {
    pub fn new() -> Self {
        let (created_tx, created_rx) = mpsc::unbounded_channel();
        Self {
            created_tx,
            created_rx: tokio::sync::Mutex::new(created_rx),
            created: AtomicUsize::new(0),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            create_error: Mutex::new(None),
            deletes: Mutex::new(Vec::new()),
            auto: None,
        }
    }

    /// Complete every created job through `registry` after the delay `outcome` returns.
    /// Jobs for which `outcome` returns `None` never complete.
    pub fn completing<F>(registry: ActivityRegistry, outcome: F) -> Self
    where
        F: Fn(&JobSpec) -> Option<(Duration, ExecutionStatus)> + Send + Sync + 'static,
    {
        let mut s = Self::new();
        s.auto = Some((registry, Box::new(outcome)));
        s
    }

    /// Complete every job with SUCCESS after one second.
    pub fn succeeding(registry: ActivityRegistry) -> Self {
        Self::completing(registry, |_| {
            Some((Duration::from_secs(1), ExecutionStatus::Success))
        })
    }

    pub fn fail_creates(&self, reason: &str) {
        *self.create_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Highest number of auto-completed jobs running at once.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.deletes.lock().unwrap().clone()
    }

    pub async fn next_created(&self) -> JobSpec {
        self.created_rx
            .lock()
            .await
            .recv()
            .await
            .expect("fake substrate sender lives as long as the fake")
    }
}

#[async_trait]
impl JobSubstrate for FakeSubstrate {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_job(&self, spec: JobSpec) -> Result<(), SubstrateError> {
        let create_error = self.create_error.lock().unwrap().clone();
        if let Some(reason) = create_error {
            return Err(SubstrateError::Create {
                name: spec.name,
                reason,
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        if let Some((registry, outcome)) = &self.auto {
            if let Some((delay, status)) = outcome(&spec) {
                let labels = spec.job_labels().expect("runner labels every job");
                let registry = registry.clone();
                let running = Arc::clone(&self.running);
                let peak = Arc::clone(&self.peak);
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    let _ = registry
                        .complete(
                            &labels.run_id,
                            &labels.activity_id,
                            ExecutionResult::new(labels.test_unit_id.clone(), status),
                        )
                        .await;
                });
            }
        }

        let _ = self.created_tx.send(spec);
        Ok(())
    }

    async fn delete_jobs_by_label(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<usize, SubstrateError> {
        self.deletes
            .lock()
            .unwrap()
            .push((namespace.to_string(), selector.clone()));
        Ok(0)
    }

    async fn watch(&self, _namespace: &str) -> Result<JobWatch, SubstrateError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
