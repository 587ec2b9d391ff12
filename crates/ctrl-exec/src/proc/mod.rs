use std::{
    collections::{BTreeMap, HashMap},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use ctrl_core::{JobSubstrate, JobWatch, SubstrateError};
use ctrl_model::{JobEvent, JobEventKind, JobSpec, JobStatus};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    error::ExecError,
    util::{cmd_program, kill_graceful, matches_selector},
};

/// Tuning of the local substrate.
#[derive(Debug, Clone)]
pub struct ProcConfig {
    /// Capacity of the shared event fan-out. A watcher falling further behind gets a watch error.
    pub event_buffer: usize,
    /// Capacity of each watcher's own stream.
    pub watch_buffer: usize,
    /// Time between SIGTERM and SIGKILL when a job is deleted.
    pub kill_grace: Duration,
    /// Emit a progress `change` event for running jobs at this interval.
    pub progress_interval: Option<Duration>,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            watch_buffer: 256,
            kill_grace: Duration::from_secs(2),
            progress_interval: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone)]
struct Published {
    namespace: String,
    event: JobEvent,
}

struct Job {
    labels: BTreeMap<String, String>,
    cancel: CancellationToken,
}

type JobKey = (String, String);

/// Runs every job as a local child process.
///
/// Finished jobs leave the table once their final event is published, so a later job with
/// the same name can be created again.
#[derive(Clone)]
pub struct ProcSubstrate {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: ProcConfig,
    events: broadcast::Sender<Published>,
    jobs: Mutex<HashMap<JobKey, Job>>,
}

impl ProcSubstrate {
    pub fn new(cfg: ProcConfig) -> Self {
        let (events, _) = broadcast::channel(cfg.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                cfg,
                events,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Jobs currently running.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }

    /// Open watch streams.
    pub fn watchers(&self) -> usize {
        self.inner.events.receiver_count()
    }

    fn submit(&self, spec: &JobSpec) -> Result<CancellationToken, ExecError> {
        let key = (spec.namespace.clone(), spec.name.clone());
        let mut jobs = self.inner.lock();
        if jobs.contains_key(&key) {
            return Err(ExecError::AlreadyExists(spec.name.clone()));
        }
        let cancel = CancellationToken::new();
        jobs.insert(
            key,
            Job {
                labels: spec.labels.clone(),
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }
}

impl Default for ProcSubstrate {
    fn default() -> Self {
        Self::new(ProcConfig::default())
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobKey, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, namespace: &str, event: JobEvent) {
        trace!(target: "ctrl.exec.proc", job = %event.name, kind = ?event.kind, "publish");
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(Published {
            namespace: namespace.to_string(),
            event,
        });
    }

    fn forget(&self, key: &JobKey) {
        self.lock().remove(key);
    }
}

fn exit_event(
    name: &str,
    labels: BTreeMap<String, String>,
    status: ExitStatus,
) -> JobEvent {
    if status.success() {
        return JobEvent::new(JobEventKind::Change, name, labels, JobStatus::succeeded());
    }
    let reason = match status.code() {
        Some(code) => format!("exit code: {code}"),
        None => "terminated by signal".to_string(),
    };
    JobEvent::new(JobEventKind::Change, name, labels, JobStatus::failed()).with_message(reason)
}

#[async_trait]
impl JobSubstrate for ProcSubstrate {
    fn name(&self) -> &'static str {
        "proc"
    }

    async fn create_job(&self, spec: JobSpec) -> Result<(), SubstrateError> {
        let mut cmd = cmd_program(&spec.command).map_err(|e| e.into_create(&spec.name))?;
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let cancel = self.submit(&spec).map_err(|e| e.into_create(&spec.name))?;
        let key = (spec.namespace.clone(), spec.name.clone());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.inner.forget(&key);
                return Err(ExecError::Spawn(e.to_string()).into_create(&spec.name));
            }
        };
        debug!(
            target: "ctrl.exec.proc",
            job = %spec.name,
            namespace = %spec.namespace,
            image = %spec.image,
            pid = ?child.id(),
            "job started"
        );

        let inner = Arc::clone(&self.inner);
        inner.publish(
            &spec.namespace,
            JobEvent::new(JobEventKind::Add, &spec.name, spec.labels.clone(), JobStatus::running()),
        );

        let stdout = child.stdout.take();
        tokio::spawn(async move {
            let JobSpec {
                name,
                namespace,
                labels,
                ..
            } = spec;

            let read_stdout = stdout.map(|out| {
                let job = name.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(out).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        trace!(target: "ctrl.exec.proc.out", job = %job, %line);
                    }
                })
            });

            let mut progress = inner.cfg.progress_interval.map(|every| {
                let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick
            });

            let event = loop {
                tokio::select! {
                    status = child.wait() => {
                        if let Some(reader) = read_stdout {
                            let _ = reader.await;
                        }
                        break match status {
                            Ok(status) => exit_event(&name, labels, status),
                            Err(e) => JobEvent::new(JobEventKind::Error, &name, labels, JobStatus::default())
                                .with_message(format!("wait: {e}")),
                        };
                    }
                    _ = cancel.cancelled() => {
                        debug!(target: "ctrl.exec.proc", job = %name, "deleted; stopping child");
                        if let Err(e) = kill_graceful(&mut child, inner.cfg.kill_grace).await {
                            warn!(target: "ctrl.exec.proc", job = %name, error = %e, "kill failed");
                        }
                        break JobEvent::new(JobEventKind::Delete, &name, labels, JobStatus::default());
                    }
                    _ = async {
                        match progress.as_mut() {
                            Some(tick) => { tick.tick().await; }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        inner.publish(
                            &namespace,
                            JobEvent::new(JobEventKind::Change, &name, labels.clone(), JobStatus::running()),
                        );
                    }
                }
            };

            inner.forget(&(namespace.clone(), name));
            inner.publish(&namespace, event);
        });

        Ok(())
    }

    async fn delete_jobs_by_label(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<usize, SubstrateError> {
        if selector.is_empty() {
            return Err(ExecError::EmptySelector.into());
        }
        let jobs = self.inner.lock();
        let mut deleted = 0;
        for ((ns, _), job) in jobs.iter() {
            if ns == namespace && matches_selector(&job.labels, selector) {
                job.cancel.cancel();
                deleted += 1;
            }
        }
        debug!(target: "ctrl.exec.proc", %namespace, ?selector, deleted, "delete by label");
        Ok(deleted)
    }

    async fn watch(&self, namespace: &str) -> Result<JobWatch, SubstrateError> {
        let mut events = self.inner.events.subscribe();
        let (tx, rx) = mpsc::channel(self.inner.cfg.watch_buffer.max(1));
        let namespace = namespace.to_string();

        tokio::spawn(async move {
            loop {
                let item = match events.recv().await {
                    Ok(p) if p.namespace == namespace => Ok(p.event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        Err(SubstrateError::Watch(format!("watcher lagged, {n} events lost")))
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let fatal = item.is_err();
                if tx.send(item).await.is_err() || fatal {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
