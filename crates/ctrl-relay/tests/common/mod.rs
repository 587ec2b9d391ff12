use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use ctrl_core::{ActivityRegistry, ControllerDeps, JobSubstrate, RunnerConfig};
use ctrl_exec::{ProcConfig, ProcSubstrate};
use ctrl_model::{ExecutionResult, ExecutionStatus, JobEventKind};
use ctrl_relay::{CompletionRelay, RELAY_TASK, RelayConfig};
use taskvisor::{Supervisor, SupervisorConfig};
use tokio::task::JoinHandle;

/// Process substrate, registry and a running relay wired together.
pub struct Stack {
    pub substrate: ProcSubstrate,
    pub registry: ActivityRegistry,
    pub peak: Arc<AtomicUsize>,
    sup: Arc<Supervisor>,
    sup_task: JoinHandle<()>,
}

impl Stack {
    pub async fn start() -> Self {
        let substrate = ProcSubstrate::new(ProcConfig {
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        });
        let registry = ActivityRegistry::new();

        let relay = CompletionRelay::new(
            Arc::new(substrate.clone()),
            Arc::new(registry.clone()),
            RelayConfig {
                restart_delay: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .unwrap();
        let sup = Supervisor::new(SupervisorConfig::default(), Vec::new());
        let sup_task = {
            let sup = Arc::clone(&sup);
            let spec = Arc::new(relay).task_spec();
            tokio::spawn(async move {
                let _ = sup.run(vec![spec]).await;
            })
        };

        let peak = Arc::new(AtomicUsize::new(0));
        let mut observer = substrate.watch("ctrlplane").await.unwrap();
        {
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let mut running = 0usize;
                while let Some(Ok(ev)) = observer.recv().await {
                    match ev.kind {
                        JobEventKind::Add => {
                            running += 1;
                            peak.fetch_max(running, Ordering::SeqCst);
                        }
                        JobEventKind::Delete | JobEventKind::Error => running = running.saturating_sub(1),
                        JobEventKind::Change if ev.status.is_finished() => {
                            running = running.saturating_sub(1)
                        }
                        JobEventKind::Change => {}
                    }
                }
            });
        }

        // Relay and observer must both be subscribed before the first job exists.
        while substrate.watchers() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        Self {
            substrate,
            registry,
            peak,
            sup,
            sup_task,
        }
    }

    pub fn deps(&self) -> ControllerDeps {
        ControllerDeps {
            substrate: Arc::new(self.substrate.clone()),
            completions: self.registry.clone(),
            runner: RunnerConfig {
                start_to_close: Duration::from_secs(60),
                ..Default::default()
            },
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let _ = self.sup.remove_task(RELAY_TASK);
        self.sup_task.abort();
    }
}

pub fn status_of(results: &[ExecutionResult], id: &str) -> ExecutionStatus {
    results
        .iter()
        .find(|r| r.id.as_str() == id)
        .unwrap_or_else(|| panic!("no result for {id}"))
        .status
}
