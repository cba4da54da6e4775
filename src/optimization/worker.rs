//! Background execution of link graph jobs.
//!
//! A job is handed to the pool as an owned value and comes back, fully
//! computed, through a channel. The main loop only ever touches the result
//! when it joins the job, so no state is shared while the solver runs.

use crate::core::ids::Date;
use crate::graph::component::{Colour, Component};
use crate::optimization::job::{JobSettings, LinkGraphJob};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver};

/// Thread pool running link graph jobs.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `threads` workers; 0 picks rayon's default.
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("linkgraph-{}", i))
            .panic_handler(|_| error!("link graph worker panicked, its job is lost"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` in the background. The receiver yields the finished job.
    pub fn spawn(&self, mut job: LinkGraphJob) -> Receiver<LinkGraphJob> {
        let (tx, rx) = mpsc::channel();
        self.pool.spawn(move || {
            job.run();
            // the receiver is gone if the graph was dropped meanwhile
            let _ = tx.send(job);
        });
        rx
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("threads", &self.threads()).finish()
    }
}

/// A component out for processing.
///
/// Persists its snapshot and settings; the channel to a running worker is
/// not persisted, and a job without one is computed inline when joined.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingJob {
    component: Component,
    settings: JobSettings,
    #[serde(skip)]
    result: Option<Receiver<LinkGraphJob>>,
}

impl PendingJob {
    /// Queue `component` for processing, in the background if `workers` is
    /// given and lazily at join time otherwise.
    pub fn spawn(component: Component, settings: JobSettings, workers: Option<&WorkerPool>) -> Self {
        let result = workers.map(|pool| pool.spawn(LinkGraphJob::new(component.clone(), settings)));
        Self {
            component,
            settings,
            result,
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn colour(&self) -> Colour {
        self.component.colour()
    }

    pub fn join_date(&self) -> Date {
        self.settings.join_date
    }

    pub fn is_running(&self) -> bool {
        self.result.is_some()
    }

    /// Wait for the computed job. `None` if the worker was lost.
    pub fn finish(self) -> Option<LinkGraphJob> {
        match self.result {
            Some(rx) => match rx.recv() {
                Ok(job) => Some(job),
                Err(_) => {
                    warn!(
                        "{}: result of component {} was lost, keeping old flows",
                        self.component.cargo(),
                        self.component.colour()
                    );
                    None
                }
            },
            None => {
                let mut job = LinkGraphJob::new(self.component, self.settings);
                job.run();
                Some(job)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{CargoId, StationId, Tile};
    use crate::core::settings::DistributionType;
    use crate::graph::component::Node;

    fn component() -> Component {
        let nodes = vec![
            Node::new(StationId::new(0, 0), Tile::new(0, 0), 50, true),
            Node::new(StationId::new(1, 0), Tile::new(5, 0), 50, true),
        ];
        let mut component = Component::new(CargoId(0), 3, nodes);
        component.add_edge(0, 1, 20, 0);
        component.add_edge(1, 0, 20, 0);
        component
    }

    fn settings() -> JobSettings {
        JobSettings {
            epsilon: 0.25,
            max_distance: 64,
            distribution: DistributionType::Symmetric,
            join_date: 10,
        }
    }

    #[test]
    fn test_background_and_inline_results_agree() {
        let pool = WorkerPool::new(2).unwrap();
        let background = PendingJob::spawn(component(), settings(), Some(&pool));
        let inline = PendingJob::spawn(component(), settings(), None);
        assert!(background.is_running());
        assert!(!inline.is_running());
        assert_eq!(background.colour(), 3);
        assert_eq!(background.join_date(), 10);

        let a = background.finish().unwrap();
        let b = inline.finish().unwrap();
        assert_eq!(a, b);
        assert!(!a.paths().is_empty());
    }

    #[test]
    fn test_reloaded_job_is_computed_inline() {
        let pool = WorkerPool::new(1).unwrap();
        let pending = PendingJob::spawn(component(), settings(), Some(&pool));
        let json = serde_json::to_string(&pending).unwrap();
        let reloaded: PendingJob = serde_json::from_str(&json).unwrap();
        assert!(!reloaded.is_running());
        assert!(reloaded.finish().is_some());
        assert!(pending.finish().is_some());
    }
}
