//! The job-control engine facade used by the shell front-end.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info};

use crate::config::JobControlConfig;
use crate::error::JobError;
use crate::job::{Job, JobId, JobNotice, JobState};
use crate::launch::{spawn_pipeline, spawn_single, ExecPlan};
use crate::relay::{forward_interrupt, forward_stop, reap_children, Relay};
use crate::table::JobTable;

// ============================================================================
// Shared State
// ============================================================================

/// Job table shared between the main thread and the signal relay.
///
/// Holding `table` excludes the reaper; `changed` is notified after every
/// reap pass that observed something.
pub(crate) struct Shared {
    table: Mutex<JobTable>,
    changed: Condvar,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(JobTable::new(capacity)),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reap(&self) {
        let mut table = self.lock();
        if reap_children(&mut table) {
            self.changed.notify_all();
        }
    }

    pub(crate) fn interrupt(&self) -> Result<Option<JobId>, JobError> {
        forward_interrupt(&self.lock())
    }

    pub(crate) fn stop(&self) -> Result<Option<JobId>, JobError> {
        forward_stop(&mut self.lock())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Tracks the shell's child jobs and owns the signal relay.
///
/// Only one engine should run per process: the relay reaps every child of
/// the process with `waitpid(-1)`.
pub struct JobControl {
    shared: Arc<Shared>,
    recheck: Duration,
    relay: Relay,
}

impl JobControl {
    /// Create the job table and install the signal relay.
    pub fn start(config: JobControlConfig) -> Result<Self, JobError> {
        let shared = Arc::new(Shared::new(config.max_jobs));
        let relay = Relay::spawn(Arc::clone(&shared))?;
        info!(max_jobs = config.max_jobs, "job control started");
        Ok(Self {
            shared,
            recheck: config.foreground_recheck(),
            relay,
        })
    }

    /// Run one command in its own process group. Foreground jobs block until
    /// they stop or finish.
    pub fn launch_single(
        &self,
        argv: &[String],
        background: bool,
        command_line: &str,
    ) -> Result<JobId, JobError> {
        let plan = ExecPlan::new(argv)?;
        let (jid, pgid) = {
            let mut table = self.shared.lock();
            spawn_single(&mut table, &plan, initial_state(background), command_line)?
        };
        debug!(jid = %jid, pgid = %pgid, background, "launched");

        if !background {
            self.wait_foreground(pgid);
        }
        Ok(jid)
    }

    /// Run a pipeline as one job in one process group.
    pub fn launch_pipeline(
        &self,
        stages: &[Vec<String>],
        background: bool,
        command_line: &str,
    ) -> Result<JobId, JobError> {
        match stages {
            [] => return Err(JobError::invalid_command("empty pipeline")),
            [single] => return self.launch_single(single, background, command_line),
            _ => {}
        }
        let plans = stages
            .iter()
            .map(|argv| ExecPlan::new(argv))
            .collect::<Result<Vec<_>, _>>()?;

        let (jid, pgid) = {
            let mut table = self.shared.lock();
            spawn_pipeline(&mut table, &plans, initial_state(background), command_line)?
        };
        debug!(jid = %jid, pgid = %pgid, stages = plans.len(), background, "launched pipeline");

        if !background {
            self.wait_foreground(pgid);
        }
        Ok(jid)
    }

    /// Continue job `jid` in the foreground or background (`fg`/`bg`).
    pub fn resume(&self, jid: JobId, target: JobState) -> Result<(), JobError> {
        if target == JobState::Stopped {
            return Err(JobError::invalid_job_reference(
                "jobs can only be resumed into the foreground or background",
            ));
        }
        let pgid = {
            let mut table = self.shared.lock();
            let job = table
                .by_jid(jid)
                .ok_or_else(|| JobError::invalid_job_reference(format!("%{}", jid)))?;
            let (pgid, was_stopped) = (job.pgid, job.state == JobState::Stopped);
            if target == JobState::Foreground {
                if let Some(fg) = table.foreground().filter(|fg| fg.jid != jid) {
                    return Err(JobError::foreground_busy(format!(
                        "job [{}] already owns the foreground",
                        fg.jid
                    )));
                }
            }

            if was_stopped || target == JobState::Background {
                killpg(pgid, Signal::SIGCONT).map_err(|e| {
                    JobError::signal_delivery(format!("killpg({}, SIGCONT): {}", pgid, e))
                })?;
            }
            table.set_state(jid, target)?;
            if let Some(job) = table.by_jid_mut(jid) {
                job.stop_requested = false;
            }
            debug!(jid = %jid, pgid = %pgid, state = %target, "resumed");
            pgid
        };

        if target == JobState::Foreground {
            self.wait_foreground(pgid);
        }
        Ok(())
    }

    /// Block until no foreground job with group `pgid` remains.
    pub fn wait_foreground(&self, pgid: Pid) {
        let mut table = self.shared.lock();
        while table
            .by_pgid(pgid)
            .is_some_and(|job| job.state == JobState::Foreground)
        {
            table = match self.shared.changed.wait_timeout(table, self.recheck) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        // a SIGTSTP the job ignored must not claim a later stop
        if let Some(job) = table.iter_mut().find(|job| job.pgid == pgid) {
            job.stop_requested = false;
        };
    }

    /// Snapshot of the live jobs in table order.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.shared.lock().iter().cloned().collect()
    }

    pub fn job_for_id(&self, jid: JobId) -> Option<Job> {
        self.shared.lock().by_jid(jid).cloned()
    }

    pub fn foreground_pid(&self) -> Option<Pid> {
        self.shared.lock().foreground_pid()
    }

    /// Forward SIGINT to the foreground job. Returns the job signalled.
    pub fn interrupt_foreground(&self) -> Result<Option<JobId>, JobError> {
        self.shared.interrupt()
    }

    /// Ask the foreground job to stop. Returns the job signalled.
    pub fn stop_foreground(&self) -> Result<Option<JobId>, JobError> {
        self.shared.stop()
    }

    /// Notices queued by the relay since the last call.
    pub fn take_notices(&self) -> Vec<JobNotice> {
        self.shared.lock().take_notices()
    }

    /// Stop the relay thread. tokio keeps its signal handlers installed, so
    /// keyboard signals are swallowed from here on.
    pub fn shutdown(mut self) {
        self.relay.shutdown();
    }
}

fn initial_state(background: bool) -> JobState {
    if background {
        JobState::Background
    } else {
        JobState::Foreground
    }
}
