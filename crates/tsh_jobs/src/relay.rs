//! Signal relay.
//!
//! A dedicated thread runs a current-thread tokio runtime subscribed to
//! SIGCHLD, SIGINT, SIGTSTP and SIGQUIT. The installed handlers only record
//! delivery; every reaction below runs on the relay thread with the job
//! table locked.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::control::Shared;
use crate::error::JobError;
use crate::job::{JobId, JobNotice, JobState, MemberStatus};
use crate::table::JobTable;

// ============================================================================
// Child status
// ============================================================================

/// Follow-up the reaper must perform after recording a status change.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StatusAction {
    Nothing,
    /// The process stopped without the shell asking; continue it.
    Resume(Pid),
}

/// Record one `waitpid` result in the table.
pub(crate) fn apply_status(table: &mut JobTable, status: WaitStatus) -> StatusAction {
    match status {
        WaitStatus::Exited(pid, code) => {
            debug!(pid = %pid, code, "child exited");
            member_exited(table, pid, None);
        }
        WaitStatus::Signaled(pid, signal, _) => {
            debug!(pid = %pid, signal = %signal, "child killed by signal");
            member_exited(table, pid, Some(signal));
        }
        WaitStatus::Stopped(pid, signal) => {
            let Some(job) = table.by_member_mut(pid) else {
                debug!(pid = %pid, "untracked child stopped");
                return StatusAction::Resume(pid);
            };
            job.set_member_status(pid, MemberStatus::Stopped);

            // only the shell's own SIGTSTP counts as the requested stop
            if job.stop_requested && signal == Signal::SIGTSTP {
                job.stop_requested = false;
                job.state = JobState::Stopped;
                let notice = JobNotice::Stopped {
                    jid: job.jid,
                    pid: job.pid,
                    signal,
                };
                table.push_notice(notice);
            } else if job.state != JobState::Stopped {
                return StatusAction::Resume(pid);
            }
        }
        WaitStatus::Continued(pid) => {
            if let Some(job) = table.by_member_mut(pid) {
                job.set_member_status(pid, MemberStatus::Running);
                if job.state == JobState::Stopped {
                    job.state = JobState::Background;
                }
            }
        }
        other => debug!(status = ?other, "ignoring wait status"),
    }
    StatusAction::Nothing
}

fn member_exited(table: &mut JobTable, pid: Pid, signal: Option<Signal>) {
    let Some(job) = table.by_member_mut(pid) else {
        debug!(pid = %pid, "reaped untracked child");
        return;
    };
    job.set_member_status(pid, MemberStatus::Exited);
    // SIGPIPE upstream of the last stage is how a pipeline normally winds down
    let last_stage = job.members.last().is_some_and(|m| m.pid == pid);
    if let Some(signal) = signal.filter(|&s| s != Signal::SIGPIPE || last_stage) {
        job.terminated_by.get_or_insert(signal);
    }
    if !job.all_exited() {
        return;
    }

    let (jid, leader, pgid, terminated_by) = (job.jid, job.pid, job.pgid, job.terminated_by);
    table.remove(pgid);
    debug!(jid = %jid, pgid = %pgid, "job finished");
    if let Some(signal) = terminated_by {
        table.push_notice(JobNotice::Terminated {
            jid,
            pid: leader,
            signal,
        });
    }
}

/// Drain every pending status change. Returns true if anything was reaped.
pub(crate) fn reap_children(table: &mut JobTable) -> bool {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    let mut changed = false;
    loop {
        match waitpid(None, Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                changed = true;
                if let StatusAction::Resume(pid) = apply_status(table, status) {
                    match kill(pid, Signal::SIGCONT) {
                        Ok(()) => debug!(pid = %pid, "resumed process stopped outside the shell"),
                        Err(e) => warn!(pid = %pid, error = %e, "failed to resume stopped process"),
                    }
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    changed
}

// ============================================================================
// Keyboard signals
// ============================================================================

/// Send SIGINT to the foreground job's group, if there is one.
pub(crate) fn forward_interrupt(table: &JobTable) -> Result<Option<JobId>, JobError> {
    let Some(job) = table.foreground() else {
        return Ok(None);
    };
    killpg(job.pgid, Signal::SIGINT).map_err(|e| {
        JobError::signal_delivery(format!("killpg({}, SIGINT): {}", job.pgid, e))
    })?;
    debug!(jid = %job.jid, pgid = %job.pgid, "forwarded SIGINT");
    Ok(Some(job.jid))
}

/// Mark the foreground job as stopped-by-request and send SIGTSTP to its
/// group.
pub(crate) fn forward_stop(table: &mut JobTable) -> Result<Option<JobId>, JobError> {
    let Some(job) = table.foreground_mut() else {
        return Ok(None);
    };
    job.stop_requested = true;
    if let Err(e) = killpg(job.pgid, Signal::SIGTSTP) {
        job.stop_requested = false;
        return Err(JobError::signal_delivery(format!(
            "killpg({}, SIGTSTP): {}",
            job.pgid, e
        )));
    }
    debug!(jid = %job.jid, pgid = %job.pgid, "forwarded SIGTSTP");
    Ok(Some(job.jid))
}

// ============================================================================
// Relay thread
// ============================================================================

pub(crate) struct Relay {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Relay {
    /// Start the relay and return once every signal subscription is live.
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self, JobError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("tsh-signal-relay".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(JobError::relay(format!("runtime: {}", e))));
                        return;
                    }
                };
                runtime.block_on(run(shared, ready_tx, shutdown_rx));
            })
            .map_err(|e| JobError::relay(format!("spawn relay thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(JobError::relay("relay thread exited during startup")),
        }
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run(
    shared: Arc<Shared>,
    ready: mpsc::Sender<Result<(), JobError>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let subscribe = |kind: SignalKind, name: &str| {
        signal(kind).map_err(|e| JobError::relay(format!("subscribe {}: {}", name, e)))
    };
    let streams = (|| {
        Ok::<_, JobError>((
            subscribe(SignalKind::child(), "SIGCHLD")?,
            subscribe(SignalKind::interrupt(), "SIGINT")?,
            subscribe(SignalKind::from_raw(libc::SIGTSTP), "SIGTSTP")?,
            subscribe(SignalKind::quit(), "SIGQUIT")?,
        ))
    })();
    let (mut child, mut interrupt, mut stop, mut quit) = match streams {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    info!("signal relay running");

    // catch anything that changed before the SIGCHLD subscription existed
    shared.reap();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = child.recv() => {
                if received.is_none() {
                    break;
                }
                shared.reap();
            }
            received = interrupt.recv() => {
                if received.is_none() {
                    break;
                }
                if let Err(e) = shared.interrupt() {
                    warn!(error = %e, "interrupt not forwarded");
                }
            }
            received = stop.recv() => {
                if received.is_none() {
                    break;
                }
                if let Err(e) = shared.stop() {
                    warn!(error = %e, "stop not forwarded");
                }
            }
            received = quit.recv() => {
                if received.is_none() {
                    break;
                }
                println!("Terminating after receipt of SIGQUIT signal");
                std::process::exit(1);
            }
        }
    }
    debug!("signal relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn pipeline_table(state: JobState) -> (JobTable, JobId) {
        let mut table = JobTable::new(16);
        let jid = table
            .add_group(pid(40), &[pid(40), pid(41), pid(42)], state, "a | b | c")
            .unwrap();
        (table, jid)
    }

    #[test]
    fn test_exit_removes_single_job() {
        let mut table = JobTable::new(16);
        table.add(pid(7), pid(7), JobState::Foreground, "sleep 1").unwrap();

        let action = apply_status(&mut table, WaitStatus::Exited(pid(7), 0));
        assert_eq!(action, StatusAction::Nothing);
        assert!(table.is_empty());
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn test_pipeline_removed_only_after_last_member() {
        let (mut table, jid) = pipeline_table(JobState::Foreground);

        apply_status(&mut table, WaitStatus::Exited(pid(40), 0));
        apply_status(&mut table, WaitStatus::Exited(pid(42), 0));
        let job = table.by_jid(jid).unwrap();
        assert_eq!(job.exited_count(), 2);
        assert_eq!(job.state, JobState::Foreground);

        apply_status(&mut table, WaitStatus::Exited(pid(41), 1));
        assert!(table.by_jid(jid).is_none());
    }

    #[test]
    fn test_signal_death_queues_one_notice() {
        let (mut table, jid) = pipeline_table(JobState::Foreground);
        for raw in [40, 41, 42] {
            apply_status(
                &mut table,
                WaitStatus::Signaled(pid(raw), Signal::SIGINT, false),
            );
        }
        assert!(table.is_empty());
        assert_eq!(
            table.take_notices(),
            vec![JobNotice::Terminated {
                jid,
                pid: pid(40),
                signal: Signal::SIGINT
            }]
        );
    }

    #[test]
    fn test_requested_stop_parks_whole_pipeline() {
        let (mut table, jid) = pipeline_table(JobState::Foreground);
        table.by_jid_mut(jid).unwrap().stop_requested = true;

        for raw in [41, 40, 42] {
            let action = apply_status(&mut table, WaitStatus::Stopped(pid(raw), Signal::SIGTSTP));
            assert_eq!(action, StatusAction::Nothing);
        }

        let job = table.by_jid(jid).unwrap();
        assert_eq!(job.state, JobState::Stopped);
        assert!(!job.stop_requested);
        assert!(job.members().iter().all(|m| m.status == MemberStatus::Stopped));
        assert_eq!(table.take_notices().len(), 1);
        assert!(table.foreground().is_none());
    }

    #[test]
    fn test_unrequested_stop_is_resumed() {
        let mut table = JobTable::new(16);
        table.add(pid(9), pid(9), JobState::Background, "cat &").unwrap();

        let action = apply_status(&mut table, WaitStatus::Stopped(pid(9), Signal::SIGTTIN));
        assert_eq!(action, StatusAction::Resume(pid(9)));
        assert_eq!(table.by_pid(pid(9)).unwrap().state, JobState::Background);
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn test_stale_stop_request_does_not_claim_other_stops() {
        let mut table = JobTable::new(16);
        let jid = table.add(pid(9), pid(9), JobState::Foreground, "sh").unwrap();
        // SIGTSTP was sent but the job ignored it
        table.by_jid_mut(jid).unwrap().stop_requested = true;

        let action = apply_status(&mut table, WaitStatus::Stopped(pid(9), Signal::SIGSTOP));
        assert_eq!(action, StatusAction::Resume(pid(9)));
        assert_eq!(table.by_jid(jid).unwrap().state, JobState::Foreground);
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn test_broken_pipe_upstream_is_quiet() {
        let (mut table, _) = pipeline_table(JobState::Foreground);
        apply_status(&mut table, WaitStatus::Exited(pid(42), 0));
        apply_status(&mut table, WaitStatus::Signaled(pid(41), Signal::SIGPIPE, false));
        apply_status(&mut table, WaitStatus::Signaled(pid(40), Signal::SIGPIPE, false));
        assert!(table.is_empty());
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn test_broken_pipe_on_last_stage_is_reported() {
        let (mut table, jid) = pipeline_table(JobState::Background);
        apply_status(&mut table, WaitStatus::Exited(pid(40), 0));
        apply_status(&mut table, WaitStatus::Exited(pid(41), 0));
        apply_status(&mut table, WaitStatus::Signaled(pid(42), Signal::SIGPIPE, false));
        assert_eq!(
            table.take_notices(),
            vec![JobNotice::Terminated {
                jid,
                pid: pid(40),
                signal: Signal::SIGPIPE
            }]
        );
    }

    #[test]
    fn test_external_continue_moves_stopped_job_to_background() {
        let mut table = JobTable::new(16);
        let jid = table.add(pid(9), pid(9), JobState::Stopped, "vi").unwrap();

        apply_status(&mut table, WaitStatus::Continued(pid(9)));
        assert_eq!(table.by_jid(jid).unwrap().state, JobState::Background);
    }

    #[test]
    fn test_untracked_child_is_ignored() {
        let mut table = JobTable::new(16);
        table.add(pid(9), pid(9), JobState::Background, "x").unwrap();
        apply_status(&mut table, WaitStatus::Exited(pid(1234), 0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forwarding_without_foreground_is_noop() {
        let mut table = JobTable::new(16);
        table.add(pid(9), pid(9), JobState::Background, "x").unwrap();
        assert_eq!(forward_interrupt(&table).unwrap(), None);
        assert_eq!(forward_stop(&mut table).unwrap(), None);
        assert!(!table.by_pid(pid(9)).unwrap().stop_requested);
    }
}
