//! Process launcher and pipeline builder.
//!
//! Both run with the job table locked by the caller, from before the first
//! fork until the job is registered, so the relay never reaps a child the
//! table does not know about yet.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::sys::signal::{
    pthread_sigmask, sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow,
    Signal,
};
use nix::unistd::{close, dup2, execvp, fork, pipe, setpgid, write, ForkResult, Pid};
use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::{JobId, JobState};
use crate::table::JobTable;

/// Everything a child needs to exec, built before forking so the child does
/// no formatting of its own.
#[derive(Debug)]
pub(crate) struct ExecPlan {
    program: CString,
    argv: Vec<CString>,
    not_found: Vec<u8>,
}

impl ExecPlan {
    pub(crate) fn new(argv: &[String]) -> Result<Self, JobError> {
        let Some(program) = argv.first() else {
            return Err(JobError::invalid_command("empty command"));
        };
        let argv = argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_str()).map_err(|_| {
                    JobError::invalid_command(format!("argument contains a NUL byte: {:?}", arg))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            program: argv[0].clone(),
            not_found: format!("{}: Command not found\n", program).into_bytes(),
            argv,
        })
    }
}

/// Fork one command into its own process group and register it.
pub(crate) fn spawn_single(
    table: &mut JobTable,
    plan: &ExecPlan,
    state: JobState,
    command_line: &str,
) -> Result<(JobId, Pid), JobError> {
    ensure_room(table, state)?;

    let pid = spawn_stage(plan, None, None, &[], None)?;
    let jid = table.add(pid, pid, state, command_line)?;
    Ok((jid, pid))
}

/// Fork every stage of a pipeline into one process group and register the
/// group as a single job. Returns the job id and the group id.
pub(crate) fn spawn_pipeline(
    table: &mut JobTable,
    plans: &[ExecPlan],
    state: JobState,
    command_line: &str,
) -> Result<(JobId, Pid), JobError> {
    ensure_room(table, state)?;

    let last = plans.len() - 1;
    let mut members: Vec<Pid> = Vec::with_capacity(plans.len());
    let mut pgid: Option<Pid> = None;
    // read end feeding the next stage's stdin
    let mut upstream: Option<OwnedFd> = None;

    for (index, plan) in plans.iter().enumerate() {
        let (downstream, stage_stdout) = if index < last {
            match pipe() {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(e) => {
                    return Err(abandon(&members, index, &format!("pipe: {}", e)));
                }
            }
        } else {
            (None, None)
        };

        let unused: Vec<RawFd> = downstream.iter().map(AsRawFd::as_raw_fd).collect();
        let pid = match spawn_stage(
            plan,
            upstream.as_ref().map(AsRawFd::as_raw_fd),
            stage_stdout.as_ref().map(AsRawFd::as_raw_fd),
            &unused,
            pgid,
        ) {
            Ok(pid) => pid,
            Err(e) => return Err(abandon(&members, index, e.message())),
        };

        let leader = *pgid.get_or_insert(pid);
        members.push(pid);
        debug!(stage = index, pid = %pid, pgid = %leader, "pipeline stage spawned");

        // the child owns its copies now
        drop(stage_stdout);
        upstream = downstream;
    }

    let Some(pgid) = pgid else {
        return Err(JobError::launch("pipeline has no stages"));
    };
    let jid = table.add_group(pgid, &members, state, command_line)?;
    Ok((jid, pgid))
}

fn ensure_room(table: &JobTable, state: JobState) -> Result<(), JobError> {
    if table.is_full() {
        return Err(JobError::table_full(format!(
            "tried to create more than {} jobs",
            table.capacity()
        )));
    }
    if state == JobState::Foreground {
        if let Some(fg) = table.foreground() {
            return Err(JobError::foreground_busy(format!(
                "job [{}] already owns the foreground",
                fg.jid
            )));
        }
    }
    Ok(())
}

fn abandon(spawned: &[Pid], stage: usize, reason: &str) -> JobError {
    if !spawned.is_empty() {
        warn!(stage, orphans = ?spawned, "pipeline construction aborted, earlier stages left running");
    }
    JobError::launch(format!(
        "stage {}: {} ({} earlier stage(s) left running: {:?})",
        stage,
        reason,
        spawned.len(),
        spawned
    ))
}

/// Fork a child that joins `pgid` (or leads a new group), wires the given
/// descriptors onto stdin/stdout and execs `plan`.
fn spawn_stage(
    plan: &ExecPlan,
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    unused: &[RawFd],
    pgid: Option<Pid>,
) -> Result<Pid, JobError> {
    // Keep job-control signals pending until the child has dropped the
    // shell's handlers.
    let mut previous = SigSet::empty();
    pthread_sigmask(
        SigmaskHow::SIG_BLOCK,
        Some(&job_control_signals()),
        Some(&mut previous),
    )
    .map_err(|e| JobError::launch(format!("mask signals: {}", e)))?;

    // SAFETY: the child only calls setpgid/sigaction/dup2/close/execvp/write
    // before exec or _exit.
    let forked = unsafe { fork() };
    if !matches!(forked, Ok(ForkResult::Child)) {
        let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
    }

    match forked {
        Ok(ForkResult::Child) => exec_child(plan, stdin, stdout, unused, pgid),
        Ok(ForkResult::Parent { child }) => {
            // Same call as the child makes; whichever runs first wins.
            if let Err(e) = setpgid(child, pgid.unwrap_or(child)) {
                debug!(pid = %child, error = %e, "parent-side setpgid");
            }
            Ok(child)
        }
        Err(e) => Err(JobError::launch(format!("fork: {}", e))),
    }
}

fn exec_child(
    plan: &ExecPlan,
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    unused: &[RawFd],
    pgid: Option<Pid>,
) -> ! {
    let _ = setpgid(Pid::from_raw(0), pgid.unwrap_or(Pid::from_raw(0)));
    restore_default_signals();

    if let Some(fd) = stdin {
        let _ = dup2(fd, libc::STDIN_FILENO);
        let _ = close(fd);
    }
    if let Some(fd) = stdout {
        let _ = dup2(fd, libc::STDOUT_FILENO);
        let _ = close(fd);
    }
    for &fd in unused {
        let _ = close(fd);
    }

    let _ = execvp(&plan.program, &plan.argv);
    let _ = write(std::io::stderr(), &plan.not_found);
    // SAFETY: _exit skips atexit handlers and stdio flushing that belong to
    // the parent's copy of the address space.
    unsafe { libc::_exit(1) }
}

const JOB_CONTROL_SIGNALS: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGTSTP,
    Signal::SIGQUIT,
    Signal::SIGCHLD,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

fn job_control_signals() -> SigSet {
    let mut set = SigSet::empty();
    for signal in JOB_CONTROL_SIGNALS {
        set.add(signal);
    }
    set
}

/// Dispositions the shell process runs with but its children must not
/// inherit. The Rust runtime ignores SIGPIPE, and an ignored signal stays
/// ignored across exec.
const INHERITED_SIGNALS: [Signal; 1] = [Signal::SIGPIPE];

/// The shell catches the job-control signals; its children must not.
fn restore_default_signals() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in JOB_CONTROL_SIGNALS.into_iter().chain(INHERITED_SIGNALS) {
        // SAFETY: installing SIG_DFL has no handler to be unsound.
        let _ = unsafe { sigaction(signal, &default) };
    }
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exec_plan_rejects_empty_argv() {
        let err = ExecPlan::new(&[]).unwrap_err();
        assert!(matches!(err, JobError::InvalidCommand { .. }));
    }

    #[test]
    fn test_exec_plan_rejects_nul_bytes() {
        let err = ExecPlan::new(&args(&["echo", "a\0b"])).unwrap_err();
        assert!(matches!(err, JobError::InvalidCommand { .. }));
    }

    #[test]
    fn test_exec_plan_prebuilds_message() {
        let plan = ExecPlan::new(&args(&["nosuchprog", "-x"])).unwrap();
        assert_eq!(plan.program.to_str().unwrap(), "nosuchprog");
        assert_eq!(plan.argv.len(), 2);
        assert_eq!(plan.not_found, b"nosuchprog: Command not found\n");
    }

    #[test]
    fn test_abandon_message_is_not_nested() {
        let inner = JobError::launch("fork: EAGAIN");
        let err = abandon(&[Pid::from_raw(10)], 2, inner.message());
        let text = err.to_string();
        assert!(text.starts_with("[5000] Launch failed: stage 2: fork: EAGAIN"));
        assert_eq!(text.matches("[5000]").count(), 1);
        assert_eq!(text.matches("Launch failed").count(), 1);
    }

    #[test]
    fn test_full_table_is_refused_before_fork() {
        let mut table = JobTable::new(1);
        table
            .add(Pid::from_raw(10), Pid::from_raw(10), JobState::Background, "x")
            .unwrap();
        let plan = ExecPlan::new(&args(&["true"])).unwrap();
        let err = spawn_single(&mut table, &plan, JobState::Background, "true").unwrap_err();
        assert!(matches!(err, JobError::TableFull { .. }));
        assert_eq!(table.len(), 1);
    }
}
