//! Job records and the notices the relay queues about them.

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;

/// Shell-local job number shown to the user (`%1`, `%2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a live job. An empty table slot is the undefined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Foreground,
    Background,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

/// Last status reported for one process of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Running,
    Stopped,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub pid: Pid,
    pub status: MemberStatus,
}

/// One tracked unit of work: a single process or a whole pipeline.
#[derive(Debug, Clone)]
pub struct Job {
    pub jid: JobId,
    /// Leader process (stage 0 of a pipeline)
    pub pid: Pid,
    pub pgid: Pid,
    pub state: JobState,
    pub command_line: String,
    pub(crate) members: Vec<Member>,
    pub(crate) stop_requested: bool,
    pub(crate) terminated_by: Option<Signal>,
}

impl Job {
    pub(crate) fn new(
        jid: JobId,
        pgid: Pid,
        members: &[Pid],
        state: JobState,
        command_line: &str,
    ) -> Self {
        Self {
            jid,
            pid: members[0],
            pgid,
            state,
            command_line: command_line.trim_end().to_string(),
            members: members
                .iter()
                .map(|&pid| Member {
                    pid,
                    status: MemberStatus::Running,
                })
                .collect(),
            stop_requested: false,
            terminated_by: None,
        }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn is_pipeline(&self) -> bool {
        self.members.len() > 1
    }

    pub fn has_member(&self, pid: Pid) -> bool {
        self.members.iter().any(|m| m.pid == pid)
    }

    /// Number of members that have reported a final exit.
    pub fn exited_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.status == MemberStatus::Exited)
            .count()
    }

    pub fn all_exited(&self) -> bool {
        self.exited_count() == self.members.len()
    }

    /// Record a member's status. Returns false if `pid` is not a member.
    pub(crate) fn set_member_status(&mut self, pid: Pid, status: MemberStatus) -> bool {
        match self.members.iter_mut().find(|m| m.pid == pid) {
            Some(member) => {
                member.status = status;
                true
            }
            None => false,
        }
    }
}

/// Something the user should hear about, produced off the main thread and
/// printed by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNotice {
    Stopped { jid: JobId, pid: Pid, signal: Signal },
    Terminated { jid: JobId, pid: Pid, signal: Signal },
}

impl fmt::Display for JobNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobNotice::Stopped { jid, pid, signal } => write!(
                f,
                "Job [{}] ({}) stopped by signal {}",
                jid, pid, *signal as i32
            ),
            JobNotice::Terminated { jid, pid, signal } => write!(
                f,
                "Job [{}] ({}) terminated by signal {}",
                jid, pid, *signal as i32
            ),
        }
    }
}
