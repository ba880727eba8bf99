//! Fixed-capacity job table.
//!
//! Jobs live in a slot array scanned linearly. An empty slot is an undefined
//! job. The table enforces the two contracts everything else leans on: the
//! capacity ceiling and "at most one foreground job".

use nix::unistd::Pid;
use tracing::debug;

use crate::error::JobError;
use crate::job::{Job, JobId, JobNotice, JobState};

#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_jid: u32,
    notices: Vec<JobNotice>,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next_jid: 1,
            notices: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Register a single-process job whose group is `pgid`.
    pub fn add(
        &mut self,
        pid: Pid,
        pgid: Pid,
        state: JobState,
        command_line: &str,
    ) -> Result<JobId, JobError> {
        self.add_group(pgid, &[pid], state, command_line)
    }

    /// Register one job for a whole process group. The first member is the
    /// leader.
    pub fn add_group(
        &mut self,
        pgid: Pid,
        members: &[Pid],
        state: JobState,
        command_line: &str,
    ) -> Result<JobId, JobError> {
        if members.is_empty() || members.iter().any(|p| p.as_raw() < 1) || pgid.as_raw() < 1 {
            return Err(JobError::invalid_command(format!(
                "cannot register pids {:?} in group {}",
                members, pgid
            )));
        }
        if let Some(pid) = members.iter().find(|&&p| self.by_member(p).is_some()) {
            return Err(JobError::launch(format!("pid {} is already tracked", pid)));
        }
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                return Err(JobError::foreground_busy(format!(
                    "job [{}] already owns the foreground",
                    fg.jid
                )));
            }
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(JobError::table_full(format!(
                "tried to create more than {} jobs",
                self.capacity()
            )));
        };

        let jid = self.allocate_jid();
        let job = Job::new(jid, pgid, members, state, command_line);
        debug!(jid = %jid, pid = %job.pid, pgid = %pgid, members = members.len(), cmd = %job.command_line, "Added job");
        self.slots[slot] = Some(job);
        Ok(jid)
    }

    fn allocate_jid(&mut self) -> JobId {
        let wrap = self.capacity() as u32;
        let mut candidate = self.next_jid;
        if candidate < 1 || candidate > wrap {
            candidate = 1;
        }
        while self.by_jid(JobId(candidate)).is_some() {
            candidate = if candidate >= wrap { 1 } else { candidate + 1 };
        }
        self.next_jid = candidate + 1;
        if self.next_jid > wrap {
            self.next_jid = 1;
        }
        JobId(candidate)
    }

    fn max_jid(&self) -> u32 {
        self.iter().map(|j| j.jid.0).max().unwrap_or(0)
    }

    /// Clear the job owning process group `pgid`.
    pub fn remove(&mut self, pgid: Pid) -> bool {
        if pgid.as_raw() < 1 {
            return false;
        }
        let mut removed = false;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|j| j.pgid == pgid) {
                *slot = None;
                removed = true;
            }
        }
        if removed {
            self.next_jid = self.max_jid() + 1;
        }
        removed
    }

    /// Find a job by its leader pid.
    pub fn by_pid(&self, pid: Pid) -> Option<&Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.iter().find(|j| j.pid == pid)
    }

    pub fn by_jid(&self, jid: JobId) -> Option<&Job> {
        if jid.0 < 1 {
            return None;
        }
        self.iter().find(|j| j.jid == jid)
    }

    pub fn by_jid_mut(&mut self, jid: JobId) -> Option<&mut Job> {
        self.iter_mut().find(|j| j.jid == jid)
    }

    pub fn by_pgid(&self, pgid: Pid) -> Option<&Job> {
        self.iter().find(|j| j.pgid == pgid)
    }

    /// Find the job that owns process `pid`, leader or not.
    pub fn by_member(&self, pid: Pid) -> Option<&Job> {
        self.iter().find(|j| j.has_member(pid))
    }

    pub fn by_member_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.iter_mut().find(|j| j.has_member(pid))
    }

    pub fn pid_to_jid(&self, pid: Pid) -> Option<JobId> {
        self.by_pid(pid).map(|j| j.jid)
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.iter().find(|j| j.state == JobState::Foreground)
    }

    pub fn foreground_mut(&mut self) -> Option<&mut Job> {
        self.iter_mut().find(|j| j.state == JobState::Foreground)
    }

    pub fn foreground_pid(&self) -> Option<Pid> {
        self.foreground().map(|j| j.pid)
    }

    /// Explicit state change (fg/bg).
    pub fn set_state(&mut self, jid: JobId, state: JobState) -> Result<(), JobError> {
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground().filter(|fg| fg.jid != jid) {
                return Err(JobError::foreground_busy(format!(
                    "job [{}] already owns the foreground",
                    fg.jid
                )));
            }
        }
        let job = self
            .by_jid_mut(jid)
            .ok_or_else(|| JobError::invalid_job_reference(format!("%{}", jid)))?;
        job.state = state;
        Ok(())
    }

    /// Live jobs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.slots.iter_mut().flatten()
    }

    pub(crate) fn push_notice(&mut self, notice: JobNotice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<JobNotice> {
        std::mem::take(&mut self.notices)
    }
}
