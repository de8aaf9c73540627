use tracing::{debug, warn};

use crate::job_control;
use crate::status::WaitStatus;

/// Capacity of the job table. Slot indices double as job ids.
pub const MAXJOBS: usize = 32;

/// Job labels keep at most this many characters of the command name.
const LABEL_MAX: usize = 15;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

/// A single tracked child process group.
#[derive(Debug)]
pub struct Job {
    /// Slot index; stable for the job's lifetime, reused after release.
    pub jid: usize,
    pub pid: i32,
    /// Each job is its own process group, so this equals `pid`.
    pub pgid: i32,
    /// Background jobs are not waited on by the launcher.
    pub background: bool,
    /// Quiet jobs (pipeline stages) produce no launch or Done notices.
    pub notify: bool,
    pub state: JobState,
    /// Valid when `state == Done` via normal exit.
    pub exit_status: i32,
    /// Set when `state == Done` via signal.
    pub term_signal: Option<i32>,
    /// Command name, truncated for display.
    pub label: String,
}

impl Job {
    fn state_name(&self) -> &'static str {
        match self.state {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
            JobState::Done => "Done",
        }
    }

    /// One display line in the notice format used by `jobs` and the
    /// background-completion report.
    pub fn display_line(&self) -> String {
        let mut line = format!(
            "[{}]+ {}\t{}\tPID: {}",
            self.jid,
            self.state_name(),
            self.label,
            self.pid
        );
        if self.state == JobState::Done {
            match self.term_signal {
                Some(sig) => line.push_str(&format!("\tTerminated with signal {sig}")),
                None => line.push_str(&format!("\tExit {}", self.exit_status)),
            }
        }
        line
    }
}

/// Truncate a command name into a job label.
pub fn job_label(command: &str) -> String {
    command.chars().take(LABEL_MAX).collect()
}

/// The shell's job table: a fixed array of slots, first free slot wins.
pub struct JobTable {
    slots: Vec<Option<Job>>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAXJOBS).map(|_| None).collect(),
        }
    }

    /// Claim the first free slot for a new job. Returns `None` when the
    /// table is full; the caller surfaces that as a user-visible error.
    pub fn register(
        &mut self,
        pid: i32,
        pgid: i32,
        background: bool,
        notify: bool,
        label: &str,
    ) -> Option<usize> {
        let jid = self.slots.iter().position(|slot| slot.is_none())?;
        debug!(jid, pid, pgid, background, "registered job");
        self.slots[jid] = Some(Job {
            jid,
            pid,
            pgid,
            background,
            notify,
            state: JobState::Running,
            exit_status: 0,
            term_signal: None,
            label: job_label(label),
        });
        Some(jid)
    }

    /// Free a slot, returning the job that occupied it.
    pub fn unregister(&mut self, jid: usize) -> Option<Job> {
        self.slots.get_mut(jid)?.take()
    }

    pub fn get(&self, jid: usize) -> Option<&Job> {
        self.slots.get(jid)?.as_ref()
    }

    pub fn get_mut(&mut self, jid: usize) -> Option<&mut Job> {
        self.slots.get_mut(jid)?.as_mut()
    }

    /// Look a job up by its leader pid.
    pub fn find_pid(&self, pid: i32) -> Option<&Job> {
        self.iter().find(|job| job.pid == pid)
    }

    /// All occupied slots in jid order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Non-blocking sweep over every live slot, translating `waitpid`
    /// reports into job state. Never blocks; tolerates slots whose process
    /// vanished without a report.
    pub fn reap(&mut self) {
        for slot in &mut self.slots {
            let Some(job) = slot.as_mut() else { continue };
            if job.state == JobState::Done {
                continue;
            }

            match job_control::wait_nonblocking(job.pid) {
                Ok(Some(WaitStatus::Exited(code))) => {
                    debug!(jid = job.jid, pid = job.pid, code, "job exited");
                    job.state = JobState::Done;
                    job.exit_status = code;
                }
                Ok(Some(WaitStatus::Signaled(sig))) => {
                    debug!(jid = job.jid, pid = job.pid, sig, "job killed");
                    job.state = JobState::Done;
                    job.term_signal = Some(sig);
                }
                Ok(Some(WaitStatus::Stopped(_))) => {
                    job.state = JobState::Stopped;
                }
                Ok(Some(WaitStatus::Continued)) => {
                    job.state = JobState::Running;
                }
                Ok(None) => {
                    // No report, but the process may be gone entirely
                    // (e.g. reaped in a forked subshell copy of the table).
                    if !job_control::process_alive(job.pid) {
                        debug!(jid = job.jid, pid = job.pid, "clearing vanished job");
                        *slot = None;
                    }
                }
                Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                    if !job_control::process_alive(job.pid) {
                        *slot = None;
                    }
                }
                Err(e) => {
                    warn!(jid = job.jid, pid = job.pid, "waitpid failed: {e}");
                }
            }
        }
    }

    /// Release every Done slot. With `notify`, background jobs that want
    /// notices get a completion line first.
    pub fn clear_done(&mut self, notify: bool) {
        let done: Vec<usize> = self
            .iter()
            .filter(|job| job.state == JobState::Done)
            .map(|job| job.jid)
            .collect();
        for jid in done {
            if let Some(job) = self.unregister(jid) {
                if notify && job.background && job.notify {
                    println!("{}", job.display_line());
                }
            }
        }
    }

    /// First occupied slot whose label matches, for `fg`/`bg` by name.
    pub fn find_by_label(&self, name: &str) -> Option<usize> {
        let wanted = job_label(name);
        self.iter().find(|job| job.label == wanted).map(|job| job.jid)
    }

    /// The not-yet-Done job with the highest pid, the default `fg`/`bg`
    /// target when no name is given and no last-job pointer survives.
    pub fn most_recent_live(&self) -> Option<usize> {
        self.iter()
            .filter(|job| job.state != JobState::Done)
            .max_by_key(|job| job.pid)
            .map(|job| job.jid)
    }
}
