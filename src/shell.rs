use tracing::{debug, warn};

use crate::ast::Node;
use crate::executor::{self, EvalOpts, EvalOutcome};
use crate::job_control;
use crate::jobs::{JobState, JobTable};
use crate::signals;
use crate::status;

/// What the REPL should do after one evaluation.
#[derive(Debug)]
pub enum ExecutionAction {
    Continue(i32),
    Exit(i32),
}

/// Process-wide evaluator state, created once in `main` and passed
/// explicitly. The signal handlers see only the atomics published through
/// `signals`; everything here is main-thread-only.
pub struct Shell {
    pub shell_pgid: i32,
    /// True iff the shell controls the terminal. Gates terminal handoff,
    /// not notices.
    pub interactive: bool,
    initialized: bool,
    /// Last observed status, surfaced by the `$?` substitution in `echo`.
    pub last_status: i32,
    pub jobs: JobTable,
    /// Slot of the job currently owning the foreground, if any.
    pub foreground: Option<usize>,
    /// Most recently launched or resumed background job, as `(jid, pid)`;
    /// the pid detects slot reuse.
    pub last_bg: Option<(usize, i32)>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self {
            shell_pgid: 0,
            interactive: false,
            initialized: false,
            last_status: 0,
            jobs: JobTable::new(),
            foreground: None,
            last_bg: None,
        }
    }

    /// One-time setup, run lazily before the first evaluation: handlers,
    /// own process group, terminal ownership. Must complete before any
    /// fork so the handlers observe an initialized table.
    fn init(&mut self) {
        if let Err(e) = signals::install_shell_handlers() {
            eprintln!("shale: failed to install signal handlers: {e}");
        }

        if let Err(e) = job_control::enter_own_group(0) {
            // EPERM means this process leads its session; that group is fine.
            if e.raw_os_error() != Some(libc::EPERM) {
                eprintln!("shale: cannot establish shell process group: {e}");
                std::process::exit(1);
            }
        }

        self.shell_pgid = unsafe { libc::getpgrp() };
        signals::set_shell_pgid(self.shell_pgid);

        self.interactive = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        if self.interactive {
            if let Err(e) = job_control::point_terminal_at(self.shell_pgid) {
                warn!("cannot take terminal ownership: {e}");
                self.interactive = false;
            }
        }

        debug!(
            pgid = self.shell_pgid,
            interactive = self.interactive,
            "shell initialized"
        );
        self.initialized = true;
    }

    /// Evaluate one command tree and fold the result into `$?`.
    ///
    /// After this returns, every Done slot has been cleared and no job
    /// holds the foreground pointer; the shell's std fds are the ones it
    /// started with.
    pub fn evaluate(&mut self, node: &Node) -> ExecutionAction {
        if !self.initialized {
            self.init();
        }

        let outcome = executor::eval(self, node, EvalOpts::foreground());

        // Harvest state changes that arrived while evaluating.
        self.jobs.reap();

        let mut status = match outcome {
            EvalOutcome::Exit(code) => {
                self.jobs.clear_done(false);
                self.foreground = None;
                return ExecutionAction::Exit(code);
            }
            EvalOutcome::Status(status) => status,
            // Job launched, no status yet; `$?` keeps its value.
            EvalOutcome::Launched => self.last_status,
        };

        // A foreground job that ended non-zero dominates whatever the rest
        // of the tree computed around it.
        if let Some(jid) = self.foreground {
            if let Some(job) = self.jobs.get(jid) {
                if job.state == JobState::Done {
                    let fg_status = match job.term_signal {
                        Some(sig) => status::signal_exit_code(sig),
                        None => job.exit_status,
                    };
                    if fg_status != 0 {
                        status = fg_status;
                    }
                }
            }
        }
        self.last_status = status;

        self.jobs.clear_done(true);
        self.foreground = None;

        ExecutionAction::Continue(status)
    }

    /// Pre-prompt poll: run the reap work a SIGCHLD deferred to the main
    /// thread.
    pub fn poll_jobs(&mut self) {
        if signals::take_child_pending() {
            self.jobs.reap();
            self.jobs.clear_done(true);
        }
    }

    /// Called in a forked subshell: drop bookkeeping that belongs to the
    /// parent shell.
    pub(crate) fn reset_for_subshell(&mut self) {
        self.jobs = JobTable::new();
        self.foreground = None;
        self.last_bg = None;
        self.interactive = false;
    }
}
