use std::io;

use tracing::{debug, warn};

use crate::jobs::JobState;
use crate::shell::Shell;
use crate::signals;
use crate::status::{self, WaitStatus};

/// Drive a syscall that signals failure with a negative return, retrying
/// while it fails with EINTR.
fn retry_eintr(mut syscall: impl FnMut() -> libc::c_int) -> io::Result<libc::c_int> {
    loop {
        let rc = syscall();
        if rc >= 0 {
            return Ok(rc);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// Make `pid` the leader of its own process group (`0` means the calling
/// process). Every job leads its own group, so losing the setpgid race
/// against the child's copy of this call still leaves the group right.
pub fn enter_own_group(pid: i32) -> io::Result<()> {
    match retry_eintr(|| unsafe { libc::setpgid(pid, pid) }) {
        Ok(_) => Ok(()),
        Err(e) if matches!(e.raw_os_error(), Some(libc::EACCES | libc::ESRCH)) => {
            debug!(pid, "process group already settled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// True if a process with this pid still exists (zero-signal probe).
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Fork the shell. Returns `Ok(0)` in the child and `Ok(pid)` in the parent.
pub fn fork() -> io::Result<i32> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pid)
}

/// Blocking wait for one pid, with `WUNTRACED` so a stopped child returns
/// control to the shell instead of hanging it.
pub fn wait_blocking(pid: i32) -> io::Result<WaitStatus> {
    loop {
        let mut raw: libc::c_int = 0;
        retry_eintr(|| unsafe { libc::waitpid(pid, &mut raw, libc::WUNTRACED) })?;
        match status::decode_wait_status(raw) {
            Some(WaitStatus::Continued) | None => continue,
            Some(outcome) => return Ok(outcome),
        }
    }
}

/// Non-blocking probe for one pid. `Ok(None)` means no state change yet.
pub fn wait_nonblocking(pid: i32) -> io::Result<Option<WaitStatus>> {
    let mut raw: libc::c_int = 0;
    let rc = retry_eintr(|| unsafe {
        libc::waitpid(
            pid,
            &mut raw,
            libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
        )
    })?;
    if rc == 0 {
        return Ok(None);
    }
    Ok(status::decode_wait_status(raw))
}

/// Resume every process in a job's group with SIGCONT.
fn resume_group(pgid: i32) -> io::Result<()> {
    debug!(pgid, "delivering SIGCONT");
    retry_eintr(|| unsafe { libc::kill(-pgid, libc::SIGCONT) }).map(|_| ())
}

/// Point the controlling terminal at `pgid`.
///
/// tcsetpgrp from a group that no longer owns the terminal raises SIGTTOU,
/// so that signal is parked at SIG_IGN for the duration of the call.
pub fn point_terminal_at(pgid: i32) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to hand the terminal to a non-positive group",
        ));
    }

    let previous = unsafe { libc::signal(libc::SIGTTOU, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    let result = retry_eintr(|| unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, pgid) }).map(|_| ());
    unsafe {
        libc::signal(libc::SIGTTOU, previous);
    }
    if result.is_ok() {
        debug!(pgid, "terminal pointed at group");
    }
    result
}

/// Terminal ownership for the span of one foreground job: construction
/// points the terminal at the job's group, drop points it back at the
/// shell's.
struct TerminalHandoff {
    shell_pgid: i32,
}

impl TerminalHandoff {
    fn give_to(job_pgid: i32, shell_pgid: i32) -> io::Result<Self> {
        point_terminal_at(job_pgid)?;
        Ok(Self { shell_pgid })
    }
}

impl Drop for TerminalHandoff {
    fn drop(&mut self) {
        if let Err(e) = point_terminal_at(self.shell_pgid) {
            warn!("failed to reclaim terminal: {e}");
        }
    }
}

/// Run the job in `jid` as the foreground job: swap in the default signal
/// set, hand over the terminal, resume the job if asked, block until it
/// exits or stops, then reclaim both. Returns the job's shell-level status.
pub fn run_in_foreground(shell: &mut Shell, jid: usize, send_cont: bool) -> i32 {
    let (pid, pgid, label, stopped) = match shell.jobs.get(jid) {
        Some(job) => (
            job.pid,
            job.pgid,
            job.label.clone(),
            job.state == JobState::Stopped,
        ),
        None => return 1,
    };

    if let Err(e) = signals::install_default_handlers() {
        warn!("failed to install default handlers: {e}");
    }

    let handoff = if shell.interactive {
        match TerminalHandoff::give_to(pgid, shell.shell_pgid) {
            Ok(handoff) => Some(handoff),
            Err(e) => {
                eprintln!("shale: {label}: failed to move terminal to job: {e}");
                None
            }
        }
    } else {
        None
    };

    shell.foreground = Some(jid);
    signals::set_foreground_pgid(pgid);
    debug!(jid, pid, pgid, "foreground wait");

    if send_cont && stopped {
        if let Err(e) = resume_group(pgid) {
            eprintln!("shale: {label}: failed to resume: {e}");
        }
    }
    if let Some(job) = shell.jobs.get_mut(jid) {
        job.state = JobState::Running;
    }

    let status = match wait_blocking(pid) {
        Err(e) => {
            eprintln!("shale: {label}: waitpid failed: {e}");
            1
        }
        Ok(WaitStatus::Stopped(_)) => {
            // Ctrl-Z. The job keeps its slot and becomes a stopped
            // background job the user can resume with fg/bg.
            if let Some(job) = shell.jobs.get_mut(jid) {
                job.state = JobState::Stopped;
                job.background = true;
            }
            shell.last_bg = Some((jid, pid));
            println!("[{jid}]+ Stopped\t{label}");
            0
        }
        Ok(WaitStatus::Exited(code)) => {
            if let Some(job) = shell.jobs.get_mut(jid) {
                job.state = JobState::Done;
                job.exit_status = code;
            }
            code
        }
        Ok(WaitStatus::Signaled(sig)) => {
            if let Some(job) = shell.jobs.get_mut(jid) {
                job.state = JobState::Done;
                job.term_signal = Some(sig);
            }
            report_signal_death(&label, sig);
            status::signal_exit_code(sig)
        }
        Ok(WaitStatus::Continued) => 0,
    };

    signals::set_foreground_pgid(0);
    if let Err(e) = signals::install_shell_handlers() {
        warn!("failed to reinstall shell handlers: {e}");
    }
    drop(handoff);
    // The foreground pointer stays set; the driver reads it to let the
    // job's status dominate, then clears it.

    status
}

/// Resume the job in `jid` in the background (SIGCONT if stopped).
pub fn move_to_background(shell: &mut Shell, jid: usize) -> i32 {
    let (pid, pgid, label, stopped) = match shell.jobs.get(jid) {
        Some(job) => (
            job.pid,
            job.pgid,
            job.label.clone(),
            job.state == JobState::Stopped,
        ),
        None => return 1,
    };

    if stopped {
        if let Err(e) = resume_group(pgid) {
            eprintln!("shale: {label}: failed to resume: {e}");
            return 1;
        }
    }

    if let Some(job) = shell.jobs.get_mut(jid) {
        job.state = JobState::Running;
    }
    shell.last_bg = Some((jid, pid));
    debug!(jid, pid, "moved to background");
    0
}

fn report_signal_death(label: &str, signal: i32) {
    match signal {
        libc::SIGSEGV => eprintln!("{label}: Segmentation fault."),
        libc::SIGKILL | libc::SIGTERM => eprintln!("{label}: Terminated."),
        // Keep the next prompt off the ^C line.
        libc::SIGINT => println!(),
        _ => {}
    }
}
