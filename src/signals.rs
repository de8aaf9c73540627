use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tracing::debug;

// Shared with the signal handlers. Handlers may only touch these atomics
// and async-signal-safe syscalls (kill, tcsetpgrp); everything else, in
// particular the job table, is mutated on the main thread only.
static CHILD_PENDING: AtomicBool = AtomicBool::new(false);
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);
static SHELL_PGID: AtomicI32 = AtomicI32::new(0);

/// The signals the shell routes while it owns the terminal.
const SHELL_SIGNALS: [libc::c_int; 5] = [
    libc::SIGCHLD,
    libc::SIGINT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

extern "C" fn on_sigchld(_sig: libc::c_int) {
    CHILD_PENDING.store(true, Ordering::Release);
}

extern "C" fn on_sigint(_sig: libc::c_int) {
    let pgid = FOREGROUND_PGID.load(Ordering::Acquire);
    if pgid > 0 {
        unsafe {
            libc::kill(-pgid, libc::SIGINT);
        }
    }
}

extern "C" fn on_sigtstp(_sig: libc::c_int) {
    let pgid = FOREGROUND_PGID.load(Ordering::Acquire);
    if pgid > 0 {
        unsafe {
            libc::kill(-pgid, libc::SIGTSTP);
        }
    }
}

extern "C" fn on_terminal_signal(_sig: libc::c_int) {
    // SIGTTIN/SIGTTOU mean some other group holds the terminal; take it
    // back for the shell. Both signals are masked during delivery, so the
    // tcsetpgrp here cannot re-trigger a stop.
    let pgid = SHELL_PGID.load(Ordering::Acquire);
    if pgid > 0 {
        unsafe {
            libc::tcsetpgrp(libc::STDIN_FILENO, pgid);
        }
    }
}

/// Install the shell's handler set for all routed signals.
pub fn install_shell_handlers() -> io::Result<()> {
    set_handler(libc::SIGCHLD, on_sigchld)?;
    set_handler(libc::SIGINT, on_sigint)?;
    set_handler(libc::SIGTSTP, on_sigtstp)?;
    set_handler(libc::SIGTTIN, on_terminal_signal)?;
    set_handler(libc::SIGTTOU, on_terminal_signal)?;
    debug!("installed shell signal handlers");
    Ok(())
}

/// Restore the OS default disposition for all routed signals. Used while a
/// foreground job owns the terminal.
pub fn install_default_handlers() -> io::Result<()> {
    for &sig in &SHELL_SIGNALS {
        if unsafe { libc::signal(sig, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reset dispositions in a forked child before exec. SIG_IGN survives
/// exec(), so without this children would inherit the shell's indifference
/// to Ctrl-Z, Ctrl-\, and SIGPIPE. Async-signal-safe; callable between
/// fork and exec.
pub fn reset_child_signals() -> io::Result<()> {
    let signals = [
        libc::SIGCHLD,
        libc::SIGINT,
        libc::SIGTSTP,
        libc::SIGQUIT,
        libc::SIGPIPE,
        libc::SIGTTIN,
        libc::SIGTTOU,
    ];
    for sig in signals {
        if unsafe { libc::signal(sig, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Record which process group currently runs in the foreground, so the
/// SIGINT/SIGTSTP handlers know where to forward. Zero clears it.
pub fn set_foreground_pgid(pgid: i32) {
    FOREGROUND_PGID.store(pgid, Ordering::Release);
}

/// Publish the shell's own process group for the terminal-signal handler.
pub fn set_shell_pgid(pgid: i32) {
    SHELL_PGID.store(pgid, Ordering::Release);
}

/// Consume the pending-SIGCHLD flag. Returns true if at least one SIGCHLD
/// arrived since the last call.
pub fn take_child_pending() -> bool {
    CHILD_PENDING.swap(false, Ordering::AcqRel)
}

fn set_handler(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    // SA_RESTART so blocking primitives in the shell (read at the prompt,
    // waitpid on a foreground job) are not aborted by routed signals.
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        // Terminal reclaim inside a handler must not re-trigger stop signals.
        libc::sigaddset(&mut action.sa_mask, libc::SIGTTIN);
        libc::sigaddset(&mut action.sa_mask, libc::SIGTTOU);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
