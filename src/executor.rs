use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;

use tracing::debug;

use crate::ast::{Connector, Node, RedirKind};
use crate::builtins::{self, BuiltinAction};
use crate::job_control;
use crate::jobs::MAXJOBS;
use crate::redirect::{self, SavedFd};
use crate::shell::Shell;
use crate::signals;

/// How a subtree should be evaluated: in the background, and whether job
/// launches/completions produce notices (pipeline stages stay quiet).
#[derive(Debug, Clone, Copy)]
pub struct EvalOpts {
    pub background: bool,
    pub notify: bool,
}

impl EvalOpts {
    pub fn foreground() -> Self {
        Self {
            background: false,
            notify: true,
        }
    }
}

/// The result of evaluating a subtree.
#[derive(Debug)]
pub enum EvalOutcome {
    /// A real shell status; becomes `$?`.
    Status(i32),
    /// A job was launched and has no status yet; `$?` is left alone.
    Launched,
    /// The `exit` builtin: unwind to the driver with this code.
    Exit(i32),
}

/// Recursively evaluate a command tree. The tree is read-only and owned by
/// the caller.
pub fn eval(shell: &mut Shell, node: &Node, opts: EvalOpts) -> EvalOutcome {
    match node {
        Node::Empty => EvalOutcome::Launched,
        Node::Simple { argv } => run_simple(shell, argv, opts),
        // A backgrounded sequence runs in a forked subshell so the parent
        // shell does not wait on any of its parts.
        Node::Sequence { .. } if opts.background => spawn_subshell(shell, node, opts),
        Node::Sequence { op, left, right } => run_sequence(shell, *op, left, right, opts),
        Node::Background { inner } => eval(
            shell,
            inner,
            EvalOpts {
                background: true,
                ..opts
            },
        ),
        Node::Pipe { left, right } => run_pipeline(shell, left, right, opts),
        Node::Redirect { kind, path, inner } => run_redirect(shell, *kind, path, inner, opts),
    }
}

// ── Sequences: `;`, `&&`, `||` ──

fn run_sequence(
    shell: &mut Shell,
    op: Connector,
    left: &Node,
    right: &Node,
    opts: EvalOpts,
) -> EvalOutcome {
    let foreground = EvalOpts {
        background: false,
        ..opts
    };

    let left_status = match eval(shell, left, foreground) {
        EvalOutcome::Exit(code) => return EvalOutcome::Exit(code),
        EvalOutcome::Status(status) => status,
        EvalOutcome::Launched => 0,
    };

    let run_right = match op {
        Connector::Sequence => true,
        Connector::And => left_status == 0,
        Connector::Or => left_status != 0,
    };

    if run_right {
        eval(shell, right, foreground)
    } else {
        EvalOutcome::Status(left_status)
    }
}

/// Fork a subshell that evaluates `node` in the foreground and exits with
/// its status; the parent tracks it as a single background job.
fn spawn_subshell(shell: &mut Shell, node: &Node, opts: EvalOpts) -> EvalOutcome {
    // Buffered output must not be duplicated into the child.
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let pid = match job_control::fork() {
        Ok(pid) => pid,
        Err(e) => {
            eprintln!("shale: failed to fork: {e}");
            return EvalOutcome::Status(1);
        }
    };

    if pid == 0 {
        let _ = signals::reset_child_signals();
        let _ = job_control::enter_own_group(0);
        shell.reset_for_subshell();
        let code = match eval(shell, node, EvalOpts::foreground()) {
            EvalOutcome::Status(status) => status,
            EvalOutcome::Launched => 0,
            EvalOutcome::Exit(code) => code,
        };
        let _ = io::stdout().flush();
        std::process::exit(code);
    }

    debug!(pid, "forked background sequence");
    let _ = job_control::enter_own_group(pid);
    register_background(shell, pid, opts.notify, "Sequence")
}

// ── Pipelines ──

fn run_pipeline(shell: &mut Shell, left: &Node, right: &Node, opts: EvalOpts) -> EvalOutcome {
    let (reader, writer) = match os_pipe::pipe() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("shale: failed to create pipe: {e}");
            return EvalOutcome::Status(1);
        }
    };

    let saved = SavedFd::new(libc::STDIN_FILENO).and_then(|stdin| {
        SavedFd::new(libc::STDOUT_FILENO).map(|stdout| (stdin, stdout))
    });
    let (mut saved_in, mut saved_out) = match saved {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("shale: failed to save descriptors: {e}");
            return EvalOutcome::Status(1);
        }
    };

    // The right stage must own the read end before the left stage writes,
    // so it is spawned first, as a quiet background job of the shell.
    if let Err(e) = redirect::dup_onto(reader.as_raw_fd(), libc::STDIN_FILENO) {
        eprintln!("shale: failed to wire pipe: {e}");
        return EvalOutcome::Status(1);
    }
    let _ = eval(
        shell,
        right,
        EvalOpts {
            background: true,
            notify: false,
        },
    );
    if let Err(e) = saved_in.restore() {
        eprintln!("shale: failed to restore stdin: {e}");
        return EvalOutcome::Status(1);
    }
    // The shell's read-end copy must die before the left stage blocks;
    // otherwise a finished right stage could never deliver EPIPE upstream
    // and a write-heavy left stage would hang the wait.
    drop(reader);

    let _ = io::stdout().flush();
    if let Err(e) = redirect::dup_onto(writer.as_raw_fd(), libc::STDOUT_FILENO) {
        eprintln!("shale: failed to wire pipe: {e}");
        return EvalOutcome::Status(1);
    }
    let outcome = eval(shell, left, opts);

    // Builtin output still in the stdout buffer belongs in the pipe.
    let _ = io::stdout().flush();
    let _ = saved_out.restore();

    // The last shell-side write end closes here; the right stage sees EOF
    // once the left stage's copies are gone too.
    drop(writer);

    // The pipeline's status is the left-most stage's status.
    outcome
}

// ── Redirections ──

fn run_redirect(
    shell: &mut Shell,
    kind: RedirKind,
    path: &str,
    inner: &Node,
    opts: EvalOpts,
) -> EvalOutcome {
    let mut saves = match redirect::save_std_fds() {
        Ok(saves) => saves,
        Err(e) => {
            eprintln!("shale: failed to save descriptors: {e}");
            return EvalOutcome::Status(1);
        }
    };

    let file = match redirect::open_target(kind, path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{path}: {e}");
            return EvalOutcome::Status(1);
        }
    };

    // Anything buffered belongs to the old descriptors.
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    if let Err(e) = redirect::wire(kind, &file) {
        eprintln!("{path}: {e}");
        return EvalOutcome::Status(1);
    }

    let outcome = eval(shell, inner, opts);

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    drop(file);
    for save in saves.iter_mut().rev() {
        let _ = save.restore();
    }

    outcome
}

// ── Simple commands ──

fn run_simple(shell: &mut Shell, argv: &[String], opts: EvalOpts) -> EvalOutcome {
    let Some(program) = argv.first() else {
        return EvalOutcome::Launched;
    };

    // Builtins run in the shell process; the background flag is ignored.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    if let Some(action) = builtins::dispatch(shell, argv, &mut stdout, &mut stderr) {
        let _ = stdout.flush();
        let _ = stderr.flush();
        return match action {
            BuiltinAction::Continue(code) => EvalOutcome::Status(code),
            BuiltinAction::Exit(code) => EvalOutcome::Exit(code),
        };
    }

    let mut command = Command::new(program);
    command.args(&argv[1..]);
    unsafe {
        command.pre_exec(|| {
            // SIG_IGN survives exec(); give the child a clean slate and
            // its own process group before the program takes over.
            signals::reset_child_signals()?;
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return EvalOutcome::Status(command_error(program, &e)),
    };
    let pid = child.id() as i32;
    // Reaped via waitpid, never via the Child handle.
    drop(child);

    // Both the child's pre_exec and this call race to setpgid; whichever
    // wins, the result is correct.
    if let Err(e) = job_control::enter_own_group(pid) {
        eprintln!("shale: {program}: failed to set process group: {e}");
    }

    if opts.background {
        register_background(shell, pid, opts.notify, program)
    } else {
        // The job leads its own group, so its pgid is its pid.
        match shell.jobs.register(pid, pid, false, opts.notify, program) {
            Some(jid) => EvalOutcome::Status(job_control::run_in_foreground(shell, jid, false)),
            None => overflow(pid, program),
        }
    }
}

fn register_background(shell: &mut Shell, pid: i32, notify: bool, label: &str) -> EvalOutcome {
    match shell.jobs.register(pid, pid, true, notify, label) {
        Some(jid) => {
            if notify {
                println!("[{jid}] {pid}");
            }
            shell.last_bg = Some((jid, pid));
            EvalOutcome::Launched
        }
        None => overflow(pid, label),
    }
}

/// No free slot: the just-spawned child cannot be tracked, so it is taken
/// down rather than leaked, and the command fails.
fn overflow(pid: i32, label: &str) -> EvalOutcome {
    eprintln!("shale: {label}: job table full ({MAXJOBS} jobs); wait for existing jobs to finish");
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
    let _ = job_control::wait_blocking(pid);
    EvalOutcome::Status(1)
}

/// Map a spawn/exec error to the appropriate exit code.
fn command_error(program: &str, e: &io::Error) -> i32 {
    if e.kind() == io::ErrorKind::NotFound {
        eprintln!("shale: {program}: command not found");
        127
    } else {
        eprintln!("shale: {program}: {e}");
        126
    }
}
