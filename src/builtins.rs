use std::io::Write;

use crate::job_control;
use crate::jobs::JobState;
use crate::shell::Shell;

/// What the evaluator should do after a builtin ran.
#[derive(Debug)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Additive command hash with a position-dependent weight. Cheap first-pass
/// filter for dispatch; matches are confirmed by name equality.
pub const fn cmd_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_add((bytes[i] as u32).wrapping_mul(i as u32 + 1));
        i += 1;
    }
    hash
}

const HASH_CD: u32 = cmd_hash("cd");
const HASH_ECHO: u32 = cmd_hash("echo");
const HASH_EXIT: u32 = cmd_hash("exit");
const HASH_HELP: u32 = cmd_hash("help");
const HASH_HASH: u32 = cmd_hash("hash");
const HASH_JOBS: u32 = cmd_hash("jobs");
const HASH_FG: u32 = cmd_hash("fg");
const HASH_BG: u32 = cmd_hash("bg");
const HASH_STATUS: u32 = cmd_hash("$?");

/// Try `argv` as a builtin. Returns `None` for external commands so the
/// launcher knows to fork. Builtins always run in the shell process and
/// write through the provided streams.
pub fn dispatch(
    shell: &mut Shell,
    argv: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Option<BuiltinAction> {
    let program = argv[0].as_str();
    let args = &argv[1..];

    let action = match cmd_hash(program) {
        HASH_CD if program == "cd" => BuiltinAction::Continue(builtin_cd(args, stderr)),
        HASH_ECHO if program == "echo" => BuiltinAction::Continue(builtin_echo(shell, args, stdout)),
        HASH_EXIT if program == "exit" => builtin_exit(args, stderr),
        HASH_HELP if program == "help" => BuiltinAction::Continue(builtin_help(stdout)),
        HASH_HASH if program == "hash" => BuiltinAction::Continue(builtin_hash(args, stdout, stderr)),
        HASH_JOBS if program == "jobs" => BuiltinAction::Continue(builtin_jobs(shell, stdout)),
        HASH_FG if program == "fg" => BuiltinAction::Continue(builtin_fg(shell, args, stdout, stderr)),
        HASH_BG if program == "bg" => BuiltinAction::Continue(builtin_bg(shell, args, stdout, stderr)),
        _ => return None,
    };
    Some(action)
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) => dir.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
    };

    if std::env::set_current_dir(&target).is_err() {
        let _ = writeln!(stderr, "cd: {target}: Unable to change directory");
        return 1;
    }

    0
}

fn builtin_echo(shell: &Shell, args: &[String], stdout: &mut dyn Write) -> i32 {
    // A leading `$?` substitutes the last evaluation's status.
    let leads_with_status = matches!(
        args.first(),
        Some(first) if cmd_hash(first) == HASH_STATUS && first == "$?"
    );

    let _ = if leads_with_status {
        let rest = &args[1..];
        if rest.is_empty() {
            writeln!(stdout, "{}", shell.last_status)
        } else {
            writeln!(stdout, "{} {}", shell.last_status, rest.join(" "))
        }
    } else {
        writeln!(stdout, "{}", args.join(" "))
    };
    0
}

fn builtin_exit(args: &[String], stderr: &mut dyn Write) -> BuiltinAction {
    match args.first() {
        None => BuiltinAction::Exit(0),
        Some(s) => match s.parse::<i32>() {
            Ok(code) => BuiltinAction::Exit(code),
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                BuiltinAction::Exit(2)
            }
        },
    }
}

fn builtin_help(stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(
        stdout,
        "shale, a small job-controlling shell\n\
         builtin commands:\n\
         \x20 cd [dir]      change directory (defaults to $HOME)\n\
         \x20 echo [args]   print arguments; a leading $? prints the last status\n\
         \x20 exit [n]      leave the shell\n\
         \x20 hash <text>   print the command hash of <text>\n\
         \x20 jobs          list tracked jobs\n\
         \x20 fg [name]     resume a job in the foreground\n\
         \x20 bg [name]     resume a stopped job in the background\n\
         \x20 help          this text\n\
         anything else runs as an external command; end a line with & to background it"
    );
    0
}

fn builtin_hash(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    match args.first() {
        Some(text) => {
            let _ = writeln!(stdout, "{:#x}", cmd_hash(text));
            0
        }
        None => {
            let _ = writeln!(stderr, "hash: usage: hash <text>");
            1
        }
    }
}

fn builtin_jobs(shell: &Shell, stdout: &mut dyn Write) -> i32 {
    for job in shell.jobs.iter() {
        let _ = writeln!(stdout, "{}", job.display_line());
    }
    0
}

/// Pick the job `fg`/`bg` should act on: by label when named, else the
/// remembered last background job when still live, else the live job with
/// the highest pid.
fn pick_job(shell: &Shell, name: Option<&str>) -> Option<usize> {
    if let Some(name) = name {
        let jid = shell.jobs.find_by_label(name)?;
        if shell.jobs.get(jid)?.state == JobState::Done {
            return None;
        }
        return Some(jid);
    }

    if let Some((jid, pid)) = shell.last_bg {
        // The pid check guards against the slot having been reused.
        if let Some(job) = shell.jobs.find_pid(pid) {
            if job.jid == jid && job.state != JobState::Done {
                return Some(jid);
            }
        }
    }

    shell.jobs.most_recent_live()
}

fn builtin_fg(
    shell: &mut Shell,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some(jid) = pick_job(shell, args.first().map(String::as_str)) else {
        let _ = writeln!(stderr, "fg: no job to resume");
        return 1;
    };

    let label = shell
        .jobs
        .get(jid)
        .map(|job| job.label.clone())
        .unwrap_or_default();
    let _ = writeln!(stdout, "[{jid}]+ Resumed\t{label}");
    let _ = stdout.flush();

    job_control::run_in_foreground(shell, jid, true)
}

fn builtin_bg(
    shell: &mut Shell,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some(jid) = pick_job(shell, args.first().map(String::as_str)) else {
        let _ = writeln!(stderr, "bg: no job to resume");
        return 1;
    };

    let (label, state) = match shell.jobs.get(jid) {
        Some(job) => (job.label.clone(), job.state),
        None => return 1,
    };

    if state == JobState::Running {
        let _ = writeln!(stderr, "bg: {label}: already in background");
        return 1;
    }

    let _ = writeln!(stdout, "[{jid}]+ Resumed\t{label}");
    job_control::move_to_background(shell, jid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(shell: &mut Shell, line: &[&str]) -> (Option<BuiltinAction>, String, String) {
        let argv: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let action = dispatch(shell, &argv, &mut out, &mut err);
        (
            action,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn hash_is_position_sensitive() {
        assert_ne!(cmd_hash("ab"), cmd_hash("ba"));
        assert_eq!(cmd_hash("cd"), HASH_CD);
    }

    #[test]
    fn external_commands_are_not_dispatched() {
        let mut shell = Shell::new();
        let (action, _, _) = run(&mut shell, &["ls", "-l"]);
        assert!(action.is_none());
    }

    #[test]
    fn echo_joins_arguments() {
        let mut shell = Shell::new();
        let (_, out, _) = run(&mut shell, &["echo", "hello", "world"]);
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn echo_substitutes_leading_status() {
        let mut shell = Shell::new();
        shell.last_status = 7;
        let (_, out, _) = run(&mut shell, &["echo", "$?", "END"]);
        assert_eq!(out, "7 END\n");

        let (_, out, _) = run(&mut shell, &["echo", "$?"]);
        assert_eq!(out, "7\n");

        // Only the first argument is special.
        let (_, out, _) = run(&mut shell, &["echo", "x", "$?"]);
        assert_eq!(out, "x $?\n");
    }

    #[test]
    fn exit_parses_optional_code() {
        let mut shell = Shell::new();
        let (action, _, _) = run(&mut shell, &["exit"]);
        assert!(matches!(action, Some(BuiltinAction::Exit(0))));

        let (action, _, _) = run(&mut shell, &["exit", "3"]);
        assert!(matches!(action, Some(BuiltinAction::Exit(3))));

        let (action, _, err) = run(&mut shell, &["exit", "nope"]);
        assert!(matches!(action, Some(BuiltinAction::Exit(2))));
        assert!(err.contains("numeric argument required"));
    }

    #[test]
    fn hash_builtin_prints_hex() {
        let mut shell = Shell::new();
        let (_, out, _) = run(&mut shell, &["hash", "cd"]);
        assert_eq!(out.trim(), format!("{:#x}", cmd_hash("cd")));

        let (action, _, err) = run(&mut shell, &["hash"]);
        assert!(matches!(action, Some(BuiltinAction::Continue(1))));
        assert!(err.contains("usage"));
    }

    #[test]
    fn cd_changes_and_reports_failure() {
        let mut shell = Shell::new();
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();

        let target = dir.path().to_str().unwrap().to_string();
        let (action, _, _) = run(&mut shell, &["cd", &target]);
        assert!(matches!(action, Some(BuiltinAction::Continue(0))));
        assert_eq!(
            std::env::current_dir().unwrap().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );

        let (action, _, err) = run(&mut shell, &["cd", "/definitely/not/a/dir"]);
        assert!(matches!(action, Some(BuiltinAction::Continue(1))));
        assert!(err.contains("Unable to change directory"));

        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn jobs_lists_occupied_slots() {
        let mut shell = Shell::new();
        shell.jobs.register(4242, 4242, true, true, "sleep");
        let (_, out, _) = run(&mut shell, &["jobs"]);
        assert!(out.contains("[0]+ Running\tsleep\tPID: 4242"));
    }

    #[test]
    fn fg_with_no_jobs_reports_failure() {
        let mut shell = Shell::new();
        let (action, _, err) = run(&mut shell, &["fg"]);
        assert!(matches!(action, Some(BuiltinAction::Continue(1))));
        assert!(err.contains("no job to resume"));
    }

    #[test]
    fn bg_on_running_job_reports_already_in_background() {
        let mut shell = Shell::new();
        shell.jobs.register(4242, 4242, true, true, "sleep");
        let (action, _, err) = run(&mut shell, &["bg"]);
        assert!(matches!(action, Some(BuiltinAction::Continue(1))));
        assert!(err.contains("already in background"));
    }
}
