use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_shale"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn shale");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // yes writes indefinitely; head -1 exits after one line. Once the
    // shell has dropped its read-end copy, yes sees EPIPE/SIGPIPE and
    // terminates, and the shell keeps processing commands.
    let output = run_shell(&["yes | head -1", "echo ALIVE", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(stdout.contains("0 END"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn foreground_segfault_is_reported_with_status_139() {
    let output = run_shell(&["sh -c 'kill -SEGV $$'", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Segmentation fault"),
        "stderr was: {stderr}"
    );
    assert!(stdout.contains("139 END"), "stdout was: {stdout}");
}

#[test]
fn foreground_sigterm_is_reported_with_status_143() {
    let output = run_shell(&["sh -c 'kill -TERM $$'", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Terminated"), "stderr was: {stderr}");
    assert!(stdout.contains("143 END"), "stdout was: {stdout}");
}

#[test]
fn foreground_sigint_exit_code_is_130() {
    let output = run_shell(&["sh -c 'kill -INT $$'", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("130 END"), "stdout was: {stdout}");
}

#[test]
fn shell_survives_sigtstp_at_the_prompt() {
    // The TSTP must land while the shell is blocked reading input with its
    // own handlers installed, so feed the lines with a delay instead of
    // all at once.
    let mut child = Command::new(env!("CARGO_BIN_EXE_shale"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn shale");

    let mut stdin = child.stdin.take().expect("stdin");
    writeln!(stdin, "sh -c 'sleep 0.2; kill -TSTP $PPID' &").expect("write line");
    std::thread::sleep(Duration::from_millis(600));
    writeln!(stdin, "echo ALIVE").expect("write line");
    writeln!(stdin, "exit").expect("write exit");
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}
