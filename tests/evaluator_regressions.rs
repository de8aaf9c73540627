use std::io::Write;
use std::process::{Command, Stdio};

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
fn echo_prints_its_arguments() {
    let output = run_shell(&["echo hello"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello\n"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn and_runs_right_only_on_success() {
    let output = run_shell(&["false && echo SKIPPED", "true && echo RAN"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("SKIPPED"), "stdout was: {stdout}");
    assert!(stdout.contains("RAN"), "stdout was: {stdout}");
}

#[test]
fn or_runs_right_only_on_failure() {
    let output = run_shell(&["false || echo FALLBACK", "true || echo SKIPPED"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FALLBACK"), "stdout was: {stdout}");
    assert!(!stdout.contains("SKIPPED"), "stdout was: {stdout}");
}

#[test]
fn semicolon_always_runs_right() {
    let output = run_shell(&["false ; echo BOTH"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("BOTH"), "stdout was: {stdout}");
}

#[test]
fn status_substitution_reports_last_exit_code() {
    let output = run_shell(&["sh -c 'exit 7'", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("7 END"), "stdout was: {stdout}");
}

#[test]
fn missing_command_reports_127() {
    let output = run_shell(&["definitely-not-a-command-zzz", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("command not found"), "stderr was: {stderr}");
    assert!(stdout.contains("127 END"), "stdout was: {stdout}");
}

#[test]
fn syntax_error_sets_status_2_without_evaluating() {
    let output = run_shell(&["echo hi &&", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("syntax error"), "stderr was: {stderr}");
    assert!(stdout.contains("2 END"), "stdout was: {stdout}");
}

#[test]
fn output_redirection_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t1");
    let path = path.to_str().unwrap();

    let line = format!("echo a > {path} ; cat < {path}");
    let output = run_shell(&[&line, "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a\n"), "stdout was: {stdout}");
    assert!(stdout.contains("0 END"), "stdout was: {stdout}");
}

#[test]
fn append_redirection_keeps_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t2");
    let path = path.to_str().unwrap();

    let first = format!("echo a > {path}");
    let second = format!("echo b >> {path}");
    let read_back = format!("cat < {path}");
    let output = run_shell(&[&first, &second, &read_back]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a\nb"), "stdout was: {stdout}");
}

#[test]
fn stderr_redirection_captures_only_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("err");
    let path = path.to_str().unwrap();

    let line = format!("sh -c 'echo oops 1>&2' 2> {path}");
    let read_back = format!("cat < {path}");
    let output = run_shell(&[&line, &read_back]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("oops"), "stdout was: {stdout}");
    assert!(!stderr.contains("oops"), "stderr was: {stderr}");
}

#[test]
fn errout_redirection_captures_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("both");
    let path = path.to_str().unwrap();

    let line = format!("sh -c 'echo out; echo err 1>&2' &> {path}");
    let read_back = format!("cat < {path}");
    let output = run_shell(&[&line, &read_back]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("out"), "stdout was: {stdout}");
    assert!(stdout.contains("err"), "stdout was: {stdout}");
}

#[test]
fn failed_redirection_open_reports_path_and_fails() {
    let output = run_shell(&["cat < /definitely/not/here", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/definitely/not/here"), "stderr was: {stderr}");
    assert!(stdout.contains("1 END"), "stdout was: {stdout}");
}

#[test]
fn pipeline_connects_stages() {
    let output = run_shell(&["echo hello | tr a-z A-Z"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("HELLO"), "stdout was: {stdout}");
}

#[test]
fn builtin_feeds_a_pipeline() {
    let output = run_shell(&["echo one | cat"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("one"), "stdout was: {stdout}");
}

#[test]
fn nested_pipelines_compose() {
    let output = run_shell(&["echo abc | tr a-z A-Z | tr B X"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("AXC"), "stdout was: {stdout}");
}

#[test]
fn pipeline_status_is_the_left_stage() {
    let output = run_shell(&["sh -c 'exit 3' | cat", "echo $? END"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 END"), "stdout was: {stdout}");
}

#[test]
fn quoted_operators_are_literal_arguments() {
    let output = run_shell(&[r#"echo "a && b""#]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a && b"), "stdout was: {stdout}");
}

#[test]
fn exit_builtin_sets_the_shell_exit_code() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_shale"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn shale");
    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "exit 4").expect("write exit");
    }
    let output = child.wait_with_output().expect("wait output");
    assert_eq!(output.status.code(), Some(4));
}
