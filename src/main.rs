mod ast;
mod builtins;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod redirect;
mod shell;
mod signals;
mod status;

use std::io::{self, Write};

use shell::{ExecutionAction, Shell};

#[cfg(not(unix))]
compile_error!("shale drives Unix job control and only builds on Unix targets");

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut shell = Shell::new();

    loop {
        // Surface background completions that arrived while idle.
        shell.poll_jobs();

        print!("shale> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let node = match parser::parse(input.trim()) {
                    Ok(node) => node,
                    Err(msg) => {
                        eprintln!("{msg}");
                        shell.last_status = 2;
                        continue;
                    }
                };

                match shell.evaluate(&node) {
                    ExecutionAction::Continue(_) => {}
                    ExecutionAction::Exit(code) => std::process::exit(code),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("shale: error reading input: {e}");
                break;
            }
        }
    }

    std::process::exit(shell.last_status);
}
