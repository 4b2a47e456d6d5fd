//! Running one recipe command as a subprocess.
//! Unaware of the graph or scheduling; just command execution.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The result of one command's execution.
pub struct TaskResult {
    pub termination: Termination,
    /// Combined stdout/stderr.
    pub output: Vec<u8>,
}

/// Run one shell command in `dir`, capturing its output.
/// Returns an Err only when we failed outside the subprocess itself.
pub fn run_command(dir: &Path, cmdline: &str) -> anyhow::Result<TaskResult> {
    let out = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmdline)
        .current_dir(dir)
        .output()?;

    let mut output = Vec::new();
    output.extend_from_slice(&out.stdout);
    output.extend_from_slice(&out.stderr);

    let mut termination = Termination::Success;
    if !out.status.success() {
        termination = Termination::Failure;
        if let Some(sig) = out.status.signal() {
            match sig {
                libc::SIGINT => {
                    write!(output, "interrupted").unwrap();
                    termination = Termination::Interrupted;
                }
                _ => write!(output, "signal {}", sig).unwrap(),
            }
        }
    }

    Ok(TaskResult {
        termination,
        output,
    })
}
