use crate::error::PipelineError;
use anyhow::{Context, Result};
use log::debug;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured output of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external tool with piped output and a bounded timeout.
///
/// The child's pipes are drained on reader threads so a chatty tool cannot
/// block on a full pipe while we poll for exit. On timeout the child is
/// killed and the call fails with `ExternalToolFailure`; tool failures are
/// never retried here, retry policy belongs to the network layer.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    debug!("running command: {} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to launch `{}`", program))?;

    let stdout_handle = spawn_reader(child.stdout.take(), "stdout");
    let stderr_handle = spawn_reader(child.stderr.take(), "stderr");

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to poll `{}`", program))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            kill_child(&mut child);
            return Err(PipelineError::ExternalToolFailure {
                tool: program.to_string(),
                detail: format!("timed out after {:?}", timeout),
            }
            .into());
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_reader(stdout_handle, program, "stdout")?;
    let stderr = join_reader(stderr_handle, program, "stderr")?;

    if !status.success() {
        return Err(PipelineError::ExternalToolFailure {
            tool: program.to_string(),
            detail: format!("exit status {}\nStderr:\n{}", status, stderr),
        }
        .into());
    }
    debug!("command `{}` finished successfully", program);
    Ok(CommandOutput { stdout, stderr })
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    name: &'static str,
) -> Option<thread::JoinHandle<std::io::Result<String>>> {
    pipe.map(|mut pipe| {
        thread::Builder::new()
            .name(format!("pipe-{}", name))
            .spawn(move || {
                let mut buf = String::new();
                pipe.read_to_string(&mut buf)?;
                Ok(buf)
            })
            .ok()
    })?
}

fn join_reader(
    handle: Option<thread::JoinHandle<std::io::Result<String>>>,
    program: &str,
    name: &str,
) -> Result<String> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow::anyhow!("{} reader thread for `{}` panicked", name, program))?
            .with_context(|| format!("Failed to read {} of `{}`", name, program)),
        None => Ok(String::new()),
    }
}

fn kill_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let out = run_command("echo", &["hello"], Duration::from_secs(5)).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_external_tool_failure() {
        let err = run_command("false", &[], Duration::from_secs(5)).unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>();
        assert!(matches!(
            pipeline_err,
            Some(PipelineError::ExternalToolFailure { .. })
        ));
    }

    #[test]
    fn timeout_kills_the_child() {
        let start = Instant::now();
        let err = run_command("sleep", &["30"], Duration::from_millis(200)).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_program_fails_to_launch() {
        assert!(run_command("definitely-not-a-real-tool", &[], Duration::from_secs(1)).is_err());
    }
}
