use crate::config::Settings;
use crate::domain::basket::Risk;
use crate::domain::contract::RawBasket;
use crate::generation::error::GenerationFailure;
use crate::generation::json;
use crate::generation::BasketGenerator;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

const DEFAULT_PROGRAM: &str = "python3";
const DEFAULT_ARGS: &str = "basket_generator.py";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_DETAIL_BYTES: usize = 4096;

/// Runs the basket generator as a child process:
/// `<program> <args...> <investment> <risk> <output_path>`.
///
/// Each invocation gets its own output file, so concurrent runs never share a path.
#[derive(Debug, Clone)]
pub struct SubprocessGenerator {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl SubprocessGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            output_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let program = settings
            .generator_program
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());

        let args = settings
            .generator_args
            .as_deref()
            .unwrap_or(DEFAULT_ARGS)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let timeout_secs = std::env::var("BASKET_GENERATOR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        anyhow::ensure!(timeout_secs >= 1, "BASKET_GENERATOR_TIMEOUT_SECS must be >= 1");

        let mut generator = Self::new(program, args).with_timeout(Duration::from_secs(timeout_secs));
        if let Some(dir) = settings.generator_workdir.as_deref() {
            generator = generator.with_working_dir(dir);
        }
        if let Some(dir) = settings.output_dir.as_deref() {
            generator = generator.with_output_dir(dir);
        }
        Ok(generator)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn next_output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("baskets_{}.json", uuid::Uuid::new_v4().simple()))
    }

    fn build_command(&self, investment: f64, risk: Risk, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(investment.to_string())
            .arg(risk.as_str())
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the invoke future (caller cancellation) kills the child.
            .kill_on_drop(true);
        // Own process group, so helpers the generator forks can be killed with it.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl BasketGenerator for SubprocessGenerator {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn invoke(
        &self,
        investment: f64,
        risk: Risk,
    ) -> Result<Vec<RawBasket>, GenerationFailure> {
        let artifact = OutputArtifact(self.next_output_path());
        let started = Instant::now();

        let mut child = self
            .build_command(investment, risk, &artifact.0)
            .spawn()
            .map_err(|e| {
                GenerationFailure::process_error(format!(
                    "failed to spawn generator {:?}: {e}",
                    self.program
                ))
            })?;

        tracing::debug!(
            program = %self.program,
            pid = ?child.id(),
            output = %artifact.0.display(),
            %risk,
            investment,
            "generator started"
        );

        let group = ProcessGroup(child.id());
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        // Leftover helpers can hold the pipes open after the child exits, so the
        // deadline covers the drains as well as the wait.
        let run = async {
            let status = child.wait().await;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (status, stdout, stderr)
        };
        let outcome = tokio::time::timeout(self.timeout, run).await;

        let (status, stdout, stderr) = match outcome {
            Ok((Ok(status), stdout, stderr)) => (status, stdout, stderr),
            Ok((Err(e), _, _)) => {
                return Err(GenerationFailure::process_error(format!(
                    "failed to wait for generator: {e}"
                )))
            }
            Err(_) => {
                stdout_task.abort();
                stderr_task.abort();
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "generator already exited");
                }
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "generator timed out; process group killed"
                );
                return Err(GenerationFailure::timeout(format!(
                    "generator did not finish within {:?}",
                    self.timeout
                )));
            }
        };
        let elapsed_ms = started.elapsed().as_millis();

        if !status.success() {
            tracing::error!(
                exit_code = ?status.code(),
                signal = ?exit_signal(&status),
                elapsed_ms,
                stderr = %truncate_detail(stderr.trim()),
                "generator failed"
            );
            let detail = match stderr.trim() {
                "" => format!("generator exited abnormally ({})", describe_status(&status)),
                s => truncate_detail(s),
            };
            return Err(GenerationFailure::process_error(detail));
        }

        tracing::debug!(elapsed_ms, stdout = %truncate_detail(stdout.trim()), "generator finished");

        let text = match tokio::fs::read_to_string(&artifact.0).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GenerationFailure::invalid_output(format!(
                    "generator exited successfully but wrote no output to {}",
                    artifact.0.display()
                )))
            }
            Err(e) => {
                return Err(GenerationFailure::invalid_output(format!(
                    "failed to read generator output {}: {e}",
                    artifact.0.display()
                )))
            }
        };

        json::parse_baskets(&text)
            .map_err(|e| GenerationFailure::invalid_output(truncate_detail(&format!("{e:#}"))))
    }
}

/// Per-invocation output file, removed when the invocation ends however it ends.
#[derive(Debug)]
struct OutputArtifact(PathBuf);

impl Drop for OutputArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.0.display(), error = %e, "failed to delete generator output");
            }
        }
    }
}

/// Process group led by the generator. Whatever is still in it when the
/// invocation ends is killed.
#[derive(Debug)]
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    #[cfg(unix)]
    fn kill(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.0 else {
            return;
        };
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid, error = %e, "failed to kill generator process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "failed to read generator pipe");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn truncate_detail(s: &str) -> String {
    if s.len() <= MAX_DETAIL_BYTES {
        return s.to_string();
    }
    let mut end = MAX_DETAIL_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn describe_status(status: &ExitStatus) -> String {
    match (status.code(), exit_signal(status)) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => "terminated abnormally".to_string(),
    }
}
