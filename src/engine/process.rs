use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, BufRead, BufReader, PipeReader, Read};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::outcome::{ExecutionOutcome, ExecutionStatus};
use crate::config::LimitsConfig;

/// Appended to captured output once the size cap is reached
pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";

/// How long to wait for the output pipe to reach EOF after the child is gone
///
/// Only a grandchild that inherited the pipe can keep it open that long.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A program and its arguments, resolved by the pipeline that builds it
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl ProcessCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How a bounded wait for a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed(ExitStatus),
    TimedOut,
}

/// Waits for `child` until `deadline` elapses, killing it if it is still alive
///
/// The kill is a forced one (SIGKILL on unix) and the child is reaped before
/// this returns.
pub async fn wait_with_deadline(child: &mut Child, deadline: Duration) -> io::Result<WaitOutcome> {
    match timeout(deadline, child.wait()).await {
        Ok(status) => Ok(WaitOutcome::Completed(status?)),
        Err(_) => {
            child.kill().await?;
            Ok(WaitOutcome::TimedOut)
        }
    }
}

/// Captured output, capped at a number of characters
#[derive(Debug)]
struct OutputBuffer {
    text: String,
    chars: usize,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            truncated: false,
        }
    }

    /// Appends `chunk` unless it would overflow the cap; returns whether more is accepted
    fn push(&mut self, chunk: &str) -> bool {
        if self.truncated {
            return false;
        }

        let len = chunk.chars().count();
        if self.chars + len > self.limit {
            self.text.push_str(TRUNCATION_MARKER);
            self.truncated = true;
            return false;
        }

        self.text.push_str(chunk);
        self.chars += len;
        true
    }
}

/// Reads merged output line by line into `buffer`
///
/// Once the cap fires the rest of the stream is read and thrown away, so the
/// child never blocks on a full pipe or dies of a broken one.
fn drain_output(reader: PipeReader, buffer: &Mutex<OutputBuffer>) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let chunk_limit = buffer.lock().limit as u64 + 1;
    // Bytes read so far that do not yet end on a character boundary
    let mut pending = Vec::new();

    loop {
        let n = (&mut reader).take(chunk_limit).read_until(b'\n', &mut pending)?;
        if n == 0 {
            if !pending.is_empty() {
                buffer.lock().push(&String::from_utf8_lossy(&pending));
            }
            return Ok(());
        }

        let tail = pending.split_off(pending.len() - incomplete_tail_len(&pending));
        let accepted = buffer.lock().push(&String::from_utf8_lossy(&pending));
        pending = tail;
        if !accepted {
            break;
        }
    }

    io::copy(&mut reader, &mut io::sink())?;
    Ok(())
}

/// Length of a UTF-8 sequence cut off at the end of `bytes`, 0 if the last character is whole
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

/// Wall-clock and output bounds applied to every child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
    pub max_output_chars: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for ExecutionLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            run_timeout: config.run_timeout_ms.into(),
            compile_timeout: config.compile_timeout_ms.into(),
            max_output_chars: config.max_output_chars,
        }
    }
}

/// Runs child processes with merged output, a wall-clock deadline and an output cap
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    limits: ExecutionLimits,
}

impl ProcessExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Runs `command` in `working_dir` and reports what happened
    ///
    /// Never fails: spawn, pipe and wait errors are reported as
    /// [`ExecutionStatus::ExecutionError`] outcomes.
    pub async fn execute(
        &self,
        command: &ProcessCommand,
        working_dir: &Path,
        stdin: Option<&str>,
        deadline: Duration,
    ) -> ExecutionOutcome {
        let start_time = Instant::now();
        log::debug!("Executing `{command}` in {}", working_dir.display());

        let result = self.run_to_completion(command, working_dir, stdin, deadline).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(Captured {
                wait: WaitOutcome::Completed(status),
                output,
                truncated,
            }) => {
                let (status_kind, message) = if status.success() {
                    (ExecutionStatus::Success, None)
                } else {
                    (ExecutionStatus::RuntimeError, Some(describe_exit(status)))
                };
                ExecutionOutcome {
                    status: status_kind,
                    output,
                    truncated,
                    exit_code: status.code(),
                    duration_ms,
                    message,
                }
            }
            Ok(Captured {
                wait: WaitOutcome::TimedOut,
                output,
                truncated,
            }) => {
                log::warn!(
                    "`{command}` exceeded {} ms and was killed",
                    deadline.as_millis()
                );
                ExecutionOutcome {
                    status: ExecutionStatus::Timeout,
                    output,
                    truncated,
                    exit_code: None,
                    duration_ms,
                    message: Some(format!(
                        "Execution timed out after {} ms",
                        deadline.as_millis()
                    )),
                }
            }
            Err(e) => {
                log::warn!("Failed to execute `{command}`: {e}");
                ExecutionOutcome {
                    status: ExecutionStatus::ExecutionError,
                    output: String::new(),
                    truncated: false,
                    exit_code: None,
                    duration_ms,
                    message: Some(format!(
                        "Failed to execute {}: {e}",
                        command.program().to_string_lossy()
                    )),
                }
            }
        }
    }

    async fn run_to_completion(
        &self,
        command: &ProcessCommand,
        working_dir: &Path,
        stdin: Option<&str>,
        deadline: Duration,
    ) -> io::Result<Captured> {
        let (reader, writer) = io::pipe()?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .kill_on_drop(true);

        let spawned = cmd.spawn();
        // The command still owns the write ends; EOF only arrives once they are gone
        drop(cmd);
        let mut child = spawned?;

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(self.limits.max_output_chars)));
        let drain = tokio::task::spawn_blocking({
            let buffer = Arc::clone(&buffer);
            move || drain_output(reader, &buffer)
        });

        // Without stdin text the pipe stays open and unfed until the child is done
        let mut unfed_stdin = None;
        let feeder = match (stdin, child.stdin.take()) {
            (Some(text), Some(mut pipe)) => {
                let data = text.to_owned();
                Some(tokio::spawn(async move {
                    pipe.write_all(data.as_bytes()).await?;
                    pipe.flush().await?;
                    pipe.shutdown().await
                }))
            }
            (_, pipe) => {
                unfed_stdin = pipe;
                None
            }
        };

        let wait = wait_with_deadline(&mut child, deadline).await?;
        drop(unfed_stdin);

        if let Some(feeder) = feeder {
            if feeder.is_finished() {
                if let Ok(Err(e)) = feeder.await {
                    log::debug!("Child did not consume all of its stdin: {e}");
                }
            } else {
                feeder.abort();
            }
        }

        match timeout(DRAIN_GRACE, drain).await {
            Ok(Ok(drained)) => drained?,
            Ok(Err(e)) => return Err(io::Error::other(e)),
            Err(_) => log::warn!("Output pipe still open after the child exited, keeping partial output"),
        }

        let buffer = buffer.lock();
        Ok(Captured {
            wait,
            output: buffer.text.clone(),
            truncated: buffer.truncated,
        })
    }
}

struct Captured {
    wait: WaitOutcome,
    output: String,
    truncated: bool,
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process exited with code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {signal}");
        }
    }

    "Process terminated abnormally".to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh").arg("-c").arg(script)
    }

    fn executor(max_output_chars: usize) -> ProcessExecutor {
        ProcessExecutor::new(ExecutionLimits {
            max_output_chars,
            ..ExecutionLimits::default()
        })
    }

    fn is_alive(pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(&sh("echo hello; echo world"), dir.path(), None, Duration::from_secs(5))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.output, "hello\nworld\n");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_stderr_is_merged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(
                &sh("echo one; echo two >&2; echo three"),
                dir.path(),
                None,
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome.output, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(&sh("echo partial; exit 3"), dir.path(), None, Duration::from_secs(5))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::RuntimeError);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.output, "partial\n");
        assert_eq!(outcome.message.as_deref(), Some("Process exited with code 3"));
    }

    #[tokio::test]
    async fn test_stdin_is_fed_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(
                &sh("read a; read b; echo $((a + b))"),
                dir.path(),
                Some("5\n3\n"),
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.output.trim(), "8");
    }

    #[tokio::test]
    async fn test_missing_stdin_blocks_until_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(&sh("read a; echo $a"), dir.path(), None, Duration::from_millis(300))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(&sh("echo $$; exec sleep 30"), dir.path(), None, Duration::from_millis(300))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(outcome.duration_ms < 5_000);
        let pid: i32 = outcome.output.lines().next().unwrap().trim().parse().unwrap();
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_output_is_truncated_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(100);
        let outcome = executor
            .execute(
                &sh("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done"),
                dir.path(),
                None,
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert!(outcome.truncated);
        assert!(outcome.output.ends_with(TRUNCATION_MARKER));
        assert!(outcome.output.chars().count() <= 100 + TRUNCATION_MARKER.chars().count());
    }

    #[tokio::test]
    async fn test_unknown_program_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(1024);
        let outcome = executor
            .execute(
                &ProcessCommand::new("definitely-not-a-real-binary-42"),
                dir.path(),
                None,
                Duration::from_secs(1),
            )
            .await;

        assert_eq!(outcome.status, ExecutionStatus::ExecutionError);
        assert!(outcome.output.is_empty());
        assert!(
            outcome
                .message
                .unwrap()
                .contains("definitely-not-a-real-binary-42")
        );
    }

    #[test]
    fn test_buffer_counts_characters_not_bytes() {
        let mut buffer = OutputBuffer::new(4);
        assert!(buffer.push("äöü\n"));
        assert!(!buffer.push("x"));
        assert_eq!(buffer.text, format!("äöü\n{TRUNCATION_MARKER}"));
    }

    #[tokio::test]
    async fn test_long_multibyte_line_is_not_split() {
        let dir = tempfile::tempdir().unwrap();
        // 17 bytes but only 9 characters, so reads are cut mid-character
        let executor = executor(10);
        let outcome = executor
            .execute(&sh("printf 'ääääääää\\n'"), dir.path(), None, Duration::from_secs(5))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.output, "ääääääää\n");
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_multibyte_output_truncates_on_character_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(10);
        let outcome = executor
            .execute(
                &sh("printf '€€€€€€€€€€€€€€€€€€€€\\n'"),
                dir.path(),
                None,
                Duration::from_secs(5),
            )
            .await;

        assert!(outcome.truncated);
        assert!(!outcome.output.contains('\u{FFFD}'));
        assert!(outcome.output.chars().count() <= 10 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_incomplete_tail_len() {
        let euro = "€".as_bytes();
        assert_eq!(incomplete_tail_len(b""), 0);
        assert_eq!(incomplete_tail_len(b"abc"), 0);
        assert_eq!(incomplete_tail_len(euro), 0);
        assert_eq!(incomplete_tail_len(&euro[..1]), 1);
        assert_eq!(incomplete_tail_len(&euro[..2]), 2);
        assert_eq!(incomplete_tail_len(&[b'a', 0xF0, 0x9F, 0x98]), 3);
        assert_eq!(incomplete_tail_len("ä".as_bytes()), 0);
    }

    #[test]
    fn test_command_display() {
        let command = ProcessCommand::new("g++").args(["-o", "main", "main.cpp"]);
        assert_eq!(command.to_string(), "g++ -o main main.cpp");
    }
}
