use std::{
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::future::BoxFuture;
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    compile::PreparedProgram,
    config::JudgeConfig,
    error::{Error, Result},
    probe::ProcessProbe,
    problem::Limits,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    TimedOut,
    MemoryExceeded,
    RuntimeError {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    CompilationError(String),
    InternalError(String),
}

/// Raw result of one execution, before any output comparison.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub cpu_time: Option<Duration>,
    /// Bytes.
    pub peak_memory: u64,
    /// Set when either stream hit the capture cap.
    pub truncated: bool,
}

impl ExecutionOutcome {
    pub fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            elapsed: Duration::ZERO,
            cpu_time: None,
            peak_memory: 0,
            truncated: false,
        }
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::with_status(RunStatus::InternalError(msg.into()))
    }
}

// resource constants are typed differently across libcs, so no helper fn
macro_rules! set_rlimit {
    ($resource:expr, $soft:expr, $hard:expr) => {{
        let lim = libc::rlimit {
            rlim_cur: $soft as libc::rlim_t,
            rlim_max: $hard as libc::rlim_t,
        };
        if libc::setrlimit($resource, &lim) != 0 {
            return Err(io::Error::last_os_error());
        }
    }};
}

/// rlimits applied in the child between fork and exec.
#[derive(Debug, Clone, Copy)]
struct ResourceLimits {
    cpu_seconds: u64,
    address_space: Option<u64>,
}

impl ResourceLimits {
    fn new(limits: &Limits, address_space_limit: bool) -> Self {
        // backstop only, the wall-clock deadline normally fires first
        let cpu_seconds = limits.time_limit.as_secs() + 2;
        Self {
            cpu_seconds,
            address_space: if address_space_limit {
                Some(limits.memory_limit.saturating_mul(2))
            } else {
                None
            },
        }
    }

    fn apply(&self) -> io::Result<()> {
        unsafe {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            set_rlimit!(libc::RLIMIT_CORE, 0, 0);
            set_rlimit!(libc::RLIMIT_CPU, self.cpu_seconds, self.cpu_seconds + 1);
            if let Some(bytes) = self.address_space {
                set_rlimit!(libc::RLIMIT_AS, bytes, bytes);
            }
        }
        Ok(())
    }
}

/// Owns the child's process group. Everything in it is killed when the
/// guard goes away, whichever path leaves `run`.
struct ProcessGroup {
    pgid: libc::pid_t,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: u32) -> Self {
        Self {
            pgid: pid as libc::pid_t,
            armed: true,
        }
    }

    fn kill(&self) {
        unsafe {
            libc::killpg(self.pgid, libc::SIGKILL);
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.armed {
            self.kill();
        }
    }
}

enum Ending {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    MemoryExceeded,
    Cancelled,
}

/// Anything that can execute a prepared program for one case.
pub trait Launch: Send + Sync {
    fn launch<'a>(
        &'a self,
        program: &'a PreparedProgram,
        input: &'a str,
        limits: &'a Limits,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ExecutionOutcome>>;
}

/// Launches prepared programs under wall-clock and memory limits.
#[derive(Debug, Clone)]
pub struct Runner {
    sample_interval: Duration,
    output_limit: usize,
    kill_grace: Duration,
    stderr_is_runtime_error: bool,
    address_space_limit: bool,
    proc_root: PathBuf,
}

impl From<&JudgeConfig> for Runner {
    fn from(config: &JudgeConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            output_limit: config.output_limit,
            kill_grace: config.kill_grace(),
            stderr_is_runtime_error: config.stderr_is_runtime_error,
            address_space_limit: config.address_space_limit,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Launch for Runner {
    fn launch<'a>(
        &'a self,
        program: &'a PreparedProgram,
        input: &'a str,
        limits: &'a Limits,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ExecutionOutcome>> {
        Box::pin(self.run(program, input, limits, cancel))
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::from(&JudgeConfig::default())
    }
}

impl Runner {
    /// Read process usage from a procfs mounted somewhere other than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Run `program` once with `input` on stdin.
    ///
    /// Every outcome caused by the program itself, including a failure to
    /// launch it, is returned as a value. `Err` means the run was cancelled
    /// and carries no verdict.
    pub async fn run(
        &self,
        program: &PreparedProgram,
        input: &str,
        limits: &Limits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut command = Command::new(&program.path);
        command
            .args(&program.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &program.work_dir {
            command.current_dir(dir);
        }
        let rlimits = ResourceLimits::new(limits, self.address_space_limit);
        unsafe {
            command.pre_exec(move || rlimits.apply());
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to launch {}: {}", program.path.display(), e);
                return Ok(ExecutionOutcome::internal_error("failed to launch program"));
            }
        };
        let pid = match child.id() {
            Some(pid) => pid,
            None => return Ok(ExecutionOutcome::internal_error("lost track of program")),
        };
        let mut group = ProcessGroup::new(pid);
        let probe = match ProcessProbe::with_root(&self.proc_root, pid) {
            Ok(probe) => probe,
            Err(e) => {
                warn!("cannot sample memory of process {}: {}", pid, e);
                group.kill();
                if time::timeout(self.kill_grace, child.wait()).await.is_err() {
                    warn!("process {} not reaped within grace period", pid);
                }
                group.disarm();
                return Ok(ExecutionOutcome::internal_error("memory sampling unavailable"));
            }
        };

        let stdin = child.stdin.take();
        let input = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // the program is free to exit without reading its input
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        });
        let stdout = spawn_reader(child.stdout.take(), self.output_limit);
        let stderr = spawn_reader(child.stderr.take(), self.output_limit);

        let deadline = time::sleep(limits.time_limit);
        tokio::pin!(deadline);
        let mut ticker = time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut peak_memory = 0u64;
        let mut cpu_time = None;
        let ending = loop {
            tokio::select! {
                status = child.wait() => break Ending::Exited(status),
                _ = &mut deadline => break Ending::TimedOut,
                _ = cancel.cancelled() => break Ending::Cancelled,
                _ = ticker.tick() => {
                    if let Some(sample) = probe.memory() {
                        peak_memory = peak_memory.max(sample.peak());
                    }
                    if let Some(t) = probe.cpu_time() {
                        cpu_time = Some(t);
                    }
                    if peak_memory > limits.memory_limit {
                        break Ending::MemoryExceeded;
                    }
                }
            }
        };
        let elapsed = start.elapsed();

        // sweep the whole group, also after a normal exit
        group.kill();
        if !matches!(ending, Ending::Exited(Ok(_))) {
            if time::timeout(self.kill_grace, child.wait()).await.is_err() {
                warn!("process {} not reaped within grace period", pid);
            }
        }
        group.disarm();
        writer.abort();

        let (stdout, out_truncated) = self.collect(stdout).await;
        let (stderr, err_truncated) = self.collect(stderr).await;

        let mut outcome = ExecutionOutcome {
            status: RunStatus::Completed,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code: None,
            elapsed,
            cpu_time,
            peak_memory,
            truncated: out_truncated || err_truncated,
        };

        let status = match ending {
            Ending::Cancelled => {
                debug!("run of {} cancelled", program.path.display());
                return Err(Error::Cancelled);
            }
            Ending::TimedOut => RunStatus::TimedOut,
            Ending::MemoryExceeded => RunStatus::MemoryExceeded,
            Ending::Exited(Err(e)) => {
                warn!("failed to wait for process {}: {}", pid, e);
                RunStatus::InternalError("failed to observe program exit".into())
            }
            Ending::Exited(Ok(status)) => {
                outcome.exit_code = status.code();
                self.classify_exit(status, &outcome, limits)
            }
        };
        outcome.status = status;

        Ok(outcome)
    }

    fn classify_exit(
        &self,
        status: ExitStatus,
        outcome: &ExecutionOutcome,
        limits: &Limits,
    ) -> RunStatus {
        // an uncaught std::bad_alloc aborts, so check before the exit split
        if !status.success() && allocation_failed(&outcome.stderr) {
            return RunStatus::MemoryExceeded;
        }

        if let Some(signal) = status.signal() {
            return match signal {
                libc::SIGXCPU => RunStatus::TimedOut,
                libc::SIGKILL if outcome.peak_memory > limits.memory_limit => {
                    RunStatus::MemoryExceeded
                }
                _ => RunStatus::RuntimeError {
                    exit_code: None,
                    signal: Some(signal),
                },
            };
        }

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            return RunStatus::RuntimeError {
                exit_code: Some(code),
                signal: None,
            };
        }

        if self.stderr_is_runtime_error && !outcome.stderr.trim().is_empty() {
            return RunStatus::RuntimeError {
                exit_code: Some(0),
                signal: None,
            };
        }

        RunStatus::Completed
    }

    /// Wait for a stream to close. A stream still open after the grace
    /// period is cut off, keeping what was read so far.
    async fn collect(&self, capture: Capture) -> (Vec<u8>, bool) {
        let Capture { mut handle, buffer } = capture;
        let cut = match time::timeout(self.kill_grace, &mut handle).await {
            Ok(Ok(Ok(()))) => false,
            Ok(Ok(Err(e))) => {
                debug!("output capture failed: {}", e);
                false
            }
            Ok(Err(e)) => {
                debug!("output capture task failed: {}", e);
                false
            }
            Err(_) => {
                handle.abort();
                true
            }
        };
        let mut captured = buffer.lock().await;
        (std::mem::take(&mut captured.bytes), captured.truncated || cut)
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A stream being read in the background into a shared buffer.
struct Capture {
    handle: JoinHandle<io::Result<()>>,
    buffer: Arc<Mutex<Captured>>,
}

fn spawn_reader<R>(reader: Option<R>, limit: usize) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Captured::default()));
    let shared = buffer.clone();
    let handle = tokio::spawn(async move {
        match reader {
            Some(reader) => read_bounded(reader, limit, &shared).await,
            None => Ok(()),
        }
    });
    Capture { handle, buffer }
}

/// Read the whole stream, keeping at most `limit` bytes. The rest is drained
/// so the writer never blocks on a full pipe.
async fn read_bounded<R>(mut reader: R, limit: usize, into: &Mutex<Captured>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = into.lock().await;
        let room = limit.saturating_sub(captured.bytes.len());
        if n <= room {
            captured.bytes.extend_from_slice(&buf[..n]);
        } else {
            captured.bytes.extend_from_slice(&buf[..room]);
            captured.truncated = true;
        }
    }
}

fn allocation_failed(stderr: &str) -> bool {
    stderr.contains("bad_alloc") || stderr.contains("MemoryError")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> PreparedProgram {
        PreparedProgram::new_with_args(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    fn limits(ms: u64, mib: u64) -> Limits {
        Limits {
            time_limit: Duration::from_millis(ms),
            memory_limit: mib << 20,
        }
    }

    #[tokio::test]
    async fn echo_input() {
        let runner = Runner::default();
        let outcome = runner
            .run(&sh("read x; echo $((x * 2))"), "21\n", &limits(2000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.stdout, "42\n");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn wall_clock_deadline() {
        let runner = Runner::default();
        let started = Instant::now();
        let outcome = runner
            .run(&sh("sleep 10"), "", &limits(300, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(outcome.elapsed >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn non_zero_exit() {
        let runner = Runner::default();
        let outcome = runner
            .run(&sh("echo oops >&2; exit 3"), "", &limits(2000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::RuntimeError {
                exit_code: Some(3),
                signal: None
            }
        );
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[tokio::test]
    async fn killed_by_signal() {
        let runner = Runner::default();
        let outcome = runner
            .run(&sh("kill -SEGV $$"), "", &limits(2000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::RuntimeError {
                exit_code: None,
                signal: Some(libc::SIGSEGV)
            }
        );
    }

    #[tokio::test]
    async fn missing_program_is_internal_error() {
        let runner = Runner::default();
        let program = PreparedProgram::new(PathBuf::from("/nonexistent/anvil/program"));
        let outcome = runner
            .run(&program, "", &limits(1000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.status, RunStatus::InternalError(_)));
    }

    #[tokio::test]
    async fn output_is_truncated_not_fatal() {
        let config = JudgeConfig {
            output_limit: 16,
            ..Default::default()
        };
        let runner = Runner::from(&config);
        let outcome = runner
            .run(
                &sh("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done"),
                "",
                &limits(5000, 64),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.stdout.len(), 16);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn stderr_policy() {
        let config = JudgeConfig {
            stderr_is_runtime_error: true,
            ..Default::default()
        };
        let runner = Runner::from(&config);
        let outcome = runner
            .run(&sh("echo warn >&2"), "", &limits(2000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.status, RunStatus::RuntimeError { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = Runner::default()
            .run(&sh("echo hi"), "", &limits(1000, 64), &cancel)
            .await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn bounded_reader() {
        let data: &[u8] = b"abcdefghij";
        let small = Mutex::new(Captured::default());
        read_bounded(data, 4, &small).await.unwrap();
        let small = small.into_inner();
        assert_eq!(small.bytes, b"abcd");
        assert!(small.truncated);

        let large = Mutex::new(Captured::default());
        read_bounded(data, 64, &large).await.unwrap();
        let large = large.into_inner();
        assert_eq!(large.bytes, data);
        assert!(!large.truncated);
    }

    #[tokio::test]
    async fn stream_left_open_keeps_partial_output() {
        let config = JudgeConfig {
            kill_grace_ms: 100,
            ..Default::default()
        };
        let runner = Runner::from(&config);
        let (reader, mut writer) = tokio::io::duplex(64);
        writer.write_all(b"partial").await.unwrap();

        let capture = spawn_reader(Some(reader), 1024);
        let (kept, truncated) = runner.collect(capture).await;
        assert_eq!(kept, b"partial");
        assert!(truncated);
        drop(writer);
    }

    #[tokio::test]
    async fn aborted_with_bad_alloc_is_memory_exceeded() {
        let runner = Runner::default();
        let outcome = runner
            .run(
                &sh("echo \"terminate called after throwing an instance of 'std::bad_alloc'\" >&2; kill -ABRT $$"),
                "",
                &limits(2000, 64),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::MemoryExceeded);
    }

    #[test]
    fn allocation_failure_wins_over_exit_kind() {
        let runner = Runner::default();
        let limits = limits(1000, 64);
        let outcome = ExecutionOutcome {
            stderr: "MemoryError\n".into(),
            ..ExecutionOutcome::with_status(RunStatus::Completed)
        };
        let aborted = ExitStatus::from_raw(libc::SIGABRT);
        assert_eq!(runner.classify_exit(aborted, &outcome, &limits), RunStatus::MemoryExceeded);
        let failed = ExitStatus::from_raw(1 << 8);
        assert_eq!(runner.classify_exit(failed, &outcome, &limits), RunStatus::MemoryExceeded);
        // a clean exit mentioning the word is left alone
        let clean = ExitStatus::from_raw(0);
        assert_eq!(runner.classify_exit(clean, &outcome, &limits), RunStatus::Completed);
    }

    #[tokio::test]
    async fn unavailable_sampling_is_internal_error() {
        let runner = Runner::default().with_proc_root("/nonexistent/anvil/proc");
        let started = Instant::now();
        let outcome = runner
            .run(&sh("sleep 10"), "", &limits(5000, 64), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::InternalError("memory sampling unavailable".into())
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
