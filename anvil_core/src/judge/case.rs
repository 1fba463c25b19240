use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::{
    compare::{ComparisonMode, ComparisonResult},
    compile::{CompileResult, Compiler, PreparedProgram},
    error::{Error, Result},
    problem::{Limits, Problem, TestCase},
    runner::{ExecutionOutcome, Launch, RunStatus},
    CaseVerdict, JudgeStatus,
};

/// Result of preparing a submission, shared by all of its cases.
#[derive(Debug, Clone)]
pub enum Preparation {
    Ready(PreparedProgram),
    /// The source was rejected, with compiler diagnostics.
    Rejected(String),
    /// The toolchain itself failed.
    Broken(String),
}

/// Lazily prepared program of one submission. The compiler runs at most once
/// however many cases ask for it concurrently.
pub struct Artifact {
    compiler: Arc<dyn Compiler>,
    source: String,
    work_dir: PathBuf,
    cell: OnceCell<Preparation>,
}

impl Artifact {
    pub fn new(compiler: Arc<dyn Compiler>, source: &str, work_dir: &Path) -> Self {
        Self {
            compiler,
            source: source.to_string(),
            work_dir: work_dir.to_path_buf(),
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> &Preparation {
        self.cell.get_or_init(|| self.prepare()).await
    }

    async fn prepare(&self) -> Preparation {
        let compiler = self.compiler.clone();
        let source = self.source.clone();
        let work_dir = self.work_dir.clone();

        info!("preparing submission with {}", compiler.name());
        let res =
            tokio::task::spawn_blocking(move || compiler.compile(&source, &work_dir)).await;

        match res {
            Ok(Ok(CompileResult::OK(program))) => {
                debug!("prepared {}", program.path.display());
                Preparation::Ready(program)
            }
            Ok(Ok(CompileResult::CompileError(log))) => {
                info!("submission rejected by {}", self.compiler.name());
                Preparation::Rejected(log)
            }
            Ok(Err(e)) => {
                warn!("{} failed: {}", self.compiler.name(), e);
                Preparation::Broken(e.reason().to_string())
            }
            Err(e) => {
                warn!("compile task failed: {}", e);
                Preparation::Broken("compilation task failed".into())
            }
        }
    }
}

/// Judges single test cases of one submission.
pub struct CaseJudge<'a> {
    runner: &'a dyn Launch,
    artifact: &'a Artifact,
    comparison: Box<dyn ComparisonMode>,
    limits: Limits,
    retries: u32,
}

impl<'a> CaseJudge<'a> {
    pub fn new(runner: &'a dyn Launch, artifact: &'a Artifact, problem: &Problem, retries: u32) -> Self {
        Self {
            runner,
            artifact,
            comparison: (&problem.compare).into(),
            limits: problem.limits,
            retries,
        }
    }

    /// Submission-caused failures come back as verdicts; `Err` only when
    /// judging was cancelled.
    pub async fn judge(&self, case: &TestCase, cancel: &CancellationToken) -> Result<CaseVerdict> {
        let preparation = tokio::select! {
            p = self.artifact.get() => p,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let program = match preparation {
            Preparation::Ready(program) => program,
            Preparation::Rejected(log) => {
                let outcome = ExecutionOutcome::with_status(RunStatus::CompilationError(log.clone()));
                return Ok(case_verdict(&outcome, &case.expected, self.comparison.as_ref()));
            }
            Preparation::Broken(msg) => return Ok(CaseVerdict::internal_error(msg.clone())),
        };

        let mut attempt = 0;
        loop {
            let outcome = self
                .runner
                .launch(program, &case.input, &self.limits, cancel)
                .await?;
            if let RunStatus::InternalError(msg) = &outcome.status {
                if attempt < self.retries {
                    attempt += 1;
                    warn!("retrying case after internal error ({}), attempt {}", msg, attempt);
                    continue;
                }
            }
            return Ok(case_verdict(&outcome, &case.expected, self.comparison.as_ref()));
        }
    }
}

/// Map a raw run outcome to a case verdict, comparing output when the run
/// completed.
pub fn case_verdict(
    outcome: &ExecutionOutcome,
    expected: &str,
    comparison: &dyn ComparisonMode,
) -> CaseVerdict {
    let time = outcome.elapsed.as_millis() as u64;
    let memory = outcome.peak_memory;

    match &outcome.status {
        RunStatus::Completed => match comparison.compare(expected, &outcome.stdout) {
            ComparisonResult::Same => {
                CaseVerdict::new(JudgeStatus::Accepted).with_usage(time, memory)
            }
            ComparisonResult::Different(diff) => CaseVerdict::new(JudgeStatus::WrongAnswer)
                .with_usage(time, memory)
                .with_detail(diff),
        },
        RunStatus::TimedOut => {
            CaseVerdict::new(JudgeStatus::TimeLimitExceeded).with_usage(time, memory)
        }
        RunStatus::MemoryExceeded => {
            CaseVerdict::new(JudgeStatus::MemoryLimitExceeded).with_usage(time, memory)
        }
        RunStatus::RuntimeError { exit_code, signal } => {
            let detail = match (exit_code, signal) {
                (_, Some(signal)) => format!("killed by signal {}", signal),
                (Some(code), None) => format!("exit code {}", code),
                (None, None) => "abnormal termination".to_string(),
            };
            CaseVerdict::new(JudgeStatus::RuntimeError)
                .with_usage(time, memory)
                .with_detail(detail)
        }
        RunStatus::CompilationError(log) => {
            CaseVerdict::new(JudgeStatus::CompilationError).with_detail(log.clone())
        }
        RunStatus::InternalError(msg) => CaseVerdict::internal_error(msg.clone()),
    }
}
