mod aggregate;
mod case;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{stream, TryStreamExt};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

pub use self::aggregate::{aggregate, diagnose, score};
pub use self::case::{case_verdict, Artifact, CaseJudge, Preparation};
use crate::{
    compile::CompilerRegistry,
    config::JudgeConfig,
    error::{Error, Result},
    problem::{Problem, ScoringPolicy, TestCase},
    runner::Runner,
    CaseVerdict, JudgeStatus, Submission, SubmissionVerdict,
};

/// Judges whole submissions. Holds no per-submission state, so one instance
/// can serve any number of concurrent evaluations.
pub struct ProblemJudge {
    registry: Arc<CompilerRegistry>,
    config: JudgeConfig,
    runner: Runner,
}

impl ProblemJudge {
    pub fn new(registry: Arc<CompilerRegistry>, config: JudgeConfig) -> Self {
        let runner = Runner::from(&config);
        Self {
            registry,
            config,
            runner,
        }
    }

    pub async fn evaluate(&self, problem: &Problem, submission: &Submission) -> SubmissionVerdict {
        self.evaluate_with_cancel(problem, submission, &CancellationToken::new())
            .await
    }

    /// Like [`evaluate`](Self::evaluate), but every running case is killed as
    /// soon as `cancel` fires. A cancelled evaluation never reports partial
    /// results.
    pub async fn evaluate_with_cancel(
        &self,
        problem: &Problem,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> SubmissionVerdict {
        info!(
            "judging `{}` ({} cases, {})",
            problem.id,
            problem.cases.len(),
            submission.language
        );
        let verdict = match self.judge_cases(problem, submission, cancel).await {
            Ok(cases) => aggregate(problem, cases),
            Err(e) => self.fault(problem, e),
        };
        info!("`{}`: {:?} score {:.3}", problem.id, verdict.status, verdict.score);
        verdict
    }

    async fn judge_cases(
        &self,
        problem: &Problem,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<Vec<CaseVerdict>> {
        let compiler = self.registry.find(&submission.language)?;
        // artifacts live exactly as long as this evaluation
        let work_dir = tempfile::Builder::new().prefix("anvil-").tempdir()?;
        let artifact = Artifact::new(compiler, &submission.source, work_dir.path());
        let judge = CaseJudge::new(&self.runner, &artifact, problem, self.config.internal_retries);

        let short_circuit =
            self.config.short_circuit && problem.scoring == ScoringPolicy::Binary;
        let failed = AtomicBool::new(false);

        let judge = &judge;
        let failed = &failed;
        let cases = stream::iter(problem.cases.iter().enumerate().map(|(index, case)| {
            Ok::<_, Error>(judge_one(judge, index, case, short_circuit, failed, cancel))
        }))
        .try_buffered(self.config.workers.max(1))
        .try_collect::<Vec<_>>()
        .await?;

        // a token fired after the last case finished still wins
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(cases)
    }

    /// Verdict for an evaluation that could not produce one of its own.
    fn fault(&self, problem: &Problem, e: Error) -> SubmissionVerdict {
        match e {
            Error::Cancelled => warn!("judging `{}` cancelled", problem.id),
            ref e => error!("judging `{}` failed: {}", problem.id, e),
        }
        let reason = e.reason();
        SubmissionVerdict {
            status: JudgeStatus::InternalError,
            score: 0.0,
            cases: problem
                .cases
                .iter()
                .map(|_| CaseVerdict::internal_error(reason))
                .collect(),
            message: Some(reason.to_string()),
        }
    }
}

async fn judge_one(
    judge: &CaseJudge<'_>,
    index: usize,
    case: &TestCase,
    short_circuit: bool,
    failed: &AtomicBool,
    cancel: &CancellationToken,
) -> Result<CaseVerdict> {
    if short_circuit && failed.load(Ordering::SeqCst) {
        return Ok(CaseVerdict::skipped());
    }
    let verdict = judge.judge(case, cancel).await?;
    debug!("case {}: {:?}", index + 1, verdict.status);
    if !verdict.status.is_accepted() {
        failed.store(true, Ordering::SeqCst);
    }
    Ok(verdict)
}
