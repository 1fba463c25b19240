pub mod compare;
pub mod compile;
pub mod config;
pub mod error;
pub mod judge;
pub mod probe;
pub mod problem;
pub mod runner;

use serde::{Deserialize, Serialize};

pub use judge::ProblemJudge;

/// Candidate source code together with the language it is written in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub source: String,
    pub language: String,
}

impl Submission {
    pub fn new(source: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JudgeStatus {
    /// Sentinel for a case that was never run because judging stopped early.
    Skipped,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    InternalError,
}

impl JudgeStatus {
    /// Rank used by worst-case-wins aggregation, higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            JudgeStatus::Skipped => 0,
            JudgeStatus::Accepted => 1,
            JudgeStatus::WrongAnswer => 2,
            JudgeStatus::TimeLimitExceeded => 3,
            JudgeStatus::MemoryLimitExceeded => 4,
            JudgeStatus::RuntimeError => 5,
            JudgeStatus::CompilationError => 6,
            JudgeStatus::InternalError => 7,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, JudgeStatus::Accepted)
    }

    /// Faults of the judging infrastructure rather than of the submission.
    pub fn is_judge_fault(&self) -> bool {
        matches!(self, JudgeStatus::InternalError)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            JudgeStatus::Skipped => "skipped",
            JudgeStatus::Accepted => "accepted",
            JudgeStatus::WrongAnswer => "wrong answer",
            JudgeStatus::TimeLimitExceeded => "time limit exceeded",
            JudgeStatus::MemoryLimitExceeded => "memory limit exceeded",
            JudgeStatus::RuntimeError => "runtime error",
            JudgeStatus::CompilationError => "compilation error",
            JudgeStatus::InternalError => "internal error",
        }
    }
}

/// Verdict of a single test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseVerdict {
    pub status: JudgeStatus,
    /// Wall-clock time in milliseconds.
    pub time: Option<u64>,
    /// Peak resident memory in bytes.
    pub memory: Option<u64>,
    pub detail: Option<String>,
}

impl CaseVerdict {
    pub fn new(status: JudgeStatus) -> Self {
        Self {
            status,
            time: None,
            memory: None,
            detail: None,
        }
    }

    pub fn skipped() -> Self {
        Self::new(JudgeStatus::Skipped)
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(JudgeStatus::InternalError).with_detail(detail)
    }

    pub fn with_usage(mut self, time: u64, memory: u64) -> Self {
        self.time = Some(time);
        self.memory = Some(memory);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Final result of judging one submission against one problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionVerdict {
    pub status: JudgeStatus,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// One entry per test case, in problem order.
    pub cases: Vec<CaseVerdict>,
    pub message: Option<String>,
}

impl SubmissionVerdict {
    pub fn is_accepted(&self) -> bool {
        self.status.is_accepted()
    }

    /// Whether this verdict must be excluded from benchmark statistics.
    pub fn is_judge_fault(&self) -> bool {
        self.status.is_judge_fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order() {
        let ordered = [
            JudgeStatus::Skipped,
            JudgeStatus::Accepted,
            JudgeStatus::WrongAnswer,
            JudgeStatus::TimeLimitExceeded,
            JudgeStatus::MemoryLimitExceeded,
            JudgeStatus::RuntimeError,
            JudgeStatus::CompilationError,
            JudgeStatus::InternalError,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
    }

    #[test]
    fn only_internal_error_is_judge_fault() {
        assert!(JudgeStatus::InternalError.is_judge_fault());
        assert!(!JudgeStatus::CompilationError.is_judge_fault());
        assert!(!JudgeStatus::TimeLimitExceeded.is_judge_fault());
    }
}
