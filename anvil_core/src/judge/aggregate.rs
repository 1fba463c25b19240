use crate::{
    problem::{Limits, Problem, ScoringPolicy},
    CaseVerdict, JudgeStatus, SubmissionVerdict,
};

/// Combine per-case verdicts, already in problem order, into the final
/// verdict. The worst status wins.
pub fn aggregate(problem: &Problem, cases: Vec<CaseVerdict>) -> SubmissionVerdict {
    let status = cases
        .iter()
        .map(|c| c.status)
        .filter(|s| *s != JudgeStatus::Skipped)
        .max_by_key(JudgeStatus::severity)
        .unwrap_or(JudgeStatus::Accepted);

    // earliest case carrying the reported status
    let message = if status.is_accepted() {
        None
    } else {
        cases
            .iter()
            .position(|c| c.status == status)
            .map(|i| diagnose(i, &cases[i], &problem.limits))
    };

    let score = score(problem, &cases);

    SubmissionVerdict {
        status,
        score,
        cases,
        message,
    }
}

pub fn score(problem: &Problem, cases: &[CaseVerdict]) -> f64 {
    let accepted = |c: &CaseVerdict| c.status.is_accepted();
    match problem.scoring {
        ScoringPolicy::Binary => {
            if cases.iter().all(accepted) {
                1.0
            } else {
                0.0
            }
        }
        ScoringPolicy::Partial => {
            let total: f64 = problem.cases.iter().map(|c| c.weight()).sum();
            if total <= 0.0 {
                return if cases.iter().all(accepted) { 1.0 } else { 0.0 };
            }
            let earned: f64 = problem
                .cases
                .iter()
                .zip(cases.iter())
                .filter(|(_, v)| v.status.is_accepted())
                .map(|(c, _)| c.weight())
                .sum();
            (earned / total).clamp(0.0, 1.0)
        }
    }
}

/// One-line, user-facing description of a failing case.
pub fn diagnose(index: usize, case: &CaseVerdict, limits: &Limits) -> String {
    let head = format!("case {}: {}", index + 1, case.status.describe());
    match case.status {
        JudgeStatus::TimeLimitExceeded => match case.time {
            Some(ms) => format!(
                "{}, {:.2}s / {:.2}s limit",
                head,
                ms as f64 / 1000.0,
                limits.time_limit.as_secs_f64()
            ),
            None => head,
        },
        JudgeStatus::MemoryLimitExceeded => match case.memory {
            Some(bytes) => format!(
                "{}, {:.1} MiB / {:.1} MiB limit",
                head,
                mib(bytes),
                mib(limits.memory_limit)
            ),
            None => head,
        },
        JudgeStatus::CompilationError => case.status.describe().to_string(),
        JudgeStatus::WrongAnswer | JudgeStatus::RuntimeError | JudgeStatus::InternalError => {
            match &case.detail {
                Some(detail) => format!("{} ({})", head, detail),
                None => head,
            }
        }
        JudgeStatus::Accepted | JudgeStatus::Skipped => head,
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 20) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::TestCase;
    use std::time::Duration;

    fn problem(n: usize, scoring: ScoringPolicy) -> Problem {
        let cases = (0..n).map(|i| TestCase::new("", "").with_weight((i + 1) as f64)).collect();
        Problem::new(
            "p",
            cases,
            Limits {
                time_limit: Duration::from_secs(2),
                memory_limit: 256 << 20,
            },
        )
        .with_scoring(scoring)
    }

    fn v(status: JudgeStatus) -> CaseVerdict {
        CaseVerdict::new(status)
    }

    #[test]
    fn all_accepted() {
        let p = problem(3, ScoringPolicy::Binary);
        let res = aggregate(&p, vec![v(JudgeStatus::Accepted); 3]);
        assert_eq!(res.status, JudgeStatus::Accepted);
        assert_eq!(res.score, 1.0);
        assert!(res.message.is_none());
        assert_eq!(res.cases.len(), 3);
    }

    #[test]
    fn worst_case_wins() {
        let p = problem(3, ScoringPolicy::Binary);
        let res = aggregate(
            &p,
            vec![
                v(JudgeStatus::WrongAnswer),
                v(JudgeStatus::TimeLimitExceeded).with_usage(2100, 0),
                v(JudgeStatus::Accepted),
            ],
        );
        assert_eq!(res.status, JudgeStatus::TimeLimitExceeded);
        assert_eq!(res.score, 0.0);
        assert_eq!(
            res.message.as_deref(),
            Some("case 2: time limit exceeded, 2.10s / 2.00s limit")
        );
    }

    #[test]
    fn earliest_index_breaks_ties() {
        let p = problem(3, ScoringPolicy::Binary);
        let res = aggregate(
            &p,
            vec![
                v(JudgeStatus::Accepted),
                v(JudgeStatus::RuntimeError).with_detail("exit code 1"),
                v(JudgeStatus::RuntimeError).with_detail("exit code 2"),
            ],
        );
        assert_eq!(res.message.as_deref(), Some("case 2: runtime error (exit code 1)"));
    }

    #[test]
    fn internal_error_outranks_everything() {
        let p = problem(2, ScoringPolicy::Binary);
        let res = aggregate(
            &p,
            vec![v(JudgeStatus::CompilationError), v(JudgeStatus::InternalError)],
        );
        assert_eq!(res.status, JudgeStatus::InternalError);
        assert!(res.is_judge_fault());
    }

    #[test]
    fn partial_credit_by_weight() {
        // weights 1, 2, 3
        let p = problem(3, ScoringPolicy::Partial);
        let res = aggregate(
            &p,
            vec![
                v(JudgeStatus::Accepted),
                v(JudgeStatus::WrongAnswer),
                v(JudgeStatus::Accepted),
            ],
        );
        assert_eq!(res.status, JudgeStatus::WrongAnswer);
        assert!((res.score - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn skipped_cases_do_not_set_status() {
        let p = problem(3, ScoringPolicy::Binary);
        let res = aggregate(
            &p,
            vec![v(JudgeStatus::WrongAnswer), CaseVerdict::skipped(), CaseVerdict::skipped()],
        );
        assert_eq!(res.status, JudgeStatus::WrongAnswer);
        assert_eq!(res.cases.len(), 3);
        assert_eq!(res.message.as_deref(), Some("case 1: wrong answer"));
    }

    #[test]
    fn memory_message() {
        let limits = Limits {
            time_limit: Duration::from_secs(1),
            memory_limit: 256 << 20,
        };
        let case = v(JudgeStatus::MemoryLimitExceeded).with_usage(10, 300 << 20);
        assert_eq!(
            diagnose(2, &case, &limits),
            "case 3: memory limit exceeded, 300.0 MiB / 256.0 MiB limit"
        );
    }

    #[test]
    fn empty_problem_is_accepted() {
        let p = problem(0, ScoringPolicy::Partial);
        let res = aggregate(&p, vec![]);
        assert_eq!(res.status, JudgeStatus::Accepted);
        assert_eq!(res.score, 1.0);
    }
}
