use crate::problem::ComparePolicy;

pub enum ComparisonResult {
    Same,
    /// Carries a short description of the first difference.
    Different(String),
}

impl ComparisonResult {
    pub fn is_same(&self) -> bool {
        matches!(self, ComparisonResult::Same)
    }
}

pub trait ComparisonMode: Send + Sync {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult;
}

/// Byte-for-byte equality.
pub struct ExactCompare;

impl ComparisonMode for ExactCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        if expected == actual {
            return ComparisonResult::Same;
        }

        let offset = expected
            .bytes()
            .zip(actual.bytes())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| expected.len().min(actual.len()));
        ComparisonResult::Different(format!(
            "output differs at byte {} (expected {} bytes, got {})",
            offset,
            expected.len(),
            actual.len()
        ))
    }
}

/// Compares the sequences of whitespace-separated tokens.
pub struct TokenCompare;

impl ComparisonMode for TokenCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        compare_tokens(expected, actual, |a, b| a == b)
    }
}

/// Token comparison where numeric tokens may differ by `epsilon`, either
/// absolutely or relative to the larger magnitude.
pub struct FloatCompare {
    pub epsilon: f64,
}

impl FloatCompare {
    fn token_eq(&self, expected: &str, actual: &str) -> bool {
        if expected == actual {
            return true;
        }
        match (expected.parse::<f64>(), actual.parse::<f64>()) {
            (Ok(a), Ok(b)) if a.is_finite() && b.is_finite() => {
                let diff = (a - b).abs();
                diff <= self.epsilon || diff <= self.epsilon * a.abs().max(b.abs())
            }
            _ => false,
        }
    }
}

impl ComparisonMode for FloatCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        compare_tokens(expected, actual, |a, b| self.token_eq(a, b))
    }
}

fn compare_tokens<F>(expected: &str, actual: &str, eq: F) -> ComparisonResult
where
    F: Fn(&str, &str) -> bool,
{
    let mut expected = expected.split_whitespace();
    let mut actual = actual.split_whitespace();
    let mut index = 1;

    loop {
        match (expected.next(), actual.next()) {
            (None, None) => return ComparisonResult::Same,
            (Some(e), Some(a)) if eq(e, a) => {}
            (e, a) => {
                return ComparisonResult::Different(format!(
                    "token {}: expected `{}`, got `{}`",
                    index,
                    e.map(clip).unwrap_or_else(|| "[EOF]".into()),
                    a.map(clip).unwrap_or_else(|| "[EOF]".into()),
                ));
            }
        }
        index += 1;
    }
}

fn clip(token: &str) -> String {
    const MAX: usize = 32;
    if token.chars().count() <= MAX {
        token.to_string()
    } else {
        let head: String = token.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

impl From<&ComparePolicy> for Box<dyn ComparisonMode> {
    fn from(policy: &ComparePolicy) -> Self {
        match policy {
            ComparePolicy::Exact => Box::new(ExactCompare),
            ComparePolicy::Whitespace => Box::new(TokenCompare),
            ComparePolicy::Float { epsilon } => Box::new(FloatCompare { epsilon: *epsilon }),
        }
    }
}

pub fn compare(expected: &str, actual: &str, policy: &ComparePolicy) -> bool {
    first_mismatch(expected, actual, policy).is_none()
}

pub fn first_mismatch(expected: &str, actual: &str, policy: &ComparePolicy) -> Option<String> {
    let mode: Box<dyn ComparisonMode> = policy.into();
    match mode.compare(expected, actual) {
        ComparisonResult::Same => None,
        ComparisonResult::Different(msg) => Some(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS: ComparePolicy = ComparePolicy::Whitespace;

    #[test]
    fn trailing_whitespace_ignored() {
        assert!(compare("3\n", "3 \n\n", &WS));
        assert!(compare("1 2 3", "1  2   3", &WS));
        assert!(compare("a\nb\n", "a   \r\nb", &WS));
    }

    #[test]
    fn token_difference_detected() {
        assert!(!compare("1 2 3", "1 2 4", &WS));
        assert!(!compare("1 2 3", "1 2", &WS));
        let msg = first_mismatch("1 2 3", "1 2", &WS).unwrap();
        assert_eq!(msg, "token 3: expected `3`, got `[EOF]`");
    }

    #[test]
    fn empty_outputs() {
        assert!(compare("", "", &WS));
        assert!(compare("", "\n \n", &WS));
        assert!(!compare("", "0", &WS));
        assert!(compare("", "", &ComparePolicy::Exact));
        assert!(!compare("\n", "", &ComparePolicy::Exact));
    }

    #[test]
    fn float_tolerance() {
        let policy = ComparePolicy::Float { epsilon: 1e-4 };
        assert!(compare("1.0000", "1.00001", &policy));
        assert!(!compare("1.0000", "1.00001", &ComparePolicy::Exact));
        assert!(!compare("1.0000", "1.001", &policy));
        // relative tolerance for large magnitudes
        assert!(compare("1000000", "1000050", &policy));
    }

    #[test]
    fn float_non_numeric_tokens_exact() {
        let policy = ComparePolicy::Float { epsilon: 1e-6 };
        assert!(compare("YES 0.5", "YES 0.5000001", &policy));
        assert!(!compare("YES 0.5", "yes 0.5", &policy));
        assert!(!compare("nan", "inf", &policy));
    }

    #[test]
    fn exact_reports_offset() {
        let msg = first_mismatch("abc", "abd", &ComparePolicy::Exact).unwrap();
        assert!(msg.contains("byte 2"));
    }
}
