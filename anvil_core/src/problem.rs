use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComparePolicy {
    Exact,
    Whitespace,
    Float { epsilon: f64 },
}

impl Default for ComparePolicy {
    fn default() -> Self {
        ComparePolicy::Whitespace
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringPolicy {
    /// 1.0 only if every case is accepted.
    Binary,
    /// Weighted fraction of accepted cases.
    Partial,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        ScoringPolicy::Binary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub time_limit: Duration,
    /// Bytes.
    pub memory_limit: u64,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    pub weight: Option<f64>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub cases: Vec<TestCase>,
    pub limits: Limits,
    pub compare: ComparePolicy,
    pub scoring: ScoringPolicy,
}

impl Problem {
    pub fn new(id: impl Into<String>, cases: Vec<TestCase>, limits: Limits) -> Self {
        Self {
            id: id.into(),
            cases,
            limits,
            compare: ComparePolicy::default(),
            scoring: ScoringPolicy::default(),
        }
    }

    pub fn with_compare(mut self, compare: ComparePolicy) -> Self {
        self.compare = compare;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringPolicy) -> Self {
        self.scoring = scoring;
        self
    }
}

/// Limits as written in a problem description: milliseconds and MiB.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "limitConfig")]
pub struct LimitConfig {
    #[serde(rename = "timeLimit")]
    pub time_limit: u64,
    #[serde(rename = "memoryLimit")]
    pub memory_limit: u64,
}

impl From<&LimitConfig> for Limits {
    fn from(v: &LimitConfig) -> Self {
        Limits {
            time_limit: Duration::from_millis(v.time_limit),
            memory_limit: v.memory_limit << 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseConfig {
    #[serde(rename = "inputFile")]
    pub inputfile_path: String,
    #[serde(rename = "answerFile")]
    pub answerfile_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// On-disk problem description. Case files are resolved relative to the
/// directory containing the description.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub name: String,
    #[serde(skip_serializing, skip_deserializing)]
    path: PathBuf,
    #[serde(rename = "limitConfig")]
    pub limit_config: LimitConfig,
    #[serde(rename = "comparisonMode", default)]
    pub comparison_mode: ComparePolicy,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    pub cases: Vec<CaseConfig>,
}

impl ProblemConfig {
    fn from_string(content: &str) -> Result<Self> {
        let v: Self = serde_yaml::from_str(content)?;
        Ok(v)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        let mut v = Self::from_string(&content)?;

        let r_path = path.canonicalize()?;
        v.path = r_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        v.check_valid()?;
        Ok(v)
    }

    fn check_valid(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(Error::Data(format!("problem `{}` has no cases", self.name)));
        }
        if self.limit_config.time_limit == 0 || self.limit_config.memory_limit == 0 {
            return Err(Error::Data("limits must be positive".into()));
        }
        if let ComparePolicy::Float { epsilon } = self.comparison_mode {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(Error::Data(format!("invalid float tolerance {}", epsilon)));
            }
        }
        for case in self.cases.iter() {
            for file in [&case.inputfile_path, &case.answerfile_path] {
                if !self.find_relative_path(file).exists() {
                    return Err(Error::NotFound(file.to_string()));
                }
            }
            if let Some(weight) = case.weight {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(Error::Data(format!(
                        "invalid weight {} for `{}`",
                        weight, case.inputfile_path
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn find_relative_path(&self, path: &str) -> PathBuf {
        self.path.join(path)
    }

    /// Reads every case file and builds the in-memory problem.
    pub fn load(&self) -> Result<Problem> {
        let mut cases = Vec::with_capacity(self.cases.len());
        for case in self.cases.iter() {
            let input = fs::read_to_string(self.find_relative_path(&case.inputfile_path))?;
            let expected = fs::read_to_string(self.find_relative_path(&case.answerfile_path))?;
            cases.push(TestCase {
                input,
                expected,
                weight: case.weight,
            });
        }

        Ok(Problem {
            id: self.name.clone(),
            cases,
            limits: (&self.limit_config).into(),
            compare: self.comparison_mode.clone(),
            scoring: self.scoring,
        })
    }
}
