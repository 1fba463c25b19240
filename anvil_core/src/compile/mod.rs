use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use crate::error::{Error, Result};

pub mod gpp;
pub mod python;
pub mod shell;

/// Strategy that turns source text into something the runner can launch.
pub trait Compiler: Send + Sync {
    fn name(&self) -> &str;
    fn check_environment(&self) -> CompilerEnvironmentStatus;
    /// Artifacts must be placed under `work_dir`, which lives exactly as long
    /// as one evaluation.
    fn compile(&self, src: &str, work_dir: &Path) -> Result<CompileResult>;
}

pub trait CompilerDescriptor {
    /// Language identifiers and file extensions handled by this compiler.
    fn support_sufix() -> Vec<&'static str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerEnvironmentStatus {
    OK { version: String, path: String },
    Missing,
}

#[derive(Debug, Clone)]
pub enum CompileResult {
    OK(PreparedProgram),
    /// Carries the compiler diagnostics.
    CompileError(String),
}

#[derive(Debug, Clone)]
pub struct PreparedProgram {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
}

impl PreparedProgram {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            args: vec![],
            work_dir: None,
        }
    }

    pub fn new_with_args(path: PathBuf, args: Vec<String>) -> Self {
        Self {
            path,
            args,
            work_dir: None,
        }
    }

    pub fn in_dir(mut self, work_dir: &Path) -> Self {
        self.work_dir = Some(work_dir.to_path_buf());
        self
    }
}

/// Maps language identifiers to compilers.
#[derive(Default, Clone)]
pub struct CompilerRegistry {
    compilers: BTreeMap<String, Arc<dyn Compiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in language.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_descriptor(gpp::CompilerGPP::new());
        registry.register_descriptor(python::CompilerPython::new());
        registry.register_descriptor(shell::CompilerShell::new());
        registry
    }

    pub fn register(&mut self, names: &[&str], compiler: Arc<dyn Compiler>) {
        for name in names {
            self.compilers
                .insert(name.to_ascii_lowercase(), compiler.clone());
        }
    }

    pub fn register_descriptor<C>(&mut self, compiler: C)
    where
        C: Compiler + CompilerDescriptor + 'static,
    {
        self.register(&C::support_sufix(), Arc::new(compiler));
    }

    pub fn find(&self, language: &str) -> Result<Arc<dyn Compiler>> {
        self.compilers
            .get(&language.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownLanguage(language.to_string()))
    }

    /// Guess the language of a source file from its extension.
    pub fn language_of(&self, path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if self.compilers.contains_key(&extension) {
            Some(extension)
        } else {
            None
        }
    }

    /// Registered identifiers paired with their compiler.
    pub fn languages(&self) -> impl Iterator<Item = (&str, &Arc<dyn Compiler>)> {
        self.compilers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Locate the first available tool and read its version banner.
pub(crate) fn probe_tool(candidates: &[&str]) -> CompilerEnvironmentStatus {
    for candidate in candidates {
        let path = match which::which(candidate) {
            Ok(path) => path,
            Err(_) => continue,
        };
        let output = Command::new(&path)
            .arg("--version")
            .stdin(Stdio::null())
            .output();
        // python2 prints its banner on stderr
        let version = output
            .ok()
            .map(|o| {
                let text = if o.stdout.is_empty() { o.stderr } else { o.stdout };
                String::from_utf8_lossy(&text)
                    .lines()
                    .next()
                    .and_then(|l| l.split(' ').last())
                    .unwrap_or("unknown")
                    .to_string()
            })
            .unwrap_or_else(|| "unknown".into());

        return CompilerEnvironmentStatus::OK {
            version,
            path: path.to_string_lossy().to_string(),
        };
    }
    CompilerEnvironmentStatus::Missing
}

pub(crate) fn require_tool(name: &str, candidates: &[&str]) -> Result<PathBuf> {
    match probe_tool(candidates) {
        CompilerEnvironmentStatus::OK { path, .. } => Ok(PathBuf::from(path)),
        CompilerEnvironmentStatus::Missing => Err(Error::Environment(format!("missing {}", name))),
    }
}

pub(crate) fn write_source(work_dir: &Path, file_name: &str, src: &str) -> Result<PathBuf> {
    let code_path = work_dir.join(file_name);
    fs::write(&code_path, src.as_bytes())?;
    Ok(code_path)
}

/// Run a build or syntax-check step. `Some(log)` when the tool rejected the
/// source.
pub(crate) fn run_check(command: &mut Command) -> Result<Option<String>> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if output.status.success() {
        return Ok(None);
    }

    let mut log = String::from_utf8_lossy(&output.stderr).to_string();
    if log.trim().is_empty() {
        log = String::from_utf8_lossy(&output.stdout).to_string();
    }
    const MAX_LOG: usize = 4096;
    if log.len() > MAX_LOG {
        let mut cut = MAX_LOG;
        while !log.is_char_boundary(cut) {
            cut -= 1;
        }
        log.truncate(cut);
    }
    Ok(Some(log))
}
