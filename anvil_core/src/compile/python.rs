use std::{path::Path, process::Command};

use super::{
    probe_tool, require_tool, run_check, write_source, CompileResult, Compiler,
    CompilerDescriptor, CompilerEnvironmentStatus, PreparedProgram,
};
use crate::error::Result;

const INTERPRETERS: [&str; 2] = ["python3", "python"];

/// Python sources run on the interpreter; preparing only byte-compiles them
/// so syntax errors surface as compilation errors.
pub struct CompilerPython;

impl CompilerPython {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CompilerPython {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerDescriptor for CompilerPython {
    fn support_sufix() -> Vec<&'static str> {
        vec!["python", "python3", "py"]
    }
}

impl Compiler for CompilerPython {
    fn name(&self) -> &str {
        "python"
    }

    fn check_environment(&self) -> CompilerEnvironmentStatus {
        probe_tool(&INTERPRETERS)
    }

    fn compile(&self, src: &str, work_dir: &Path) -> Result<CompileResult> {
        let interpreter = require_tool("python", &INTERPRETERS)?;
        let code_path = write_source(work_dir, "main.py", src)?;

        let log = run_check(
            Command::new(&interpreter)
                .arg("-m")
                .arg("py_compile")
                .arg(&code_path)
                .current_dir(work_dir),
        )?;
        if let Some(log) = log {
            return Ok(CompileResult::CompileError(log));
        }

        Ok(CompileResult::OK(
            PreparedProgram::new_with_args(
                interpreter,
                vec![code_path.to_string_lossy().to_string()],
            )
            .in_dir(work_dir),
        ))
    }
}
