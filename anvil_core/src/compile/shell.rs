use std::{path::Path, process::Command};

use super::{
    probe_tool, require_tool, run_check, write_source, CompileResult, Compiler,
    CompilerDescriptor, CompilerEnvironmentStatus, PreparedProgram,
};
use crate::error::Result;

/// POSIX shell scripts. `sh -n` rejects scripts that do not parse.
pub struct CompilerShell;

impl CompilerShell {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CompilerShell {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerDescriptor for CompilerShell {
    fn support_sufix() -> Vec<&'static str> {
        vec!["sh", "shell"]
    }
}

impl Compiler for CompilerShell {
    fn name(&self) -> &str {
        "sh"
    }

    fn check_environment(&self) -> CompilerEnvironmentStatus {
        probe_tool(&["sh"])
    }

    fn compile(&self, src: &str, work_dir: &Path) -> Result<CompileResult> {
        let shell = require_tool("sh", &["sh"])?;
        let code_path = write_source(work_dir, "main.sh", src)?;

        if let Some(log) = run_check(Command::new(&shell).arg("-n").arg(&code_path))? {
            return Ok(CompileResult::CompileError(log));
        }

        Ok(CompileResult::OK(
            PreparedProgram::new_with_args(shell, vec![code_path.to_string_lossy().to_string()])
                .in_dir(work_dir),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_syntax_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = CompilerShell::new().compile("if then fi (\n", dir.path())?;
        assert!(matches!(result, CompileResult::CompileError(_)));
        Ok(())
    }

    #[test]
    fn shell_compile_ok() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = CompilerShell::new().compile("echo hi\n", dir.path())?;
        assert!(matches!(result, CompileResult::OK(p) if p.args[0].ends_with("main.sh")));
        Ok(())
    }
}
