use std::{path::Path, process::Command};

use log::debug;

use super::{
    probe_tool, require_tool, run_check, write_source, CompileResult, Compiler,
    CompilerDescriptor, CompilerEnvironmentStatus, PreparedProgram,
};
use crate::error::Result;

pub struct CompilerGPP {
    standard: GPPStandard,
}

#[derive(Debug, Clone, Copy)]
pub enum GPPStandard {
    CPP11,
    CPP17,
    CPP20,
}

impl From<GPPStandard> for String {
    fn from(v: GPPStandard) -> Self {
        match v {
            GPPStandard::CPP11 => "-std=c++11".into(),
            GPPStandard::CPP17 => "-std=c++17".into(),
            GPPStandard::CPP20 => "-std=c++20".into(),
        }
    }
}

impl CompilerGPP {
    pub fn new() -> Self {
        Self::with_standard(GPPStandard::CPP17)
    }

    pub fn with_standard(standard: GPPStandard) -> Self {
        Self { standard }
    }
}

impl Default for CompilerGPP {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerDescriptor for CompilerGPP {
    fn support_sufix() -> Vec<&'static str> {
        vec!["cpp", "c++", "cc", "cxx"]
    }
}

impl Compiler for CompilerGPP {
    fn name(&self) -> &str {
        "g++"
    }

    fn check_environment(&self) -> CompilerEnvironmentStatus {
        probe_tool(&["g++"])
    }

    fn compile(&self, src: &str, work_dir: &Path) -> Result<CompileResult> {
        let compiler_path = require_tool("g++", &["g++"])?;
        let code_path = write_source(work_dir, "src.cpp", src)?;
        let exec_path = work_dir.join("exec");

        debug!("compiling {} with {}", code_path.display(), compiler_path.display());
        let log = run_check(
            Command::new(&compiler_path)
                .arg(&code_path)
                .arg("-o")
                .arg(&exec_path)
                .arg("-O2")
                .arg(String::from(self.standard))
                .current_dir(work_dir),
        )?;

        Ok(match log {
            Some(log) => CompileResult::CompileError(log),
            None => CompileResult::OK(PreparedProgram::new(exec_path).in_dir(work_dir)),
        })
    }
}
