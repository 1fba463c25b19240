use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Duration,
};

use anvil_core::{
    compile::{CompilerEnvironmentStatus, CompilerRegistry},
    config::JudgeConfig,
    error::{Error, Result},
    problem::{ComparePolicy, Limits, Problem, ProblemConfig, TestCase},
    ProblemJudge, Submission, SubmissionVerdict,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    version,
    name = "anvil",
    about = "Judge competitive programming submissions under resource limits."
)]
struct Opts {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Judge a submission against every case of a problem.yaml
    Judge(JudgeArgs),
    /// Judge a submission against a single input/answer pair
    Run(RunArgs),
    /// Show which toolchains are available
    Env,
}

#[derive(Args, Debug)]
struct JudgeArgs {
    /// problem config
    problem: PathBuf,
    /// path of source
    source: PathBuf,
    /// language, guessed from the file extension when omitted
    #[arg(short, long)]
    language: Option<String>,
    /// engine config yaml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// path of source
    source: PathBuf,
    /// input file path
    #[arg(short, long)]
    input_file: PathBuf,
    /// answer file path
    #[arg(short, long)]
    answer_file: PathBuf,
    /// time limit(MS)
    #[arg(short, long, default_value_t = 1000)]
    time_limit: u64,
    /// memory limit(MiB)
    #[arg(short, long, default_value_t = 256)]
    memory_limit: u64,
    #[arg(short, long, value_enum, default_value_t = CompareMethod::Whitespace)]
    compare_method: CompareMethod,
    /// tolerance for the float method
    #[arg(short, long, default_value_t = 1e-6)]
    epsilon: f64,
    #[arg(short, long)]
    language: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CompareMethod {
    Exact,
    Whitespace,
    Float,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let registry = Arc::new(CompilerRegistry::with_defaults());

    let verdict = match opts.subcmd {
        SubCommand::Env => {
            for (name, compiler) in registry.languages() {
                match compiler.check_environment() {
                    CompilerEnvironmentStatus::OK { version, path } => {
                        println!("{:<8} {} ({})", name, version, path)
                    }
                    CompilerEnvironmentStatus::Missing => println!("{:<8} missing", name),
                }
            }
            return Ok(());
        }
        SubCommand::Judge(args) => {
            let config = match &args.config {
                Some(path) => JudgeConfig::from_file(path)?,
                None => JudgeConfig::default(),
            };
            let problem = ProblemConfig::from_file(&args.problem)?.load()?;
            let submission = read_submission(&registry, &args.source, args.language)?;
            evaluate(ProblemJudge::new(registry, config), &problem, &submission).await
        }
        SubCommand::Run(args) => {
            let input = read(&args.input_file)?;
            let answer = read(&args.answer_file)?;
            let compare = match args.compare_method {
                CompareMethod::Exact => ComparePolicy::Exact,
                CompareMethod::Whitespace => ComparePolicy::Whitespace,
                CompareMethod::Float => ComparePolicy::Float {
                    epsilon: args.epsilon,
                },
            };
            let problem = Problem::new(
                args.input_file.to_string_lossy(),
                vec![TestCase::new(input, answer)],
                Limits {
                    time_limit: Duration::from_millis(args.time_limit),
                    memory_limit: args.memory_limit << 20,
                },
            )
            .with_compare(compare);
            let submission = read_submission(&registry, &args.source, args.language)?;
            let judge = ProblemJudge::new(registry, JudgeConfig::default());
            evaluate(judge, &problem, &submission).await
        }
    };

    print!("{}", serde_yaml::to_string(&verdict)?);
    if !verdict.is_accepted() {
        process::exit(1);
    }
    Ok(())
}

/// Judge with Ctrl-C wired to cancellation.
async fn evaluate(
    judge: ProblemJudge,
    problem: &Problem,
    submission: &Submission,
) -> SubmissionVerdict {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    let verdict = judge.evaluate_with_cancel(problem, submission, &cancel).await;
    watcher.abort();
    verdict
}

fn read_submission(
    registry: &CompilerRegistry,
    path: &Path,
    language: Option<String>,
) -> Result<Submission> {
    let language = match language {
        Some(language) => language,
        None => registry
            .language_of(path)
            .ok_or_else(|| Error::UnknownLanguage(path.to_string_lossy().to_string()))?,
    };
    info!("{} detected as {}", path.display(), language);
    Ok(Submission::new(read(path)?, language))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))
}
