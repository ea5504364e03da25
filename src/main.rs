use std::io::IsTerminal;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use serde::Serialize;

use threadline_core::{CheckReport, Fix, ReviewTarget, RuleDocument, ThreadlineConfig};
use threadline_git::fetch::{current_branch, fetch_diff, FetchedDiff};
use threadline_git::target::{environment_name, repository_name, resolve_target, SignalBag};
use threadline_review::fixes::{fix_diff, FixDetector};
use threadline_review::llm::LlmClient;
use threadline_review::orchestrator::CheckOrchestrator;
use threadline_review::report::CheckSummary;
use threadline_review::request::{CheckRequest, CheckResponse};
use threadline_review::state::{CheckLog, Lineage, StoredCheck};

#[derive(Parser)]
#[command(
    name = "threadline",
    version,
    about = "Check code changes against your team's threadlines",
    long_about = "Threadline evaluates a diff against user-authored rule documents (threadlines).\n\n\
                   Each threadline is scoped to files by glob patterns and graded independently\n\
                   by an LLM. The diff to check is resolved from CI environment signals\n\
                   (pull/merge request, branch, commit) or local changes.\n\n\
                   Examples:\n  \
                     threadline init                     Create config and an example threadline\n  \
                     threadline check                    Check the resolved diff\n  \
                     threadline check --diff-file x.diff Check a saved diff\n  \
                     threadline target                   Show which diff would be checked\n  \
                     threadline fixes                    Show violations fixed since the last check"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .threadline.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Read extra environment signals from a KEY=VALUE file
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Check the resolved diff against every threadline
    #[command(long_about = "Check the resolved diff against every threadline.\n\n\
        The diff comes from --diff-file, or is fetched from git for the target resolved\n\
        from CI environment signals. With --request, a JSON check request is run as-is\n\
        and the JSON check response is printed.\n\n\
        Examples:\n  threadline check\n  threadline check --diff-file changes.diff --fail-on-attention\n  threadline check --request request.json")]
    Check {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Read the diff from a file (`-` for stdin) instead of git
        #[arg(long, conflicts_with = "request")]
        diff_file: Option<PathBuf>,

        /// Run a JSON check request and print the JSON response
        #[arg(long)]
        request: Option<PathBuf>,

        /// Exit with code 1 if any threadline needs attention
        #[arg(long)]
        fail_on_attention: bool,

        /// Do not save the check or look for fixes
        #[arg(long)]
        no_save: bool,

        /// Model to use (overrides config and THREADLINE_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Per-threadline timeout in seconds (overrides config and THREADLINE_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show the diff target resolved from environment signals
    Target {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Show violations fixed between the last two checks
    Fixes {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Also print the introduction and fix diffs for each fix
        #[arg(long)]
        diff: bool,
    },
    /// Create a default .threadline.toml and an example threadline
    #[command(long_about = "Create a default .threadline.toml and an example threadline.\n\n\
        Fails if .threadline.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Machine-readable JSON with camelCase keys
    Json,
    /// GitHub-flavored Markdown
    Markdown,
}

const DEFAULT_CONFIG: &str = r#"# Threadline Configuration

[llm]
# OpenAI-compatible endpoint
# provider = "openai"
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# api_key = "..."            # or set THREADLINE_API_KEY / OPENAI_API_KEY
# request_timeout_secs = 120

[check]
# rules_dir = ".threadlines"
# timeout_secs = 40
# environment = "local"
# state_dir = ".threadline"
# default_branch = "main"
"#;

const EXAMPLE_RULE: &str = r#"+++
id = "error-handling"
version = "1"
patterns = ["src/**/*.rs"]
+++
# Error handling

Library code returns errors instead of panicking. New `unwrap()` or
`expect()` calls outside tests need attention.
"#;

fn init_tracing(verbosity: u8, json: bool) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}

fn load_config(path: Option<&Path>) -> Result<ThreadlineConfig> {
    match path {
        Some(path) => ThreadlineConfig::from_file(path)
            .into_diagnostic()
            .wrap_err(format!("loading {}", path.display())),
        None => {
            let default_path = Path::new(".threadline.toml");
            if default_path.exists() {
                ThreadlineConfig::from_file(default_path)
                    .into_diagnostic()
                    .wrap_err("loading .threadline.toml")
            } else {
                Ok(ThreadlineConfig::default())
            }
        }
    }
}

fn read_diff_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .into_diagnostic()
            .wrap_err("reading stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))
}

fn load_signals(env_file: Option<&Path>) -> Result<SignalBag> {
    let signals = SignalBag::from_env();
    match env_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err(format!("reading {}", path.display()))?;
            Ok(signals.overlay(SignalBag::parse_env_file(&content)))
        }
        None => Ok(signals),
    }
}

fn apply_flags(config: &mut ThreadlineConfig, model: Option<&str>, timeout: Option<u64>) -> Result<()> {
    if let Some(model) = model {
        config.llm.model = model.to_string();
    }
    if let Some(secs) = timeout {
        config.check.timeout_secs = secs;
    }
    config
        .validate()
        .into_diagnostic()
        .wrap_err("invalid command-line override")
}

fn lineage_for(repo: &Path, target: &ReviewTarget, signals: &SignalBag, config: &ThreadlineConfig) -> Lineage {
    let repo_name = repository_name(signals)
        .map(str::to_string)
        .or_else(|| {
            std::fs::canonicalize(repo)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| "repository".to_string());
    let branch = target
        .lineage_branch()
        .map(str::to_string)
        .or_else(|| current_branch(repo))
        .unwrap_or_else(|| "HEAD".to_string());
    let environment = environment_name(signals)
        .map(str::to_string)
        .unwrap_or_else(|| config.check.environment.clone());
    Lineage {
        repo: repo_name,
        branch,
        environment,
    }
}

async fn run_orchestrator(
    config: &ThreadlineConfig,
    rules: Vec<RuleDocument>,
    diff: &FetchedDiff,
) -> Result<CheckReport> {
    if config.llm.api_key.is_none() {
        tracing::warn!(
            "no API key configured; set THREADLINE_API_KEY or api_key under [llm] in .threadline.toml"
        );
    }
    let client = LlmClient::new(&config.llm).into_diagnostic()?;
    let orchestrator = CheckOrchestrator::new(Arc::new(client), config.check.timeout());

    let spinner = if std::io::stderr().is_terminal() {
        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
            pb.set_style(style);
        }
        pb.set_message(format!("Checking {} threadlines...", rules.len()));
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let report = orchestrator.run(rules, &diff.text, &diff.files).await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    Ok(report)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckOutput<'a> {
    target: &'a ReviewTarget,
    #[serde(flatten)]
    response: CheckResponse,
    fixes: &'a [Fix],
}

fn print_check(
    format: OutputFormat,
    target: &ReviewTarget,
    report: &CheckReport,
    fixes: &[Fix],
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = CheckOutput {
                target,
                response: CheckResponse::from(report),
                fixes,
            };
            println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
        }
        OutputFormat::Markdown => print!("{}", CheckSummary::new(target, report, fixes).to_markdown()),
        OutputFormat::Text => print!("{}", CheckSummary::new(target, report, fixes)),
    }
    Ok(())
}

async fn run_request(config: &ThreadlineConfig, path: &Path) -> Result<CheckReport> {
    let content = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))?;
    let request = CheckRequest::from_json_str(&content).into_diagnostic()?;

    let mut config = config.clone();
    if !request.api_key.is_empty() {
        config.llm.api_key = Some(request.api_key.clone());
    }
    let diff = FetchedDiff {
        text: request.diff,
        files: request.files,
        local_source: None,
    };
    let report = run_orchestrator(&config, request.threadlines, &diff).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&CheckResponse::from(&report)).into_diagnostic()?
    );
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .into_diagnostic()
        .wrap_err("invalid environment override")?;

    match cli.command {
        Command::Check {
            ref repo,
            ref diff_file,
            ref request,
            fail_on_attention,
            no_save,
            ref model,
            timeout,
        } => {
            apply_flags(&mut config, model.as_deref(), timeout)?;

            if let Some(path) = request {
                let report = run_request(&config, path).await?;
                if fail_on_attention && report.has_attention() {
                    std::process::exit(1);
                }
                return Ok(());
            }

            let signals = load_signals(cli.env_file.as_deref())?;
            let target = resolve_target(&signals);
            tracing::info!(review = %target, "resolved diff target");

            let diff = match diff_file {
                Some(path) => FetchedDiff::from_text(read_diff_input(path)?),
                None => fetch_diff(repo, &target, &config.check.default_branch).into_diagnostic()?,
            };

            let rules_dir = repo.join(&config.check.rules_dir);
            let rules = threadline_core::rules::load_rules(&rules_dir, repo).map_err(|e| {
                miette::miette!(
                    help = "Run `threadline init` to create an example threadline",
                    "failed to load threadlines: {e}"
                )
            })?;
            tracing::info!(rules = rules.len(), files = diff.files.len(), "starting check");

            let report = run_orchestrator(&config, rules, &diff).await?;

            // An empty check would mark every earlier violation as fixed.
            if diff.is_empty() {
                tracing::info!(review = %target, "empty diff; check not saved");
                if cli.format == OutputFormat::Text {
                    println!("No changes to check ({target}).\n");
                }
            }

            let mut fixes = Vec::new();
            if !no_save && !diff.is_empty() {
                let lineage = lineage_for(repo, &target, &signals, &config);
                let stored = StoredCheck::from_report(&report, &diff.text, &lineage, Utc::now());
                let log = CheckLog::new(&repo.join(&config.check.state_dir));
                match log.save(&stored) {
                    Ok(_) => match FixDetector::new(log).detect(&stored) {
                        Ok(found) => fixes = found,
                        Err(e) => tracing::warn!(error = %e, "fix detection failed"),
                    },
                    Err(e) => tracing::warn!(error = %e, "failed to save check"),
                }
            }

            print_check(cli.format, &target, &report, &fixes)?;

            if fail_on_attention && report.has_attention() {
                std::process::exit(1);
            }
        }
        Command::Target { ref repo } => {
            let signals = load_signals(cli.env_file.as_deref())?;
            let target = resolve_target(&signals);
            match cli.format {
                OutputFormat::Json => {
                    let lineage = lineage_for(repo, &target, &signals, &config);
                    let value = serde_json::json!({ "target": target, "lineage": lineage });
                    println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
                }
                OutputFormat::Markdown => println!("**Target:** {target}"),
                OutputFormat::Text => println!("{target}"),
            }
        }
        Command::Fixes { ref repo, diff } => {
            let signals = load_signals(cli.env_file.as_deref())?;
            let target = resolve_target(&signals);
            let lineage = lineage_for(repo, &target, &signals, &config);
            let log = CheckLog::new(&repo.join(&config.check.state_dir));

            let Some(current) = log.latest(&lineage).into_diagnostic()? else {
                println!(
                    "No checks recorded for {} on {} ({}).",
                    lineage.repo, lineage.branch, lineage.environment
                );
                return Ok(());
            };
            let fixes = FixDetector::new(CheckLog::new(&repo.join(&config.check.state_dir)))
                .detect(&current)
                .into_diagnostic()?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&fixes).into_diagnostic()?);
                }
                OutputFormat::Text | OutputFormat::Markdown => {
                    if fixes.is_empty() {
                        println!("No fixes detected in check {}.", current.id);
                    }
                    for fix in &fixes {
                        println!(
                            "Fixed {} ({}) between {} and {}",
                            fix.rule_identity_hash,
                            fix.violation_file_references.join(", "),
                            fix.previous_check_id,
                            fix.current_check_id
                        );
                        if diff {
                            if let Some(previous) = log.load(&fix.previous_check_id).into_diagnostic()? {
                                println!("{}", fix_diff(fix, &previous, &current));
                            }
                        }
                    }
                }
            }
        }
        Command::Init => {
            let path = Path::new(".threadline.toml");
            if path.exists() {
                miette::bail!(".threadline.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            let rules_dir = Path::new(".threadlines");
            let example = rules_dir.join("error-handling.md");
            if !example.exists() {
                std::fs::create_dir_all(rules_dir).into_diagnostic()?;
                std::fs::write(&example, EXAMPLE_RULE).into_diagnostic()?;
            }
            println!("Created .threadline.toml and {}", example.display());
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "threadline", &mut std::io::stdout());
        }
    }

    Ok(())
}
