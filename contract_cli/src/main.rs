use clap::{Args, Parser, Subcommand, ValueEnum};
use contract_compiler::config::runtime::RuntimeConfig;
use contract_compiler::logging::service::{FileLogger, MultiLogger};
use contract_compiler::logging::{self, FacadeLogger, LoggingService};
use contract_compiler::pipeline::{
    self, CompileReport, CompileRequest, PipelineError, TargetSelection, TargetStatus, EXIT_INVALID, EXIT_OK,
    EXIT_SECRETS,
};
use contract_compiler::policy::{PolicyViolation, RuleSet};
use contract_compiler::secrets::StagedSecrets;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "contractc", version, about = "Compile service contracts into deployment artifacts")]
struct Cli {
    /// Runtime preferences file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Also append compiler events to this file
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate, resolve, check policy and render
    Compile(CompileArgs),
    /// Run validation only
    Validate(ValidateArgs),
    /// List the effective rule set
    Rules(RulesArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Args)]
struct CompileArgs {
    /// Contract files or directories
    #[arg(value_name = "CONTRACT", required = true)]
    paths: Vec<PathBuf>,
    /// Dependency registry fragment, repeatable
    #[arg(long, value_name = "FILE")]
    registry: Vec<PathBuf>,
    /// Render target, alias or `all`; repeatable or comma separated
    #[arg(long, value_name = "TARGET", default_value = "all")]
    target: Vec<String>,
    /// Extra rule document appended to the built-ins, repeatable
    #[arg(long, value_name = "FILE")]
    rules: Vec<PathBuf>,
    /// Staging root for secret material
    #[arg(long, value_name = "DIR")]
    staging: Option<PathBuf>,
    /// Write artifacts as <DIR>/<service_id>/<file>
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
    /// Treat warn violations as blocking
    #[arg(long)]
    fail_on_warn: bool,
    /// Keep staged secrets until a line is read on stdin
    #[arg(long)]
    await_apply: bool,
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(value_name = "CONTRACT", required = true)]
    paths: Vec<PathBuf>,
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Args)]
struct RulesArgs {
    /// Extra rule document appended to the built-ins, repeatable
    #[arg(long, value_name = "FILE")]
    rules: Vec<PathBuf>,
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            EXIT_INVALID
        }
    };
    logging::print_cargo_style_summary();
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_toml_file(path)?,
        None => RuntimeConfig::default(),
    };
    init_logging(&config, cli.log_file.as_deref())?;

    match cli.cmd {
        Cmd::Compile(args) => cmd_compile(args, &config),
        Cmd::Validate(args) => cmd_validate(args, &config),
        Cmd::Rules(args) => cmd_rules(args),
    }
}

fn init_logging(config: &RuntimeConfig, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    logging::config::init_runtime_preferences(config.logging.clone())?;
    let level = logging::config::get_min_log_level();
    let mut sink = MultiLogger::new(level);
    sink.add_logger(Arc::new(FacadeLogger));
    if let Some(path) = log_file {
        sink.add_logger(Arc::new(FileLogger::new(path, level, config.logging.use_structured_logging)?));
    }
    logging::init_global_logging_with_service(Arc::new(LoggingService::new(Arc::new(sink), level)))?;
    Ok(())
}

fn cmd_compile(args: CompileArgs, config: &RuntimeConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let mut preferences = config.compiler.clone();
    if let Some(staging) = args.staging {
        preferences.staging_root = staging;
    }
    if let Some(threads) = args.threads {
        preferences.worker_threads = threads;
    }
    preferences.fail_on_warn |= args.fail_on_warn;

    let mut request = CompileRequest::from_preferences(args.paths, &preferences)
        .with_targets(TargetSelection::parse(args.target.as_slice())?);
    request.registry_paths = args.registry;
    request.rule_paths = args.rules;

    let mut report = match pipeline::compile(&request) {
        Ok(report) => report,
        Err(err) => {
            print_failure(&err, args.format);
            return Ok(err.exit_code());
        }
    };

    if let Some(out) = &args.out {
        write_artifacts(&report, out)?;
    }
    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
        Format::Text => print_report(&report, args.out.is_none()),
    }

    let staged: Vec<StagedSecrets> = report
        .outcomes
        .iter_mut()
        .filter_map(|outcome| outcome.take_staged())
        .collect();
    if args.await_apply && !staged.is_empty() {
        eprintln!("{} staged secret set(s) held; press enter once apply has finished", staged.len());
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
    }
    let shred_code = complete_apply(staged);

    let code = report.exit_code();
    Ok(if code == EXIT_OK { shred_code } else { code })
}

fn complete_apply(staged: Vec<StagedSecrets>) -> i32 {
    let mut code = EXIT_OK;
    for set in staged {
        match set.complete_apply() {
            Ok(report) if report.persisted => {
                eprintln!("{}/{}: staged secrets persisted under waiver", report.service_id, report.target)
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: {}", err);
                code = EXIT_SECRETS;
            }
        }
    }
    code
}

fn write_artifacts(report: &CompileReport, out: &Path) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for artifact in report.artifacts() {
        let dir = out.join(&artifact.service_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(&artifact.metadata.file_name);
        fs::write(&path, &artifact.text)?;
        written.push(path);
    }
    Ok(written)
}

fn print_violations<'a>(violations: impl IntoIterator<Item = &'a PolicyViolation>) {
    for violation in violations {
        println!("  {}", violation);
    }
}

fn print_report(report: &CompileReport, include_text: bool) {
    print_violations(&report.contract_violations);
    for outcome in &report.outcomes {
        match &outcome.status {
            TargetStatus::Rendered { artifact, .. } => {
                println!("rendered {}/{} -> {}", outcome.service_id, outcome.target, artifact.metadata.file_name);
                if include_text {
                    println!("{}", artifact.text);
                }
            }
            TargetStatus::Blocked { .. } => println!("blocked  {}/{}", outcome.service_id, outcome.target),
            TargetStatus::Failed { error } => println!("failed   {}/{}: {}", outcome.service_id, outcome.target, error),
        }
        print_violations(outcome.violations());
    }
    println!(
        "{} contract(s), {} target(s), {} blocked, {} failed",
        report.contracts,
        report.outcomes.len(),
        report.blocked_count(),
        report.failed_count()
    );
}

fn print_failure(err: &PipelineError, format: Format) {
    match format {
        Format::Json => {
            let body = serde_json::json!({
                "error": err.to_string(),
                "code": err.error_code().as_str(),
                "exit_code": err.exit_code(),
                "violations": err.violations(),
            });
            println!("{}", body);
        }
        Format::Text => {
            eprintln!("error[{}]: {}", err.error_code().as_str(), err);
            print_violations(err.violations());
        }
    }
}

fn cmd_validate(args: ValidateArgs, config: &RuntimeConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let request = CompileRequest::from_preferences(args.paths, &config.compiler);
    match pipeline::validate_only(&request) {
        Ok(contracts) => {
            match args.format {
                Format::Json => {
                    let ids: Vec<&str> = contracts.iter().map(|c| c.service_id.as_str()).collect();
                    println!("{}", serde_json::json!({"valid": ids}));
                }
                Format::Text => {
                    for contract in &contracts {
                        println!("ok {}", contract.service_id);
                    }
                }
            }
            Ok(EXIT_OK)
        }
        Err(err) => {
            print_failure(&err, args.format);
            Ok(err.exit_code())
        }
    }
}

fn cmd_rules(args: RulesArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let rules = RuleSet::with_documents(&args.rules)?;
    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(rules.rules())?),
        Format::Text => {
            for rule in rules.rules() {
                println!("{:<36} {:<5} {}", rule.id, rule.severity, rule.message);
            }
        }
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contract_compiler::pipeline::EXIT_POLICY_DENY;
    use tempfile::tempdir;

    const CONTRACT: &str = "service_id: web
runtime_templates: [container-compose, host-init-unit]
image: registry/x@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
command: [/usr/bin/web]
ports:
  - target: 8080
    published: 8080
health:
  cmd: [/bin/sh, -c, exit 0]
";

    #[test]
    fn test_cli_parses_compile_flags() {
        let cli = Cli::try_parse_from([
            "contractc", "compile", "web.yml", "--target", "docker,kubernetes", "--rules", "extra.yml",
            "--format", "json", "--fail-on-warn",
        ])
        .unwrap();
        let Cmd::Compile(args) = cli.cmd else {
            panic!("expected compile");
        };
        assert_eq!(args.paths, vec![PathBuf::from("web.yml")]);
        assert_eq!(args.target, vec!["docker,kubernetes"]);
        assert!(args.fail_on_warn);
        assert!(args.format == Format::Json);
        assert!(Cli::try_parse_from(["contractc", "compile"]).is_err());
    }

    #[test]
    fn test_artifacts_land_under_service_directory() {
        let dir = tempdir().unwrap();
        let contract = dir.path().join("web.yml");
        fs::write(&contract, CONTRACT).unwrap();

        let request = CompileRequest::new(vec![contract]).with_staging_root(dir.path().join("staging"));
        let report = pipeline::compile(&request).unwrap();
        let out = dir.path().join("out");
        let written = write_artifacts(&report, &out).unwrap();

        assert_eq!(written, vec![out.join("web/docker-compose.yml"), out.join("web/web.service")]);
        assert!(fs::read_to_string(&written[0]).unwrap().contains("65532:65532"));
    }

    #[test]
    fn test_latest_image_exits_with_policy_code() {
        let dir = tempdir().unwrap();
        let contract = dir.path().join("web.yml");
        fs::write(&contract, CONTRACT.replace("@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef", ":latest")).unwrap();

        let request = CompileRequest::new(vec![contract]).with_staging_root(dir.path().join("staging"));
        let err = pipeline::compile(&request).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_POLICY_DENY);
    }
}
