use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use featurewiki_core::config::{Overrides, ResolutionContext, Settings, resolve_settings};
use featurewiki_core::perform::{self, PerformReport, ResultsReport};
use featurewiki_core::report::{CleanReport, PageDiff};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "featurewiki",
    version,
    about = "Run cucumber features written in a git-backed wiki and report results back to it"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log at debug level unless RUST_LOG is set")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved settings diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch the wiki, extract its features and run them")]
    Perform(PerformArgs),
    #[command(about = "Fetch the wiki and extract its features without running them")]
    Extract(ExtractArgs),
    #[command(about = "Write a cucumber JSON results file into the wiki working copy")]
    Report(ReportArgs),
    #[command(about = "Remove every result annotation from the wiki working copy")]
    Clean(CleanArgs),
}

#[derive(Debug, Args)]
struct PerformArgs {
    #[arg(long, value_name = "NAME", help = "Wiki branch to fetch")]
    branch: Option<String>,
    #[arg(long, value_name = "PATH", help = "Directory receiving feature files")]
    target_dir: Option<PathBuf>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long, value_name = "NAME", help = "Wiki branch to fetch")]
    branch: Option<String>,
    #[arg(long, value_name = "PATH", help = "Directory receiving feature files")]
    target_dir: Option<PathBuf>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[arg(long, value_name = "FILE", help = "Cucumber JSON formatter output")]
    results: PathBuf,
    #[arg(long, help = "Print diffs instead of writing pages")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[arg(long, help = "Print diffs instead of writing pages")]
    dry_run: bool,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }

    fn overrides(&self, branch: Option<String>, target_directory: Option<PathBuf>) -> Overrides {
        Overrides {
            project_root: self.project_root.clone(),
            config: self.config.clone(),
            branch,
            target_directory,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Perform(args) => run_perform(&runtime, args),
        Commands::Extract(args) => run_extract(&runtime, args),
        Commands::Report(args) => run_report(&runtime, args),
        Commands::Clean(args) => run_clean(&runtime, args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_perform(runtime: &RuntimeOptions, args: PerformArgs) -> Result<()> {
    let settings = resolve_runtime_settings(&runtime.overrides(args.branch, args.target_dir))?;
    let report = perform::perform(&settings).context("perform failed")?;

    if args.json {
        print_json(&report)?;
    } else {
        println!("featurewiki perform");
        print_perform_report(&settings, &report);
        print_diagnostics(runtime, &settings);
    }

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run_extract(runtime: &RuntimeOptions, args: ExtractArgs) -> Result<()> {
    let settings = resolve_runtime_settings(&runtime.overrides(args.branch, args.target_dir))?;
    let report = perform::extract(&settings).context("extract failed")?;

    if args.json {
        return print_json(&report);
    }
    println!("featurewiki extract");
    print_perform_report(&settings, &report);
    print_diagnostics(runtime, &settings);
    Ok(())
}

fn run_report(runtime: &RuntimeOptions, args: ReportArgs) -> Result<()> {
    let settings = resolve_runtime_settings(&runtime.overrides(None, None))?;
    let report = perform::report_results(&settings, &args.results, args.dry_run)
        .with_context(|| format!("failed to report {}", normalize_path(&args.results)))?;

    if args.json {
        return print_json(&report);
    }
    println!("featurewiki report");
    print_results_report(&report, args.dry_run);
    print_diagnostics(runtime, &settings);
    Ok(())
}

fn run_clean(runtime: &RuntimeOptions, args: CleanArgs) -> Result<()> {
    let settings = resolve_runtime_settings(&runtime.overrides(None, None))?;
    let report = perform::clean(&settings, args.dry_run).context("clean failed")?;

    println!("featurewiki clean");
    print_clean_report(&report, args.dry_run);
    print_diagnostics(runtime, &settings);
    Ok(())
}

fn print_perform_report(settings: &Settings, report: &PerformReport) {
    println!("working_copy: {}", normalize_path(&report.working_copy));
    println!("persistent: {}", format_flag(report.persistent_working_copy));
    println!("branch: {}", settings.branch);
    println!("fetched: {}", format_flag(report.fetched));
    if let Some(error) = &report.fetch_error {
        println!("fetch_error: {error}");
    }
    let Some(extraction) = &report.extraction else {
        return;
    };

    println!("target_directory: {}", normalize_path(&extraction.target_directory));
    println!("pages_scanned: {}", extraction.pages_scanned);
    println!("features: {}", extraction.features.len());
    for feature in &extraction.features {
        println!(
            "  - {} [{}] {} <- {}",
            feature.identifier,
            feature.status.as_str(),
            feature.content_hash,
            normalize_path(&feature.source_page)
        );
    }
    if !extraction.skipped_pages.is_empty() {
        println!("skipped_pages:");
        for page in &extraction.skipped_pages {
            println!("  - {}: {}", normalize_path(&page.wiki_path), page.reason);
        }
    }
    if !extraction.skipped_blocks.is_empty() {
        println!("skipped_blocks:");
        for block in &extraction.skipped_blocks {
            println!(
                "  - {} in {}: {}",
                block.identifier,
                normalize_path(&block.source_page),
                block.reason
            );
        }
    }
    if !extraction.load_ok() {
        println!("status: nothing to run");
        return;
    }

    if let Some(run) = &report.run {
        println!("runner_exit_code: {}", run.exit_code);
    }
    if let Some(results) = &report.results {
        println!("annotated: {}", results.annotated.len());
        println!("scenarios_not_found: {}", results.scenarios_not_found.len());
        println!("unknown_features: {}", results.unknown_features.len());
    }
}

fn print_results_report(report: &ResultsReport, dry_run: bool) {
    println!("results: {}", normalize_path(&report.results_path));
    println!("events: {}", report.events);
    println!("dry_run: {}", format_flag(dry_run));
    println!("annotated: {}", report.summary.annotated.len());
    for scenario in &report.summary.annotated {
        println!(
            "  - {} [{}] {}",
            scenario.scenario,
            scenario.outcome.as_str(),
            normalize_path(&scenario.page)
        );
    }
    if !report.summary.scenarios_not_found.is_empty() {
        println!("scenarios_not_found:");
        for missing in &report.summary.scenarios_not_found {
            println!("  - {} in {}", missing.scenario, normalize_path(&missing.page));
        }
    }
    if !report.summary.unknown_features.is_empty() {
        println!("unknown_features:");
        for uri in &report.summary.unknown_features {
            println!("  - {uri}");
        }
    }
    print_diffs(&report.diffs);
}

fn print_clean_report(report: &CleanReport, dry_run: bool) {
    println!("dry_run: {}", format_flag(dry_run));
    println!("pages_scanned: {}", report.pages_scanned);
    println!("pages_changed: {}", report.pages_changed);
    println!("annotations_removed: {}", report.annotations_removed);
    if !report.skipped_pages.is_empty() {
        println!("skipped_pages:");
        for page in &report.skipped_pages {
            println!("  - {}: {}", normalize_path(&page.wiki_path), page.reason);
        }
    }
    print_diffs(&report.diffs);
}

fn print_diffs(diffs: &[PageDiff]) {
    for diff in diffs {
        println!();
        print!("{}", diff.diff);
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, settings: &Settings) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", settings.diagnostics());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{text}");
    Ok(())
}

fn resolve_runtime_settings(overrides: &Overrides) -> Result<Settings> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let initial = resolve_settings(&context, overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    Ok(resolve_settings(&context, overrides)?)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
