use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::location::PathResolver;
use crate::page::{PageStore, scan_pages};
use crate::pipeline::{ExtractionPipeline, ExtractionReport, index_features};
use crate::report::{
    CleanReport, PageDiff, ReportSummary, ResultReporter, clean_pages, load_cucumber_results,
};
use crate::tools::{CucumberCli, GitCli, RunOutcome, RunRequest, SpecRunner, WikiFetcher};

const RESULTS_FILENAME: &str = "cucumber.json";

#[derive(Debug, Clone, Serialize)]
pub struct PerformReport {
    pub working_copy: PathBuf,
    pub persistent_working_copy: bool,
    pub fetched: bool,
    pub fetch_error: Option<String>,
    pub extraction: Option<ExtractionReport>,
    pub run: Option<RunOutcome>,
    pub results: Option<ReportSummary>,
}

impl PerformReport {
    fn new(working_copy: &Path, persistent: bool) -> Self {
        Self {
            working_copy: working_copy.to_path_buf(),
            persistent_working_copy: persistent,
            fetched: false,
            fetch_error: None,
            extraction: None,
            run: None,
            results: None,
        }
    }

    /// The runner's exit code, or zero when nothing was run.
    pub fn exit_code(&self) -> i32 {
        self.run.as_ref().map(|run| run.exit_code).unwrap_or(0)
    }

    pub fn load_ok(&self) -> bool {
        self.extraction
            .as_ref()
            .is_some_and(ExtractionReport::load_ok)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsReport {
    pub results_path: PathBuf,
    pub events: usize,
    pub summary: ReportSummary,
    pub diffs: Vec<PageDiff>,
}

/// Fetch the wiki, extract its features and run them, writing outcomes back
/// into a persistent working copy when one is configured.
pub fn perform(settings: &Settings) -> Result<PerformReport> {
    let mut fetcher = GitCli::new();
    let mut runner = CucumberCli::new(&settings.runner);
    perform_with(settings, &mut fetcher, &mut runner)
}

pub fn perform_with<F, R>(
    settings: &Settings,
    fetcher: &mut F,
    runner: &mut R,
) -> Result<PerformReport>
where
    F: WikiFetcher,
    R: SpecRunner,
{
    let url = settings.repository_url()?;
    fetcher.check_available()?;
    runner.check_available()?;

    let working_copy = WorkingCopy::prepare(settings)?;
    let mut report = fetch_and_extract(settings, url, fetcher, &working_copy)?;
    let Some(extraction) = report.extraction.as_ref() else {
        return Ok(report);
    };
    if !extraction.load_ok() {
        info!("no features found in the wiki, nothing to run");
        return Ok(report);
    }

    let annotate = settings.annotate && working_copy.persistent;
    let results_dir = if annotate {
        Some(
            tempfile::Builder::new()
                .prefix("featurewiki-results")
                .tempdir()
                .map_err(|source| Error::io("create", &std::env::temp_dir(), source))?,
        )
    } else {
        None
    };
    let request = RunRequest {
        working_dir: settings.project_root.clone(),
        feature_files: extraction.feature_files(),
        results_path: results_dir
            .as_ref()
            .map(|dir| dir.path().join(RESULTS_FILENAME)),
    };
    let index = extraction.feature_index();
    let outcome = runner.run(&request)?;
    info!(exit_code = outcome.exit_code, "runner finished");

    if annotate {
        match outcome.results_path.as_deref() {
            Some(path) => {
                let events = load_cucumber_results(path)?;
                let mut reporter = ResultReporter::new(&settings.image);
                report.results = Some(reporter.apply_all(&index, &events, now())?);
            }
            None => warn!("runner produced no results file, wiki pages left unannotated"),
        }
    }
    report.run = Some(outcome);
    Ok(report)
}

/// Fetch and extract only; the runner is never invoked.
pub fn extract(settings: &Settings) -> Result<PerformReport> {
    extract_with(settings, &mut GitCli::new())
}

pub fn extract_with<F: WikiFetcher>(settings: &Settings, fetcher: &mut F) -> Result<PerformReport> {
    let url = settings.repository_url()?;
    fetcher.check_available()?;
    let working_copy = WorkingCopy::prepare(settings)?;
    fetch_and_extract(settings, url, fetcher, &working_copy)
}

/// Apply a cucumber JSON results file to the persistent working copy.
pub fn report_results(
    settings: &Settings,
    results_path: &Path,
    dry_run: bool,
) -> Result<ResultsReport> {
    report_results_at(settings, results_path, dry_run, now())
}

pub(crate) fn report_results_at(
    settings: &Settings,
    results_path: &Path,
    dry_run: bool,
    at: NaiveDateTime,
) -> Result<ResultsReport> {
    let root = persistent_working_copy(settings)?;
    let scan = scan_pages(root, &PathResolver::new(&settings.base_directory))?;
    let index = index_features(&scan.pages, &mut PageStore::new())?;
    let events = load_cucumber_results(results_path)?;

    let mut reporter = ResultReporter::new(&settings.image).dry_run(dry_run);
    let summary = reporter.apply_all(&index, &events, at)?;
    let diffs = if dry_run {
        reporter.staged_diffs()?
    } else {
        Vec::new()
    };
    Ok(ResultsReport {
        results_path: results_path.to_path_buf(),
        events: events.len(),
        summary,
        diffs,
    })
}

/// Strip all result annotations from the persistent working copy.
pub fn clean(settings: &Settings, dry_run: bool) -> Result<CleanReport> {
    let root = persistent_working_copy(settings)?;
    let scan = scan_pages(root, &PathResolver::new(&settings.base_directory))?;
    let mut report = clean_pages(&scan.pages, &mut PageStore::new(), dry_run)?;
    let mut skipped_pages = scan.skipped;
    skipped_pages.append(&mut report.skipped_pages);
    report.skipped_pages = skipped_pages;
    Ok(report)
}

fn fetch_and_extract<F: WikiFetcher>(
    settings: &Settings,
    url: &str,
    fetcher: &mut F,
    working_copy: &WorkingCopy,
) -> Result<PerformReport> {
    let mut report = PerformReport::new(&working_copy.root, working_copy.persistent);
    info!("Loading features into: {}", settings.target_directory.display());

    match fetcher.fetch(url, &settings.branch, &working_copy.root) {
        Ok(()) => report.fetched = true,
        Err(error @ Error::FetchFailure { .. }) => {
            warn!(%error, "wiki fetch failed, nothing to extract");
            report.fetch_error = Some(error.to_string());
            return Ok(report);
        }
        Err(error) => return Err(error),
    }

    let scan = scan_pages(&working_copy.root, &PathResolver::new(&settings.base_directory))?;
    let mut extraction = ExtractionPipeline::new(&settings.target_directory)
        .run(&scan.pages, &mut PageStore::new())?;
    let mut skipped_pages = scan.skipped;
    skipped_pages.append(&mut extraction.skipped_pages);
    extraction.skipped_pages = skipped_pages;
    report.extraction = Some(extraction);
    Ok(report)
}

struct WorkingCopy {
    root: PathBuf,
    persistent: bool,
    _temp: Option<TempDir>,
}

impl WorkingCopy {
    fn prepare(settings: &Settings) -> Result<Self> {
        if let Some(path) = &settings.working_copy {
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent).map_err(|source| Error::io("create", parent, source))?;
            }
            return Ok(Self {
                root: path.clone(),
                persistent: true,
                _temp: None,
            });
        }

        let temp = tempfile::Builder::new()
            .prefix("featurewiki-wiki")
            .tempdir()
            .map_err(|source| Error::io("create", &std::env::temp_dir(), source))?;
        Ok(Self {
            // The clone target must not exist yet.
            root: temp.path().join("wiki"),
            persistent: false,
            _temp: Some(temp),
        })
    }
}

fn persistent_working_copy(settings: &Settings) -> Result<&Path> {
    let root = settings.working_copy.as_deref().ok_or_else(|| {
        Error::Configuration(
            "wiki.working_copy (or FEATUREWIKI_WORKING_COPY) must be set to write results"
                .to_string(),
        )
    })?;
    if !root.is_dir() {
        return Err(Error::Configuration(format!(
            "working copy {} does not exist; run `featurewiki extract` first",
            root.display()
        )));
    }
    Ok(root)
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
