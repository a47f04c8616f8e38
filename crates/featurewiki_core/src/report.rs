use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use tracing::{info, warn};

use crate::annotate::{Annotator, Outcome, count_annotations, remove_annotations};
use crate::config::ImageSettings;
use crate::error::{Error, Result};
use crate::page::{PageStore, SkippedPage, WikiPage};
use crate::pipeline::{FeatureIndex, identifier_for_uri};

/// One `(feature, scenario, outcome)` event reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioResult {
    pub feature_uri: String,
    pub scenario: String,
    pub outcome: Outcome,
}

#[derive(Debug, Deserialize)]
struct FeatureJson {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    elements: Vec<ElementJson>,
}

#[derive(Debug, Deserialize)]
struct ElementJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    keyword: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    before: Vec<StepJson>,
    #[serde(default)]
    steps: Vec<StepJson>,
    #[serde(default)]
    after: Vec<StepJson>,
}

#[derive(Debug, Deserialize)]
struct StepJson {
    result: Option<StepResultJson>,
}

#[derive(Debug, Deserialize)]
struct StepResultJson {
    status: String,
}

impl ElementJson {
    fn is_background(&self) -> bool {
        self.kind.eq_ignore_ascii_case("background")
            || self.keyword.trim().eq_ignore_ascii_case("background")
    }

    fn outcome(&self) -> Outcome {
        self.before
            .iter()
            .chain(&self.steps)
            .chain(&self.after)
            .filter_map(|step| step.result.as_ref())
            .filter_map(|result| Outcome::parse(&result.status))
            .max()
            .unwrap_or(Outcome::Passed)
    }
}

/// Parse cucumber's JSON formatter output. Rows of the same scenario collapse
/// to their most severe outcome, keeping first-seen order.
pub fn parse_cucumber_json(text: &str) -> serde_json::Result<Vec<ScenarioResult>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let features: Vec<FeatureJson> = serde_json::from_str(text)?;

    let mut results: Vec<ScenarioResult> = Vec::new();
    for feature in &features {
        for element in feature.elements.iter().filter(|e| !e.is_background()) {
            let outcome = element.outcome();
            let scenario = element.name.trim();
            match results
                .iter_mut()
                .find(|r| r.feature_uri == feature.uri && r.scenario == scenario)
            {
                Some(existing) => existing.outcome = existing.outcome.max(outcome),
                None => results.push(ScenarioResult {
                    feature_uri: feature.uri.clone(),
                    scenario: scenario.to_string(),
                    outcome,
                }),
            }
        }
    }
    Ok(results)
}

pub fn load_cucumber_results(path: &Path) -> Result<Vec<ScenarioResult>> {
    let text = fs::read_to_string(path).map_err(|source| Error::io("read", path, source))?;
    parse_cucumber_json(&text).map_err(|source| Error::ResultsParse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedScenario {
    pub page: PathBuf,
    pub scenario: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingScenario {
    pub page: PathBuf,
    pub scenario: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub annotated: Vec<AnnotatedScenario>,
    pub scenarios_not_found: Vec<MissingScenario>,
    pub unknown_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageDiff {
    pub page: PathBuf,
    pub diff: String,
}

/// Applies runner outcomes to wiki pages, one read-modify-write per event.
/// In dry-run mode updated text is staged in memory instead of written.
#[derive(Debug)]
pub struct ResultReporter {
    annotator: Annotator,
    store: PageStore,
    dry_run: bool,
    staged: BTreeMap<PathBuf, String>,
}

impl ResultReporter {
    pub fn new(image: &ImageSettings) -> Self {
        Self {
            annotator: Annotator::new(image),
            store: PageStore::new(),
            dry_run: false,
            staged: BTreeMap::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Annotate `scenario` on `page`. A missing scenario leaves the page untouched.
    pub fn apply(
        &mut self,
        page: &Path,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<()> {
        self.apply_in(page, None, scenario, outcome, at)
    }

    /// Annotate `scenario` within the block of `feature` on `page`, so equally
    /// named scenarios of other features on the same page are left alone.
    pub fn apply_to_feature(
        &mut self,
        page: &Path,
        feature: &str,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<()> {
        self.apply_in(page, Some(feature), scenario, outcome, at)
    }

    fn apply_in(
        &mut self,
        page: &Path,
        feature: Option<&str>,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<()> {
        let current = match self.staged.get(page) {
            Some(text) => text.clone(),
            None => self.store.read(page)?.to_string(),
        };
        let updated = match feature {
            Some(feature) => self
                .annotator
                .append_feature_result(&current, feature, scenario, outcome, at)?,
            None => self
                .annotator
                .append_result(&current, scenario, outcome, at)?,
        };
        if self.dry_run {
            self.staged.insert(page.to_path_buf(), updated);
        } else {
            self.store.write(page, &updated)?;
            info!(
                page = %page.display(),
                feature,
                scenario,
                outcome = outcome.as_str(),
                "annotated scenario"
            );
        }
        Ok(())
    }

    pub fn apply_all(
        &mut self,
        index: &FeatureIndex,
        results: &[ScenarioResult],
        at: NaiveDateTime,
    ) -> Result<ReportSummary> {
        let mut summary = ReportSummary::default();
        for result in results {
            let Some(page) = index.page_for_uri(&result.feature_uri) else {
                if !summary.unknown_features.contains(&result.feature_uri) {
                    warn!(feature = %result.feature_uri, "no wiki page found for feature");
                    summary.unknown_features.push(result.feature_uri.clone());
                }
                continue;
            };
            let page = page.to_path_buf();
            let feature = identifier_for_uri(&result.feature_uri);
            match self.apply_to_feature(&page, feature, &result.scenario, result.outcome, at) {
                Ok(()) => summary.annotated.push(AnnotatedScenario {
                    page,
                    scenario: result.scenario.clone(),
                    outcome: result.outcome,
                }),
                Err(error) if error.is_page_scoped() => {
                    warn!(page = %page.display(), %error, "leaving page unmodified");
                    summary.scenarios_not_found.push(MissingScenario {
                        page,
                        scenario: result.scenario.clone(),
                    });
                }
                Err(error) => return Err(error),
            }
        }
        Ok(summary)
    }

    /// Unified diffs of staged pages against their on-disk text.
    pub fn staged_diffs(&mut self) -> Result<Vec<PageDiff>> {
        let mut diffs = Vec::new();
        for (page, updated) in &self.staged {
            let original = self.store.read(page)?;
            diffs.push(PageDiff {
                page: page.clone(),
                diff: unified_diff(page, original, updated),
            });
        }
        Ok(diffs)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub pages_scanned: usize,
    pub pages_changed: usize,
    pub annotations_removed: usize,
    pub skipped_pages: Vec<SkippedPage>,
    pub diffs: Vec<PageDiff>,
}

/// Strip every result annotation from `pages`.
pub fn clean_pages(
    pages: &[WikiPage],
    store: &mut PageStore,
    dry_run: bool,
) -> Result<CleanReport> {
    let mut report = CleanReport::default();
    for page in pages {
        report.pages_scanned += 1;
        let Some(original) = store.read_page(page, &mut report.skipped_pages)? else {
            continue;
        };
        let original = original.to_string();
        let removed = count_annotations(&original);
        if removed == 0 {
            continue;
        }
        let cleaned = remove_annotations(&original);
        report.pages_changed += 1;
        report.annotations_removed += removed;
        if dry_run {
            report.diffs.push(PageDiff {
                page: page.wiki_path.clone(),
                diff: unified_diff(&page.wiki_path, &original, &cleaned),
            });
        } else {
            store.write(&page.wiki_path, &cleaned)?;
            info!(page = %page.wiki_path.display(), removed, "removed result annotations");
        }
    }
    Ok(report)
}

pub fn unified_diff(page: &Path, before: &str, after: &str) -> String {
    let label = page.to_string_lossy().replace('\\', "/");
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(2)
        .header(&label, &label)
        .to_string()
}
