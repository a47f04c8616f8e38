use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::annotate::remove_annotations;
use crate::error::{Error, Result};
use crate::extract::{SpecificationBlock, extract_blocks};
use crate::location::SPEC_EXTENSION;
use crate::page::{PageStore, SkippedPage, WikiPage, write_atomically};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    Created,
    Updated,
    Unchanged,
}

impl WriteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFeature {
    pub identifier: String,
    pub name: String,
    pub source_page: PathBuf,
    pub spec_path: String,
    pub file: PathBuf,
    pub content_hash: String,
    pub status: WriteStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedBlock {
    pub source_page: PathBuf,
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub target_directory: PathBuf,
    pub pages_scanned: usize,
    pub features: Vec<ExtractedFeature>,
    pub skipped_pages: Vec<SkippedPage>,
    pub skipped_blocks: Vec<SkippedBlock>,
}

impl ExtractionReport {
    /// True once at least one block was materialized; false means nothing to run.
    pub fn load_ok(&self) -> bool {
        !self.features.is_empty()
    }

    /// Distinct files written, sorted.
    pub fn feature_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.features.iter().map(|f| f.file.clone()).collect();
        files.sort();
        files.dedup();
        files
    }

    pub fn feature_index(&self) -> FeatureIndex {
        let mut index = FeatureIndex::default();
        for feature in &self.features {
            index.insert(&feature.identifier, &feature.source_page);
        }
        index
    }
}

/// Maps a feature identifier back to the wiki page it was extracted from.
/// Later insertions win, matching the file overwrite order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureIndex {
    pages: BTreeMap<String, PathBuf>,
}

impl FeatureIndex {
    pub fn insert(&mut self, identifier: &str, page: &Path) {
        self.pages.insert(identifier.to_string(), page.to_path_buf());
    }

    pub fn page_for_identifier(&self, identifier: &str) -> Option<&Path> {
        self.pages.get(identifier).map(PathBuf::as_path)
    }

    /// Resolve a runner-reported feature uri such as `features/add.feature`.
    pub fn page_for_uri(&self, uri: &str) -> Option<&Path> {
        self.page_for_identifier(identifier_for_uri(uri))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionPipeline {
    target_directory: PathBuf,
}

impl ExtractionPipeline {
    pub fn new(target_directory: &Path) -> Self {
        Self {
            target_directory: target_directory.to_path_buf(),
        }
    }

    pub fn feature_file(&self, identifier: &str) -> PathBuf {
        self.target_directory
            .join(format!("{identifier}.{SPEC_EXTENSION}"))
    }

    /// Write every block of every page into the target directory, in page
    /// order and then fence order. A later block with the same identifier
    /// overwrites an earlier one.
    pub fn run(&self, pages: &[WikiPage], store: &mut PageStore) -> Result<ExtractionReport> {
        if !self.target_directory.exists() {
            fs::create_dir_all(&self.target_directory)
                .map_err(|source| Error::io("create", &self.target_directory, source))?;
        }

        let mut report = ExtractionReport {
            target_directory: self.target_directory.clone(),
            ..ExtractionReport::default()
        };
        for page in pages {
            report.pages_scanned += 1;
            let Some(raw) = store.read_page(page, &mut report.skipped_pages)? else {
                continue;
            };
            for block in extract_blocks(raw) {
                if !is_plain_file_name(&block.identifier) {
                    warn!(
                        page = %page.wiki_path.display(),
                        identifier = %block.identifier,
                        "skipping block whose identifier is not a plain file name"
                    );
                    report.skipped_blocks.push(SkippedBlock {
                        source_page: page.wiki_path.clone(),
                        identifier: block.identifier,
                        reason: "identifier is not a plain file name".to_string(),
                    });
                    continue;
                }
                report.features.push(self.materialize(page, block)?);
            }
        }

        info!(
            pages = report.pages_scanned,
            features = report.features.len(),
            target = %self.target_directory.display(),
            "extraction finished"
        );
        Ok(report)
    }

    fn materialize(&self, page: &WikiPage, block: SpecificationBlock) -> Result<ExtractedFeature> {
        let file = self.feature_file(&block.identifier);
        let body = remove_annotations(&block.body);
        let status = match fs::read_to_string(&file) {
            Ok(existing) if existing == body => WriteStatus::Unchanged,
            Ok(_) => WriteStatus::Updated,
            Err(_) => WriteStatus::Created,
        };
        write_atomically(&file, &body)?;

        info!(
            "============================== {} ==============================",
            block.identifier
        );
        debug!("{body}");

        Ok(ExtractedFeature {
            identifier: block.identifier,
            name: block.name,
            source_page: page.wiki_path.clone(),
            spec_path: page.location.path.clone(),
            file,
            content_hash: compute_hash(&body),
            status,
        })
    }
}

/// Feature identifier of a runner uri: its file name without `.feature`.
pub fn identifier_for_uri(uri: &str) -> &str {
    let file_name = uri.rsplit(['/', '\\']).next().unwrap_or(uri);
    file_name
        .strip_suffix(&format!(".{SPEC_EXTENSION}"))
        .unwrap_or(file_name)
}

/// Build the identifier index for `pages` without writing any file.
pub fn index_features(pages: &[WikiPage], store: &mut PageStore) -> Result<FeatureIndex> {
    let mut index = FeatureIndex::default();
    let mut skipped = Vec::new();
    for page in pages {
        let Some(raw) = store.read_page(page, &mut skipped)? else {
            continue;
        };
        for block in extract_blocks(raw) {
            if is_plain_file_name(&block.identifier) {
                index.insert(&block.identifier, &page.wiki_path);
            }
        }
    }
    Ok(index)
}

fn is_plain_file_name(identifier: &str) -> bool {
    !identifier.is_empty()
        && !matches!(identifier, "." | "..")
        && !identifier.contains(['/', '\\'])
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{ExtractionPipeline, WriteStatus, identifier_for_uri, index_features};
    use crate::location::PathResolver;
    use crate::page::{PageStore, WikiPage, scan_pages};

    fn write_page(root: &Path, name: &str, text: &str) {
        fs::write(root.join(name), text).expect("write page");
    }

    fn pages(root: &Path) -> Vec<WikiPage> {
        scan_pages(root, &PathResolver::default())
            .expect("scan")
            .pages
    }

    #[test]
    fn single_block_page_produces_one_feature_file() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(
            &wiki,
            "Calculator.md",
            "Prose\n\n```\nFeature: Add\n  Scenario: Add two numbers\n    Given 1 and 2\n```\n",
        );

        let report = ExtractionPipeline::new(&target)
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("run");
        assert!(report.load_ok());
        assert_eq!(report.features.len(), 1);
        let feature = &report.features[0];
        assert_eq!(feature.identifier, "add");
        assert_eq!(feature.file, target.join("add.feature"));
        assert_eq!(feature.status, WriteStatus::Created);
        assert_eq!(feature.content_hash.len(), 16);
        assert_eq!(
            fs::read_to_string(target.join("add.feature")).expect("read feature"),
            "Feature: Add\n  Scenario: Add two numbers\n    Given 1 and 2\n"
        );
    }

    #[test]
    fn pages_without_blocks_report_nothing_to_run() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(&wiki, "Home.md", "Just prose.\n```\ncode\n```\n");

        let report = ExtractionPipeline::new(&temp.path().join("features"))
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("run");
        assert!(!report.load_ok());
        assert_eq!(report.pages_scanned, 1);
        assert!(report.feature_files().is_empty());
    }

    #[test]
    fn rerun_reports_unchanged_and_updated_files() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(&wiki, "A.md", "```\nFeature: Add\n  Scenario: One\n```\n");

        let pipeline = ExtractionPipeline::new(&target);
        pipeline
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("first run");
        let second = pipeline
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("second run");
        assert_eq!(second.features[0].status, WriteStatus::Unchanged);

        write_page(&wiki, "A.md", "```\nFeature: Add\n  Scenario: Two\n```\n");
        let third = pipeline
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("third run");
        assert_eq!(third.features[0].status, WriteStatus::Updated);
    }

    #[test]
    fn colliding_identifiers_last_write_wins() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(&wiki, "A.md", "```\nFeature: Add\n  Scenario: From A\n```\n");
        write_page(&wiki, "B.md", "```\nFeature: add\n  Scenario: From B\n```\n");

        let report = ExtractionPipeline::new(&target)
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("run");
        assert_eq!(report.features.len(), 2);
        assert_eq!(report.feature_files(), vec![target.join("add.feature")]);
        assert_eq!(
            fs::read_to_string(target.join("add.feature")).expect("read"),
            "Feature: add\n  Scenario: From B\n"
        );
        assert_eq!(
            report.feature_index().page_for_identifier("add"),
            Some(wiki.join("B.md").as_path())
        );
    }

    #[test]
    fn annotations_never_reach_feature_files() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(
            &wiki,
            "A.md",
            "```\nFeature: Add\n  Scenario: One\n  **09/06/2013 10:10** ![](//host/passing.png)\n    Given x\n```\n",
        );

        ExtractionPipeline::new(&target)
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("run");
        assert_eq!(
            fs::read_to_string(target.join("add.feature")).expect("read"),
            "Feature: Add\n  Scenario: One\n    Given x\n"
        );
    }

    #[test]
    fn identifiers_with_path_separators_are_skipped() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(&wiki, "A.md", "```\nFeature: Input/Output\n```\n");

        let report = ExtractionPipeline::new(&target)
            .run(&pages(&wiki), &mut PageStore::new())
            .expect("run");
        assert!(!report.load_ok());
        assert_eq!(report.skipped_blocks.len(), 1);
        assert_eq!(report.skipped_blocks[0].identifier, "input/output");
    }

    #[test]
    fn undecodable_page_is_skipped_and_other_pages_still_extract() {
        let temp = tempdir().expect("tempdir");
        let wiki = temp.path().join("wiki");
        let target = temp.path().join("features");
        fs::create_dir_all(&wiki).expect("wiki dir");
        write_page(&wiki, "Add.md", "```\nFeature: Add\n  Scenario: One\n```\n");
        fs::write(wiki.join("notes.txt"), [0xff, 0xfe, b'\n']).expect("write notes");

        let pages = pages(&wiki);
        let report = ExtractionPipeline::new(&target)
            .run(&pages, &mut PageStore::new())
            .expect("run");
        assert!(report.load_ok());
        assert_eq!(report.pages_scanned, 2);
        assert_eq!(report.feature_files(), vec![target.join("add.feature")]);
        assert_eq!(report.skipped_pages.len(), 1);
        assert_eq!(report.skipped_pages[0].wiki_path, wiki.join("notes.txt"));

        let index = index_features(&pages, &mut PageStore::new()).expect("index");
        assert_eq!(index.len(), 1);
        assert_eq!(index.page_for_identifier("add"), Some(wiki.join("Add.md").as_path()));
    }

    #[test]
    fn identifier_is_the_uri_file_stem() {
        assert_eq!(identifier_for_uri("features/divide-numbers.feature"), "divide-numbers");
        assert_eq!(identifier_for_uri("features\\add.feature"), "add");
        assert_eq!(identifier_for_uri("add"), "add");
    }

    #[test]
    fn index_maps_runner_uris_to_pages() {
        let temp = tempdir().expect("tempdir");
        write_page(temp.path(), "Math.md", "```\nFeature: Divide Numbers\n```\n");

        let index = index_features(&pages(temp.path()), &mut PageStore::new()).expect("index");
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.page_for_uri("features/divide-numbers.feature"),
            Some(temp.path().join("Math.md").as_path())
        );
        assert_eq!(index.page_for_uri("features/unknown.feature"), None);
    }
}
