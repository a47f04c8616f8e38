use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::location::{PageLocation, PathResolver, is_markup_extension};

/// A page of the wiki working copy and the feature file location it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiPage {
    pub wiki_path: PathBuf,
    pub location: PageLocation,
}

impl WikiPage {
    pub fn from_path(wiki_path: &Path, resolver: &PathResolver) -> Result<Self> {
        let location = resolver.resolve(&wiki_path.to_string_lossy())?;
        Ok(Self {
            wiki_path: wiki_path.to_path_buf(),
            location,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedPage {
    pub wiki_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageScan {
    pub pages: Vec<WikiPage>,
    pub skipped: Vec<SkippedPage>,
}

/// Enumerate the markup pages under a wiki working copy, sorted by file name.
/// Pages whose location cannot be resolved are skipped, not fatal.
pub fn scan_pages(root: &Path, resolver: &PathResolver) -> Result<PageScan> {
    let mut scan = PageScan::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|source| Error::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(is_markup_extension)
        {
            continue;
        }

        match WikiPage::from_path(path, resolver) {
            Ok(page) => {
                debug!(page = %path.display(), spec_path = %page.location.path, "found wiki page");
                scan.pages.push(page);
            }
            Err(error) if error.is_page_scoped() => {
                warn!(page = %path.display(), %error, "skipping wiki page");
                scan.skipped.push(SkippedPage {
                    wiki_path: path.to_path_buf(),
                    reason: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }
    Ok(scan)
}

/// Read-through cache over page files. Writes replace the file atomically and
/// refresh the cache, so a read after a write never sees stale text.
#[derive(Debug, Default)]
pub struct PageStore {
    cache: HashMap<PathBuf, String>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, path: &Path) -> Result<&str> {
        if !self.cache.contains_key(path) {
            let text = fs::read_to_string(path).map_err(|source| {
                if source.kind() == io::ErrorKind::InvalidData {
                    Error::PageEncoding {
                        path: path.to_path_buf(),
                    }
                } else {
                    Error::io("read", path, source)
                }
            })?;
            self.cache.insert(path.to_path_buf(), text);
        }
        Ok(self.cache.get(path).map(String::as_str).unwrap_or_default())
    }

    /// Read `page`, or record it in `skipped` when the failure only concerns
    /// that page (for instance text that is not UTF-8).
    pub fn read_page(
        &mut self,
        page: &WikiPage,
        skipped: &mut Vec<SkippedPage>,
    ) -> Result<Option<&str>> {
        match self.read(&page.wiki_path) {
            Ok(text) => Ok(Some(text)),
            Err(error) if error.is_page_scoped() => {
                warn!(page = %page.wiki_path.display(), %error, "skipping wiki page");
                skipped.push(SkippedPage {
                    wiki_path: page.wiki_path.clone(),
                    reason: error.to_string(),
                });
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub fn write(&mut self, path: &Path, text: &str) -> Result<()> {
        write_atomically(path, text)?;
        self.cache.insert(path.to_path_buf(), text.to_string());
        Ok(())
    }

    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache.contains_key(path)
    }
}

pub(crate) fn write_atomically(path: &Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|source| Error::io("write", path, source))?;
    temp.write_all(text.as_bytes())
        .map_err(|source| Error::io("write", path, source))?;
    let permissions = match fs::metadata(path) {
        Ok(metadata) => temp.as_file().set_permissions(metadata.permissions()),
        Err(_) => set_new_file_permissions(temp.as_file()),
    };
    permissions.map_err(|source| Error::io("write", path, source))?;
    temp.persist(path)
        .map_err(|error| Error::io("write", path, error.error))?;
    Ok(())
}

// Temporary files start out owner-only; new pages and feature files get the
// usual rw-r--r--.
#[cfg(unix)]
fn set_new_file_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{PageStore, WikiPage, scan_pages};
    use crate::error::Error;
    use crate::location::PathResolver;

    #[test]
    fn read_caches_page_contents() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Home.md");
        fs::write(&path, "test").expect("write page");

        let mut store = PageStore::new();
        assert!(!store.is_cached(&path));
        assert_eq!(store.read(&path).expect("read"), "test");
        assert!(store.is_cached(&path));

        fs::write(&path, "changed behind the cache").expect("rewrite page");
        assert_eq!(store.read(&path).expect("cached read"), "test");
    }

    #[test]
    fn write_updates_file_and_cache() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Home.md");
        fs::write(&path, "before").expect("write page");

        let mut store = PageStore::new();
        assert_eq!(store.read(&path).expect("read"), "before");
        store.write(&path, "testing").expect("write");
        assert_eq!(store.read(&path).expect("read"), "testing");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "testing");
    }

    #[test]
    fn write_leaves_no_temporary_files_behind() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Home.md");
        fs::write(&path, "before").expect("write page");
        PageStore::new().write(&path, "after").expect("write");
        let entries = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn missing_page_is_an_io_error() {
        let temp = tempdir().expect("tempdir");
        let error = PageStore::new()
            .read(&temp.path().join("missing.md"))
            .expect_err("must fail");
        assert!(matches!(error, Error::Io { action: "read", .. }));

        let error = PageStore::new()
            .write(&temp.path().join("no-such-dir").join("page.md"), "text")
            .expect_err("must fail");
        assert!(matches!(error, Error::Io { action: "write", .. }));
    }

    #[test]
    fn non_utf8_page_is_a_page_level_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.txt");
        fs::write(&path, [0xff, 0xfe, b'\n']).expect("write page");

        let error = PageStore::new().read(&path).expect_err("must fail");
        assert!(matches!(error, Error::PageEncoding { .. }));
        assert!(error.is_page_scoped());

        let page = WikiPage::from_path(&path, &PathResolver::default()).expect("page");
        let mut store = PageStore::new();
        let mut skipped = Vec::new();
        let text = store
            .read_page(&page, &mut skipped)
            .expect("page-level failure is not fatal");
        assert!(text.is_none());
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].reason.contains("not valid UTF-8"));
    }

    #[cfg(unix)]
    #[test]
    fn new_files_are_world_readable_and_existing_modes_are_kept() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("tempdir");
        let created = temp.path().join("add.feature");
        PageStore::new().write(&created, "Feature: Add\n").expect("write");
        let mode = fs::metadata(&created).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        let existing = temp.path().join("Home.md");
        fs::write(&existing, "before").expect("write page");
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o640)).expect("chmod");
        PageStore::new().write(&existing, "after").expect("write");
        let mode = fs::metadata(&existing).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn scan_lists_markup_pages_in_name_order_and_skips_git() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(".git")).expect("git dir");
        fs::write(root.join(".git").join("HEAD.md"), "ref").expect("git file");
        fs::write(root.join("features > b.feature.md"), "b").expect("page b");
        fs::write(root.join("Home.md"), "home").expect("home");
        fs::write(root.join("features > a.md"), "a").expect("page a");
        fs::write(root.join("logo.png"), [0u8, 1, 2]).expect("image");

        let scan = scan_pages(root, &PathResolver::default()).expect("scan");
        let paths: Vec<_> = scan
            .pages
            .iter()
            .map(|page| page.location.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["./Home.feature", "./features/a.feature", "./features/b.feature"]
        );
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn scan_skips_malformed_locations() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("features > .. > x.md"), "x").expect("page");
        fs::write(temp.path().join("ok.md"), "ok").expect("page");

        let scan = scan_pages(temp.path(), &PathResolver::default()).expect("scan");
        assert_eq!(scan.pages.len(), 1);
        assert_eq!(scan.skipped.len(), 1);
        assert!(scan.skipped[0].reason.contains("malformed page location"));
    }
}
