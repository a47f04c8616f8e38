use serde::Serialize;

use crate::error::{Error, Result};

pub const SEGMENT_SEPARATOR: char = '>';
pub const SPEC_EXTENSION: &str = "feature";

/// Markup extensions a wiki page file may carry.
pub const MARKUP_EXTENSIONS: &[&str] = &[
    "md", "mkd", "mkdn", "mdown", "markdown", "textile", "rdoc", "org", "creole", "rest", "rst",
    "asciidoc", "adoc", "pod", "wiki", "mediawiki", "txt",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLocation {
    pub directories: Vec<String>,
    pub title: String,
    pub relative_path: String,
    pub filename: String,
    pub path: String,
}

/// Maps a page's logical location (`dir > dir > Title.md`) to the feature
/// file that mirrors it, rooted at a base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_directory: String,
}

impl PathResolver {
    pub fn new(base_directory: &str) -> Self {
        let trimmed = base_directory.trim().trim_end_matches(['/', '\\']);
        Self {
            base_directory: if trimmed.is_empty() {
                ".".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn resolve(&self, location: &str) -> Result<PageLocation> {
        // Anything before the last path separator is where the page lives, not
        // part of its logical location.
        let logical = location
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(location);

        let mut segments: Vec<&str> = logical.split(SEGMENT_SEPARATOR).map(str::trim).collect();
        let title = segments.pop().unwrap_or_default();
        if title.is_empty() {
            return Err(Error::malformed(location, "no title segment"));
        }
        if matches!(title, "." | "..") {
            return Err(Error::malformed(location, "title cannot be `.` or `..`"));
        }

        let mut directories = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.is_empty() {
                continue;
            }
            if matches!(segment, "." | "..") {
                return Err(Error::malformed(
                    location,
                    format!("directory segment `{segment}` is not allowed"),
                ));
            }
            directories.push(segment.to_string());
        }

        let relative_path = if directories.is_empty() {
            self.base_directory.clone()
        } else {
            format!("{}/{}", self.base_directory, directories.join("/"))
        };
        let filename = spec_filename(title);
        let path = format!("{relative_path}/{filename}");

        Ok(PageLocation {
            directories,
            title: title.to_string(),
            relative_path,
            filename,
            path,
        })
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Strip one outer markup extension and make sure the feature extension is present once.
pub fn spec_filename(title: &str) -> String {
    let stem = strip_markup_extension(title);
    let suffix = format!(".{SPEC_EXTENSION}");
    if stem.len() > suffix.len() && stem.ends_with(&suffix) {
        stem.to_string()
    } else {
        format!("{stem}{suffix}")
    }
}

pub fn strip_markup_extension(name: &str) -> &str {
    if let Some((stem, extension)) = name.rsplit_once('.')
        && !stem.is_empty()
        && is_markup_extension(extension)
    {
        return stem;
    }
    name
}

pub fn is_markup_extension(extension: &str) -> bool {
    MARKUP_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(extension))
}
