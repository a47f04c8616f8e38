use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{tool} command not found or not working: {detail}")]
    DependencyUnavailable { tool: String, detail: String },
    #[error("failed to fetch {url}:\n{output}")]
    FetchFailure { url: String, output: String },
    #[error("malformed page location `{location}`: {reason}")]
    MalformedLocation { location: String, reason: String },
    #[error("scenario not found: {scenario}")]
    ScenarioNotFound { scenario: String },
    #[error("page {path} is not valid UTF-8", path = path.display())]
    PageEncoding { path: PathBuf },
    #[error("failed to {action} {path}: {source}", path = path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}", path = path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse runner results {path}: {source}", path = path.display())]
    ResultsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to walk {path}: {source}", path = path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(location: &str, reason: impl Into<String>) -> Self {
        Self::MalformedLocation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    /// Page-level errors affect a single page or event and never abort a run.
    pub fn is_page_scoped(&self) -> bool {
        matches!(
            self,
            Self::MalformedLocation { .. }
                | Self::ScenarioNotFound { .. }
                | Self::PageEncoding { .. }
        )
    }
}
