use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CONFIG_FILENAME: &str = "featurewiki.toml";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_TARGET_DIR: &str = "features";
pub const DEFAULT_BASE_DIR: &str = ".";
pub const DEFAULT_IMAGE_HOST: &str = "s3.amazonaws.com/gitnesse/github";
pub const DEFAULT_RUNNER_COMMAND: &str = "cucumber";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub features: FeaturesSection,
    #[serde(default)]
    pub results: ResultsSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub working_copy: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FeaturesSection {
    pub target_directory: Option<PathBuf>,
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ResultsSection {
    pub image_scheme: Option<String>,
    pub image_host: Option<String>,
    pub annotate: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunnerSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Load and parse the TOML config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content =
        fs::read_to_string(config_path).map_err(|source| Error::io("read", config_path, source))?;
    toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: config_path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageScheme {
    Http,
    Https,
}

impl ImageScheme {
    /// Parse a configured scheme; blank means scheme-relative links.
    pub fn parse(value: &str) -> Result<Option<Self>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.eq_ignore_ascii_case("http") {
            return Ok(Some(Self::Http));
        }
        if trimmed.eq_ignore_ascii_case("https") {
            return Ok(Some(Self::Https));
        }
        Err(Error::Configuration(format!(
            "unsupported image_scheme: {trimmed} (expected http|https)"
        )))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSettings {
    pub scheme: Option<ImageScheme>,
    pub host: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            scheme: None,
            host: DEFAULT_IMAGE_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerSettings {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_RUNNER_COMMAND.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Flag,
    Env,
    File,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::File => "file",
            Self::Default => "default",
        }
    }
}

/// Immutable settings, resolved once at startup and passed to every component.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub repository_url: Option<String>,
    pub branch: String,
    pub working_copy: Option<PathBuf>,
    pub target_directory: PathBuf,
    pub target_source: ValueSource,
    pub base_directory: String,
    pub image: ImageSettings,
    pub annotate: bool,
    pub runner: RunnerSettings,
}

impl Settings {
    /// Settings rooted at `project_root` with every option at its default.
    pub fn with_defaults(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_path: project_root.join(CONFIG_FILENAME),
            repository_url: None,
            branch: DEFAULT_BRANCH.to_string(),
            working_copy: None,
            target_directory: project_root.join(DEFAULT_TARGET_DIR),
            target_source: ValueSource::Default,
            base_directory: DEFAULT_BASE_DIR.to_string(),
            image: ImageSettings::default(),
            annotate: true,
            runner: RunnerSettings::default(),
        }
    }

    pub fn repository_url(&self) -> Result<&str> {
        self.repository_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(
                    "Setup git URL for featurewiki (wiki.repository_url or FEATUREWIKI_REPOSITORY_URL)"
                        .to_string(),
                )
            })
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={}\nconfig_path={}\nrepository_url={}\nbranch={}\nworking_copy={}\ntarget_directory={} ({})\nbase_directory={}\nimage_scheme={}\nimage_host={}\nannotate={}\nrunner={}",
            display_path(&self.project_root),
            display_path(&self.config_path),
            self.repository_url.as_deref().unwrap_or("<unset>"),
            self.branch,
            self.working_copy
                .as_deref()
                .map(display_path)
                .unwrap_or_else(|| "<temporary>".to_string()),
            display_path(&self.target_directory),
            self.target_source.as_str(),
            self.base_directory,
            self.image.scheme.map(ImageScheme::as_str).unwrap_or("<unset>"),
            self.image.host,
            self.annotate,
            self.runner.command,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub branch: Option<String>,
    pub target_directory: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|source| Error::io("read current directory", Path::new("."), source))?;
        Ok(Self { cwd })
    }
}

pub fn resolve_settings(context: &ResolutionContext, overrides: &Overrides) -> Result<Settings> {
    resolve_settings_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub(crate) fn resolve_settings_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &Overrides,
    lookup_env: F,
) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let project_root = overrides
        .project_root
        .as_deref()
        .map(|path| absolutize(path, &context.cwd))
        .unwrap_or_else(|| context.cwd.clone());

    let config_path = if let Some(path) = overrides.config.as_deref() {
        absolutize(path, &project_root)
    } else if let Some(value) = env_value("FEATUREWIKI_CONFIG") {
        absolutize(Path::new(&value), &project_root)
    } else {
        project_root.join(CONFIG_FILENAME)
    };
    let file = load_config(&config_path)?;

    let mut settings = Settings::with_defaults(&project_root);
    settings.config_path = config_path;

    settings.repository_url = env_value("FEATUREWIKI_REPOSITORY_URL").or(file.wiki.repository_url);
    if let Some(branch) = overrides
        .branch
        .clone()
        .or_else(|| env_value("FEATUREWIKI_BRANCH"))
        .or(file.wiki.branch)
    {
        settings.branch = branch;
    }
    settings.working_copy = env_value("FEATUREWIKI_WORKING_COPY")
        .map(PathBuf::from)
        .or(file.wiki.working_copy)
        .map(|path| absolutize(&path, &project_root));

    let (target_directory, target_source) = if let Some(path) = &overrides.target_directory {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = env_value("FEATUREWIKI_TARGET_DIR") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else if let Some(path) = &file.features.target_directory {
        (absolutize(path, &project_root), ValueSource::File)
    } else {
        (project_root.join(DEFAULT_TARGET_DIR), ValueSource::Default)
    };
    settings.target_directory = target_directory;
    settings.target_source = target_source;

    if let Some(base) = file.features.base_directory {
        settings.base_directory = base;
    }

    let scheme = env_value("FEATUREWIKI_IMAGE_SCHEME").or(file.results.image_scheme);
    if let Some(scheme) = scheme {
        settings.image.scheme = ImageScheme::parse(&scheme)?;
    }
    if let Some(host) = file.results.image_host {
        settings.image.host = host.trim().trim_matches('/').to_string();
    }
    if let Some(annotate) = file.results.annotate {
        settings.annotate = annotate;
    }

    if let Some(command) = file.runner.command {
        settings.runner.command = command;
    }
    settings.runner.args = file.runner.args;

    Ok(settings)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub(crate) fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ImageScheme, Overrides, ResolutionContext, ValueSource, load_config,
        resolve_settings_with_lookup,
    };
    use crate::error::Error;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/featurewiki.toml")).expect("load config");
        assert!(config.wiki.repository_url.is_none());
        assert!(config.runner.args.is_empty());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("featurewiki.toml");
        fs::write(&config_path, "[wiki\nrepository_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(matches!(error, Error::ConfigParse { .. }));
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn defaults_apply_without_config_file() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let settings = resolve_settings_with_lookup(&context, &Overrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(settings.branch, "master");
        assert_eq!(settings.target_directory, temp.path().join("features"));
        assert_eq!(settings.target_source, ValueSource::Default);
        assert_eq!(settings.image.scheme, None);
        assert!(settings.annotate);
        assert_eq!(settings.runner.command, "cucumber");
        assert!(settings.repository_url.is_none());
        assert!(matches!(
            settings.repository_url(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn file_values_are_read_and_env_takes_precedence() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("featurewiki.toml"),
            r#"
[wiki]
repository_url = "git@example.org:team/project.wiki"
branch = "main"
working_copy = ".featurewiki/wiki"

[features]
target_directory = "spec/features"

[results]
image_scheme = "http"
image_host = "/img.example.org/icons/"
annotate = false

[runner]
command = "bundle"
args = ["exec", "cucumber"]
"#,
        )
        .expect("write config");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let env = HashMap::from([
            ("FEATUREWIKI_IMAGE_SCHEME".to_string(), "https".to_string()),
            ("FEATUREWIKI_BRANCH".to_string(), "  ".to_string()),
        ]);

        let settings = resolve_settings_with_lookup(&context, &Overrides::default(), |key| {
            env.get(key).cloned()
        })
        .expect("resolve");
        assert_eq!(
            settings.repository_url().expect("url"),
            "git@example.org:team/project.wiki"
        );
        assert_eq!(settings.branch, "main");
        assert_eq!(
            settings.working_copy.as_deref(),
            Some(temp.path().join(".featurewiki/wiki").as_path())
        );
        assert_eq!(settings.target_directory, temp.path().join("spec/features"));
        assert_eq!(settings.target_source, ValueSource::File);
        assert_eq!(settings.image.scheme, Some(ImageScheme::Https));
        assert_eq!(settings.image.host, "img.example.org/icons");
        assert!(!settings.annotate);
        assert_eq!(settings.runner.command, "bundle");
        assert_eq!(settings.runner.args, vec!["exec", "cucumber"]);
    }

    #[test]
    fn flags_override_env_and_file() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let overrides = Overrides {
            branch: Some("release".to_string()),
            target_directory: Some("out".into()),
            ..Overrides::default()
        };
        let env = HashMap::from([
            ("FEATUREWIKI_BRANCH".to_string(), "develop".to_string()),
            ("FEATUREWIKI_TARGET_DIR".to_string(), "env-features".to_string()),
        ]);
        let settings =
            resolve_settings_with_lookup(&context, &overrides, |key| env.get(key).cloned())
                .expect("resolve");
        assert_eq!(settings.branch, "release");
        assert_eq!(settings.target_directory, temp.path().join("out"));
        assert_eq!(settings.target_source, ValueSource::Flag);
    }

    #[test]
    fn unknown_image_scheme_is_a_configuration_error() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let error = resolve_settings_with_lookup(&context, &Overrides::default(), |key| {
            (key == "FEATUREWIKI_IMAGE_SCHEME").then(|| "ftp".to_string())
        })
        .expect_err("must fail");
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[test]
    fn image_scheme_parse_accepts_blank_and_known_values() {
        assert_eq!(ImageScheme::parse("").expect("blank"), None);
        assert_eq!(
            ImageScheme::parse("HTTP").expect("http"),
            Some(ImageScheme::Http)
        );
        assert_eq!(
            ImageScheme::parse(" https ").expect("https"),
            Some(ImageScheme::Https)
        );
    }
}
