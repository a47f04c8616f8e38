use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::RunnerSettings;
use crate::error::{Error, Result};

/// Brings a wiki working copy up to date with its remote.
pub trait WikiFetcher {
    fn check_available(&mut self) -> Result<()>;
    /// Clone `url` at `branch` into `destination`, or update an existing clone.
    fn fetch(&mut self, url: &str, branch: &str, destination: &Path) -> Result<()>;
}

/// Executes materialized specification files.
pub trait SpecRunner {
    fn check_available(&mut self) -> Result<()>;
    fn run(&mut self, request: &RunRequest) -> Result<RunOutcome>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub working_dir: PathBuf,
    pub feature_files: Vec<PathBuf>,
    /// Where the runner should write machine-readable results, if wanted.
    pub results_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub results_path: Option<PathBuf>,
}

/// Run `<program> <args> --version` and fail with `DependencyUnavailable`
/// unless it exits successfully.
pub fn probe_tool(program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .arg("--version")
        .output()
        .map_err(|error| Error::DependencyUnavailable {
            tool: program.to_string(),
            detail: error.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::DependencyUnavailable {
            tool: program.to_string(),
            detail: combined_output(&output),
        });
    }
    debug!(
        tool = program,
        version = %String::from_utf8_lossy(&output.stdout).trim(),
        "tool available"
    );
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn git(&self, url: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|error| Error::DependencyUnavailable {
                tool: self.program.clone(),
                detail: error.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::FetchFailure {
                url: url.to_string(),
                output: combined_output(&output),
            });
        }
        Ok(())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl WikiFetcher for GitCli {
    fn check_available(&mut self) -> Result<()> {
        probe_tool(&self.program, &[])
    }

    fn fetch(&mut self, url: &str, branch: &str, destination: &Path) -> Result<()> {
        let destination_arg = destination.to_string_lossy().into_owned();
        if destination.join(".git").exists() {
            // The working copy is owned by this tool; local edits are result
            // annotations that get regenerated on every run.
            info!(branch, working_copy = %destination.display(), "updating wiki working copy");
            self.git(
                url,
                &["-C", destination_arg.as_str(), "fetch", "--quiet", "origin", branch],
            )?;
            self.git(
                url,
                &["-C", destination_arg.as_str(), "reset", "--quiet", "--hard", "FETCH_HEAD"],
            )
        } else {
            info!(url, branch, working_copy = %destination.display(), "cloning wiki");
            self.git(
                url,
                &["clone", "--quiet", "--branch", branch, url, destination_arg.as_str()],
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct CucumberCli {
    settings: RunnerSettings,
}

impl CucumberCli {
    pub fn new(settings: &RunnerSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn command(&self, request: &RunRequest) -> Command {
        let mut command = Command::new(&self.settings.command);
        command.args(&self.settings.args);
        command.args(&request.feature_files);
        if let Some(results_path) = &request.results_path {
            command.args(["--format", "pretty", "--format", "json", "--out"]);
            command.arg(results_path);
        }
        command.current_dir(&request.working_dir);
        command
    }
}

impl SpecRunner for CucumberCli {
    fn check_available(&mut self) -> Result<()> {
        probe_tool(&self.settings.command, &self.settings.args)
    }

    fn run(&mut self, request: &RunRequest) -> Result<RunOutcome> {
        info!(
            runner = %self.settings.command,
            features = request.feature_files.len(),
            "Now going to run {}...",
            self.settings.command
        );
        let status = self
            .command(request)
            .status()
            .map_err(|error| Error::DependencyUnavailable {
                tool: self.settings.command.clone(),
                detail: error.to_string(),
            })?;
        let results_path = request
            .results_path
            .clone()
            .filter(|path| path.exists());
        Ok(RunOutcome {
            exit_code: status.code().unwrap_or(1),
            results_path,
        })
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{}{}", stdout, stderr).trim().to_string()
}
