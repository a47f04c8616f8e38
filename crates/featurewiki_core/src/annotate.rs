use std::ops::Range;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;

use crate::config::ImageSettings;
use crate::error::{Error, Result};
use crate::extract::extract_blocks;

pub const SCENARIO_TOKENS: &[&str] = &[
    "Scenario:",
    "Scenario Outline:",
    "Scenario Template:",
    "Example:",
];

pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Runner outcomes, declared from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Skipped,
    Pending,
    Undefined,
    Ambiguous,
    Failed,
}

impl Outcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "passed" => Some(Self::Passed),
            "skipped" => Some(Self::Skipped),
            "pending" => Some(Self::Pending),
            "undefined" => Some(Self::Undefined),
            "ambiguous" => Some(Self::Ambiguous),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
            Self::Undefined => "undefined",
            Self::Ambiguous => "ambiguous",
            Self::Failed => "failed",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Passed => "passing.png",
            Self::Skipped => "skipped.png",
            Self::Pending => "pending.png",
            Self::Undefined => "undefined.png",
            Self::Ambiguous => "ambiguous.png",
            Self::Failed => "failing.png",
        }
    }
}

/// Renders result annotations and places them in raw page text. An
/// annotation is one line directly under its scenario header:
///
/// ```text
///   Scenario: Divide two numbers
///   **09/06/2013 10:10** ![](//s3.amazonaws.com/gitnesse/github/passing.png)
/// ```
///
/// Pages are split at `\n` only, so every other line survives untouched,
/// terminators included.
#[derive(Debug, Clone)]
pub struct Annotator {
    image: ImageSettings,
}

impl Annotator {
    pub fn new(image: &ImageSettings) -> Self {
        Self {
            image: image.clone(),
        }
    }

    pub fn icon_url(&self, outcome: Outcome) -> String {
        let host = self.image.host.trim_matches('/');
        match self.image.scheme {
            Some(scheme) => format!("{}://{host}/{}", scheme.as_str(), outcome.icon()),
            None => format!("//{host}/{}", outcome.icon()),
        }
    }

    pub fn render(&self, outcome: Outcome, at: NaiveDateTime) -> String {
        format!(
            "**{}** ![]({})",
            at.format(TIMESTAMP_FORMAT),
            self.icon_url(outcome)
        )
    }

    /// Insert a fresh annotation under `scenario`'s header, replacing the one
    /// already there. Fails with `ScenarioNotFound` when no header matches.
    pub fn append_result(
        &self,
        raw: &str,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<String> {
        let line_count = raw.split('\n').count();
        self.annotate_within(raw, 0..line_count, scenario, outcome, at)
    }

    /// Same as `append_result`, but the header is only searched for inside the
    /// fenced block whose identifier is `feature`. With repeated identifiers
    /// the last block wins, as it does for the written feature file.
    pub fn append_feature_result(
        &self,
        raw: &str,
        feature: &str,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<String> {
        let block = extract_blocks(raw)
            .filter(|block| block.identifier == feature)
            .last()
            .ok_or_else(|| Error::ScenarioNotFound {
                scenario: scenario.to_string(),
            })?;
        let start = block.line - 1;
        let end = start + block.body.matches('\n').count();
        self.annotate_within(raw, start..end, scenario, outcome, at)
    }

    fn annotate_within(
        &self,
        raw: &str,
        range: Range<usize>,
        scenario: &str,
        outcome: Outcome,
        at: NaiveDateTime,
    ) -> Result<String> {
        let mut lines: Vec<&str> = raw.split('\n').collect();
        let index = lines
            .iter()
            .enumerate()
            .take(range.end)
            .skip(range.start)
            .find(|(_, line)| is_scenario_header(line, scenario))
            .map(|(index, _)| index)
            .ok_or_else(|| Error::ScenarioNotFound {
                scenario: scenario.to_string(),
            })?;

        if lines
            .get(index + 1)
            .is_some_and(|line| is_annotation_line(line))
        {
            lines.remove(index + 1);
        }

        let header = lines[index];
        let indent = &header[..header.len() - header.trim_start().len()];
        let ending = if header.ends_with('\r') { "\r" } else { "" };
        let rendered = format!("{indent}{}{ending}", self.render(outcome, at));
        lines.insert(index + 1, &rendered);
        Ok(lines.join("\n"))
    }
}

/// Drop every annotation line, keeping all other lines in order.
pub fn remove_annotations(raw: &str) -> String {
    raw.split('\n')
        .filter(|line| !is_annotation_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn count_annotations(raw: &str) -> usize {
    raw.split('\n').filter(|line| is_annotation_line(line)).count()
}

pub fn is_annotation_line(line: &str) -> bool {
    annotation_pattern().is_match(line.trim())
}

pub fn is_scenario_header(line: &str, scenario: &str) -> bool {
    let trimmed = line.trim();
    SCENARIO_TOKENS.iter().any(|token| {
        trimmed
            .strip_prefix(*token)
            .is_some_and(|name| name.trim() == scenario.trim())
    })
}

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\*\*\d{2}/\d{2}/\d{4} \d{2}:\d{2}\*\*\s*!\[\]\([^)\s]*\)$")
            .expect("annotation pattern compiles")
    })
}
