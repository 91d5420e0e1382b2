//! Core types for vizreg

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::naming::{TestIdentity, Viewport};

/// How much of the page is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureMode {
    #[serde(rename = "viewport")]
    Viewport,
    #[default]
    #[serde(rename = "fullPage")]
    FullPage,
}

/// Extra space around an element capture, in CSS pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Padding {
    Uniform(u32),
    /// top, right, bottom, left
    Sides([u32; 4]),
}

/// A named page under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique within a suite
    pub title: String,

    /// Path relative to the suite base URL
    pub path: String,

    /// Selectors of regions painted out before capture
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blackout: Vec<String>,

    /// Capture only the element matching this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_to_match: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,

    /// Name of a hook the capture engine runs after visiting the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_visit: Option<String>,
}

impl Endpoint {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
            blackout: Vec::new(),
            element_to_match: None,
            capture: None,
            padding: None,
            on_visit: None,
        }
    }

    pub fn identity(&self, viewport: &Viewport) -> TestIdentity {
        TestIdentity::new(self.title.clone(), viewport.clone())
    }
}

/// Kind of run requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// Every endpoint against every viewport, clean slate
    FullTest,
    /// Re-test exactly the identities that currently have diffs
    DiffsOnly,
    /// Explicitly selected endpoints and/or viewports
    Targeted,
    /// Targeted capture into the lab namespace, no assessment
    Lab,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::FullTest => "full-test",
            TestType::DiffsOnly => "diffs-only",
            TestType::Targeted => "targeted",
            TestType::Lab => "lab",
        }
    }

    /// Whether the run compares against authoritative baselines
    pub fn is_snapshot(&self) -> bool {
        !matches!(self, TestType::Lab)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-test" | "full" => Ok(TestType::FullTest),
            "diffs-only" | "diffs" => Ok(TestType::DiffsOnly),
            "targeted" | "target" => Ok(TestType::Targeted),
            "lab" => Ok(TestType::Lab),
            other => Err(Error::InvalidConfig(format!("unknown test type '{}'", other))),
        }
    }
}

/// Outcome of one planned identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointTestResult {
    /// Canonical `"{title} @ {viewport}"`
    pub test_title: String,
    pub endpoint_title: String,
    pub viewport: Viewport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EndpointTestResult {
    pub fn new(identity: &TestIdentity, error_message: Option<String>) -> Self {
        Self {
            test_title: identity.canonical(),
            endpoint_title: identity.endpoint_title.clone(),
            viewport: identity.viewport.clone(),
            error_message,
        }
    }

    pub fn identity(&self) -> TestIdentity {
        TestIdentity::new(self.endpoint_title.clone(), self.viewport.clone())
    }
}

/// Every planned identity classified
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointOutcomes {
    pub passing: Vec<EndpointTestResult>,
    pub failing: Vec<EndpointTestResult>,
    pub skipped: Vec<EndpointTestResult>,
    /// Subset of `passing` with no outstanding diff
    pub unchanged: Vec<EndpointTestResult>,
}

impl EndpointOutcomes {
    pub fn is_clean(&self) -> bool {
        self.failing.is_empty() && self.skipped.is_empty()
    }
}

/// Counts reported for the engine run as a whole
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSummary {
    pub tests: usize,
    pub passing: usize,
    pub failing: usize,
    pub pending: usize,
    pub duration_ms: u64,
}

/// The choices the caller made when starting a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramChoices {
    pub suite: String,
    pub test_type: TestType,
    #[serde(default)]
    pub target_endpoint_titles: Vec<String>,
    #[serde(default)]
    pub target_viewports: Vec<String>,
    #[serde(default)]
    pub gui: bool,
    pub snap: bool,
}

/// Result of an assessment pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub approved_files: Vec<String>,
    pub rejected_files: Vec<String>,
    pub failed: bool,
}

/// Aggregate record of one run, persisted to history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: uuid::Uuid,
    pub test_type: TestType,
    pub suite: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub executor_summary: ExecutorSummary,
    pub endpoint_test_results: EndpointOutcomes,
    /// Canonical names with a diff after the run
    pub test_diff_list: Vec<String>,
    pub program_choices: ProgramChoices,
    pub terminated: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<AssessmentSummary>,
}
