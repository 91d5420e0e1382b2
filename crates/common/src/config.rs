//! Layered configuration
//!
//! Precedence, field by field: suite file > project file > built-in defaults.
//! Endpoint-level capture options override the suite's effective values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::naming::{validate_title, Viewport};
use crate::types::{CaptureMode, Endpoint, Padding};

/// Project configuration file at the project root
pub const PROJECT_CONFIG_FILE: &str = "vizreg.toml";

/// Directory holding one subdirectory per suite
pub const SUITES_DIR: &str = "suites";

/// Suite configuration file inside a suite directory
pub const SUITE_CONFIG_FILE: &str = "suite.toml";

/// Built-in defaults, the lowest configuration layer
pub struct Defaults;

impl Defaults {
    pub const BASE_URL: &'static str = "http://localhost:3000";
    pub const VIEWPORT: &'static str = "macbook-15";
    pub const HISTORY_LIMIT: usize = 50;
    pub const ENGINE_PROGRAM: &'static str = "npx";
    pub const ENGINE_ARGS: &'static [&'static str] = &["cypress", "run"];
}

/// Engine invocation settings as they appear in a config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineLayer {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub gui_args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    /// Describe-block name the engine prefixes failures with
    pub suite_slug: Option<String>,
}

impl EngineLayer {
    fn over(self, lower: EngineLayer) -> EngineLayer {
        EngineLayer {
            program: self.program.or(lower.program),
            args: self.args.or(lower.args),
            gui_args: self.gui_args.or(lower.gui_args),
            env: match (lower.env, self.env) {
                (Some(mut base), Some(upper)) => {
                    base.extend(upper);
                    Some(base)
                }
                (base, upper) => upper.or(base),
            },
            suite_slug: self.suite_slug.or(lower.suite_slug),
        }
    }
}

/// `vizreg.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    pub base_url: Option<String>,
    pub viewports: Option<Vec<Viewport>>,
    pub capture: Option<CaptureMode>,
    pub padding: Option<Padding>,
    pub blackout: Option<Vec<String>>,
    pub history_limit: Option<usize>,
    #[serde(default)]
    pub engine: EngineLayer,
}

/// `suites/<suite>/suite.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    pub base_url: Option<String>,
    pub viewports: Option<Vec<Viewport>>,
    pub capture: Option<CaptureMode>,
    pub padding: Option<Padding>,
    pub blackout: Option<Vec<String>>,
    #[serde(default)]
    pub engine: EngineLayer,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// Resolved engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub program: String,
    pub args: Vec<String>,
    pub gui_args: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub suite_slug: String,
}

/// A fully resolved and validated suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub name: String,
    pub base_url: String,
    pub viewports: Vec<Viewport>,
    pub capture: CaptureMode,
    pub padding: Option<Padding>,
    pub blackout: Vec<String>,
    pub engine: EngineSettings,
    pub endpoints: Vec<Endpoint>,
}

impl SuiteConfig {
    /// Merge the layers and validate the result
    pub fn resolve(name: &str, project: &ProjectFile, suite: SuiteFile) -> Result<Self> {
        let engine = suite.engine.over(project.engine.clone());

        let config = Self {
            name: name.to_string(),
            base_url: suite
                .base_url
                .or_else(|| project.base_url.clone())
                .unwrap_or_else(|| Defaults::BASE_URL.to_string()),
            viewports: suite
                .viewports
                .or_else(|| project.viewports.clone())
                .unwrap_or_else(|| vec![Viewport::preset(Defaults::VIEWPORT)]),
            capture: suite.capture.or(project.capture).unwrap_or_default(),
            padding: suite.padding.or_else(|| project.padding.clone()),
            blackout: suite
                .blackout
                .or_else(|| project.blackout.clone())
                .unwrap_or_default(),
            engine: EngineSettings {
                program: engine
                    .program
                    .unwrap_or_else(|| Defaults::ENGINE_PROGRAM.to_string()),
                args: engine.args.unwrap_or_else(|| {
                    Defaults::ENGINE_ARGS.iter().map(|s| s.to_string()).collect()
                }),
                gui_args: engine.gui_args,
                env: engine.env.unwrap_or_default(),
                suite_slug: engine.suite_slug.unwrap_or_else(|| name.to_string()),
            },
            endpoints: suite.endpoints,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_suite_name(&self.name)?;

        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "suite '{}' has no endpoints",
                self.name
            )));
        }
        if self.viewports.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "suite '{}' has no viewports",
                self.name
            )));
        }

        let mut titles = HashSet::new();
        for endpoint in &self.endpoints {
            validate_title(&endpoint.title)?;
            if !titles.insert(endpoint.title.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate endpoint title '{}' in suite '{}'",
                    endpoint.title, self.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for viewport in &self.viewports {
            viewport.validate()?;
            if !seen.insert(viewport.canonical()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate viewport '{}' in suite '{}'",
                    viewport, self.name
                )));
            }
        }

        if self.engine.program.trim().is_empty() {
            return Err(Error::InvalidConfig("engine program is empty".into()));
        }

        Ok(())
    }

    pub fn endpoint(&self, title: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.title == title)
    }

    pub fn has_viewport(&self, viewport: &Viewport) -> bool {
        self.viewports.contains(viewport)
    }

    pub fn effective_capture(&self, endpoint: &Endpoint) -> CaptureMode {
        endpoint.capture.unwrap_or(self.capture)
    }

    pub fn effective_padding(&self, endpoint: &Endpoint) -> Option<Padding> {
        endpoint.padding.clone().or_else(|| self.padding.clone())
    }

    pub fn effective_blackout(&self, endpoint: &Endpoint) -> Vec<String> {
        if endpoint.blackout.is_empty() {
            self.blackout.clone()
        } else {
            endpoint.blackout.clone()
        }
    }
}

fn validate_suite_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(Error::InvalidConfig(format!("invalid suite name '{}'", name)));
    }
    Ok(())
}

/// Project root plus its parsed `vizreg.toml`
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub file: ProjectFile,
}

impl ProjectConfig {
    /// Load the project file; a missing file means defaults
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PROJECT_CONFIG_FILE);
        let file = if path.exists() {
            read_toml(&path)?
        } else {
            debug!("No {} at {}, using defaults", PROJECT_CONFIG_FILE, root.display());
            ProjectFile::default()
        };

        Ok(Self {
            root: root.to_path_buf(),
            file,
        })
    }

    pub fn suites_dir(&self) -> PathBuf {
        self.root.join(SUITES_DIR)
    }

    pub fn suite_dir(&self, suite: &str) -> PathBuf {
        self.suites_dir().join(suite)
    }

    /// Where the bounded run history lives
    pub fn history_path(&self) -> PathBuf {
        self.root.join(".vizreg").join("history.json")
    }

    pub fn history_limit(&self) -> usize {
        self.file.history_limit.unwrap_or(Defaults::HISTORY_LIMIT)
    }

    /// Names of every directory under `suites/` that carries a suite file
    pub fn suite_names(&self) -> Result<Vec<String>> {
        let dir = self.suites_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().join(SUITE_CONFIG_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn load_suite(&self, suite: &str) -> Result<SuiteConfig> {
        validate_suite_name(suite)?;

        let path = self.suite_dir(suite).join(SUITE_CONFIG_FILE);
        if !path.is_file() {
            return Err(Error::SuiteNotFound(suite.to_string()));
        }

        let file: SuiteFile = read_toml(&path)?;
        SuiteConfig::resolve(suite, &self.file, file)
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_suite(root: &Path, name: &str, content: &str) {
        let dir = root.join(SUITES_DIR).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SUITE_CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_defaults_without_project_file() {
        let tmp = TempDir::new().unwrap();
        write_suite(
            tmp.path(),
            "site",
            r#"
[[endpoints]]
title = "Start"
path = "/"
"#,
        );

        let project = ProjectConfig::load(tmp.path()).unwrap();
        let suite = project.load_suite("site").unwrap();
        assert_eq!(suite.base_url, Defaults::BASE_URL);
        assert_eq!(suite.viewports, vec![Viewport::preset(Defaults::VIEWPORT)]);
        assert_eq!(suite.capture, CaptureMode::FullPage);
        assert_eq!(suite.engine.program, "npx");
        assert_eq!(suite.engine.suite_slug, "site");
        assert_eq!(project.history_limit(), Defaults::HISTORY_LIMIT);
    }

    #[test]
    fn test_suite_overrides_project() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            r#"
base_url = "http://project.test"
viewports = ["iphone-6", [1920, 1080]]
capture = "viewport"
history_limit = 5

[engine]
program = "node"
args = ["engine.js"]
env = { A = "project", B = "project" }
"#,
        )
        .unwrap();
        write_suite(
            tmp.path(),
            "site",
            r#"
base_url = "http://suite.test"

[engine]
env = { B = "suite" }

[[endpoints]]
title = "Start"
path = "/"
capture = "fullPage"
"#,
        );

        let project = ProjectConfig::load(tmp.path()).unwrap();
        let suite = project.load_suite("site").unwrap();
        assert_eq!(suite.base_url, "http://suite.test");
        assert_eq!(suite.viewports.len(), 2);
        assert_eq!(suite.capture, CaptureMode::Viewport);
        assert_eq!(suite.effective_capture(&suite.endpoints[0]), CaptureMode::FullPage);
        assert_eq!(suite.engine.program, "node");
        assert_eq!(suite.engine.env.get("A").map(String::as_str), Some("project"));
        assert_eq!(suite.engine.env.get("B").map(String::as_str), Some("suite"));
        assert_eq!(project.history_limit(), 5);
    }

    #[test]
    fn test_missing_suite() {
        let tmp = TempDir::new().unwrap();
        let project = ProjectConfig::load(tmp.path()).unwrap();
        assert!(matches!(
            project.load_suite("nope"),
            Err(Error::SuiteNotFound(_))
        ));
        assert!(project.suite_names().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_delimiter_in_title() {
        let tmp = TempDir::new().unwrap();
        write_suite(
            tmp.path(),
            "site",
            r#"
[[endpoints]]
title = "Home @ mobile"
path = "/"
"#,
        );
        let project = ProjectConfig::load(tmp.path()).unwrap();
        let err = project.load_suite("site").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_rejects_titles_that_break_canonical_names() {
        for title in ["Home @", " Start"] {
            let tmp = TempDir::new().unwrap();
            write_suite(
                tmp.path(),
                "site",
                &format!("[[endpoints]]\ntitle = \"{}\"\npath = \"/\"\n", title),
            );
            let project = ProjectConfig::load(tmp.path()).unwrap();
            assert!(matches!(
                project.load_suite("site"),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_rejects_duplicate_titles() {
        let tmp = TempDir::new().unwrap();
        write_suite(
            tmp.path(),
            "site",
            r#"
[[endpoints]]
title = "Start"
path = "/"

[[endpoints]]
title = "Start"
path = "/home"
"#,
        );
        let project = ProjectConfig::load(tmp.path()).unwrap();
        assert!(matches!(
            project.load_suite("site"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_suite_names_sorted() {
        let tmp = TempDir::new().unwrap();
        let body = "[[endpoints]]\ntitle = \"Start\"\npath = \"/\"\n";
        write_suite(tmp.path(), "beta", body);
        write_suite(tmp.path(), "alpha", body);
        std::fs::create_dir_all(tmp.path().join(SUITES_DIR).join("empty")).unwrap();

        let project = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(project.suite_names().unwrap(), vec!["alpha", "beta"]);
    }
}
