//! Canonical test identities ("snap names") and artifact file names.
//!
//! Every correlation in vizreg is string based: planned work, files on disk
//! and engine output all carry `"{title} @ {viewport}"`. This module is the
//! only place that formats or parses that string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Separator between endpoint title and viewport in a canonical name
pub const IDENTITY_DELIMITER: &str = " @ ";

/// A browser viewport: a named device preset or explicit dimensions.
///
/// Two viewports are equal iff their canonical strings are equal, so the
/// preset `"1920,1080"` and the size `[1920, 1080]` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Viewport {
    Size([u32; 2]),
    Preset(String),
}

impl Viewport {
    pub fn preset(name: impl Into<String>) -> Self {
        Viewport::Preset(name.into())
    }

    pub fn size(width: u32, height: u32) -> Self {
        Viewport::Size([width, height])
    }

    /// Parse the canonical string form back into a viewport
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((w, h)) = s.split_once(',') {
            if let (Ok(width), Ok(height)) = (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
                return Viewport::Size([width, height]);
            }
        }
        Viewport::Preset(s.to_string())
    }

    /// Canonical string form: presets literally, sizes as `"w,h"`
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Viewport::Size([w, h]) => {
                if *w == 0 || *h == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "viewport {}x{} must have non-zero dimensions",
                        w, h
                    )));
                }
            }
            Viewport::Preset(name) => {
                if name.trim().is_empty() {
                    return Err(Error::InvalidConfig("viewport preset name is empty".into()));
                }
                if name.contains(IDENTITY_DELIMITER) || name.contains(',') {
                    return Err(Error::InvalidConfig(format!(
                        "viewport preset '{}' must not contain '{}' or ','",
                        name,
                        IDENTITY_DELIMITER.trim()
                    )));
                }
                // "x @ @ vp" would split after "x"
                if name.trim() != name || name.starts_with("@ ") {
                    return Err(Error::InvalidConfig(format!(
                        "viewport preset '{}' must not start with '@ ' or carry surrounding whitespace",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Viewport::Size([w, h]) => write!(f, "{},{}", w, h),
            Viewport::Preset(name) => write!(f, "{}", name),
        }
    }
}

impl PartialEq for Viewport {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Viewport {}

impl Hash for Viewport {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

/// Check that an endpoint title can take part in canonical names and file names
pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidConfig("endpoint title is empty".into()));
    }
    if title.contains(IDENTITY_DELIMITER) {
        return Err(Error::InvalidConfig(format!(
            "endpoint title '{}' must not contain '{}'",
            title, IDENTITY_DELIMITER
        )));
    }
    // Engine output is trimmed, and "Home @" would split as "Home" + "@ vp"
    if title.trim() != title || title.ends_with(" @") {
        return Err(Error::InvalidConfig(format!(
            "endpoint title '{}' must not end with ' @' or carry surrounding whitespace",
            title
        )));
    }
    if title.contains('/') || title.contains('\\') {
        return Err(Error::InvalidConfig(format!(
            "endpoint title '{}' must not contain path separators",
            title
        )));
    }
    Ok(())
}

/// One comparison: an endpoint title crossed with a viewport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestIdentity {
    pub endpoint_title: String,
    pub viewport: Viewport,
}

impl TestIdentity {
    pub fn new(endpoint_title: impl Into<String>, viewport: Viewport) -> Self {
        Self {
            endpoint_title: endpoint_title.into(),
            viewport,
        }
    }

    /// `"{title} @ {viewport}"`
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (title, viewport) = s
            .split_once(IDENTITY_DELIMITER)
            .ok_or_else(|| Error::InvalidIdentity(s.to_string()))?;

        if title.trim().is_empty()
            || viewport.trim().is_empty()
            || viewport.contains(IDENTITY_DELIMITER)
        {
            return Err(Error::InvalidIdentity(s.to_string()));
        }

        Ok(Self {
            endpoint_title: title.to_string(),
            viewport: Viewport::parse(viewport),
        })
    }

    pub fn file_name(&self, role: ArtifactRole) -> String {
        format!("{}{}", self.canonical(), role.suffix())
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.endpoint_title, IDENTITY_DELIMITER, self.viewport)
    }
}

impl FromStr for TestIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The role an image artifact plays for a test identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// Approved reference image
    Baseline,
    /// Latest capture, kept only on mismatch
    Received,
    /// Visual delta, produced only on mismatch
    Diff,
}

impl ArtifactRole {
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactRole::Baseline => ".base.png",
            ArtifactRole::Received => "-received.png",
            ArtifactRole::Diff => ".diff.png",
        }
    }

    /// Recover the identity from an artifact file name of this role
    pub fn parse_file_name(&self, file_name: &str) -> Option<TestIdentity> {
        let stem = file_name.strip_suffix(self.suffix())?;
        TestIdentity::parse(stem).ok()
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRole::Baseline => write!(f, "baseline"),
            ArtifactRole::Received => write!(f, "received"),
            ArtifactRole::Diff => write!(f, "diff"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Start", Viewport::preset("samsung-s10") ; "preset viewport")]
    #[test_case("Start", Viewport::size(1920, 1080) ; "sized viewport")]
    #[test_case("Blog post", Viewport::preset("iphone-6") ; "title with spaces")]
    #[test_case("Pricing: plans", Viewport::size(375, 667) ; "title with colon")]
    fn test_identity_round_trip(title: &str, viewport: Viewport) {
        let identity = TestIdentity::new(title, viewport.clone());
        let parsed = TestIdentity::parse(&identity.canonical()).unwrap();
        assert_eq!(parsed.endpoint_title, title);
        assert_eq!(parsed.viewport, viewport);
    }

    #[test]
    fn test_canonical_format() {
        let identity = TestIdentity::new("Start", Viewport::size(1920, 1080));
        assert_eq!(identity.canonical(), "Start @ 1920,1080");
        assert_eq!(
            identity.file_name(ArtifactRole::Diff),
            "Start @ 1920,1080.diff.png"
        );
        assert_eq!(
            identity.file_name(ArtifactRole::Received),
            "Start @ 1920,1080-received.png"
        );
        assert_eq!(
            identity.file_name(ArtifactRole::Baseline),
            "Start @ 1920,1080.base.png"
        );
    }

    #[test]
    fn test_viewport_equality_is_string_based() {
        assert_eq!(Viewport::preset("1920,1080"), Viewport::size(1920, 1080));
        assert_ne!(Viewport::preset("iphone-6"), Viewport::preset("iphone-6+"));
        assert_eq!(Viewport::parse("1920, 1080"), Viewport::size(1920, 1080));
    }

    #[test]
    fn test_parse_rejects_missing_delimiter() {
        assert!(TestIdentity::parse("Start").is_err());
        assert!(TestIdentity::parse(" @ iphone-6").is_err());
        assert!(TestIdentity::parse("Start @ ").is_err());
    }

    #[test]
    fn test_parse_file_name_requires_role_suffix() {
        let diff = ArtifactRole::Diff.parse_file_name("Start @ iphone-6.diff.png").unwrap();
        assert_eq!(diff, TestIdentity::new("Start", Viewport::preset("iphone-6")));
        assert!(ArtifactRole::Diff.parse_file_name("Start @ iphone-6-received.png").is_none());
        assert!(ArtifactRole::Diff.parse_file_name(".DS_Store").is_none());
    }

    #[test]
    fn test_viewport_serde_forms() {
        let v: Vec<Viewport> = serde_json::from_str(r#"["iphone-6", [1920, 1080]]"#).unwrap();
        assert_eq!(v[0], Viewport::preset("iphone-6"));
        assert_eq!(v[1], Viewport::size(1920, 1080));
        assert_eq!(serde_json::to_string(&v[1]).unwrap(), "[1920,1080]");
    }

    #[test]
    fn test_title_validation() {
        assert!(validate_title("Start").is_ok());
        assert!(validate_title("A @ B").is_err());
        assert!(validate_title("a/b").is_err());
        assert!(validate_title("  ").is_err());
        assert!(Viewport::preset("x @ y").validate().is_err());
        assert!(Viewport::size(0, 100).validate().is_err());
    }

    #[test_case("Home @" ; "trailing delimiter half")]
    #[test_case(" Start" ; "leading space")]
    #[test_case("Start " ; "trailing space")]
    #[test_case("Start\t" ; "trailing tab")]
    fn test_title_that_cannot_round_trip_is_rejected(title: &str) {
        assert!(validate_title(title).is_err());
    }

    #[test_case("@ iphone-6" ; "leading delimiter half")]
    #[test_case(" iphone-6" ; "leading space")]
    #[test_case("iphone-6 " ; "trailing space")]
    fn test_preset_that_cannot_round_trip_is_rejected(name: &str) {
        assert!(Viewport::preset(name).validate().is_err());
    }

    #[test_case("Home", "iphone-6" ; "plain")]
    #[test_case("@ Home", "iphone-6" ; "title starting with at")]
    #[test_case("Home@", "iphone-6" ; "at without space")]
    #[test_case("Home", "@" ; "bare at preset")]
    #[test_case("Home", "ipad @2x" ; "preset with inner at")]
    fn test_valid_names_round_trip(title: &str, preset: &str) {
        let viewport = Viewport::preset(preset);
        assert!(validate_title(title).is_ok());
        assert!(viewport.validate().is_ok());

        let identity = TestIdentity::new(title, viewport);
        let parsed = TestIdentity::parse(&identity.canonical()).unwrap();
        assert_eq!(parsed, identity);
    }
}
