//! Line classifier for capture engine output.
//!
//! Recognizes:
//! - passing lines: `✓ Start @ samsung-s10 (120ms)`
//! - numbered failure blocks: `1) <suite> Start @ iphone-6: Error...`, where
//!   the title and the message may each sit on the following line
//! - the engine's `"before each" hook` failure, emitted when the user stops
//!   the run, which is reported as [`ExecutorEvent::UserTerminated`]
//! - tally lines: `3 passing (12s)`, `1 failing`, `2 pending`

use once_cell::sync::Lazy;
use regex::Regex;
use vizreg_common::{TestIdentity, IDENTITY_DELIMITER};

use crate::events::ExecutorEvent;

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI regex"));

static PASSING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[✓✔√]\s+(?P<title>.+?)(?:\s+\((?P<duration>\d+(?:\.\d+)?)\s*m?s\))?\s*$")
        .expect("valid passing regex")
});

static FAILURE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<n>\d+)\)\s+(?P<rest>.*)$").expect("valid failure regex"));

static BEFORE_EACH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)before each"?\s+hook"#).expect("valid hook regex"));

static TALLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<count>\d+)\s+(?P<kind>passing|failing|pending)\b").expect("valid tally regex")
});

/// Lines to wait for a failure title after a bare `N) <suite>` header
const MAX_TITLE_LOOKAHEAD: usize = 4;

/// Counts reported by the engine's own tally lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineTally {
    pub passing: Option<usize>,
    pub failing: Option<usize>,
    pub pending: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    AwaitTitle { remaining: usize },
    AwaitMessage { title: String },
}

pub struct OutputParser {
    suite_slug: String,
    state: State,
    tally: EngineTally,
}

enum TitleSplit {
    /// `title: message`
    Complete(String, String),
    /// `title:` with the message on the next line
    NeedsMessage(String),
    /// `title` alone, as in the inline failure marker
    Bare(String),
}

impl OutputParser {
    pub fn new(suite_slug: impl Into<String>) -> Self {
        Self {
            suite_slug: suite_slug.into(),
            state: State::Idle,
            tally: EngineTally::default(),
        }
    }

    pub fn tally(&self) -> EngineTally {
        self.tally
    }

    /// Classify one line; `None` means the line is only raw output
    pub fn feed(&mut self, raw: &str) -> Option<ExecutorEvent> {
        let cleaned = ANSI_RE.replace_all(raw, "");
        let line = cleaned.trim_end();

        match std::mem::replace(&mut self.state, State::Idle) {
            State::AwaitMessage { title } => {
                if line.trim().is_empty() {
                    self.state = State::AwaitMessage { title };
                    return None;
                }
                return Some(ExecutorEvent::Failing {
                    test_title: title,
                    error_message: line.trim().to_string(),
                });
            }
            State::AwaitTitle { remaining } => {
                if line.trim().is_empty() {
                    self.state = State::AwaitTitle { remaining };
                    return None;
                }
                if BEFORE_EACH_RE.is_match(line) {
                    return Some(ExecutorEvent::UserTerminated);
                }
                if line.contains(IDENTITY_DELIMITER) {
                    return self.failure_from(line.trim());
                }
                if remaining > 1 && !FAILURE_HEADER_RE.is_match(line) {
                    // nested describe block names
                    self.state = State::AwaitTitle {
                        remaining: remaining - 1,
                    };
                    return None;
                }
            }
            State::Idle => {}
        }

        if let Some(caps) = PASSING_RE.captures(line) {
            let title = caps["title"].trim();
            return TestIdentity::parse(title)
                .ok()
                .map(|identity| ExecutorEvent::Passing {
                    test_title: identity.canonical(),
                });
        }

        if let Some(caps) = TALLY_RE.captures(line) {
            let count = caps["count"].parse().ok();
            match &caps["kind"] {
                "passing" => self.tally.passing = count,
                "failing" => self.tally.failing = count,
                _ => self.tally.pending = count,
            }
            return None;
        }

        if let Some(caps) = FAILURE_HEADER_RE.captures(line) {
            let rest = self.strip_slug(caps["rest"].trim());
            if BEFORE_EACH_RE.is_match(rest) {
                return Some(ExecutorEvent::UserTerminated);
            }
            if rest.is_empty() || !rest.contains(IDENTITY_DELIMITER) {
                self.state = State::AwaitTitle {
                    remaining: MAX_TITLE_LOOKAHEAD,
                };
                return None;
            }
            return self.failure_from(rest);
        }

        None
    }

    fn strip_slug<'a>(&self, rest: &'a str) -> &'a str {
        if self.suite_slug.is_empty() {
            return rest;
        }
        match rest.strip_prefix(self.suite_slug.as_str()) {
            Some(after) if after.is_empty() || after.starts_with(char::is_whitespace) => after.trim(),
            _ => rest,
        }
    }

    fn failure_from(&mut self, text: &str) -> Option<ExecutorEvent> {
        match split_title(text)? {
            TitleSplit::Complete(title, message) => Some(ExecutorEvent::Failing {
                test_title: title,
                error_message: message,
            }),
            TitleSplit::NeedsMessage(title) => {
                self.state = State::AwaitMessage { title };
                None
            }
            TitleSplit::Bare(title) => Some(ExecutorEvent::Failing {
                test_title: title,
                error_message: String::new(),
            }),
        }
    }
}

/// Split `"{title} @ {viewport}: message"`; the colon is searched for after the delimiter
fn split_title(text: &str) -> Option<TitleSplit> {
    let at = text.find(IDENTITY_DELIMITER)?;
    let after = at + IDENTITY_DELIMITER.len();

    let (title, message) = match text[after..].find(':') {
        Some(pos) => (&text[..after + pos], Some(text[after + pos + 1..].trim())),
        None => (text, None),
    };

    let identity = TestIdentity::parse(title.trim()).ok()?;
    let canonical = identity.canonical();

    Some(match message {
        Some("") => TitleSplit::NeedsMessage(canonical),
        Some(message) => TitleSplit::Complete(canonical, message.to_string()),
        None => TitleSplit::Bare(canonical),
    })
}
