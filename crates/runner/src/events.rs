//! Structured events produced while a run is in flight

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vizreg_common::{AssessmentSummary, RunSummary, TestType};

/// Classified output of the capture engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    /// A line of engine output, forwarded verbatim
    Raw { text: String },
    Passing { test_title: String },
    Failing { test_title: String, error_message: String },
    /// The engine reported a hook failure caused by the user stopping the run
    UserTerminated,
}

/// Everything a live consumer (terminal or web client) sees for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        run_id: Uuid,
        suite: String,
        test_type: TestType,
        agenda: Vec<String>,
    },
    Raw {
        text: String,
    },
    Passing {
        test_title: String,
    },
    Failing {
        test_title: String,
        error_message: String,
    },
    UserTerminated,
    Restored {
        files: Vec<String>,
    },
    Summary {
        summary: Box<RunSummary>,
    },
    Assessment {
        #[serde(flatten)]
        summary: AssessmentSummary,
    },
}

impl From<ExecutorEvent> for SessionEvent {
    fn from(event: ExecutorEvent) -> Self {
        match event {
            ExecutorEvent::Raw { text } => SessionEvent::Raw { text },
            ExecutorEvent::Passing { test_title } => SessionEvent::Passing { test_title },
            ExecutorEvent::Failing {
                test_title,
                error_message,
            } => SessionEvent::Failing {
                test_title,
                error_message,
            },
            ExecutorEvent::UserTerminated => SessionEvent::UserTerminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = SessionEvent::from(ExecutorEvent::Passing {
            test_title: "Start @ iphone-6".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "passing");
        assert_eq!(json["test_title"], "Start @ iphone-6");

        let json = serde_json::to_value(SessionEvent::Assessment {
            summary: AssessmentSummary {
                approved_files: vec!["a".into()],
                rejected_files: vec![],
                failed: false,
            },
        })
        .unwrap();
        assert_eq!(json["type"], "assessment");
        assert_eq!(json["approved_files"][0], "a");
    }
}
