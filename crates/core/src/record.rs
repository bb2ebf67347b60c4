//! Long-term memory records: to-do items and the user's instruction blob.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use crate::error::ReflectionError;
use crate::provider::ToolDefinition;

/// Tool/schema name the extractor uses for to-do records.
pub const TODO_SCHEMA_NAME: &str = "ToDo";

/// Fixed key of the instruction record inside its namespace.
pub const INSTRUCTIONS_KEY: &str = "user_instructions";

/// Progress of a to-do item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    #[default]
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "archived")]
    Archived,
}

/// A single task on the user's to-do list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToDo {
    /// The task to be completed
    pub task: String,

    /// Estimated time to complete, in minutes
    #[serde(default)]
    pub time_to_complete: Option<u32>,

    /// When the task needs to be done by
    #[serde(default, deserialize_with = "deserialize_deadline")]
    pub deadline: Option<DateTime<Utc>>,

    /// Concrete, actionable ways to get the task done (at least one)
    #[serde(default)]
    pub solutions: Vec<String>,

    #[serde(default)]
    pub status: TodoStatus,
}

impl ToDo {
    pub fn new(task: impl Into<String>, solutions: Vec<String>) -> Self {
        Self {
            task: task.into(),
            time_to_complete: None,
            deadline: None,
            solutions,
            status: TodoStatus::default(),
        }
    }

    /// Parse and validate a record produced by the extractor.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ReflectionError> {
        let todo: ToDo = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        todo.validate()?;
        Ok(todo)
    }

    /// Check the fields serde cannot enforce.
    pub fn validate(&self) -> Result<(), ReflectionError> {
        if self.task.trim().is_empty() {
            return Err(invalid("task must not be empty"));
        }
        if self.solutions.is_empty() {
            return Err(invalid("solutions must contain at least one entry"));
        }
        if self.solutions.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("solutions must not contain blank entries"));
        }
        Ok(())
    }

    /// The normalized JSON form that gets persisted.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Schema handed to the extractor as a tool definition.
    pub fn schema() -> ToolDefinition {
        ToolDefinition {
            name: TODO_SCHEMA_NAME.into(),
            description: "A task on the user's ToDo list.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "The task to be completed."
                    },
                    "time_to_complete": {
                        "type": ["integer", "null"],
                        "description": "Estimated time to complete the task (minutes)."
                    },
                    "deadline": {
                        "type": ["string", "null"],
                        "format": "date-time",
                        "description": "When the task needs to be completed by (if applicable)."
                    },
                    "solutions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Specific, actionable solutions (ideas, service providers, or concrete options relevant to completing the task)."
                    },
                    "status": {
                        "type": "string",
                        "enum": ["not started", "in progress", "done", "archived"],
                        "default": "not started",
                        "description": "Current status of the task."
                    }
                },
                "required": ["task", "solutions"]
            }),
        }
    }
}

fn invalid(reason: impl Into<String>) -> ReflectionError {
    ReflectionError::InvalidRecordShape {
        record: TODO_SCHEMA_NAME.into(),
        reason: reason.into(),
    }
}

/// The user's preferences for how to-do items should be maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    pub memory: String,
}

/// Parse a deadline the way models tend to write them.
///
/// Accepts RFC 3339, naive date-times (taken as UTC) and bare dates.
pub fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("unrecognized deadline '{raw}'"))
}

fn deserialize_deadline<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_deadline(&s).map(Some).map_err(serde::de::Error::custom),
    }
}
