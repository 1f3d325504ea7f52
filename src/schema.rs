//! Task file data model
//!
//! The task file is UTF-8 JSON describing a tree of commands to run against a
//! single device, plus per-run bookkeeping the engine writes back (statuses,
//! vendor, error code). The wire format is lenient on input — unknown fields
//! are ignored, booleans and timeouts may arrive as strings — and stable on
//! output: scalar params are written back as strings, empty values omitted,
//! 4-space pretty-printed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Default prompt-wait timeout, in seconds, when neither the task nor the
/// file settings specify one.
pub const DEFAULT_TIMEOUT_SECS: i64 = 20;

/// Task status values persisted into the file.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAIL: &str = "fail";
    pub const SKIPPED: &str = "skipped";
}

/// Root of a task file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, rename = "creatingtime", skip_serializing_if = "String::is_empty")]
    pub creating_time: String,
    #[serde(default, rename = "executingtime", skip_serializing_if = "String::is_empty")]
    pub executing_time: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotests: Option<Vec<When>>,
}

/// File-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Default prompt-wait timeout in seconds for every task that does not
    /// set its own. Zero means unset.
    #[serde(default, with = "lenient_int", skip_serializing_if = "is_zero")]
    pub timeout: i64,
}

/// One command in the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub params: TaskParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Vec<When>>,
}

/// Per-task execution parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    /// Prompt-wait timeout in seconds; zero or negative inherits the default.
    #[serde(default, with = "lenient_int", skip_serializing_if = "is_zero")]
    pub timeout: i64,
    /// Filename (inside the output directory) to save the command output to.
    /// Empty means do not save. `{{var}}` placeholders are substituted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_file: String,
    /// Continue with the next task even if this command fails.
    #[serde(default, with = "lenient_bool", skip_serializing_if = "is_false")]
    pub on_error_continue: bool,
    /// Allow the device prompt to change after this command (e.g. entering
    /// configuration mode).
    #[serde(default, with = "lenient_bool", skip_serializing_if = "is_false")]
    pub prompt_change_allowed: bool,
    /// Allow a root task that already carries a status to run again.
    #[serde(default, with = "lenient_bool", skip_serializing_if = "is_false")]
    pub command_repeat_allowed: bool,
    /// Regex applied to the command output; named/indexed capture groups fan
    /// out the subtasks once per extracted tuple.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    /// Regex removing extracted tuples whose value matches.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter_exclude: String,
}

/// A conditional clause gating a task (or serving as an autotest).
///
/// Exactly one of `name` (a previously executed named task) or `variable`
/// (an artefact) may be set as the base; the `if*` predicates are checked
/// against it and the actions fire when every predicate holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct When {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_output_contains: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_output_not_contains: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_output_contains_re: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_output_not_contains_re: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub if_value_not: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_move: String,
    #[serde(default, with = "lenient_bool", skip_serializing_if = "is_false")]
    pub on_exit: bool,
}

impl TaskFile {
    /// Read and parse a task file.
    pub fn load(path: &Path) -> Result<TaskFile> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read task file '{}'", path.display()))?;
        let file: TaskFile = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse task file '{}'", path.display()))?;
        Ok(file)
    }

    /// Write the (possibly mutated) task file back, pretty-printed with
    /// 4-space indentation.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .with_context(|| format!("cannot serialize task file '{}'", path.display()))?;
        buf.push(b'\n');
        fs::write(path, buf)
            .with_context(|| format!("cannot write task file '{}'", path.display()))
    }

    /// Structural checks that must hold before anything talks to a device.
    pub fn validate(&self) -> Result<(), ErrorCode> {
        if self.host.is_empty() {
            return Err(ErrorCode::HostNotSet);
        }
        if self.tasks.is_empty() {
            return Err(ErrorCode::NoTasks);
        }
        Ok(())
    }

    /// The default timeout for tasks that do not set their own: the file
    /// settings value when present and non-zero, the system default otherwise.
    pub fn default_timeout(&self) -> i64 {
        match &self.settings {
            Some(settings) if settings.timeout != 0 => settings.timeout,
            _ => DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Integer scalar that tolerates string encoding on input ("30" or 30) and is
/// always written back as a string.
mod lenient_int {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        struct LenientInt;

        impl<'de> Visitor<'de> for LenientInt {
            type Value = i64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or a string holding an integer")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
                i64::try_from(v).map_err(|_| E::custom("integer out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
                v.trim().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(LenientInt)
    }
}

/// Boolean scalar that tolerates string encoding on input ("true" or true)
/// and is always written back as a string.
mod lenient_bool {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        struct LenientBool;

        impl<'de> Visitor<'de> for LenientBool {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean or a string holding a boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                v.trim().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(LenientBool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file() {
        let file: TaskFile = serde_json::from_str(
            r#"{"host": "core-sw1", "tasks": [{"command": "show version", "params": {}}]}"#,
        )
        .unwrap();
        assert_eq!(file.host, "core-sw1");
        assert_eq!(file.tasks.len(), 1);
        assert_eq!(file.tasks[0].command, "show version");
        assert!(file.validate().is_ok());
    }

    #[test]
    fn tolerates_string_encoded_scalars() {
        let file: TaskFile = serde_json::from_str(
            r#"{
                "host": "h",
                "settings": {"timeout": "45"},
                "tasks": [{
                    "command": "show run",
                    "params": {
                        "timeout": "5",
                        "onErrorContinue": "true",
                        "promptChangeAllowed": true
                    }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(file.default_timeout(), 45);
        let params = &file.tasks[0].params;
        assert_eq!(params.timeout, 5);
        assert!(params.on_error_continue);
        assert!(params.prompt_change_allowed);
        assert!(!params.command_repeat_allowed);
    }

    #[test]
    fn scalars_write_back_as_strings() {
        let mut task = Task {
            command: "reload".into(),
            ..Task::default()
        };
        task.params.timeout = 30;
        task.params.on_error_continue = true;
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains(r#""timeout":"30""#));
        assert!(json.contains(r#""onErrorContinue":"true""#));
        // false/zero params are omitted entirely
        assert!(!json.contains("promptChangeAllowed"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let file: TaskFile = serde_json::from_str(
            r#"{"host": "h", "operator": "jdoe", "tasks": [{"command": "x", "ticket": 42}]}"#,
        )
        .unwrap();
        assert_eq!(file.host, "h");
    }

    #[test]
    fn validation_requires_host_and_tasks() {
        let no_host: TaskFile =
            serde_json::from_str(r#"{"tasks": [{"command": "x"}]}"#).unwrap();
        assert_eq!(no_host.validate(), Err(ErrorCode::HostNotSet));

        let no_tasks: TaskFile = serde_json::from_str(r#"{"host": "h"}"#).unwrap();
        assert_eq!(no_tasks.validate(), Err(ErrorCode::NoTasks));
    }

    #[test]
    fn default_timeout_falls_back_to_system_value() {
        let file = TaskFile {
            host: "h".into(),
            ..TaskFile::default()
        };
        assert_eq!(file.default_timeout(), DEFAULT_TIMEOUT_SECS);

        let zeroed = TaskFile {
            settings: Some(Settings { timeout: 0 }),
            ..file
        };
        assert_eq!(zeroed.default_timeout(), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn when_clause_round_trips_camel_case() {
        let when: When = serde_json::from_str(
            r#"{"name": "probe", "ifStatus": "success", "onMove": "tail", "onExit": "false"}"#,
        )
        .unwrap();
        assert_eq!(when.name, "probe");
        assert_eq!(when.if_status, "success");
        assert_eq!(when.on_move, "tail");
        assert!(!when.on_exit);

        let json = serde_json::to_string(&when).unwrap();
        assert!(json.contains(r#""ifStatus":"success""#));
        assert!(json.contains(r#""onMove":"tail""#));
    }

    #[test]
    fn save_pretty_prints_with_four_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        let file = TaskFile {
            host: "h".into(),
            tasks: vec![Task {
                command: "show clock".into(),
                ..Task::default()
            }],
            ..TaskFile::default()
        };
        file.save(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("    \"host\": \"h\""));

        let reread = TaskFile::load(&path).unwrap();
        assert_eq!(reread.tasks[0].command, "show clock");
    }
}
