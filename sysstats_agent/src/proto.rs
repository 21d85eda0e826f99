//! Inbound client commands.

use serde_json::{Map, Value};
use thiserror::Error;

/// Frames of this many bytes or more are ignored.
pub const MAX_COMMAND_BYTES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListProcesses,
    Storage,
    SystemInfo,
    ListCgi,
    Monitor(String),
    StopMonitor,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("command too long ({0} bytes)")]
    TooLong(usize),
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command is not a JSON object")]
    NotAnObject,
    #[error("no recognized field in command")]
    Unrecognized,
}

/// Parse one text frame.
///
/// When several fields are present the first match wins, in this order:
/// `list_processes`, `storage`, `system_info`, `list_cgi`, `monitor`.
/// A field with the wrong type is treated as absent.
pub fn parse_command(text: &str) -> Result<Command, CommandError> {
    if text.is_empty() {
        return Err(CommandError::Empty);
    }
    if text.len() >= MAX_COMMAND_BYTES {
        return Err(CommandError::TooLong(text.len()));
    }
    let value: Value = serde_json::from_str(text)?;
    let obj = value.as_object().ok_or(CommandError::NotAnObject)?;

    if flag(obj, "list_processes") {
        return Ok(Command::ListProcesses);
    }
    if flag(obj, "storage") {
        return Ok(Command::Storage);
    }
    if flag(obj, "system_info") {
        return Ok(Command::SystemInfo);
    }
    if flag(obj, "list_cgi") {
        return Ok(Command::ListCgi);
    }
    match obj.get("monitor").and_then(Value::as_str) {
        Some("") => Ok(Command::StopMonitor),
        Some(name) => Ok(Command::Monitor(name.to_owned())),
        None => Err(CommandError::Unrecognized),
    }
}

fn flag(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_and_stop() {
        assert_eq!(
            parse_command(r#"{"monitor":"nginx"}"#).unwrap(),
            Command::Monitor("nginx".into())
        );
        assert_eq!(parse_command(r#"{"monitor":""}"#).unwrap(), Command::StopMonitor);
    }

    #[test]
    fn one_shot_flags() {
        assert_eq!(parse_command(r#"{"list_processes":true}"#).unwrap(), Command::ListProcesses);
        assert_eq!(parse_command(r#"{"storage":true}"#).unwrap(), Command::Storage);
        assert_eq!(parse_command(r#"{"system_info":true}"#).unwrap(), Command::SystemInfo);
        assert_eq!(parse_command(r#"{"list_cgi":true}"#).unwrap(), Command::ListCgi);
    }

    #[test]
    fn precedence_when_fields_combine() {
        let all = r#"{"monitor":"x","list_cgi":true,"system_info":true,"storage":true,"list_processes":true}"#;
        assert_eq!(parse_command(all).unwrap(), Command::ListProcesses);
        let some = r#"{"monitor":"x","list_cgi":true,"storage":true}"#;
        assert_eq!(parse_command(some).unwrap(), Command::Storage);
        let last = r#"{"monitor":"x","list_processes":false}"#;
        assert_eq!(parse_command(last).unwrap(), Command::Monitor("x".into()));
    }

    #[test]
    fn wrong_types_count_as_absent() {
        assert!(matches!(
            parse_command(r#"{"list_processes":"yes"}"#),
            Err(CommandError::Unrecognized)
        ));
        assert!(matches!(
            parse_command(r#"{"monitor":42}"#),
            Err(CommandError::Unrecognized)
        ));
        assert_eq!(
            parse_command(r#"{"storage":1,"monitor":"sshd"}"#).unwrap(),
            Command::Monitor("sshd".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_command(""), Err(CommandError::Empty)));
        assert!(matches!(parse_command("{not json"), Err(CommandError::Malformed(_))));
        assert!(matches!(parse_command("[1,2]"), Err(CommandError::NotAnObject)));
        assert!(matches!(parse_command("{}"), Err(CommandError::Unrecognized)));
    }

    #[test]
    fn length_limit_is_exclusive() {
        let name = "a".repeat(MAX_COMMAND_BYTES - r#"{"monitor":""}"#.len() - 1);
        let ok = format!(r#"{{"monitor":"{name}"}}"#);
        assert_eq!(ok.len(), MAX_COMMAND_BYTES - 1);
        assert!(parse_command(&ok).is_ok());

        let long = format!(r#"{{"monitor":"{name}a"}}"#);
        assert!(matches!(parse_command(&long), Err(CommandError::TooLong(128))));
    }
}
