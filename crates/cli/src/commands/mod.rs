pub mod bundle;
pub mod config;
pub mod matching;
pub mod plan;

use std::process::ExitCode;

use serde::Serialize;

/// Rendered command output plus the process exit code.
///
/// Exit codes: 0 success, 1 output could not be rendered, 2 bad input or configuration,
/// 3 lookup or workflow failure.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    command: &'a str,
    status: &'static str,
    error_class: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct BodyPayload<'a, T> {
    command: &'a str,
    status: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

impl CommandResult {
    pub fn text(output: String) -> Self {
        Self { exit_code: 0, output }
    }

    /// Successful run; `body` fields are flattened next to `command` and `status`.
    pub fn with_body<T>(command: &str, body: &T) -> Self
    where
        T: Serialize,
    {
        match serde_json::to_string_pretty(&BodyPayload { command, status: "ok", body }) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let message = message.into();
        let payload = ErrorPayload { command, status: "error", error_class, message: &message };
        let output = serde_json::to_string(&payload).unwrap_or_else(|_| {
            format!(
                "{{\"command\":{command:?},\"status\":\"error\",\"error_class\":{error_class:?}}}"
            )
        });
        Self { exit_code, output }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn exit(&self) -> ExitCode {
        ExitCode::from(self.exit_code)
    }
}
