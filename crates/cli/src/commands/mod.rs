pub mod config;
pub mod explain;
pub mod reconcile;

use markup_core::config::{AppConfig, LoadOptions};
use markup_core::errors::ApplicationError;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    hint: Option<String>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }

    pub fn failure(command: &str, error: ApplicationError) -> Self {
        let error_class = error.error_class();
        let exit_code = error.exit_code();
        let message = error.to_string();
        let interface = error.into_interface(command);

        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message,
            hint: Some(interface.user_message().to_string()),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Loads the effective config once per invocation. A failure is already the
/// command's result.
pub fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| CommandResult::failure(command, error.into()))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
