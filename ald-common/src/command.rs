//! Operator commands (spec.md §3, §4.5, §4.6).
//!
//! `parameters` arrives from the database as an untyped JSON bag; per
//! spec.md §9's re-architecture note ("Source treats `parameters` on
//! commands as an untyped bag"), it is coerced into a typed payload at
//! dispatcher entry rather than threaded through as `serde_json::Value`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// A command row as stored in `recipe_commands` (spec.md §9 open question
/// 3: this implementation normalizes on `recipe_commands` exclusively).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub command_type: String,
    pub parameters: serde_json::Value,
    pub machine_id: Option<String>,
    pub status: CommandStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Typed payload for `start_recipe`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRecipePayload {
    pub recipe_id: Uuid,
    #[serde(default)]
    pub operator_id: Option<String>,
}

/// Typed payload for `stop_recipe` (no required fields today, but kept as
/// a distinct type so the dispatcher's handler signatures stay uniform).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StopRecipePayload {}

/// Typed payload for `set_parameter`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetParameterPayload {
    pub parameter_id: String,
    pub value: f64,
}

/// The recognized command types (spec.md §4.6) plus their decoded payload.
#[derive(Debug, Clone)]
pub enum CommandPayload {
    StartRecipe(StartRecipePayload),
    StopRecipe(StopRecipePayload),
    SetParameter(SetParameterPayload),
}

impl CommandPayload {
    /// Decode `command_type` + `parameters` into a typed payload, or fail
    /// with `AldError::Validation` for an unknown type or malformed bag.
    pub fn decode(command_type: &str, parameters: &serde_json::Value) -> Result<Self, AldError> {
        match command_type {
            "start_recipe" => serde_json::from_value(parameters.clone())
                .map(CommandPayload::StartRecipe)
                .map_err(|e| AldError::Validation(format!("invalid start_recipe parameters: {e}"))),
            "stop_recipe" => Ok(CommandPayload::StopRecipe(StopRecipePayload::default())),
            "set_parameter" => serde_json::from_value(parameters.clone())
                .map(CommandPayload::SetParameter)
                .map_err(|e| AldError::Validation(format!("invalid set_parameter parameters: {e}"))),
            other => Err(AldError::Validation(format!(
                "unknown command type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_start_recipe() {
        let params = json!({ "recipe_id": Uuid::nil(), "operator_id": "op-1" });
        let payload = CommandPayload::decode("start_recipe", &params).unwrap();
        match payload {
            CommandPayload::StartRecipe(p) => {
                assert_eq!(p.recipe_id, Uuid::nil());
                assert_eq!(p.operator_id.as_deref(), Some("op-1"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_command_type() {
        let err = CommandPayload::decode("reboot_machine", &json!({})).unwrap_err();
        assert!(matches!(err, AldError::Validation(_)));
    }

    #[test]
    fn rejects_malformed_set_parameter() {
        let err = CommandPayload::decode("set_parameter", &json!({ "value": "not a number" }))
            .unwrap_err();
        assert!(matches!(err, AldError::Validation(_)));
    }
}
