//! Collaborator wire contract
//!
//! Every collaborator service speaks the same envelope: a `POST` to
//! `{endpoint}/tools/call` carrying a tool name and an argument object, answered
//! by either `{"result": ...}` or `{"error": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// The five collaborator roles of the build pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollaboratorRole {
    Architect,
    StackResearch,
    Designer,
    Coder,
    Auditor,
}

impl CollaboratorRole {
    /// All roles in pipeline order
    pub const ALL: [CollaboratorRole; 5] = [
        Self::Architect,
        Self::StackResearch,
        Self::Designer,
        Self::Coder,
        Self::Auditor,
    ];

    /// Stable role name used in configuration and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::StackResearch => "stack-research",
            Self::Designer => "designer",
            Self::Coder => "coder",
            Self::Auditor => "auditor",
        }
    }

    /// Tool invoked on the collaborator for this role
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Architect => "propose_architecture",
            Self::StackResearch => "get_stack_snapshot",
            Self::Designer => "design_ui",
            Self::Coder => "generate_code",
            Self::Auditor => "review_code",
        }
    }

    /// Minimal valid object substituted when a collaborator answers with
    /// something that is not a usable JSON object.
    pub fn default_object(&self) -> Value {
        match self {
            Self::Architect => json!({
                "backend": {
                    "modules": [],
                    "apis": [],
                    "models": [],
                    "services": []
                },
                "frontend": {
                    "routes": [],
                    "components": [],
                    "state": {},
                    "layout_structure": {}
                },
                "integration_points": [],
                "trade_offs": []
            }),
            Self::StackResearch => json!({
                "libraries": {},
                "total_libraries": 0,
                "successful": 0
            }),
            Self::Designer => json!({
                "screens": [],
                "component_hierarchy": {},
                "design_tokens": {}
            }),
            Self::Coder => json!({
                "backend": { "files": [] },
                "frontend": { "files": [] },
                "tests": []
            }),
            Self::Auditor => json!({
                "issues": [],
                "metrics": {},
                "corrected_code": {},
                "recommendations": []
            }),
        }
    }
}

impl fmt::Display for CollaboratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollaboratorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "architect" => Ok(Self::Architect),
            "stack-research" => Ok(Self::StackResearch),
            "designer" => Ok(Self::Designer),
            "coder" => Ok(Self::Coder),
            "auditor" => Ok(Self::Auditor),
            other => Err(format!("unknown collaborator role: {}", other)),
        }
    }
}

/// Body of `POST {endpoint}/tools/call`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Create a request for the given role's pipeline tool
    pub fn for_role(role: CollaboratorRole, arguments: Value) -> Self {
        Self::new(role.tool_name(), arguments)
    }
}

/// Response envelope returned by a collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResponse {
    /// Successful response
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Normalize a collaborator `result` into a JSON object.
///
/// - an object passes through, unless it is exactly `{"content": <object>}`,
///   which unwraps to the inner object
/// - a string holding a JSON object is parsed
/// - anything else is wrapped as `{"content": <text>}`
pub fn normalize_result(result: Value) -> Map<String, Value> {
    match result {
        Value::Object(mut map) => {
            if map.len() == 1 && matches!(map.get("content"), Some(Value::Object(_))) {
                if let Some(Value::Object(inner)) = map.remove("content") {
                    return inner;
                }
            }
            map
        }
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => content_only(Value::String(text)),
        },
        Value::Null => content_only(Value::String(String::new())),
        other => content_only(Value::String(other.to_string())),
    }
}

fn content_only(value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("content".to_string(), value);
    map
}
