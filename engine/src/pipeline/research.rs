//! Single-library research through the stack-research collaborator

use super::collaborator::{Collaborator, CollaboratorError};
use crate::retry::RetryPolicy;
use sdk::types::CollaboratorRole;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Tool answering one library at a time, next to the batch snapshot tool
pub const IMPORTS_TOOL: &str = "get_imports";

const MAX_IMPORTS: usize = 5;
const DEFAULT_FENCE: &str = "typescript";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportLine {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub import_line: String,
}

/// What the collaborator knows about one library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryResearch {
    pub library: String,
    #[serde(default = "unknown_version")]
    pub recommended_version: String,
    #[serde(default)]
    pub imports: Vec<ImportLine>,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn unknown_version() -> String {
    "N/A".to_string()
}

impl LibraryResearch {
    /// Read a collaborator result, keeping whatever fields parse
    ///
    /// Anything that is not an object yields an empty entry for `library`.
    pub fn from_result(library: &str, result: Value) -> Self {
        let mut object = match result {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if !object.get("library").is_some_and(Value::is_string) {
            object.insert("library".to_string(), Value::String(library.to_string()));
        }

        serde_json::from_value(Value::Object(object)).unwrap_or_else(|e| {
            tracing::warn!("Unreadable research for {}: {}", library, e);
            Self {
                library: library.to_string(),
                recommended_version: unknown_version(),
                imports: Vec::new(),
                notes: Vec::new(),
            }
        })
    }

    /// Markdown with the version, the first five imports and the notes
    ///
    /// Import snippets are fenced with `context`, or `typescript` when empty.
    pub fn render(&self, context: &str) -> String {
        let fence = if context.trim().is_empty() {
            DEFAULT_FENCE
        } else {
            context.trim()
        };

        let mut out = format!(
            "# {}\n\n**Version:** {}\n\n",
            self.library, self.recommended_version
        );

        if !self.imports.is_empty() {
            out.push_str("## Imports\n\n");
            for import in self.imports.iter().take(MAX_IMPORTS) {
                out.push_str(&format!("```{}\n{}\n```\n\n", fence, import.import_line));
            }
        }

        if !self.notes.is_empty() {
            out.push_str("## Notes\n\n");
            for note in &self.notes {
                out.push_str(&format!("- {}\n", note));
            }
        }

        out
    }
}

/// Ask the stack-research collaborator about one library
pub async fn research_library(
    collaborator: &dyn Collaborator,
    policy: &RetryPolicy,
    library: &str,
    context: &str,
) -> Result<LibraryResearch, CollaboratorError> {
    let arguments = json!({ "library": library, "context": context });
    let label = format!("{}/{}", CollaboratorRole::StackResearch, IMPORTS_TOOL);

    let result = policy
        .run(&label, |_| {
            collaborator.call_tool(CollaboratorRole::StackResearch, IMPORTS_TOOL, arguments.clone())
        })
        .await?;

    Ok(LibraryResearch::from_result(library, result))
}
