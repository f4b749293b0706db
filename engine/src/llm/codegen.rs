//! One-shot code generation outside the pipeline
//!
//! A description, target language and style are shaped into a prompt for the
//! `code` route. Without credentials a fixed starter snippet is returned, and
//! when every backend fails the error comes back as a code comment.

use super::router::TaskRouter;
use super::{CallOptions, Message, TaskCategory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const CODE_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    #[default]
    Python,
    Typescript,
    Javascript,
}

impl CodeLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Typescript => "typescript",
            Self::Javascript => "javascript",
        }
    }

    /// Starter snippet used when no backend can be reached
    pub fn offline_snippet(&self) -> &'static str {
        match self {
            Self::Python => "def main():\n    print('hello')\n\nif __name__ == '__main__':\n    main()",
            Self::Typescript => "export function sum(a:number,b:number){return a+b}",
            Self::Javascript => "function sum(a,b){return a+b}",
        }
    }
}

impl fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "typescript" | "ts" => Ok(Self::Typescript),
            "javascript" | "js" => Ok(Self::Javascript),
            other => Err(format!(
                "unknown language '{}'. Must be one of: python, typescript, javascript",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStyle {
    #[default]
    Modern,
    Minimal,
    Verbose,
}

impl CodeStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Minimal => "minimal",
            Self::Verbose => "verbose",
        }
    }
}

impl fmt::Display for CodeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modern" => Ok(Self::Modern),
            "minimal" => Ok(Self::Minimal),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!(
                "unknown style '{}'. Must be one of: modern, minimal, verbose",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub description: String,
    pub language: CodeLanguage,
    pub style: CodeStyle,
}

impl CodeRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            language: CodeLanguage::default(),
            style: CodeStyle::default(),
        }
    }

    pub fn with_language(mut self, language: CodeLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn with_style(mut self, style: CodeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn messages(&self) -> [Message; 2] {
        [
            Message::system(format!(
                "You are an expert {} developer. Generate {} code that follows best practices.",
                self.language, self.style
            )),
            Message::user(format!("Generate code for: {}", self.description)),
        ]
    }
}

/// Generate code on the `code` route
///
/// Never fails: an unconfigured route yields the language's starter snippet
/// and exhaustion yields a comment carrying the error.
pub async fn quick_code(router: &TaskRouter, request: &CodeRequest) -> String {
    if !router.can_serve(TaskCategory::Code) {
        tracing::warn!("No configured backend for code; returning starter snippet");
        return request.language.offline_snippet().to_string();
    }

    let options = CallOptions::default().with_temperature(CODE_TEMPERATURE);
    match router
        .call(TaskCategory::Code, &request.messages(), &options)
        .await
    {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("All backends failed for quick code: {}", e);
            format!("// Error generating code: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{router_with, ScriptedBackend};

    #[test]
    fn test_prompt_shaping() {
        let request = CodeRequest::new("debounce a function")
            .with_language(CodeLanguage::Typescript)
            .with_style(CodeStyle::Minimal);
        let [system, user] = request.messages();
        assert_eq!(
            system.content,
            "You are an expert typescript developer. Generate minimal code that follows best practices."
        );
        assert_eq!(user.content, "Generate code for: debounce a function");
    }

    #[test]
    fn test_language_and_style_parsing() {
        assert_eq!("TS".parse::<CodeLanguage>(), Ok(CodeLanguage::Typescript));
        assert_eq!("verbose".parse::<CodeStyle>(), Ok(CodeStyle::Verbose));
        assert!("cobol".parse::<CodeLanguage>().is_err());
    }

    #[tokio::test]
    async fn test_generated_code_returned() {
        let backend = ScriptedBackend::answering("def add(a, b):\n    return a + b");
        let code = quick_code(&router_with(&backend), &CodeRequest::new("add two numbers")).await;
        assert!(code.starts_with("def add"));
        assert_eq!(backend.calls(), 1);
        assert_eq!(backend.user_prompts(), vec!["Generate code for: add two numbers"]);
    }

    #[tokio::test]
    async fn test_exhaustion_becomes_comment() {
        let code = quick_code(
            &router_with(&ScriptedBackend::failing()),
            &CodeRequest::new("anything"),
        )
        .await;
        assert_eq!(code, "// Error generating code: All backends exhausted for category code");
    }
}
