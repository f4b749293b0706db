//! Markdown rendering of a finished build

use super::orchestrator::FeatureBuild;
use serde_json::{Map, Value};

const MAX_FILES_PER_SIDE: usize = 3;
const MAX_FILE_CHARS: usize = 500;
const MAX_ISSUES: usize = 5;

fn text<'a>(value: &'a Value, key: &str, default: &'a str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn files<'a>(code: &'a Map<String, Value>, side: &str) -> &'a [Value] {
    code.get(side)
        .and_then(|s| s.get("files"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn render_files(out: &mut String, title: &str, fence: &str, files: &[Value]) {
    if files.is_empty() {
        return;
    }
    out.push_str(&format!("### {}\n\n", title));
    for file in files.iter().take(MAX_FILES_PER_SIDE) {
        let path = text(file, "path", "unknown");
        let content: String = text(file, "content", "").chars().take(MAX_FILE_CHARS).collect();
        out.push_str(&format!("**{}**\n\n```{}\n{}...\n```\n\n", path, fence, content));
    }
}

/// Render architecture, code excerpts and the review summary
pub fn render(build: &FeatureBuild) -> String {
    let mut out = String::from("# Feature Implementation\n\n");

    if !build.architecture.is_empty() {
        out.push_str("## Architecture\n\n");
        let pretty = serde_json::to_string_pretty(&build.architecture).unwrap_or_default();
        out.push_str(&pretty);
        out.push_str("\n\n");
    }

    if !build.code.is_empty() {
        out.push_str("## Code\n\n");
        render_files(&mut out, "Backend", "python", files(&build.code, "backend"));
        render_files(&mut out, "Frontend", "typescript", files(&build.code, "frontend"));
    }

    if !build.review.is_empty() {
        out.push_str("## Code Review\n\n");

        let issues = build
            .review
            .get("issues")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if issues.is_empty() {
            out.push_str("✅ No major issues detected\n");
        } else {
            let high = issues
                .iter()
                .filter(|i| text(i, "severity", "") == "high")
                .count();
            if high > 0 {
                out.push_str(&format!("⚠️  **{} high-severity issues found**\n\n", high));
            }
            for issue in issues.iter().take(MAX_ISSUES) {
                out.push_str(&format!(
                    "- **[{}]** {}\n",
                    text(issue, "severity", "unknown").to_uppercase(),
                    text(issue, "description", "")
                ));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::LessonsBundle;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn build(code: Value, review: Value) -> FeatureBuild {
        FeatureBuild {
            status: "success".to_string(),
            architecture: object(json!({"backend": {"modules": ["todos"]}})),
            imports: Map::new(),
            ui_design: Map::new(),
            code: object(code),
            review: object(review),
            lessons_applied: LessonsBundle::empty("rust", None),
            records: Vec::new(),
        }
    }

    #[test]
    fn test_code_excerpts_are_limited() {
        let long = "x".repeat(800);
        let backend_files: Vec<Value> = (0..4)
            .map(|i| json!({"path": format!("app/f{}.py", i), "content": long}))
            .collect();
        let report = render(&build(
            json!({"backend": {"files": backend_files}, "frontend": {"files": []}}),
            json!({"issues": []}),
        ));

        assert!(report.starts_with("# Feature Implementation\n\n## Architecture\n\n"));
        assert!(report.contains("### Backend\n\n**app/f0.py**\n\n```python\n"));
        assert!(report.contains("**app/f2.py**"));
        assert!(!report.contains("**app/f3.py**"));
        assert!(report.contains(&format!("{}...\n```", "x".repeat(500))));
        assert!(!report.contains(&"x".repeat(501)));
        assert!(!report.contains("### Frontend"));
        assert!(report.ends_with("## Code Review\n\n✅ No major issues detected\n"));
    }

    #[test]
    fn test_review_summary() {
        let issues: Vec<Value> = (0..7)
            .map(|i| {
                json!({
                    "severity": if i < 2 { "high" } else { "low" },
                    "description": format!("issue {}", i)
                })
            })
            .collect();
        let report = render(&build(json!({}), json!({"issues": issues})));

        assert!(!report.contains("## Code\n\n"));
        assert!(report.contains("⚠️  **2 high-severity issues found**\n\n"));
        assert!(report.contains("- **[HIGH]** issue 0\n"));
        assert!(report.contains("- **[LOW]** issue 4\n"));
        assert!(!report.contains("issue 5"));
    }
}
