//! Document analysis: title and summary generation.
//!
//! [`Analyzer::analyze`] sends (truncated) document text to a
//! [`TextGenerator`] and parses a JSON `{ "title", "summary" }` answer.
//! It never returns an error: any failure along the way produces a
//! degraded [`AnalysisResult`] whose title is the filename and whose
//! summary explains what went wrong.
//!
//! [`Analyzer::analyze_by_metadata_only`] is the offline fallback used when
//! no text could be extracted.

use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{AnalysisConfig, LlmConfig};
use crate::llm::{CompletionRequest, TextGenerator};
use crate::models::AnalysisResult;

/// Appended to content cut at `max_content_chars`.
pub const TRUNCATION_MARKER: &str = "\n... [content truncated]";

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that analyzes documents and \
extracts key information. Always respond with valid JSON.";

/// Tunables for [`Analyzer::analyze`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub max_content_chars: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            max_content_chars: 8000,
            temperature: 0.3,
            max_output_tokens: 500,
        }
    }
}

impl AnalyzerSettings {
    pub fn from_config(analysis: &AnalysisConfig, llm: &LlmConfig) -> Self {
        Self {
            max_content_chars: analysis.max_content_chars,
            temperature: llm.temperature,
            max_output_tokens: llm.max_output_tokens,
        }
    }
}

pub struct Analyzer {
    generator: Arc<dyn TextGenerator>,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: AnalyzerSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Title and summary for `text`. Always display-ready.
    pub async fn analyze(&self, filename: &str, text: &str) -> AnalysisResult {
        let content = truncate_content(text, self.settings.max_content_chars);
        let request = CompletionRequest {
            system: SYSTEM_INSTRUCTION.to_string(),
            prompt: build_prompt(filename, &content),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            json_response: true,
        };

        debug!(
            file = filename,
            model = self.generator.model_name(),
            chars = content.len(),
            "requesting analysis"
        );

        let raw = match self.generator.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = filename, error = %format!("{:#}", e), "analysis request failed");
                return AnalysisResult::degraded(filename, format!("{:#}", e));
            }
        };

        match parse_structured_response(&raw) {
            Ok(result) => result,
            Err(reason) => {
                warn!(file = filename, %reason, "unusable analysis response");
                AnalysisResult::degraded(filename, reason)
            }
        }
    }

    /// Offline result used when no text is available. Deterministic.
    pub fn analyze_by_metadata_only(filename: &str, format_tag: &str) -> AnalysisResult {
        let format = if format_tag.is_empty() {
            "unknown"
        } else {
            format_tag
        };
        AnalysisResult {
            title: filename.to_string(),
            summary: format!(
                "File type: {}. Content analysis not available for this file type.",
                format
            ),
        }
    }
}

/// Cut `text` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was dropped.
pub fn truncate_content(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}{}", &text[..cut], TRUNCATION_MARKER)),
        None => Cow::Borrowed(text),
    }
}

pub fn build_prompt(filename: &str, content: &str) -> String {
    format!(
        r#"Analyze the following document and provide:
1. A concise title that best represents the document's content
2. A one-paragraph summary (3-5 sentences) describing the key points and purpose of the document

Document filename: {filename}

Document content:
{content}

Please respond in the following JSON format:
{{
  "title": "Your extracted or generated title here",
  "summary": "Your one-paragraph summary here"
}}"#
    )
}

#[derive(Deserialize)]
struct StructuredAnswer {
    title: Option<String>,
    summary: Option<String>,
}

/// Parse a model answer into title + summary. The error is a
/// human-readable reason.
fn parse_structured_response(raw: &str) -> Result<AnalysisResult, String> {
    let body = strip_code_fence(raw);
    let answer: StructuredAnswer = serde_json::from_str(body)
        .map_err(|e| format!("response was not valid JSON ({})", e))?;

    let title = non_blank(answer.title).ok_or("response did not include a title")?;
    let summary = non_blank(answer.summary).ok_or("response did not include a summary")?;
    Ok(AnalysisResult { title, summary })
}

fn non_blank(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Remove a surrounding ```` ``` ```` fence and its optional language tag
/// line (```` ```json ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let inner = match inner.split_once('\n') {
        Some((first, body)) if is_format_tag(first) => body,
        _ => inner,
    };
    let inner = inner.trim();
    // Same-line tag without a newline: ```json{"title": ...}```
    match inner.strip_prefix("json") {
        Some(body) if body.trim_start().starts_with('{') => body.trim(),
        _ => inner,
    }
}

fn is_format_tag(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
