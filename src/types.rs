use serde::{Deserialize, Serialize};

/// Lifecycle of a file review within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Running,
    Done,
    DoneWithWarnings,
    Failed,
    Ignored,
}

impl ReviewStatus {
    /// Statuses whose results feed the meta review.
    pub fn is_complete(self) -> bool {
        matches!(self, ReviewStatus::Done | ReviewStatus::DoneWithWarnings)
    }
}

/// Finding severity. Declaration order is the sort rank: blocker first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocker,
    Major,
    Minor,
    Nit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    #[serde(default)]
    pub blocker: u32,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub nit: u32,
}

impl SeveritySummary {
    pub fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Blocker => self.blocker += 1,
            Severity::Major => self.major += 1,
            Severity::Minor => self.minor += 1,
            Severity::Nit => self.nit += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.blocker + self.major + self.minor + self.nit
    }
}

/// One finding from the model's fenced JSON block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFinding {
    #[serde(default)]
    pub id: String,
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub line_start: Option<u32>,
    #[serde(default)]
    pub line_end: Option<u32>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub recommendation: String,
}

/// The machine-readable half of a file review response. `findings` and
/// `summary` are required; absence means the response failed to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReview {
    #[serde(default)]
    pub file_path: String,
    pub findings: Vec<ReviewFinding>,
    pub summary: SeveritySummary,
    #[serde(default)]
    pub missing_context: Vec<String>,
}

/// Token accounting as reported by the provider, normalized across both
/// calling conventions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestChars {
    pub system: usize,
    pub user: usize,
    pub total: usize,
}

/// Operator-facing accounting for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDiagnostics {
    pub model: String,
    pub mode: String,
    pub duration_ms: u64,
    pub request_chars: RequestChars,
    pub estimated_input_tokens: RequestChars,
    pub input_limit_tokens: usize,
    pub max_output_tokens: usize,
    pub usage: Option<LlmUsage>,
    pub response_id: Option<String>,
}

/// Counts of auxiliary context that made it into the prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextMeta {
    pub tests: usize,
    pub sources: usize,
    pub migrations: usize,
    pub file_content: bool,
}

/// Result record for a single file review. Created when the review runs;
/// only the status transitions after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReviewResult {
    pub file_path: String,
    pub status: ReviewStatus,
    pub output_markdown: String,
    pub structured: Option<StructuredReview>,
    pub severity_summary: SeveritySummary,
    pub warnings: Vec<String>,
    pub diagnostics: Option<LlmDiagnostics>,
    pub context: ContextMeta,
}

impl FileReviewResult {
    /// Record for a review that died before producing model output, so the
    /// session always has something visible for the file.
    pub fn failed(file_path: &str, message: String) -> Self {
        Self {
            file_path: file_path.to_string(),
            status: ReviewStatus::Failed,
            output_markdown: message,
            structured: None,
            severity_summary: SeveritySummary::default(),
            warnings: Vec::new(),
            diagnostics: None,
            context: ContextMeta::default(),
        }
    }
}

/// Aggregate PR-level verdict. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaReviewResult {
    pub output_markdown: String,
    pub warnings: Vec<String>,
    pub diagnostics: Option<LlmDiagnostics>,
    pub files_considered: usize,
    pub total_findings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_blocker_first() {
        let mut sevs = vec![Severity::Nit, Severity::Blocker, Severity::Major, Severity::Minor];
        sevs.sort();
        assert_eq!(
            sevs,
            vec![Severity::Blocker, Severity::Major, Severity::Minor, Severity::Nit]
        );
    }

    #[test]
    fn structured_review_requires_findings_and_summary() {
        let ok = r#"{"filePath":"a.java","findings":[],"summary":{"blocker":1}}"#;
        let parsed: StructuredReview = serde_json::from_str(ok).unwrap();
        assert_eq!(parsed.summary.blocker, 1);
        assert_eq!(parsed.summary.nit, 0);

        let missing_summary = r#"{"filePath":"a.java","findings":[]}"#;
        assert!(serde_json::from_str::<StructuredReview>(missing_summary).is_err());

        let missing_findings = r#"{"filePath":"a.java","summary":{}}"#;
        assert!(serde_json::from_str::<StructuredReview>(missing_findings).is_err());
    }
}
