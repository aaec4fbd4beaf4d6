//! PR-level meta review.
//!
//! Many per-file results have to fit one prompt no matter how large the PR
//! is, so everything is compacted first: findings are ranked by severity
//! and capped per file, files are capped, and the cross-file diff is
//! rebuilt from non-test source files only. The model's answer stays
//! narrative markdown; the aggregate synthesizes heterogeneous inputs and
//! has no fixed schema to parse.

use anyhow::Result;
use serde::Serialize;

use crate::budget::{derive_prompt_budget, BlockLimits, PromptBudget};
use crate::config::MetaConfig;
use crate::domain::llm::LlmRequest;
use crate::domain::prompt::META_REVIEW_PROMPT;
use crate::review::{build_diagnostics, issue_json_for_prompt, ReviewEngine, REVIEW_TEMPERATURE};
use crate::session::{lock_session, ChangedFile, InFlightGuard, SharedSession};
use crate::types::{FileReviewResult, MetaReviewResult, SeveritySummary};

/// One finding, reduced to what the meta prompt needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducedFinding {
    pub file_path: String,
    pub severity: crate::types::Severity,
    pub category: String,
    pub title: String,
    pub problem: String,
}

/// Per-file compaction result fed to the meta prompt as JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactFileReview {
    pub file_path: String,
    pub top_findings: Vec<ReducedFinding>,
    pub severity_summary: SeveritySummary,
}

/// Sort findings blocker-first, keep the top `max_findings_per_file`,
/// reduce each to its essentials, and drop files that end up empty.
pub fn compact_file_reviews(
    results: &[FileReviewResult],
    config: &MetaConfig,
) -> Vec<CompactFileReview> {
    results
        .iter()
        .take(config.max_files)
        .filter_map(|result| {
            let structured = result.structured.as_ref()?;

            let mut findings = structured.findings.clone();
            findings.sort_by_key(|f| f.severity);

            let top_findings: Vec<ReducedFinding> = findings
                .into_iter()
                .take(config.max_findings_per_file)
                .map(|f| ReducedFinding {
                    file_path: result.file_path.clone(),
                    severity: f.severity,
                    category: f.category,
                    title: f.title,
                    problem: f.problem,
                })
                .collect();

            if top_findings.is_empty() {
                return None;
            }

            // trust the structured summary when it carries counts; recount
            // from the reduced findings otherwise
            let severity_summary = if structured.summary.total() > 0 {
                structured.summary
            } else {
                let mut summary = SeveritySummary::default();
                for f in &top_findings {
                    summary.bump(f.severity);
                }
                summary
            };

            Some(CompactFileReview {
                file_path: result.file_path.clone(),
                top_findings,
                severity_summary,
            })
        })
        .collect()
}

/// Cross-file structural context for the meta prompt: every non-test
/// source file's cached diff under a FILE header. Test-tree paths are
/// excluded; their detail lives in the per-file findings already.
pub fn compact_diff(changed_files: &[ChangedFile]) -> String {
    let mut parts = Vec::new();
    for file in changed_files {
        let path = file.path.trim();
        if path.is_empty() || path.starts_with("src/test") || path.contains("/src/test/") {
            continue;
        }
        let header = format!("FILE: {path}");
        match file.diff_text.as_deref().map(str::trim) {
            Some(diff) if !diff.is_empty() => parts.push(format!("{header}\n{diff}")),
            // explicit placeholder so the model knows the file was considered
            _ => parts.push(format!("{header}\n")),
        }
    }
    parts.join("\n\n")
}

impl ReviewEngine {
    /// Aggregate all completed file reviews into one PR-level verdict.
    /// Requires at least one completed review; rejected while another
    /// operation holds the session.
    pub async fn run_meta_review(&self, session: &SharedSession) -> Result<MetaReviewResult> {
        let _guard = InFlightGuard::acquire(session)?;

        let (user_prompt, model, language, issue, completed, files_snapshot) = {
            let s = lock_session(session);
            let completed: Vec<FileReviewResult> = s
                .reviews
                .values()
                .filter(|r| r.status.is_complete())
                .cloned()
                .collect();
            (
                s.prompt.clone(),
                s.model.clone(),
                s.language.clone(),
                s.issue.clone(),
                completed,
                s.files.clone(),
            )
        };

        if completed.is_empty() {
            anyhow::bail!("no completed file reviews; run at least one file review before the meta review");
        }

        let compacted = compact_file_reviews(&completed, &self.config.meta);
        let total_findings: usize = compacted.iter().map(|c| c.top_findings.len()).sum();
        let compacted_diff = compact_diff(&files_snapshot);

        let budget_cfg = &self.config.budget;
        let max_chars = derive_prompt_budget(
            budget_cfg.input_token_limit,
            budget_cfg.meta_max_output_tokens,
            META_REVIEW_PROMPT,
        );

        let mut budget = PromptBudget::new(max_chars);

        budget.append_block(
            "USER_INSTRUCTIONS",
            "USER INSTRUCTIONS:",
            &user_prompt,
            BlockLimits::default(),
        );

        let findings_json =
            serde_json::to_string_pretty(&compacted).unwrap_or_else(|_| "[]".to_string());
        let meta_raw = format!(
            "HUMAN READABLE MARKDOWN LANGUAGE: {language}\n\nJIRA-ISSUE:\n{}\n\nFILE REVIEW FINDINGS (structured, compact):\n{findings_json}",
            issue_json_for_prompt(&issue)
        );
        budget.append_block(
            "META",
            "",
            &meta_raw,
            BlockLimits {
                // the findings are the payload: give them everything left
                hard_cap: max_chars,
                min_keep: 1_500,
                marker: Some(format!(
                    "... META REVIEW INPUT TRUNCATED (limit ~{} tokens) ...",
                    budget_cfg.input_token_limit
                )),
            },
        );

        budget.append_block(
            "COMPACT_DIFF",
            "CROSS-FILE DIFF (non-test source files):",
            &compacted_diff,
            BlockLimits {
                hard_cap: budget_cfg.diff_cap_chars,
                min_keep: 800,
                marker: Some("... CROSS-FILE DIFF TRUNCATED ...".into()),
            },
        );

        let bounded = budget.finish();

        let request = LlmRequest {
            model,
            system_prompt: META_REVIEW_PROMPT.to_string(),
            user_prompt: bounded.text,
            temperature: REVIEW_TEMPERATURE,
            max_output_tokens: budget_cfg.meta_max_output_tokens,
        };
        let response = self.llm.complete(&request).await?;

        Ok(MetaReviewResult {
            output_markdown: response.text.trim().to_string(),
            warnings: bounded.warnings,
            diagnostics: Some(build_diagnostics(
                &request,
                &response,
                budget_cfg.input_token_limit,
                budget_cfg.meta_max_output_tokens,
            )),
            files_considered: completed.len(),
            total_findings,
        })
    }
}
