//! Per-file review orchestration.
//!
//! One review run is strictly sequential: resolve the file's diff segment,
//! decide whether the full file content is worth fetching, gather related
//! context, assemble a bounded prompt, call the model once at low
//! temperature, and parse the fenced JSON block out of its answer. A parse
//! failure is a `failed` result with the raw markdown preserved, never an
//! exception; provider failures on the diff fetch or the model call
//! propagate after a failed record is written, so the session always shows
//! something for the file.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::budget::{clamp_head_tail, derive_prompt_budget, estimate_tokens, BlockLimits, PromptBudget};
use crate::config::AppConfig;
use crate::context::{is_migration_file, is_source_file, is_test_file, ContextBundle, ContextLoader, TextRef};
use crate::diff::{ext_of, find_diff_for_path, normalize_path, split_unified_diff};
use crate::domain::jira::{IssueSnapshot, IssueTracker};
use crate::domain::llm::{LlmClient, LlmRequest, LlmResponse};
use crate::domain::prompt::{
    FILE_REVIEW_PROMPT, MIGRATION_FILE_HINTS, SOURCE_FILE_HINTS, TEST_FILE_HINTS,
};
use crate::domain::vcs::VcsProvider;
use crate::error::AssayError;
use crate::session::{
    lock_session, ChangedFile, InFlightGuard, SessionState, SessionStore, SharedSession,
};
use crate::types::{
    ContextMeta, FileReviewResult, LlmDiagnostics, RequestChars, ReviewStatus, SeveritySummary,
    StructuredReview,
};

/// Reviews run at a fixed low temperature; determinism beats creativity.
pub const REVIEW_TEMPERATURE: f32 = 0.1;

const FILE_CONTENT_CLAMP_MARKER: &str = "... FILE CONTENT CLAMPED ...";

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub pr_url: String,
    pub issue_key: Option<String>,
    pub prompt: String,
    pub model: String,
    pub language: String,
    pub ttl_minutes: Option<u64>,
}

/// Wires the collaborators together and owns every session mutation.
pub struct ReviewEngine {
    pub vcs: Arc<dyn VcsProvider>,
    pub llm: Arc<dyn LlmClient>,
    pub issues: Option<Arc<dyn IssueTracker>>,
    pub store: Arc<dyn SessionStore>,
    pub config: AppConfig,
}

/// Whether to fetch the post-change file content in addition to the diff.
#[derive(Debug, Clone)]
pub struct FetchDecision {
    pub fetch: bool,
    pub reason: String,
}

/// Smart-context policy: skip binaries and lockfiles, skip brand-new files
/// (their diff already carries the full content), skip oversized diffs,
/// always fetch for small diffs, and leave medium diffs to configuration.
pub fn should_fetch_file_content(
    config: &crate::config::ContextConfig,
    file_path: &str,
    diff_text: &str,
) -> FetchDecision {
    if !config.smart_context {
        return FetchDecision {
            fetch: true,
            reason: "smart_context_disabled".into(),
        };
    }

    static NEW_FILE_HUNK: OnceLock<Regex> = OnceLock::new();
    let new_file_hunk =
        NEW_FILE_HUNK.get_or_init(|| Regex::new(r"@@ -0,0 \+\d+(,\d+)? @@").expect("hunk regex"));

    let is_new_file = diff_text.contains("new file mode")
        || diff_text.contains("--- /dev/null")
        || new_file_hunk.is_match(diff_text);
    if is_new_file {
        return FetchDecision {
            fetch: false,
            reason: "new_file_diff_contains_full_content".into(),
        };
    }

    let ext = ext_of(file_path);
    if config.skip_extensions.contains(&ext) {
        return FetchDecision {
            fetch: false,
            reason: format!("skip_ext:{ext}"),
        };
    }

    let diff_len = diff_text.len();
    if diff_len >= config.diff_hard_skip_threshold_chars {
        return FetchDecision {
            fetch: false,
            reason: format!("diff_too_large:{diff_len}"),
        };
    }
    if diff_len <= config.diff_small_threshold_chars {
        return FetchDecision {
            fetch: true,
            reason: format!("small_diff:{diff_len}"),
        };
    }

    FetchDecision {
        fetch: config.fetch_file_for_medium_diffs,
        reason: format!("medium_diff:{diff_len}"),
    }
}

/// Pull the first fenced ```json block out of a model response.
pub fn extract_json_block(text: &str) -> Option<&str> {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    let fenced = FENCED.get_or_init(|| {
        Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("fenced json regex")
    });
    fenced.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// The human-facing markdown is the response with fenced json blocks
/// removed, including an unterminated trailing fence.
pub fn strip_json_blocks(text: &str) -> String {
    static CLOSED: OnceLock<Regex> = OnceLock::new();
    static OPEN: OnceLock<Regex> = OnceLock::new();
    let closed = CLOSED.get_or_init(|| {
        Regex::new(r"(?is)```json\s*.*?\s*```").expect("fenced json regex")
    });
    let open = OPEN.get_or_init(|| Regex::new(r"(?is)```json.*$").expect("open fence regex"));

    let without_closed = closed.replace_all(text, "");
    open.replace(&without_closed, "").trim().to_string()
}

/// Best-effort structured extraction; `None` when the block is absent or
/// does not match the expected shape.
pub fn parse_structured_review(text: &str) -> Option<StructuredReview> {
    let block = extract_json_block(text)?;
    match serde_json::from_str::<StructuredReview>(block) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(error = %e, "structured block present but unparseable");
            None
        }
    }
}

fn render_related_block(files: &[TextRef]) -> String {
    files
        .iter()
        .map(|f| format!("--- {} ---\n{}\n", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub(crate) fn issue_json_for_prompt(issue: &Option<IssueSnapshot>) -> String {
    match issue {
        Some(snapshot) => {
            serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
        }
        None => "{}".to_string(),
    }
}

impl ReviewEngine {
    pub fn new(
        vcs: Arc<dyn VcsProvider>,
        llm: Arc<dyn LlmClient>,
        issues: Option<Arc<dyn IssueTracker>>,
        store: Arc<dyn SessionStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            vcs,
            llm,
            issues,
            store,
            config,
        }
    }

    /// Resolve the PR, snapshot the optional issue, and store a fresh
    /// session. PR resolution failures propagate: without the PR there is
    /// no session to create.
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SharedSession> {
        let pr = self.vcs.resolve_pr(&request.pr_url).await?;
        let infos = self.vcs.list_changed_files(&pr).await?;

        let files = infos
            .into_iter()
            .map(|info| {
                ChangedFile::new(
                    normalize_path(&info.path),
                    info.change_type,
                    info.additions,
                    info.deletions,
                )
            })
            .collect();

        let explicit_key = request.issue_key.is_some();
        let issue_key = request
            .issue_key
            .clone()
            .or_else(|| self.vcs.resolve_issue_key(&pr));

        let issue = match (&self.issues, issue_key) {
            (Some(tracker), Some(key)) => match tracker.fetch_issue(&key).await {
                Ok(snapshot) => Some(snapshot),
                // An explicitly requested issue must exist; an auto-derived
                // key is only a guess and degrades to no snapshot.
                Err(e) if explicit_key => return Err(e),
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring auto-resolved issue key");
                    None
                }
            },
            _ => None,
        };

        let ttl_minutes = request.ttl_minutes.unwrap_or(self.config.session_ttl_minutes);
        let session = SessionState::new(
            pr,
            issue,
            request.prompt,
            request.model,
            request.language,
            files,
            Duration::from_secs(ttl_minutes * 60),
        );
        Ok(self.store.put(session))
    }

    pub fn get_session(&self, id: &str) -> Result<SharedSession> {
        self.store
            .get(id)
            .ok_or_else(|| AssayError::SessionNotFound(id.to_string()).into())
    }

    /// Exclude a file from review. Rejected while an operation is running.
    pub fn ignore_file(&self, session: &SharedSession, file_path: &str) -> Result<()> {
        let _guard = InFlightGuard::acquire(session)?;
        lock_session(session).set_file_status(file_path, ReviewStatus::Ignored);
        Ok(())
    }

    /// Review one file. Holds the session's exclusivity flag for the whole
    /// run; a second operation in that window is rejected as busy.
    pub async fn run_file_review(
        &self,
        session: &SharedSession,
        file_path: &str,
    ) -> Result<FileReviewResult> {
        let _guard = InFlightGuard::acquire(session)?;

        lock_session(session).set_file_status(file_path, ReviewStatus::Running);

        match self.review_file_inner(session, file_path).await {
            Ok(result) => {
                let mut s = lock_session(session);
                s.set_file_status(file_path, result.status);
                s.reviews.insert(file_path.to_string(), result.clone());
                Ok(result)
            }
            Err(e) => {
                let failure = FileReviewResult::failed(file_path, format!("Review failed: {e}"));
                let mut s = lock_session(session);
                s.set_file_status(file_path, ReviewStatus::Failed);
                s.reviews.insert(file_path.to_string(), failure);
                Err(e)
            }
        }
    }

    async fn review_file_inner(
        &self,
        session: &SharedSession,
        file_path: &str,
    ) -> Result<FileReviewResult> {
        let (pr, user_prompt, model, language, issue, cached_diff) = {
            let s = lock_session(session);
            (
                s.pr.clone(),
                s.prompt.clone(),
                s.model.clone(),
                s.language.clone(),
                s.issue.clone(),
                s.files
                    .iter()
                    .find(|f| f.path == file_path)
                    .and_then(|f| f.diff_text.clone()),
            )
        };

        // -------- diff segment --------
        let diff_text = match cached_diff {
            Some(diff) => diff,
            None => {
                let full_diff = self
                    .vcs
                    .fetch_diff(&pr)
                    .await
                    .context("Failed to fetch PR diff")?;
                let by_file = split_unified_diff(&full_diff);

                let mut s = lock_session(session);
                for file in &mut s.files {
                    if file.diff_text.is_none()
                        && let Some(diff) = find_diff_for_path(&by_file, &file.path)
                    {
                        file.diff_text = Some(diff.to_string());
                    }
                }
                drop(s);

                find_diff_for_path(&by_file, file_path)
                    .map(|d| d.to_string())
                    .ok_or(AssayError::DiffNotFound(file_path.to_string()))?
            }
        };

        // -------- file content (optional) --------
        let decision = should_fetch_file_content(&self.config.context, file_path, &diff_text);
        debug!(file_path, fetch = decision.fetch, reason = %decision.reason, "file content decision");

        let mut file_content: Option<String> = None;
        if decision.fetch && !pr.head_sha.is_empty() {
            match self
                .vcs
                .fetch_file_at_commit(&pr, file_path, &pr.head_sha)
                .await
            {
                Ok(raw) => {
                    let clamped = clamp_head_tail(
                        &raw,
                        self.config.context.file_content_max_chars,
                        FILE_CONTENT_CLAMP_MARKER,
                    );
                    if let Some(f) = lock_session(session).file_mut(file_path) {
                        f.content_at_head = Some(clamped.clone());
                    }
                    file_content = Some(clamped);
                }
                Err(e) => {
                    warn!(file_path, error = %e, "could not fetch file content, reviewing diff only");
                }
            }
        }

        // -------- related context --------
        let files_snapshot: Vec<ChangedFile> = lock_session(session).files.clone();
        let loader = ContextLoader::new(self.vcs.as_ref(), &self.config.context);
        let bundle = loader.load_bundle(&pr, &files_snapshot, file_path).await;

        let system_prompt = build_system_prompt(file_path);
        let bounded = build_file_review_prompt(
            &self.config,
            &system_prompt,
            &user_prompt,
            &language,
            &issue,
            file_path,
            &diff_text,
            file_content.as_deref(),
            &bundle,
        );

        // -------- model call --------
        let request = LlmRequest {
            model,
            system_prompt: system_prompt.clone(),
            user_prompt: bounded.text.clone(),
            temperature: REVIEW_TEMPERATURE,
            max_output_tokens: self.config.budget.review_max_output_tokens,
        };
        let response = self.llm.complete(&request).await?;

        // -------- parse & record --------
        let structured = parse_structured_review(&response.text);
        let output_markdown = strip_json_blocks(&response.text);

        let status = match &structured {
            Some(_) if bounded.warnings.is_empty() => ReviewStatus::Done,
            Some(_) => ReviewStatus::DoneWithWarnings,
            None => ReviewStatus::Failed,
        };

        let severity_summary = structured
            .as_ref()
            .map(|s| s.summary)
            .unwrap_or_else(SeveritySummary::default);

        Ok(FileReviewResult {
            file_path: file_path.to_string(),
            status,
            output_markdown,
            structured,
            severity_summary,
            warnings: bounded.warnings.clone(),
            diagnostics: Some(build_diagnostics(
                &request,
                &response,
                self.config.budget.input_token_limit,
                self.config.budget.review_max_output_tokens,
            )),
            context: ContextMeta {
                tests: bundle.related_tests.len(),
                sources: bundle.related_sources.len(),
                migrations: bundle.related_migrations.len(),
                file_content: file_content.is_some(),
            },
        })
    }
}

fn build_system_prompt(file_path: &str) -> String {
    let mut prompt = FILE_REVIEW_PROMPT.to_string();
    if is_source_file(file_path) {
        prompt.push_str("\n\n---\n");
        prompt.push_str(SOURCE_FILE_HINTS);
    }
    if is_test_file(file_path) {
        prompt.push_str("\n\n---\n");
        prompt.push_str(TEST_FILE_HINTS);
    }
    if is_migration_file(file_path) {
        prompt.push_str("\n\n---\n");
        prompt.push_str(MIGRATION_FILE_HINTS);
    }
    prompt
}

/// Assemble the user prompt in fixed priority order: instructions, base
/// metadata, diff, then the optional context blocks.
#[allow(clippy::too_many_arguments)]
fn build_file_review_prompt(
    config: &AppConfig,
    system_prompt: &str,
    user_prompt: &str,
    language: &str,
    issue: &Option<IssueSnapshot>,
    file_path: &str,
    diff_text: &str,
    file_content: Option<&str>,
    bundle: &ContextBundle,
) -> crate::budget::BoundedPrompt {
    let budget_cfg = &config.budget;
    let max_chars = derive_prompt_budget(
        budget_cfg.input_token_limit,
        budget_cfg.review_max_output_tokens,
        system_prompt,
    );

    let mut budget = PromptBudget::new(max_chars);

    budget.append_block(
        "USER_INSTRUCTIONS",
        "USER INSTRUCTIONS:",
        user_prompt,
        BlockLimits::default(),
    );

    let base_raw = format!(
        "HUMAN READABLE MARKDOWN LANGUAGE: {language}\n\nJIRA-ISSUE:\n{}\n\nFILE: {file_path}\n",
        issue_json_for_prompt(issue)
    );
    budget.append_block(
        "BASE",
        "",
        &base_raw,
        BlockLimits {
            hard_cap: budget_cfg.base_cap_chars,
            min_keep: 1_500,
            marker: Some("... USER CONTEXT TRUNCATED ...".into()),
        },
    );

    budget.append_block(
        "DIFF",
        "DIFF (unified):",
        diff_text,
        BlockLimits {
            hard_cap: budget_cfg.diff_cap_chars,
            min_keep: 1_500,
            marker: Some(format!(
                "... DIFF TRUNCATED (limit ~{} tokens) ...",
                budget_cfg.input_token_limit
            )),
        },
    );

    if let Some(content) = file_content {
        budget.append_block(
            "FILE_CONTENT",
            "FILE CONTENT (post-change):",
            content,
            BlockLimits {
                hard_cap: budget_cfg.file_cap_chars,
                min_keep: 1_000,
                marker: Some(format!(
                    "... FILE CONTENT TRUNCATED (limit ~{} tokens) ...",
                    budget_cfg.input_token_limit
                )),
            },
        );
    }

    if !bundle.related_tests.is_empty() {
        budget.append_block(
            "RELATED_TESTS",
            "TEST FILES RELATED TO THIS SOURCE FILE:",
            &render_related_block(&bundle.related_tests),
            BlockLimits {
                hard_cap: budget_cfg.tests_cap_chars,
                min_keep: 800,
                marker: Some("... RELATED TESTS TRUNCATED ...".into()),
            },
        );
    }

    if !bundle.related_sources.is_empty() {
        budget.append_block(
            "RELATED_SOURCES",
            "SOURCE FILES RELATED TO THIS TEST FILE:",
            &render_related_block(&bundle.related_sources),
            BlockLimits {
                hard_cap: budget_cfg.sources_cap_chars,
                min_keep: 800,
                marker: Some("... RELATED SOURCES TRUNCATED ...".into()),
            },
        );
    }

    if !bundle.related_migrations.is_empty() {
        budget.append_block(
            "MIGRATIONS",
            "MIGRATION FILES RELATED TO THIS CHANGE:",
            &render_related_block(&bundle.related_migrations),
            BlockLimits {
                hard_cap: budget_cfg.migrations_cap_chars,
                min_keep: 800,
                marker: Some("... MIGRATION CONTEXT TRUNCATED ...".into()),
            },
        );
    }

    // context-loading degradations share the same warning channel
    for warning in &bundle.warnings {
        budget.push_warning(warning.clone());
    }

    budget.finish()
}

pub(crate) fn build_diagnostics(
    request: &LlmRequest,
    response: &LlmResponse,
    input_limit_tokens: usize,
    max_output_tokens: usize,
) -> LlmDiagnostics {
    let system_chars = request.system_prompt.len();
    let user_chars = request.user_prompt.len();
    LlmDiagnostics {
        model: request.model.clone(),
        mode: response.mode.as_str().to_string(),
        duration_ms: response.duration_ms,
        request_chars: RequestChars {
            system: system_chars,
            user: user_chars,
            total: system_chars + user_chars,
        },
        estimated_input_tokens: RequestChars {
            system: estimate_tokens(&request.system_prompt),
            user: estimate_tokens(&request.user_prompt),
            total: estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt),
        },
        input_limit_tokens,
        max_output_tokens,
        usage: response.usage,
        response_id: response.response_id.clone(),
    }
}
