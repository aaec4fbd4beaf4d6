use anyhow::Result;

use crate::error::AssayError;

/// Parse a positive integer from the environment, falling back on anything
/// missing, non-numeric, or non-positive.
pub fn env_int(name: &str, fallback: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => n as usize,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Parse a boolean from the environment. Accepts 1/true/yes/on (any case);
/// everything else is false; unset or blank falls back.
pub fn env_bool(name: &str, fallback: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => {
            let v = raw.trim().to_lowercase();
            if v.is_empty() {
                fallback
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => fallback,
    }
}

fn env_str(name: &str, fallback: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_required(name: &str) -> Result<String> {
    env_opt(name).ok_or_else(|| AssayError::Config(format!("missing env var: {name}")).into())
}

/// Which OpenAI calling convention to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    Responses,
    ChatCompletions,
}

impl LlmMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmMode::Responses => "responses",
            LlmMode::ChatCompletions => "chat_completions",
        }
    }

    fn from_env() -> Self {
        match env_str("ASSAY_LLM_MODE", "responses").to_lowercase().as_str() {
            "chat_completions" => LlmMode::ChatCompletions,
            _ => LlmMode::Responses,
        }
    }
}

/// Token and per-block character budgets for prompt assembly.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub input_token_limit: usize,
    pub review_max_output_tokens: usize,
    pub meta_max_output_tokens: usize,
    pub base_cap_chars: usize,
    pub diff_cap_chars: usize,
    pub file_cap_chars: usize,
    pub tests_cap_chars: usize,
    pub sources_cap_chars: usize,
    pub migrations_cap_chars: usize,
}

impl BudgetConfig {
    pub fn from_env() -> Self {
        // Anything below 8k tokens leaves no room for even a minimal prompt.
        let input_token_limit = env_int("ASSAY_MODEL_INPUT_LIMIT", 120_000).max(8_000);
        Self {
            input_token_limit,
            review_max_output_tokens: env_int("ASSAY_REVIEW_MAX_OUTPUT_TOKENS", 1_200),
            meta_max_output_tokens: env_int("ASSAY_META_MAX_OUTPUT_TOKENS", 1_200),
            base_cap_chars: env_int("ASSAY_BUDGET_BASE_CHARS", 18_000),
            diff_cap_chars: env_int("ASSAY_BUDGET_DIFF_CHARS", 80_000),
            file_cap_chars: env_int("ASSAY_BUDGET_FILE_CHARS", 20_000),
            tests_cap_chars: env_int("ASSAY_BUDGET_TESTS_CHARS", 18_000),
            sources_cap_chars: env_int("ASSAY_BUDGET_SOURCES_CHARS", 12_000),
            migrations_cap_chars: env_int("ASSAY_BUDGET_MIGRATIONS_CHARS", 12_000),
        }
    }
}

/// Smart-context policy and related-file loading limits.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub smart_context: bool,
    pub diff_small_threshold_chars: usize,
    pub diff_hard_skip_threshold_chars: usize,
    pub fetch_file_for_medium_diffs: bool,
    pub skip_extensions: Vec<String>,
    pub file_content_max_chars: usize,
    pub include_tests: bool,
    pub max_test_files: usize,
    pub max_test_chars: usize,
    pub include_sources: bool,
    pub max_source_files: usize,
    pub max_source_chars: usize,
    pub include_migrations: bool,
    pub max_migration_files: usize,
    pub max_migration_chars: usize,
    pub migration_fetch_fallback: bool,
}

const DEFAULT_SKIP_EXT: &str =
    "png,jpg,jpeg,gif,webp,ico,pdf,zip,tar,gz,7z,jar,exe,dll,bin,lock,map,min.js,min.css";

impl ContextConfig {
    pub fn from_env() -> Self {
        let skip_extensions = env_str("ASSAY_CONTEXT_SKIP_EXT", DEFAULT_SKIP_EXT)
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            smart_context: env_bool("ASSAY_SMART_CONTEXT", true),
            diff_small_threshold_chars: env_int("ASSAY_DIFF_SMALL_THRESHOLD_CHARS", 6_000),
            diff_hard_skip_threshold_chars: env_int("ASSAY_DIFF_HARD_SKIP_THRESHOLD_CHARS", 40_000),
            fetch_file_for_medium_diffs: env_bool("ASSAY_FETCH_FILE_FOR_MEDIUM_DIFFS", true),
            skip_extensions,
            file_content_max_chars: env_int("ASSAY_MAX_FILE_CONTENT_CHARS", 25_000),
            include_tests: env_bool("ASSAY_INCLUDE_TESTS", true),
            max_test_files: env_int("ASSAY_MAX_TEST_FILES", 3),
            max_test_chars: env_int("ASSAY_MAX_TEST_CHARS", 18_000),
            include_sources: env_bool("ASSAY_INCLUDE_SOURCES", true),
            max_source_files: env_int("ASSAY_MAX_SOURCE_FILES", 3),
            max_source_chars: env_int("ASSAY_MAX_SOURCE_CHARS", 18_000),
            include_migrations: env_bool("ASSAY_INCLUDE_MIGRATIONS", true),
            max_migration_files: env_int("ASSAY_MAX_MIGRATION_FILES", 10),
            max_migration_chars: env_int("ASSAY_MAX_MIGRATION_CHARS", 18_000),
            migration_fetch_fallback: env_bool("ASSAY_MIGRATION_FETCH_FALLBACK", false),
        }
    }
}

/// Compaction caps for the PR-level meta review.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub max_findings_per_file: usize,
    pub max_files: usize,
}

impl MetaConfig {
    pub fn from_env() -> Self {
        Self {
            max_findings_per_file: env_int("ASSAY_META_MAX_FINDINGS_PER_FILE", 6),
            max_files: env_int("ASSAY_META_MAX_FILES", 50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub mode: LlmMode,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub base_url: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub acceptance_criteria_field_id: Option<String>,
    pub http_timeout_secs: u64,
}

/// Full configuration surface, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub github: GitHubConfig,
    pub jira: Option<JiraConfig>,
    pub budget: BudgetConfig,
    pub context: ContextConfig,
    pub meta: MetaConfig,
    pub session_ttl_minutes: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_timeout_secs = env_int("ASSAY_HTTP_TIMEOUT_SECS", 120) as u64;

        let llm = LlmConfig {
            api_key: env_required("OPENAI_API_KEY")?,
            base_url: env_str("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            mode: LlmMode::from_env(),
            http_timeout_secs,
        };

        let github = GitHubConfig {
            token: env_required("GITHUB_TOKEN")?,
            base_url: env_str("GITHUB_BASE_URL", "https://api.github.com"),
            http_timeout_secs,
        };

        // Jira is optional: both the base URL and the token must be present.
        let jira = match (env_opt("JIRA_BASE_URL"), env_opt("JIRA_BEARER_TOKEN")) {
            (Some(base_url), Some(bearer_token)) => Some(JiraConfig {
                base_url,
                bearer_token,
                acceptance_criteria_field_id: env_opt("JIRA_AC_FIELD_ID"),
                http_timeout_secs,
            }),
            _ => None,
        };

        Ok(Self {
            llm,
            github,
            jira,
            budget: BudgetConfig::from_env(),
            context: ContextConfig::from_env(),
            meta: MetaConfig::from_env(),
            session_ttl_minutes: env_int("ASSAY_SESSION_TTL_MINUTES", 60) as u64,
        })
    }
}
