//! Prompt assembly under a character budget.
//!
//! The model's input window is finite; the review context (diff, file
//! content, related files) is not. Blocks are appended in caller order,
//! which encodes priority: instructions and the diff first, optional
//! context last. Oversized blocks keep their head and tail and drop the
//! middle - the start of a diff or file carries declarations and imports,
//! the end carries closing context, so the middle is the cheapest cut.
//! Every truncation or skip leaves a machine-parseable warning token.

/// Fixed chars-per-token approximation used for all budget math.
pub const CHARS_PER_TOKEN: usize = 4;

/// Floor for the derived prompt budget, so the instructions block survives
/// even pathological configurations.
pub const MIN_PROMPT_CHARS: usize = 2_000;

const DEFAULT_MIN_KEEP_CHARS: usize = 800;

/// Estimate the token count of a text at the fixed ratio, rounding up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Character budget available to the user prompt once the reserved output
/// tokens and the (estimated) system prompt are paid for.
pub fn derive_prompt_budget(
    input_token_limit: usize,
    reserved_output_tokens: usize,
    system_prompt: &str,
) -> usize {
    let available = input_token_limit
        .saturating_sub(reserved_output_tokens)
        .saturating_sub(estimate_tokens(system_prompt));
    (available * CHARS_PER_TOKEN).max(MIN_PROMPT_CHARS)
}

/// Per-block limits. `hard_cap` bounds the block regardless of remaining
/// budget; a block allotted less than `min_keep` is skipped outright rather
/// than contributing a useless sliver.
#[derive(Debug, Clone)]
pub struct BlockLimits {
    pub hard_cap: usize,
    pub min_keep: usize,
    pub marker: Option<String>,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            hard_cap: usize::MAX,
            min_keep: DEFAULT_MIN_KEEP_CHARS,
            marker: None,
        }
    }
}

/// Finished prompt text plus the warnings accumulated while building it.
#[derive(Debug, Clone)]
pub struct BoundedPrompt {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Mutable budget state for one prompt build.
#[derive(Debug)]
pub struct PromptBudget {
    remaining_chars: usize,
    warnings: Vec<String>,
    parts: Vec<String>,
}

impl PromptBudget {
    pub fn new(max_chars: usize) -> Self {
        Self {
            remaining_chars: max_chars,
            warnings: Vec::new(),
            parts: Vec::new(),
        }
    }

    pub fn remaining_chars(&self) -> usize {
        self.remaining_chars
    }

    /// Append one block, truncating head/tail to what the budget allows.
    /// Empty bodies are ignored; a block that cannot get at least its
    /// `min_keep` chars is skipped with a `<ID>_SKIPPED_NO_BUDGET` warning.
    pub fn append_block(&mut self, block_id: &str, title: &str, body: &str, limits: BlockLimits) {
        if self.remaining_chars == 0 {
            return;
        }

        let body = sanitize_for_prompt(body);
        if body.trim().is_empty() {
            return;
        }

        let marker = limits
            .marker
            .unwrap_or_else(|| format!("... {block_id} TRUNCATED ..."));
        let allowed = self.remaining_chars.min(limits.hard_cap);

        if allowed < limits.min_keep {
            self.warnings.push(format!("{block_id}_SKIPPED_NO_BUDGET"));
            return;
        }

        let tr = truncate_head_tail(&body, allowed, &marker);

        // Cost includes the title and separators too; subtract after push.
        let block_text = format!("{title}\n{}\n", tr.text);
        self.remaining_chars = self.remaining_chars.saturating_sub(block_text.len());
        self.parts.push(block_text);

        if tr.truncated {
            self.warnings.push(format!("{block_id}_TRUNCATED"));
            self.warnings
                .push(format!("{block_id}_TRUNCATED_REMOVED_CHARS:{}", tr.removed_chars));
        }
    }

    /// Record a warning produced outside block assembly (e.g. a context
    /// fetch failure) so it lands in the same preamble.
    pub fn push_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Join the emitted blocks and prepend a single human-readable warning
    /// preamble when anything was truncated or skipped.
    pub fn finish(self) -> BoundedPrompt {
        let body = self.parts.join("\n\n").trim().to_string();
        let text = if self.warnings.is_empty() {
            body
        } else {
            format!(
                "WARNING: Input was truncated/limited. {}\n\n{}",
                self.warnings.join(", "),
                body
            )
        };
        BoundedPrompt {
            text,
            warnings: self.warnings,
        }
    }
}

/// NUL bytes confuse downstream tokenizers; drop them before measuring.
fn sanitize_for_prompt(text: &str) -> String {
    if text.contains('\u{0}') {
        text.replace('\u{0}', "")
    } else {
        text.to_string()
    }
}

struct Truncated {
    text: String,
    truncated: bool,
    removed_chars: usize,
}

/// Keep the first 70% and the last 30% of the allowance, joined by the
/// marker. Reports the exact number of characters dropped from the middle.
fn truncate_head_tail(text: &str, max_chars: usize, marker: &str) -> Truncated {
    if text.len() <= max_chars {
        return Truncated {
            text: text.to_string(),
            truncated: false,
            removed_chars: 0,
        };
    }

    let head_chars = max_chars * 7 / 10;
    let tail_chars = max_chars - head_chars;

    let head_end = floor_char_boundary(text, head_chars);
    let tail_start = ceil_char_boundary(text, text.len() - tail_chars);

    let head = &text[..head_end];
    let tail = &text[tail_start..];

    Truncated {
        text: format!("{head}\n\n{marker}\n\n{tail}"),
        truncated: true,
        removed_chars: text.len() - (head.len() + tail.len()),
    }
}

/// Clamp a text to `max_chars` with the same head/tail split, used for
/// related-file content before it enters block assembly.
pub fn clamp_head_tail(text: &str, max_chars: usize, marker: &str) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let head_end = floor_char_boundary(text, max_chars * 7 / 10);
    let tail_start = ceil_char_boundary(text, text.len() - max_chars * 3 / 10);
    format!("{}\n\n{marker}\n\n{}", &text[..head_end], &text[tail_start..])
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(hard_cap: usize, min_keep: usize) -> BlockLimits {
        BlockLimits {
            hard_cap,
            min_keep,
            marker: Some("<CUT>".to_string()),
        }
    }

    #[test]
    fn small_block_passes_through_untouched() {
        let mut b = PromptBudget::new(10_000);
        b.append_block("DIFF", "DIFF:", "short body", limits(5_000, 10));
        let out = b.finish();
        assert!(out.warnings.is_empty());
        assert_eq!(out.text, "DIFF:\nshort body");
    }

    #[test]
    fn truncation_emits_marker_once_and_exact_removed_count() {
        let body = "x".repeat(1_000);
        let mut b = PromptBudget::new(10_000);
        b.append_block("DIFF", "DIFF:", &body, limits(100, 10));
        let out = b.finish();

        assert_eq!(out.text.matches("<CUT>").count(), 1);
        assert!(out.warnings.contains(&"DIFF_TRUNCATED".to_string()));
        // head 70, tail 30 -> removed = 1000 - 100
        assert!(out
            .warnings
            .contains(&"DIFF_TRUNCATED_REMOVED_CHARS:900".to_string()));
    }

    #[test]
    fn block_below_min_keep_is_skipped_entirely() {
        let mut b = PromptBudget::new(10_000);
        b.append_block("TESTS", "TESTS:", &"y".repeat(500), limits(50, 100));
        let out = b.finish();

        assert!(!out.text.contains('y'));
        assert_eq!(out.warnings, vec!["TESTS_SKIPPED_NO_BUDGET".to_string()]);
    }

    #[test]
    fn blocks_consume_budget_in_order() {
        let mut b = PromptBudget::new(300);
        b.append_block("FIRST", "F:", &"q".repeat(200), limits(usize::MAX, 10));
        // first block cost 205 rendered chars, so the second gets 95
        b.append_block("SECOND", "S:", &"z".repeat(500), limits(usize::MAX, 10));
        let out = b.finish();

        assert_eq!(out.text.matches('q').count(), 200);
        assert_eq!(out.text.matches('z').count(), 95); // head 66 + tail 29
        assert!(out.warnings.contains(&"SECOND_TRUNCATED".to_string()));
        assert!(out
            .warnings
            .contains(&"SECOND_TRUNCATED_REMOVED_CHARS:405".to_string()));
    }

    #[test]
    fn shrinking_budget_never_grows_a_block() {
        let body = "z".repeat(2_000);
        let mut kept_at: Vec<usize> = Vec::new();
        for budget in [5_000, 1_000, 500, 200] {
            let mut b = PromptBudget::new(budget);
            b.append_block("DIFF", "DIFF:", &body, limits(usize::MAX, 10));
            let out = b.finish();
            kept_at.push(out.text.matches('z').count());
        }
        for pair in kept_at.windows(2) {
            assert!(pair[1] <= pair[0], "smaller budget kept more chars: {kept_at:?}");
        }
    }

    #[test]
    fn empty_body_emits_nothing() {
        let mut b = PromptBudget::new(1_000);
        b.append_block("BASE", "BASE:", "   \n  ", BlockLimits::default());
        let out = b.finish();
        assert!(out.text.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn warning_preamble_summarizes_all_warnings() {
        let mut b = PromptBudget::new(10_000);
        b.append_block("DIFF", "DIFF:", &"x".repeat(500), limits(100, 10));
        b.append_block("TESTS", "TESTS:", &"y".repeat(500), limits(50, 100));
        let out = b.finish();

        let first_line = out.text.lines().next().unwrap();
        assert!(first_line.starts_with("WARNING: Input was truncated/limited."));
        assert!(first_line.contains("DIFF_TRUNCATED"));
        assert!(first_line.contains("TESTS_SKIPPED_NO_BUDGET"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let body = "äöü".repeat(400); // 2 bytes per char
        let mut b = PromptBudget::new(10_000);
        b.append_block("FILE_CONTENT", "FILE:", &body, limits(101, 10));
        let out = b.finish();
        assert!(out.warnings.iter().any(|w| w == "FILE_CONTENT_TRUNCATED"));
    }

    #[test]
    fn clamp_keeps_head_and_tail() {
        let text = format!("{}{}{}", "HEAD".repeat(10), "m".repeat(1_000), "TAIL".repeat(10));
        let clamped = clamp_head_tail(&text, 120, "<SNIP>");
        assert!(clamped.starts_with("HEAD"));
        assert!(clamped.ends_with("TAIL"));
        assert!(clamped.contains("<SNIP>"));
        assert_eq!(clamp_head_tail("tiny", 120, "<SNIP>"), "tiny");
    }

    #[test]
    fn derive_budget_applies_floor() {
        // pathological: reserved output exceeds the input limit
        assert_eq!(derive_prompt_budget(1_000, 5_000, "sys"), MIN_PROMPT_CHARS);
        // normal case: (10_000 - 1_000 - 25) * 4
        assert_eq!(derive_prompt_budget(10_000, 1_000, &"s".repeat(100)), 8_975 * 4);
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
