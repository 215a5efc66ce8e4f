//! Token counting and token-budget truncation.
//!
//! [`BpeTokenCounter`] counts with the byte-pair encoding the model family
//! uses: `o200k_base` for the GPT-4o and o-series models, `cl100k_base` for
//! everything else. [`HeuristicTokenCounter`] approximates a count as
//! `words + chars / 4` and is used when an encoding cannot be loaded.
//! [`token_counter`] picks between them.

use std::sync::Arc;

use ensemble_abstraction::TokenCounter;
use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Model assumed when a caller does not name one.
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

/// Context window used for models missing from [`CONTEXT_WINDOWS`].
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Marker inserted where [`truncate_to_tokens`] removed the middle of a text.
pub const TRUNCATION_MARKER: &str = "...\n[Content truncated to fit the token limit]\n...\n\n";

/// Known context windows, matched as case-insensitive substrings of the model name.
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-3.5-turbo", 16_385),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4", 8_192),
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 180_000),
    ("claude-3-haiku", 150_000),
    ("gemini-1.5", 1_000_000),
    ("gemini-pro", 32_768),
    ("gemini-ultra", 32_768),
];

/// Model name prefixes tokenized with `o200k_base`.
const O200K_PREFIXES: &[&str] = &["gpt-4o", "chatgpt-4o", "o1", "o3", "o4"];

static CL100K_BASE: Lazy<Option<CoreBPE>> = Lazy::new(|| {
    tiktoken_rs::cl100k_base()
        .map_err(|e| warn!(error = %e, "Failed to load cl100k_base encoding"))
        .ok()
});

static O200K_BASE: Lazy<Option<CoreBPE>> = Lazy::new(|| {
    tiktoken_rs::o200k_base()
        .map_err(|e| warn!(error = %e, "Failed to load o200k_base encoding"))
        .ok()
});

/// Byte-pair encodings a model can be counted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    /// Encoding used by `model`. Unknown models get `cl100k_base`.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if O200K_PREFIXES.iter().any(|prefix| model.starts_with(prefix)) {
            Self::O200kBase
        } else {
            Self::Cl100kBase
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
        }
    }

    fn bpe(self) -> Option<&'static CoreBPE> {
        match self {
            Self::Cl100kBase => CL100K_BASE.as_ref(),
            Self::O200kBase => O200K_BASE.as_ref(),
        }
    }
}

/// Exact token counter backed by a tiktoken encoding.
#[derive(Clone)]
pub struct BpeTokenCounter {
    model: String,
    encoding: Encoding,
    bpe: &'static CoreBPE,
}

impl BpeTokenCounter {
    /// Creates a counter for `model`, or `None` when its encoding is unavailable.
    pub fn new(model: impl Into<String>) -> Option<Self> {
        let model = model.into();
        let encoding = Encoding::for_model(&model);
        let bpe = encoding.bpe()?;
        Some(Self { model, encoding, bpe })
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl std::fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenCounter")
            .field("model", &self.model)
            .field("encoding", &self.encoding.as_str())
            .finish()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Returns the best available counter for `model`.
pub fn token_counter(model: &str) -> Arc<dyn TokenCounter> {
    match BpeTokenCounter::new(model) {
        Some(counter) => Arc::new(counter),
        None => {
            warn!(model, "No byte-pair encoding available, estimating token counts");
            Arc::new(HeuristicTokenCounter::new(model))
        }
    }
}

/// Word-and-character heuristic token counter keyed by a model name.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    model: String,
}

impl HeuristicTokenCounter {
    /// Creates a counter for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(DEFAULT_TOKENIZER_MODEL)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let words = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .count();
        words + text.chars().count() / 4
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Returns the context window size for `model`.
pub fn context_window(model: &str) -> usize {
    let model = model.to_lowercase();
    CONTEXT_WINDOWS
        .iter()
        .find(|(key, _)| model.contains(key))
        .map_or(DEFAULT_CONTEXT_WINDOW, |(_, window)| *window)
}

/// Truncates `text` so that it fits in `max_tokens`.
///
/// Multi-paragraph text keeps as many leading and trailing paragraphs as fit
/// in half the budget each, joined by [`TRUNCATION_MARKER`]. Single-paragraph
/// text keeps whole leading sentences.
pub fn truncate_to_tokens(counter: &dyn TokenCounter, text: &str, max_tokens: usize) -> String {
    if text.is_empty() || counter.count(text) <= max_tokens {
        return text.to_string();
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() <= 1 {
        let mut result = String::new();
        for sentence in split_sentences(text) {
            let candidate = format!("{result}{sentence} ");
            if counter.count(&candidate) > max_tokens {
                break;
            }
            result = candidate;
        }
        return result.trim().to_string();
    }

    let half = max_tokens / 2;

    let mut head = String::new();
    let mut head_len = 0;
    for para in &paragraphs {
        let candidate = format!("{head}{para}\n\n");
        if counter.count(&candidate) > half {
            break;
        }
        head = candidate;
        head_len += 1;
    }

    let mut tail = String::new();
    for para in paragraphs[head_len..].iter().rev() {
        let candidate = format!("{para}\n\n{tail}");
        if counter.count(&candidate) > half {
            break;
        }
        tail = candidate;
    }

    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    sentences.push(&text[start..next_idx]);
                    start = next_idx;
                    while let Some(&(ws_idx, ws)) = chars.peek() {
                        if !ws.is_whitespace() {
                            break;
                        }
                        start = ws_idx + ws.len_utf8();
                        chars.next();
                    }
                }
            } else {
                sentences.push(&text[start..=idx]);
                start = text.len();
            }
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_count() {
        let counter = HeuristicTokenCounter::default();
        assert_eq!(counter.count(""), 0);
        // 2 words + 11 chars / 4
        assert_eq!(counter.count("hello world"), 4);
        assert_eq!(counter.model(), DEFAULT_TOKENIZER_MODEL);
    }

    #[test]
    fn test_encoding_follows_model_family() {
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Encoding::O200kBase);
        assert_eq!(Encoding::for_model("o1-preview"), Encoding::O200kBase);
        assert_eq!(Encoding::for_model("gpt-3.5-turbo"), Encoding::Cl100kBase);
        assert_eq!(Encoding::for_model("claude-3-haiku-20240307"), Encoding::Cl100kBase);
        assert_eq!(Encoding::for_model("llama3-8b-8192"), Encoding::Cl100kBase);
    }

    #[test]
    fn test_bpe_count_is_exact() {
        let counter = BpeTokenCounter::new("gpt-3.5-turbo").unwrap();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hello world"), 2);
        assert_ne!(counter.count("hello world"), HeuristicTokenCounter::default().count("hello world"));
    }

    #[test]
    fn test_counts_differ_by_model_family() {
        let text = "नमस्ते, आज मौसम बहुत अच्छा है और हम पहाड़ों की यात्रा की योजना बना रहे हैं।";
        let gpt35 = BpeTokenCounter::new("gpt-3.5-turbo").unwrap();
        let gpt4o = BpeTokenCounter::new("gpt-4o").unwrap();
        assert_eq!(gpt35.encoding(), Encoding::Cl100kBase);
        assert_eq!(gpt4o.encoding(), Encoding::O200kBase);
        assert!(gpt4o.count(text) < gpt35.count(text));
    }

    #[test]
    fn test_token_counter_prefers_bpe() {
        let counter = token_counter("gpt-4o");
        assert_eq!(counter.model(), "gpt-4o");
        assert_eq!(counter.count("hello world"), 2);
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window("gpt-3.5-turbo-0125"), 16_385);
        assert_eq!(context_window("GPT-4"), 8_192);
        assert_eq!(context_window("claude-3-haiku-20240307"), 150_000);
        assert_eq!(context_window("llama3-8b-8192"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn test_short_text_untouched() {
        let counter = HeuristicTokenCounter::default();
        assert_eq!(truncate_to_tokens(&counter, "short text", 100), "short text");
    }

    #[test]
    fn test_single_paragraph_keeps_leading_sentences() {
        let counter = HeuristicTokenCounter::default();
        let text = "First sentence here. Second sentence follows! Third one ends? Fourth.";
        let truncated = truncate_to_tokens(&counter, text, 8);
        assert!(truncated.starts_with("First sentence here."));
        assert!(!truncated.contains("Fourth"));
        assert!(counter.count(&truncated) <= 8);
    }

    #[test]
    fn test_multi_paragraph_keeps_head_and_tail() {
        let counter = HeuristicTokenCounter::default();
        let paragraphs: Vec<String> =
            (0..20).map(|i| format!("Paragraph number {i} with some filler words")).collect();
        let text = paragraphs.join("\n\n");
        let truncated = truncate_to_tokens(&counter, &text, 60);
        assert!(truncated.starts_with("Paragraph number 0"));
        assert!(truncated.contains(TRUNCATION_MARKER));
        assert!(truncated.trim_end().ends_with("Paragraph number 19 with some filler words"));
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(split_sentences("A. B!  C"), vec!["A.", "B!", "C"]);
        assert_eq!(split_sentences("Only one."), vec!["Only one."]);
    }
}
