//! Bounded context memory with priority eviction and background compaction.

use super::item::{MemoryItem, MemoryItemType, Summary};
use super::scoring::ImportanceWeights;
use crate::config::ConfigError;
use chrono::Utc;
use ensemble_abstraction::{Model, TokenCounter, is_failure_text};
use ensemble_models::tokens::{DEFAULT_TOKENIZER_MODEL, token_counter, truncate_to_tokens};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Most recent items included in a summary prompt.
const SUMMARY_WINDOW: usize = 10;

/// Token cap applied to the summary prompt before dispatch.
const SUMMARY_PROMPT_TOKENS: usize = 1000;

/// Context memory configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Item count kept after an eviction.
    pub max_items: usize,
    /// Token ceiling for the whole item set.
    pub max_tokens: usize,
    /// Item count that triggers eviction.
    pub summarize_threshold: usize,
    /// Size of the tail that is never scored or dropped.
    pub keep_recent_items: usize,
    /// Tokenizer key.
    pub model: String,
    /// Summarize evicted items in the background when a model is attached.
    pub summarize_on_evict: bool,
    /// Evicted items collected before one background summary is requested.
    pub compaction_batch: usize,
    /// Eviction score weights.
    pub weights: ImportanceWeights,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            max_tokens: 8000,
            summarize_threshold: 30,
            keep_recent_items: 5,
            model: DEFAULT_TOKENIZER_MODEL.to_string(),
            summarize_on_evict: true,
            compaction_batch: 5,
            weights: ImportanceWeights::default(),
        }
    }
}

impl MemoryConfig {
    /// Checks the bounds are coherent.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::Validation("memory.max_items must be at least 1".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Validation("memory.max_tokens must be at least 1".to_string()));
        }
        if self.summarize_threshold == 0 {
            return Err(ConfigError::Validation(
                "memory.summarize_threshold must be at least 1".to_string(),
            ));
        }
        if self.compaction_batch == 0 {
            return Err(ConfigError::Validation(
                "memory.compaction_batch must be at least 1".to_string(),
            ));
        }
        if self.keep_recent_items > self.max_items {
            return Err(ConfigError::Validation(format!(
                "memory.keep_recent_items ({}) cannot exceed memory.max_items ({})",
                self.keep_recent_items, self.max_items
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<MemoryItem>,
    summaries: Vec<Summary>,
    next_id: u64,
    token_count: usize,
    /// Evicted items waiting for the next compaction batch.
    pending_compaction: Vec<MemoryItem>,
}

/// Token-budgeted store of typed interaction items.
///
/// All methods take `&self`; the store is safe to share between concurrently
/// running agents. Appends are serialized, and eviction runs inside the same
/// critical section as the append that triggered it.
pub struct ContextMemory {
    config: MemoryConfig,
    state: Arc<Mutex<MemoryState>>,
    model: Option<Arc<dyn Model>>,
    counter: Option<Arc<dyn TokenCounter>>,
    compactions: Mutex<JoinSet<()>>,
}

impl Default for ContextMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl ContextMemory {
    /// Creates an empty memory counting tokens with the encoding of `config.model`.
    pub fn new(config: MemoryConfig) -> Self {
        let counter = token_counter(&config.model);
        Self {
            config,
            state: Arc::new(Mutex::new(MemoryState { next_id: 1, ..MemoryState::default() })),
            model: None,
            counter: Some(counter),
            compactions: Mutex::new(JoinSet::new()),
        }
    }

    /// Attaches the model used for summaries.
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Replaces the token counter.
    #[must_use]
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Disables token accounting; only item-count limits apply.
    #[must_use]
    pub fn without_token_counting(mut self) -> Self {
        self.counter = None;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn item_tokens(&self, item: &MemoryItem) -> usize {
        self.counter.as_ref().map_or(0, |counter| {
            serde_json::to_string(item).map_or(0, |json| counter.count(&json))
        })
    }

    /// Appends an item and returns its id.
    ///
    /// Eviction runs when the item count exceeds `summarize_threshold` or the
    /// token estimate exceeds `max_tokens`. Evicted items are summarized in
    /// batches of `compaction_batch`.
    pub fn add(
        &self,
        kind: impl Into<MemoryItemType>,
        content: impl Into<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> u64 {
        let (id, batch) = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;

            let item = MemoryItem {
                id,
                kind: kind.into(),
                content: content.into(),
                created_at: Utc::now(),
                metadata: metadata.unwrap_or_default(),
            };
            state.token_count += self.item_tokens(&item);
            debug!(item_id = id, kind = %item.kind, "Memory item added");
            state.items.push(item);

            let over_count = state.items.len() > self.config.summarize_threshold;
            let over_tokens = self.counter.is_some() && state.token_count > self.config.max_tokens;
            let batch = if over_count || over_tokens {
                let evicted = self.evict(&mut state);
                self.take_compaction_batch(&mut state, evicted, false)
            } else {
                None
            };
            (id, batch)
        };

        if let Some(batch) = batch {
            self.spawn_compaction(batch);
        }
        id
    }

    /// Runs eviction immediately, regardless of thresholds, and compacts
    /// every pending evicted item.
    pub fn optimize(&self) {
        let batch = {
            let mut state = self.lock();
            let evicted = self.evict(&mut state);
            self.take_compaction_batch(&mut state, evicted, true)
        };
        if let Some(batch) = batch {
            self.spawn_compaction(batch);
        }
    }

    fn compacts(&self) -> bool {
        self.config.summarize_on_evict && self.model.is_some()
    }

    /// Queues `evicted` and returns the queue once it holds a full batch.
    /// `force` returns any non-empty queue.
    fn take_compaction_batch(
        &self,
        state: &mut MemoryState,
        evicted: Vec<MemoryItem>,
        force: bool,
    ) -> Option<Vec<MemoryItem>> {
        if !self.compacts() {
            return None;
        }
        state.pending_compaction.extend(evicted);
        let pending = state.pending_compaction.len();
        if pending == 0 || (!force && pending < self.config.compaction_batch.max(1)) {
            return None;
        }
        Some(std::mem::take(&mut state.pending_compaction))
    }

    /// Drops low-importance older items and returns them.
    fn evict(&self, state: &mut MemoryState) -> Vec<MemoryItem> {
        let keep_recent = self.config.keep_recent_items.min(state.items.len());
        let split = state.items.len() - keep_recent;
        let recent = state.items.split_off(split);
        let older = std::mem::take(&mut state.items);

        let now = Utc::now();
        let mut ranked: Vec<(f64, MemoryItem)> =
            older.into_iter().map(|item| (self.config.weights.score(&item, now), item)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let slots = self.config.max_items.saturating_sub(keep_recent);
        let mut dropped: Vec<MemoryItem> =
            ranked.split_off(slots.min(ranked.len())).into_iter().map(|(_, item)| item).collect();
        let mut selected: Vec<MemoryItem> = ranked.into_iter().map(|(_, item)| item).collect();

        if self.counter.is_some() {
            let recent_tokens: usize = recent.iter().map(|item| self.item_tokens(item)).sum();
            let mut selected_tokens: usize = selected.iter().map(|item| self.item_tokens(item)).sum();
            while recent_tokens + selected_tokens > self.config.max_tokens {
                let Some(item) = selected.pop() else { break };
                selected_tokens -= self.item_tokens(&item);
                dropped.push(item);
            }
        }

        selected.sort_by_key(|item| item.id);
        selected.extend(recent);
        state.items = selected;
        state.token_count = state.items.iter().map(|item| self.item_tokens(item)).sum();

        dropped.sort_by_key(|item| item.id);
        info!(
            kept = state.items.len(),
            dropped = dropped.len(),
            tokens = state.token_count,
            "Memory optimized"
        );
        dropped
    }

    fn spawn_compaction(&self, evicted: Vec<MemoryItem>) {
        if !self.config.summarize_on_evict {
            return;
        }
        let Some(model) = self.model.clone() else { return };
        debug!(items = evicted.len(), "Compacting evicted items");
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No async runtime; skipping background compaction");
            return;
        }

        let counter = self.counter.clone();
        let state = Arc::clone(&self.state);
        let mut tasks = self.compactions.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let count = evicted.len();
            let prompt = summary_prompt(&evicted, counter.as_deref());
            match model.generate_text(&prompt, None).await {
                Ok(response) if !is_failure_text(&response.content) => {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.summaries.push(Summary {
                        content: response.content,
                        items_summarized: count,
                        created_at: Utc::now(),
                    });
                    info!(items_summarized = count, "Evicted items compacted into summary");
                }
                Ok(response) => warn!(error = %response.content, "Compaction summary failed"),
                Err(e) => warn!(error = %e, "Compaction summary failed"),
            }
        });
    }

    /// Compacts any partial batch of evicted items and waits for every
    /// background compaction to finish.
    pub async fn flush(&self) {
        let batch = {
            let mut state = self.lock();
            self.take_compaction_batch(&mut state, Vec::new(), true)
        };
        if let Some(batch) = batch {
            self.spawn_compaction(batch);
        }

        let mut tasks = {
            let mut guard = self.compactions.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Compaction task failed");
            }
        }
    }

    /// Summarizes the most recent items with the attached model and records the summary.
    ///
    /// Never fails: a missing model, an empty memory or a model failure each
    /// yield a diagnostic string instead.
    pub async fn summarize(&self) -> String {
        let Some(model) = self.model.clone() else {
            warn!("Cannot summarize memory without a model");
            return "Summary unavailable: no model attached to memory.".to_string();
        };

        let (window, total) = {
            let state = self.lock();
            let start = state.items.len().saturating_sub(SUMMARY_WINDOW);
            (state.items[start..].to_vec(), state.items.len())
        };
        if window.is_empty() {
            return "No items in memory to summarize.".to_string();
        }

        let prompt = summary_prompt(&window, self.counter.as_deref());
        match model.generate_text(&prompt, None).await {
            Ok(response) if !is_failure_text(&response.content) => {
                self.lock().summaries.push(Summary {
                    content: response.content.clone(),
                    items_summarized: total,
                    created_at: Utc::now(),
                });
                info!(items_summarized = total, "Memory summarized");
                response.content
            }
            Ok(response) => {
                error!(error = %response.content, "Summary generation failed");
                format!("Summary generation failed: {}", response.content)
            }
            Err(e) => {
                error!(error = %e, "Summary generation failed");
                format!("Summary generation failed: {e}")
            }
        }
    }

    /// Renders the latest summary and the recent tail for use in a prompt.
    ///
    /// When `max_tokens` is given and token accounting is enabled, the result
    /// is truncated to that budget.
    pub fn formatted_context(&self, max_tokens: Option<usize>) -> String {
        let context = {
            let state = self.lock();
            if state.items.is_empty() {
                return "No context available in memory.".to_string();
            }

            let start = state.items.len().saturating_sub(self.config.keep_recent_items);
            let recent =
                state.items[start..].iter().map(MemoryItem::render).collect::<Vec<_>>().join("\n");

            let mut context = String::new();
            match state.summaries.last() {
                Some(summary) => {
                    let _ = write!(
                        context,
                        "## Previous Memory Summary\n{}\n\n## Recent Items\n{recent}",
                        summary.content
                    );
                }
                None => {
                    let _ = write!(context, "## Context\n{recent}");
                }
            }
            context
        };

        match (max_tokens, &self.counter) {
            (Some(limit), Some(counter)) => truncate_to_tokens(counter.as_ref(), &context, limit),
            _ => context,
        }
    }

    /// Returns the last `limit` items, optionally filtered by type first.
    pub fn recent_by_type(&self, kind: Option<&MemoryItemType>, limit: usize) -> Vec<MemoryItem> {
        let state = self.lock();
        let filtered: Vec<&MemoryItem> =
            state.items.iter().filter(|item| kind.is_none_or(|k| &item.kind == k)).collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].iter().map(|item| (*item).clone()).collect()
    }

    /// Removes every item, keeping only the most recent summary.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.pending_compaction.clear();
        state.token_count = 0;
        let last = state.summaries.pop();
        state.summaries.clear();
        state.summaries.extend(last);
        info!("Memory cleared; latest summary kept");
    }

    /// Snapshot of the current items, oldest first.
    pub fn items(&self) -> Vec<MemoryItem> {
        self.lock().items.clone()
    }

    /// Snapshot of the recorded summaries, oldest first.
    pub fn summaries(&self) -> Vec<Summary> {
        self.lock().summaries.clone()
    }

    /// Current token estimate; zero when token accounting is disabled.
    pub fn token_count(&self) -> usize {
        self.lock().token_count
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if no items are held.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

fn summary_prompt(items: &[MemoryItem], counter: Option<&dyn TokenCounter>) -> String {
    let start = items.len().saturating_sub(SUMMARY_WINDOW);
    let listing = items[start..]
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.render()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "# Contextual Memory Summary\n\n\
         ## Recent Items to Summarize\n{listing}\n\n\
         ## Instructions\n\
         1. Write a CONCISE summary of the memory items above.\n\
         2. HIGHLIGHT important facts, critical decisions, recurring success or error patterns and links between items.\n\
         3. KEEP critical details such as names, dates and numeric values.\n\
         4. ORDER the summary chronologically or by importance.\n\
         5. PRIORITIZE information most useful for future tasks.\n\
         6. If you see error or success patterns, SUGGEST recommendations for future runs.\n\n\
         ## Desired Format\n\
         A 3-5 sentence summary capturing the essence of the memories, their patterns and any recommendations.\n"
    );

    match counter {
        Some(counter) => truncate_to_tokens(counter, &prompt, SUMMARY_PROMPT_TOKENS),
        None => prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MemoryConfig {
        MemoryConfig {
            max_items: 4,
            max_tokens: 100_000,
            summarize_threshold: 6,
            keep_recent_items: 2,
            ..MemoryConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(MemoryConfig::default().validate().is_ok());
        let bad = MemoryConfig { keep_recent_items: 30, ..MemoryConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_eviction_keeps_recent_tail_and_high_scorers() {
        let memory = ContextMemory::new(small_config());
        memory.add("message", "m1", None);
        memory.add("summary", "s2", None);
        memory.add("message", "m3", None);
        memory.add("action", "a4", None);
        memory.add("message", "m5", None);
        memory.add("message", "m6", None);
        // Seventh add crosses the threshold.
        memory.add("message", "m7", None);

        let contents: Vec<String> = memory.items().into_iter().map(|i| i.content).collect();
        assert_eq!(contents, vec!["s2", "a4", "m6", "m7"]);
    }

    #[test]
    fn test_token_pressure_drops_older_items() {
        let config = MemoryConfig {
            max_items: 10,
            max_tokens: 60,
            summarize_threshold: 100,
            keep_recent_items: 1,
            ..MemoryConfig::default()
        };
        let memory = ContextMemory::new(config);
        for i in 0..5 {
            memory.add("message", format!("entry number {i}"), None);
        }
        assert!(memory.token_count() <= 60 || memory.len() == 1);
        assert_eq!(memory.items().last().map(|i| i.content.clone()), Some("entry number 4".to_string()));
    }

    #[test]
    fn test_without_token_counting_ignores_token_limit() {
        let config = MemoryConfig { max_tokens: 1, ..MemoryConfig::default() };
        let memory = ContextMemory::new(config).without_token_counting();
        for i in 0..10 {
            memory.add("message", format!("item {i}"), None);
        }
        assert_eq!(memory.len(), 10);
        assert_eq!(memory.token_count(), 0);
    }

    #[test]
    fn test_formatted_context_without_summary() {
        let memory = ContextMemory::default();
        assert_eq!(memory.formatted_context(None), "No context available in memory.");
        memory.add("observation", "page loaded", None);
        assert_eq!(memory.formatted_context(None), "## Context\n[observation] page loaded");
    }

    #[test]
    fn test_recent_by_type_filters_then_limits() {
        let memory = ContextMemory::default();
        memory.add("action", "a1", None);
        memory.add("message", "m1", None);
        memory.add("action", "a2", None);
        memory.add("action", "a3", None);

        let actions = memory.recent_by_type(Some(&MemoryItemType::Action), 2);
        let contents: Vec<&str> = actions.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["a2", "a3"]);
        assert_eq!(memory.recent_by_type(None, 10).len(), 4);
    }

    #[tokio::test]
    async fn test_summarize_without_model_is_soft() {
        let memory = ContextMemory::default();
        memory.add("message", "hello", None);
        let text = memory.summarize().await;
        assert!(text.starts_with("Summary unavailable"));
        assert!(memory.summaries().is_empty());
    }
}
