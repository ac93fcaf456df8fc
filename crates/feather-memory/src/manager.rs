use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feather_core::Role;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One append-only record in a session's flat turn sequence (spec §3, §4.9).
/// Ordered by `(created_at, insertion)`; `tokens` is populated on write if
/// absent.
#[derive(Debug, Clone)]
pub struct MemoryTurn {
    pub role: Role,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub tokens: Option<u64>,
}

impl MemoryTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: None,
            tokens: None,
        }
    }
}

/// Token counting is a stub collaborator (spec §1's "token counters beyond
/// a stub" are out of scope) — word count is a cheap, deterministic proxy
/// good enough to exercise the budget algorithm below.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

pub struct WordCountTokenCounter;

impl TokenCounter for WordCountTokenCounter {
    fn count(&self, text: &str) -> u64 {
        text.split_whitespace().count() as u64
    }
}

/// Folds the older prefix of a session's turns into a single summary turn
/// (spec §4.9 `summarize`).
pub trait Summarizer: Send + Sync {
    fn summarize(&self, turns: &[MemoryTurn]) -> String;
}

/// `[role@ts] content`, newline-joined — the spec's stated default.
pub struct DefaultSummarizer;

impl Summarizer for DefaultSummarizer {
    fn summarize(&self, turns: &[MemoryTurn]) -> String {
        turns
            .iter()
            .map(|t| {
                let ts = t.created_at.map(|d| d.to_rfc3339()).unwrap_or_default();
                format!("[{}@{}] {}", t.role.as_str(), ts, t.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContextOpts {
    pub max_turns: Option<usize>,
    pub max_tokens: Option<u64>,
}

pub struct MemoryConfig {
    /// Eviction cap enforced on every `append` (spec §4.9).
    pub max_turns: Option<usize>,
    /// Trigger for `summarize`: fold everything older than the most recent
    /// `summary_max_recent` turns.
    pub summary_max_recent: usize,
    pub token_counter: Arc<dyn TokenCounter>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: None,
            summary_max_recent: 50,
            token_counter: Arc::new(WordCountTokenCounter),
            summarizer: Arc::new(DefaultSummarizer),
        }
    }
}

/// The operations every memory backend exposes (spec §4.9). Kept separate
/// from [`RawSessionStore`] so the budget/eviction/summarize algorithm is
/// shared across backends and only the storage primitive varies.
#[async_trait]
pub trait MemoryManager: Send + Sync {
    async fn append(&self, session_id: &str, turn: MemoryTurn) -> anyhow::Result<()>;
    async fn get_context(&self, session_id: &str, opts: ContextOpts) -> anyhow::Result<Vec<MemoryTurn>>;
    async fn summarize(&self, session_id: &str) -> anyhow::Result<()>;
    async fn trim(&self, session_id: &str, retain_turns: usize) -> anyhow::Result<()>;
}

/// Storage primitive a concrete backend implements: load the full
/// append-only sequence for a session, replace it wholesale, or drop it.
/// Concurrent operations on the same session must be serialized by the
/// implementation or by [`Memory`]'s own per-session lock.
#[async_trait]
pub trait RawSessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> anyhow::Result<Vec<MemoryTurn>>;
    async fn replace(&self, session_id: &str, turns: Vec<MemoryTurn>) -> anyhow::Result<()>;
    async fn delete(&self, session_id: &str) -> anyhow::Result<()>;
}

/// Generic [`MemoryManager`] built over any [`RawSessionStore`]. Both the
/// in-process and sqlite backends are this struct parameterized over their
/// respective store — the budget/eviction/summarize logic lives here once.
pub struct Memory<S: RawSessionStore> {
    store: S,
    config: MemoryConfig,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: RawSessionStore> Memory<S> {
    pub fn new(store: S, config: MemoryConfig) -> Self {
        Self {
            store,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-session lock so concurrent `append`s are serialized the way a
    /// transactional backend would (spec §4.9, §5).
    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl<S: RawSessionStore> MemoryManager for Memory<S> {
    async fn append(&self, session_id: &str, mut turn: MemoryTurn) -> anyhow::Result<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        if turn.created_at.is_none() {
            turn.created_at = Some(Utc::now());
        }
        if turn.tokens.is_none() {
            turn.tokens = Some(self.config.token_counter.count(&turn.content));
        }

        let mut turns = self.store.load(session_id).await?;
        turns.push(turn);
        if let Some(max) = self.config.max_turns
            && turns.len() > max
        {
            let drop = turns.len() - max;
            turns.drain(0..drop);
        }
        self.store.replace(session_id, turns).await
    }

    async fn get_context(&self, session_id: &str, opts: ContextOpts) -> anyhow::Result<Vec<MemoryTurn>> {
        let turns = self.store.load(session_id).await?;
        Ok(budgeted_context(&turns, opts.max_turns, opts.max_tokens))
    }

    async fn summarize(&self, session_id: &str) -> anyhow::Result<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let turns = self.store.load(session_id).await?;
        if turns.len() <= self.config.summary_max_recent {
            return Ok(());
        }
        let split = turns.len() - self.config.summary_max_recent;
        let (older, recent) = turns.split_at(split);
        let summary = MemoryTurn {
            role: Role::Summary,
            content: self.config.summarizer.summarize(older),
            created_at: Some(Utc::now()),
            tokens: None,
        };
        let mut folded = Vec::with_capacity(recent.len() + 1);
        folded.push(summary);
        folded.extend_from_slice(recent);
        self.store.replace(session_id, folded).await
    }

    async fn trim(&self, session_id: &str, retain_turns: usize) -> anyhow::Result<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        if retain_turns == 0 {
            return self.store.delete(session_id).await;
        }
        let turns = self.store.load(session_id).await?;
        let start = turns.len().saturating_sub(retain_turns);
        self.store.replace(session_id, turns[start..].to_vec()).await
    }
}

/// Walks `all` from newest to oldest, keeping whole turns while the
/// running token sum stays within `max_tokens`; the first turn that would
/// overflow is word-truncated to the remaining budget (with a trailing
/// `…`) or dropped if no budget remains. `max_turns` caps the window
/// considered before the token budget is applied (spec §4.9, §8 "memory
/// budget").
fn budgeted_context(all: &[MemoryTurn], max_turns: Option<usize>, max_tokens: Option<u64>) -> Vec<MemoryTurn> {
    let windowed: &[MemoryTurn] = match max_turns {
        Some(n) => {
            let start = all.len().saturating_sub(n);
            &all[start..]
        }
        None => all,
    };

    let Some(budget) = max_tokens else {
        return windowed.to_vec();
    };

    let mut included: Vec<MemoryTurn> = Vec::new();
    let mut sum = 0u64;
    for turn in windowed.iter().rev() {
        let cost = turn.tokens.unwrap_or(0);
        if sum + cost <= budget {
            sum += cost;
            included.push(turn.clone());
        } else {
            let remaining = budget.saturating_sub(sum);
            if let Some(truncated) = truncate_to_budget(turn, remaining) {
                included.push(truncated);
            }
            break;
        }
    }
    included.reverse();
    included
}

fn truncate_to_budget(turn: &MemoryTurn, budget: u64) -> Option<MemoryTurn> {
    if budget == 0 {
        return None;
    }
    let words: Vec<&str> = turn.content.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let take = (budget as usize).min(words.len());
    if take == words.len() {
        return Some(turn.clone());
    }
    let mut content = words[..take].join(" ");
    content.push('…');
    Some(MemoryTurn {
        role: turn.role,
        content,
        created_at: turn.created_at,
        tokens: Some(take as u64),
    })
}
