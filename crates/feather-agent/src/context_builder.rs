use feather_core::Message;

/// Inputs to [`build_context`] (spec §4.14): history turns, hand-supplied
/// base/RAG messages, optional pre-computed digests, and the budget to
/// assemble within.
pub struct ContextBuilderInput<'a> {
    pub history: &'a [Message],
    pub base: Vec<Message>,
    pub rag: Vec<Message>,
    pub digests: Vec<Message>,
    pub max_tokens: u64,
    pub max_recent_turns: usize,
}

/// Raised when the budget can't be met even after every drop/truncation
/// step (spec §4.14 "if still over budget, raise").
#[derive(Debug, thiserror::Error)]
#[error("context budget of {max_tokens} tokens could not be met")]
pub struct ContextBudgetExceeded {
    pub max_tokens: u64,
}

fn token_count(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|m| m.content.split_whitespace().count() as u64)
        .sum()
}

fn truncate_words(content: &str, max_words: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() <= max_words {
        return content.to_string();
    }
    if max_words == 0 {
        return "…".to_string();
    }
    let mut truncated = words[..max_words].join(" ");
    truncated.push('…');
    truncated
}

/// Newline-joined `[role] content` rendering of a turn prefix, used to
/// synthesize a digest when the caller supplies none (spec §4.14).
fn synthesize_digest(prefix: &[Message]) -> Message {
    let content = prefix
        .iter()
        .map(|m| format!("[{}] {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    Message::summary(content)
}

/// Assembles a single linearized prompt in order **base → digest → rag →
/// recent** (spec §4.14). `recent` is the last `max_recent_turns` of
/// `history`; if `digests` is empty and the remaining history (everything
/// before `recent`) is non-empty, one digest message is synthesized from
/// that prefix. Over-budget handling, in order, until within budget: drop
/// RAG from the tail, truncate the digest, drop oldest recents, truncate
/// the last base message; if still over budget, raise.
pub fn build_context(input: ContextBuilderInput<'_>) -> Result<Vec<Message>, ContextBudgetExceeded> {
    let ContextBuilderInput {
        history,
        base,
        mut rag,
        digests,
        max_tokens,
        max_recent_turns,
    } = input;

    let split = history.len().saturating_sub(max_recent_turns);
    let (prefix, recent_slice) = history.split_at(split);
    let mut recent: Vec<Message> = recent_slice.to_vec();

    let mut digest: Vec<Message> = if digests.is_empty() {
        if prefix.is_empty() {
            Vec::new()
        } else {
            vec![synthesize_digest(prefix)]
        }
    } else {
        digests
    };

    let mut base = base;

    loop {
        let assembled: Vec<Message> = base
            .iter()
            .cloned()
            .chain(digest.iter().cloned())
            .chain(rag.iter().cloned())
            .chain(recent.iter().cloned())
            .collect();
        if token_count(&assembled) <= max_tokens {
            return Ok(assembled);
        }

        if !rag.is_empty() {
            rag.pop();
            continue;
        }
        if let Some(d) = digest.first() {
            let words = d.content.split_whitespace().count();
            if words > 1 {
                digest[0] = Message::summary(truncate_words(&d.content, words - 1));
                continue;
            }
            digest.clear();
            continue;
        }
        if !recent.is_empty() {
            recent.remove(0);
            continue;
        }
        if let Some(last) = base.last() {
            let words = last.content.split_whitespace().count();
            if words > 1 {
                let truncated_content = truncate_words(&last.content, words - 1);
                let idx = base.len() - 1;
                base[idx] = Message {
                    role: last.role,
                    content: truncated_content,
                    tool_name: last.tool_name.clone(),
                };
                continue;
            }
        }

        return Err(ContextBudgetExceeded { max_tokens });
    }
}
