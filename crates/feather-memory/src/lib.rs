pub mod in_process;
pub mod manager;
pub mod sqlite;

pub use in_process::InProcessStore;
pub use manager::{
    ContextOpts, DefaultSummarizer, Memory, MemoryConfig, MemoryManager, MemoryTurn,
    RawSessionStore, Summarizer, TokenCounter, WordCountTokenCounter,
};
pub use sqlite::SqliteStore;
