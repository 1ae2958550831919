//! 记忆层：调用内有界记忆、会话短期历史、长期记忆检索与历史索引

pub mod bounded;
pub mod chunker;
pub mod conversation;
pub mod indexing;
pub mod long_term;
pub mod retrieval;
pub mod session_history;

pub use bounded::Memory;
pub use chunker::{Chunker, ChunkingConfig};
pub use conversation::{ConversationMemory, Message, Role};
pub use indexing::{build_index_records, spawn_history_indexing, IndexRecord};
pub use long_term::{
    HistoryIndex, InMemoryKnowledge, InMemoryProfileStore, InMemoryVectorStore, KnowledgeSearch,
    LongTermMemory, MemoryClients, ProfileStore, VectorStore,
};
pub use retrieval::{retrieve_long_term, RetrievalSettings};
pub use session_history::SessionHistory;
