//! # Memory Module
//!
//! Conversational memory backends behind one contract, plus the pieces the
//! manager wires them together with.
//!
//! ## Architecture
//!
//! ```text
//!                 MemoryModule (contract)
//!       ┌───────────┬────────┴────┬──────────────┐
//!  EphemeralStore  PersistentStore  TopicStore  RetrievalStub
//!   (stm_eth)        (stm_prp)      (utm_anyai)  (rag_dummy)
//!   in-process       messages table topics table  nothing
//! ```

pub mod clock;
pub mod contract;
pub mod ephemeral;
pub mod persistent;
pub mod retrieval;
pub mod topic;

pub use clock::{Clock, ManualClock, SystemClock};
pub use contract::{render_context, ChatMessage, MemoryModule, DEFAULT_SESSION};
pub use ephemeral::{EphemeralConfig, EphemeralStore};
pub use persistent::{PersistentStore, StoredMessage};
pub use retrieval::{LoggingTopicSink, RetrievalStub, TopicSink};
pub use topic::{IncomingMessage, IngestReport, TopicRecord, TopicStore};
