/// Maximum-three-exchange history sent with each query.
pub mod context;
pub mod dispatcher;
/// Mutation events published by the conversation store.
pub mod events;
pub mod input;
/// Chat entities exposed read-only to renderers.
pub mod message;
pub mod notice;
pub mod selection;
pub mod store;
pub mod stream;

pub use context::{CONTEXT_WINDOW_LEN, ContextWindowBuilder};
pub use dispatcher::{DispatchError, DispatchResult, QueryDispatcher, Submission};
pub use events::StoreEvent;
pub use input::{QueryInput, ValidationError};
pub use message::{ChatMessage, MessageStatus, Source};
pub use notice::{Notice, NoticeLevel, Notices};
pub use selection::{SelectionError, SelectionResult, SelectionState};
pub use store::{ConversationStore, StoreError, StoreResult};
pub use stream::{StreamConsumer, StreamOutcome};
