use crate::chat::message::{MessageStatus, Source};

/// Published by the conversation store after each mutation, in mutation order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Appended {
        index: usize,
        query: String,
    },
    SourcesSet {
        index: usize,
        sources: Vec<Source>,
    },
    FragmentAppended {
        index: usize,
        fragment: String,
    },
    Closed {
        index: usize,
        status: MessageStatus,
    },
}

