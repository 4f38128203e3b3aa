use snafu::Snafu;

use crate::chat::message::ChatMessage;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SelectionError {
    #[snafu(display("no selection cursor for message {message_index} ({known} known)"))]
    UnknownMessage {
        stage: &'static str,
        message_index: usize,
        known: usize,
    },
}

pub type SelectionResult<T> = Result<T, SelectionError>;

/// Per-message cursor naming the expanded citation, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    cursors: Vec<Option<usize>>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collapsed cursor for every message that has none. Existing cursors are kept.
    pub fn reconcile(&mut self, messages: &[ChatMessage]) {
        if self.cursors.len() < messages.len() {
            self.cursors.resize(messages.len(), None);
        }
    }

    /// Expands `source_index`, or collapses it when it is already expanded.
    pub fn toggle(
        &mut self,
        message_index: usize,
        source_index: usize,
    ) -> SelectionResult<Option<usize>> {
        let known = self.cursors.len();
        let Some(cursor) = self.cursors.get_mut(message_index) else {
            return UnknownMessageSnafu {
                stage: "toggle",
                message_index,
                known,
            }
            .fail();
        };

        *cursor = if *cursor == Some(source_index) {
            None
        } else {
            Some(source_index)
        };
        Ok(*cursor)
    }

    pub fn selected(&self, message_index: usize) -> Option<usize> {
        self.cursors.get(message_index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::ConversationStore;

    fn state_for(message_count: usize) -> SelectionState {
        let mut store = ConversationStore::new();
        let mut state = SelectionState::new();
        for turn in 0..message_count {
            let index = store.append(format!("q{turn}")).expect("append");
            store
                .close(index, crate::chat::message::MessageStatus::Done)
                .expect("close");
            state.reconcile(store.messages());
        }
        state
    }

    #[test]
    fn reconcile_adds_collapsed_cursors_for_new_messages() {
        let state = state_for(3);
        assert_eq!(state.len(), 3);
        assert!((0..3).all(|index| state.selected(index).is_none()));
    }

    #[test]
    fn toggling_twice_collapses_again() {
        let mut state = state_for(1);
        assert_eq!(state.toggle(0, 2).expect("toggle"), Some(2));
        assert_eq!(state.toggle(0, 2).expect("toggle"), None);
        assert_eq!(state.selected(0), None);
    }

    #[test]
    fn toggling_a_different_source_replaces_the_selection() {
        let mut state = state_for(2);
        state.toggle(1, 0).expect("toggle");
        state.toggle(1, 3).expect("toggle");

        assert_eq!(state.selected(1), Some(3));
        assert_eq!(state.selected(0), None);
    }

    #[test]
    fn reconcile_never_alters_existing_cursors() {
        let mut store = ConversationStore::new();
        let mut state = SelectionState::new();
        let first = store.append("first").expect("append");
        state.reconcile(store.messages());
        state.toggle(first, 1).expect("toggle");

        store
            .close(first, crate::chat::message::MessageStatus::Done)
            .expect("close");
        store.append("second").expect("append");
        state.reconcile(store.messages());
        state.reconcile(store.messages());

        assert_eq!(state.len(), 2);
        assert_eq!(state.selected(first), Some(1));
        assert_eq!(state.selected(1), None);
    }

    #[test]
    fn toggle_rejects_unknown_message() {
        let mut state = state_for(1);
        assert!(matches!(
            state.toggle(4, 0),
            Err(SelectionError::UnknownMessage {
                message_index: 4,
                known: 1,
                ..
            })
        ));
    }
}
