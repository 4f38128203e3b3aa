//! Plain-text rendering of the transcript for the terminal client.
use crate::chat::{ChatMessage, MessageStatus, Notice, NoticeLevel, Source, StoreEvent};

const CODE_RULE: &str = "----------------------------------------";

/// Text to print for one store event while a query streams.
pub fn render_event(event: &StoreEvent) -> Option<String> {
    match event {
        StoreEvent::Appended { index, query } => Some(format!("\n[{index}] you: {query}\n")),
        StoreEvent::SourcesSet { index, sources } if !sources.is_empty() => Some(format!(
            "[{index}] sources: {}\n",
            citation_chips(sources, None)
        )),
        StoreEvent::SourcesSet { .. } => None,
        StoreEvent::FragmentAppended { fragment, .. } => Some(fragment.clone()),
        StoreEvent::Closed { status, .. } => Some(match status {
            MessageStatus::Interrupted(reason) => format!("\n(answer interrupted: {reason})\n"),
            MessageStatus::Failed(_) => String::new(),
            MessageStatus::Pending | MessageStatus::Streaming | MessageStatus::Done => {
                "\n".to_string()
            }
        }),
    }
}

/// Numbered citation chips, with the selected one bracketed.
pub fn citation_chips(sources: &[Source], selected: Option<usize>) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(position, source)| {
            if selected == Some(position) {
                format!("[{position}:{}]", source.file_name)
            } else {
                format!("{position}:{}", source.file_name)
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn render_sources(index: usize, message: &ChatMessage, selected: Option<usize>) -> String {
    if message.sources().is_empty() {
        return format!("[{index}] no sources\n");
    }

    let mut rendered = format!("[{index}] {}\n", citation_chips(message.sources(), selected));
    if let Some(source) = selected.and_then(|position| message.sources().get(position)) {
        rendered.push_str(&render_expanded_source(source));
    }
    rendered
}

pub fn render_expanded_source(source: &Source) -> String {
    format!(
        "{CODE_RULE}\n{} (similarity {:.2})\n{}\n{CODE_RULE}\n{}\n{CODE_RULE}\n",
        source.file_name, source.similarity, source.summary, source.source_code
    )
}

pub fn render_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("note: {}", notice.message),
        NoticeLevel::Error => format!("error: {}", notice.message),
    }
}
