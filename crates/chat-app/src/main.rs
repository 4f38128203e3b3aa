use std::io::Write;
use std::sync::Arc;

use repochat::chat::{DispatchError, Notice, QueryDispatcher, StoreEvent};
use repochat::command::{Command, HELP};
use repochat::render;
use repochat::settings::{ChatSettings, SettingsStore};
use repochat_llm::{ProjectId, SourceIndex, create_answer_service};
use snafu::{OptionExt, ResultExt, Whatever};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Terminal client entry point.
///
/// Loads settings, builds the answer service from them and then reads one question or
/// command per line from stdin. Answers are printed as they stream in.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Whatever> {
    // Logs go to stderr so the transcript on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repochat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    let mut dispatcher = build_dispatcher(&settings, &settings_store)?;
    let mut events = dispatcher.subscribe();

    println!(
        "Asking about project '{}'. Type :help for commands.",
        settings.project_id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines
            .next_line()
            .await
            .whatever_context("failed to read from stdin")?
        else {
            break;
        };

        match Command::parse(&line) {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Unknown(raw) => println!("unknown command `{raw}`; try :help"),
            Command::Sources { message } => print_sources(&dispatcher, message),
            Command::Show { message, source } => {
                match dispatcher.toggle_source(message, source) {
                    Ok(_) => print_sources(&dispatcher, message),
                    Err(error) => println!("{error}"),
                }
            }
            Command::Project(project) => {
                match settings_store.update(|settings| settings.project_id = project) {
                    Ok(settings) => println!("Asking about project '{}'.", settings.project_id()),
                    Err(error) => {
                        println!("{}", render::render_notice(&Notice::error(error.to_string())))
                    }
                }
            }
            Command::Ask(text) => {
                if !text.is_empty() {
                    dispatcher.input_mut().set_text(text);
                }
                let project_id = settings_store.settings().project_id();
                ask(&mut dispatcher, &project_id, &mut events).await?;
            }
        }
    }

    Ok(())
}

fn build_dispatcher(
    settings: &ChatSettings,
    settings_store: &SettingsStore,
) -> Result<QueryDispatcher, Whatever> {
    let model_config = settings.to_model_config().with_whatever_context(|| {
        format!(
            "no API key configured; set REPOCHAT_API_KEY or add `api_key` to {:?}",
            settings_store.config_path()
        )
    })?;

    let index = match &settings.index_path {
        Some(path) => {
            SourceIndex::load_file(path, settings.retrieval_limit, settings.min_similarity)
                .with_whatever_context(|_| format!("failed to load source index from {path:?}"))?
        }
        None => {
            tracing::warn!("no index_path configured; answers will have no citations");
            SourceIndex::new(settings.retrieval_limit, settings.min_similarity)
        }
    };

    let service = create_answer_service(model_config, Arc::new(index))
        .whatever_context("failed to create answer service")?;
    Ok(QueryDispatcher::new(service))
}

/// Submits the input and prints store events while the answer streams.
async fn ask(
    dispatcher: &mut QueryDispatcher,
    project_id: &ProjectId,
    events: &mut mpsc::UnboundedReceiver<StoreEvent>,
) -> Result<(), Whatever> {
    let result = {
        let submission = dispatcher.submit_input(project_id);
        tokio::pin!(submission);

        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => print_event(&event)?,
                result = &mut submission => break result,
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print_event(&event)?;
    }

    match result {
        Ok(_) => {}
        Err(DispatchError::InvalidInput { .. }) => println!("please type a question first"),
        Err(error) => println!("{}", render::render_notice(&Notice::error(error.to_string()))),
    }

    for notice in dispatcher.drain_notices() {
        println!("{}", render::render_notice(&notice));
    }
    if !dispatcher.input().text().is_empty() {
        let hint = Notice::info(format!("press Enter to resend: {}", dispatcher.input().text()));
        println!("{}", render::render_notice(&hint));
    }
    Ok(())
}

fn print_event(event: &StoreEvent) -> Result<(), Whatever> {
    if let Some(text) = render::render_event(event) {
        let mut stdout = std::io::stdout();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .whatever_context("failed to write to stdout")?;
    }
    Ok(())
}

fn print_sources(dispatcher: &QueryDispatcher, message: usize) {
    match dispatcher.store().get(message) {
        Some(chat_message) => print!(
            "{}",
            render::render_sources(message, chat_message, dispatcher.selection().selected(message))
        ),
        None => println!("no message {message}"),
    }
}

fn prompt() -> Result<(), Whatever> {
    let mut stdout = std::io::stdout();
    stdout
        .write_all(b"> ")
        .and_then(|_| stdout.flush())
        .whatever_context("failed to write to stdout")
}
