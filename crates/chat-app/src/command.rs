/// One line of user input in the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Text to submit as a question. Empty text resends a restored question.
    Ask(String),
    /// List the citations of a message.
    Sources { message: usize },
    /// Toggle the expanded view of one citation.
    Show { message: usize, source: usize },
    /// Switch the project later questions are asked against and save it to settings.
    Project(String),
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Ask(String::new());
        }
        let Some(rest) = trimmed.strip_prefix(':') else {
            return Self::Ask(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args = parts.collect::<Vec<_>>();

        match (name, args.as_slice()) {
            ("q" | "quit" | "exit", []) => Self::Quit,
            ("h" | "help", []) => Self::Help,
            ("project", [project]) => Self::Project(project.to_string()),
            ("sources", [message]) => match message.parse::<usize>() {
                Ok(message) => Self::Sources { message },
                Err(_) => Self::Unknown(trimmed.to_string()),
            },
            ("show", [message, source]) => {
                match (message.parse::<usize>(), source.parse::<usize>()) {
                    (Ok(message), Ok(source)) => Self::Show { message, source },
                    _ => Self::Unknown(trimmed.to_string()),
                }
            }
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

pub const HELP: &str = "\
Type a question and press Enter to ask it.
  :sources <message>          list the citations of a message
  :show <message> <source>    expand or collapse one citation
  :project <id>               ask later questions about another project
  :help                       show this help
  :quit                       leave
An empty line resends a question that failed to send.";
