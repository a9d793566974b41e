//! Line-oriented host used by the binaries.
//!
//! Each input line is one command:
//!
//! ```text
//! join <id>                  load the entity (session lock + record)
//! leave <id>                 final save, release and evict
//! show <id>                  print the cached record
//! set <id> <field> <json>    update one field of a loaded entity
//! quit                       stop reading commands
//! ```

use std::io;
use std::str::FromStr;

use entity_store_core::{EntityId, Record};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;

use crate::service::EntityStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join(EntityId),
    Leave(EntityId),
    Show(EntityId),
    Set {
        entity: EntityId,
        field: String,
        value: Value,
    },
    Quit,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("set: invalid JSON value: {0}")]
    InvalidValue(#[from] serde_json::Error),
}

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

fn entity_arg<'a>(
    command: &'static str,
    rest: &'a str,
) -> Result<(EntityId, &'a str), CommandError> {
    next_word(rest)
        .map(|(id, rest)| (EntityId::from(id), rest))
        .ok_or(CommandError::MissingArgument {
            command,
            argument: "entity id",
        })
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (name, rest) = next_word(line).ok_or(CommandError::Empty)?;
        match name {
            "join" => Ok(Command::Join(entity_arg("join", rest)?.0)),
            "leave" => Ok(Command::Leave(entity_arg("leave", rest)?.0)),
            "show" => Ok(Command::Show(entity_arg("show", rest)?.0)),
            "set" => {
                let (entity, rest) = entity_arg("set", rest)?;
                let (field, rest) = next_word(rest).ok_or(CommandError::MissingArgument {
                    command: "set",
                    argument: "field",
                })?;
                let raw = rest.trim();
                if raw.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "set",
                        argument: "value",
                    });
                }
                Ok(Command::Set {
                    entity,
                    field: field.to_string(),
                    value: serde_json::from_str(raw)?,
                })
            }
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn render(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_else(|err| format!("<unprintable: {}>", err))
}

async fn execute(store: &EntityStore, template: &Record, command: Command) -> String {
    match command {
        Command::Join(entity) => match store.get_data(&entity, template).await {
            Some(record) => format!("{} joined: {}", entity, render(&record)),
            None => format!("{} was turned away", entity),
        },
        Command::Leave(entity) => match store.entity_departed(&entity).await {
            Ok(()) => format!("{} saved and left", entity),
            Err(err) => format!("{} left: {}", entity, err),
        },
        Command::Show(entity) => match store.cached(&entity) {
            Some(record) => format!("{}: {}", entity, render(&record)),
            None => format!("{} is not loaded", entity),
        },
        Command::Set {
            entity,
            field,
            value,
        } => match store.update_data(&entity, |record| record.with(field, value)) {
            Some(record) => format!("{}: {}", entity, render(&record)),
            None => format!("{} is not loaded", entity),
        },
        Command::Quit => String::new(),
    }
}

/// Read commands from `input` until EOF, `quit` or `shutdown` flips to `true`,
/// writing one reply line per command to `output`.
pub async fn run_console<R, W>(
    store: &EntityStore,
    template: &Record,
    input: R,
    output: &mut W,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for(|&stop| stop) => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(store, template, command).await,
            Err(err) => format!("error: {}", err),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::host::LoggingHost;
    use entity_store_core::{ManualClock, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "join 42".parse::<Command>().unwrap(),
            Command::Join(EntityId::from("42"))
        );
        assert_eq!(
            "  leave   alice ".parse::<Command>().unwrap(),
            Command::Leave(EntityId::from("alice"))
        );
        assert_eq!(
            "set 1 inventory [\"sword\", \"shield\"]"
                .parse::<Command>()
                .unwrap(),
            Command::Set {
                entity: EntityId::from("1"),
                field: "inventory".to_string(),
                value: json!(["sword", "shield"]),
            }
        );
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("".parse::<Command>(), Err(CommandError::Empty)));
        assert!(matches!(
            "dance 1".parse::<Command>(),
            Err(CommandError::Unknown(name)) if name == "dance"
        ));
        assert!(matches!(
            "join".parse::<Command>(),
            Err(CommandError::MissingArgument { argument: "entity id", .. })
        ));
        assert!(matches!(
            "set 1 score".parse::<Command>(),
            Err(CommandError::MissingArgument { argument: "value", .. })
        ));
        assert!(matches!(
            "set 1 score {oops".parse::<Command>(),
            Err(CommandError::InvalidValue(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_session() {
        let remote = MemoryStore::new();
        let store = EntityStore::with_clock(
            Arc::new(remote.clone()),
            Arc::new(LoggingHost),
            Arc::new(ManualClock::new(1_700_000_000)),
            SessionConfig::default(),
        )
        .unwrap();
        let template = Record::new().with("score", 0);
        let (_stop, shutdown) = watch::channel(false);

        let input: &[u8] =
            b"join 1\nset 1 score 10\nshow 1\nbogus\nleave 1\nshow 1\nquit\nshow 1\n";
        let mut output = Vec::new();
        run_console(&store, &template, input, &mut output, shutdown)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let replies: Vec<&str> = text.lines().collect();
        assert_eq!(
            replies,
            vec![
                "1 joined: {\"score\":0}",
                "1: {\"score\":10}",
                "1: {\"score\":10}",
                "error: unknown command: bogus",
                "1 saved and left",
                "1 is not loaded",
            ]
        );
        assert_eq!(remote.value("user_1"), Some(json!({"score": 10})));
    }

    #[tokio::test]
    async fn test_console_stops_on_shutdown_signal() {
        let store = EntityStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LoggingHost),
            SessionConfig::default(),
        )
        .unwrap();
        let (stop, shutdown) = watch::channel(false);
        let (_client, server) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(server);

        stop.send(true).unwrap();
        let mut output = Vec::new();
        run_console(&store, &Record::new(), reader, &mut output, shutdown)
            .await
            .unwrap();
        assert!(output.is_empty());
    }
}
