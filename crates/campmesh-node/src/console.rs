//! Line-oriented operator console read from stdin.

use std::str::FromStr;

use thiserror::Error;

use campmesh_core::MeshEngine;
use campmesh_shared::{AnnouncementPriority, Conversation, MemberId};

pub const HELP: &str = "\
commands:
  say <text>                      post to the camp channel
  dm <member> <text>              direct message
  sos                             raise an emergency
  ack                             acknowledge the active emergency
  allclear                        resolve the active emergency (lead only)
  checkin                         check in now
  announce <priority> <title> | <message>
  read                            mark every announcement read
  who                             list members and presence
  overdue                         list overdue members
  help";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Say(String),
    Direct { to: MemberId, text: String },
    Sos,
    Ack,
    AllClear,
    CheckIn,
    Announce {
        priority: AnnouncementPriority,
        title: String,
        message: String,
    },
    ReadAll,
    Who,
    Overdue,
    Help,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseCommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match word.to_ascii_lowercase().as_str() {
            "say" if !rest.is_empty() => Ok(Self::Say(rest.to_string())),
            "say" => Err(ParseCommandError::Usage("say <text>")),
            "dm" => match rest.split_once(' ') {
                Some((to, text)) if !text.trim().is_empty() => Ok(Self::Direct {
                    to: MemberId::new(to),
                    text: text.trim().to_string(),
                }),
                _ => Err(ParseCommandError::Usage("dm <member> <text>")),
            },
            "sos" => Ok(Self::Sos),
            "ack" => Ok(Self::Ack),
            "allclear" => Ok(Self::AllClear),
            "checkin" => Ok(Self::CheckIn),
            "announce" => parse_announce(rest),
            "read" => Ok(Self::ReadAll),
            "who" => Ok(Self::Who),
            "overdue" => Ok(Self::Overdue),
            "help" | "?" => Ok(Self::Help),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_announce(rest: &str) -> Result<ConsoleCommand, ParseCommandError> {
    const USAGE: &str = "announce <normal|important|urgent> <title> | <message>";

    let (priority, body) = rest.split_once(' ').ok_or(ParseCommandError::Usage(USAGE))?;
    let priority = match priority.to_ascii_lowercase().as_str() {
        "normal" => AnnouncementPriority::Normal,
        "important" => AnnouncementPriority::Important,
        "urgent" => AnnouncementPriority::Urgent,
        _ => return Err(ParseCommandError::Usage(USAGE)),
    };
    let (title, message) = body.split_once('|').ok_or(ParseCommandError::Usage(USAGE))?;
    let (title, message) = (title.trim(), message.trim());
    if title.is_empty() || message.is_empty() {
        return Err(ParseCommandError::Usage(USAGE));
    }
    Ok(ConsoleCommand::Announce {
        priority,
        title: title.to_string(),
        message: message.to_string(),
    })
}

/// Run one command against the engine and describe the result.
pub async fn execute(engine: &MeshEngine, command: ConsoleCommand) -> anyhow::Result<String> {
    let reply = match command {
        ConsoleCommand::Say(text) => {
            let message = engine.send_text(Conversation::Camp, text).await?;
            format!("sent {} (seq {})", message.id, message.sequence)
        }
        ConsoleCommand::Direct { to, text } => {
            let message = engine.send_text(Conversation::Direct(to), text).await?;
            format!("sent {} (seq {})", message.id, message.sequence)
        }
        ConsoleCommand::Sos => {
            let message = engine.send_sos(None).await?;
            format!("emergency raised: {}", message.id)
        }
        ConsoleCommand::Ack => match engine.acknowledge_emergency().await {
            Some(emergency) => format!("acknowledged emergency from {}", emergency.originator_name),
            None => "no active emergency".to_string(),
        },
        ConsoleCommand::AllClear => match engine.resolve_emergency().await? {
            Some(message) => format!("all clear sent: {}", message.id),
            None => "no active emergency".to_string(),
        },
        ConsoleCommand::CheckIn => {
            engine.check_in().await?;
            match engine.next_check_in_due(&engine.local().id).await {
                Some(due) => format!("checked in, next due {due}"),
                None => "checked in".to_string(),
            }
        }
        ConsoleCommand::Announce {
            priority,
            title,
            message,
        } => {
            let announcement = engine
                .send_announcement(title, message, priority, None)
                .await?;
            format!("announcement posted: {}", announcement.id)
        }
        ConsoleCommand::ReadAll => {
            let count = engine.mark_all_as_read().await;
            format!("{count} announcement(s) marked read")
        }
        ConsoleCommand::Who => engine
            .members()
            .await
            .iter()
            .map(|view| {
                format!(
                    "{:<16} {:<10} {:?}",
                    view.member.name,
                    view.member.role.as_str(),
                    view.connection_status
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ConsoleCommand::Overdue => {
            let overdue = engine.overdue_members().await;
            if overdue.is_empty() {
                "nobody is overdue".to_string()
            } else {
                overdue
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
        ConsoleCommand::Help => HELP.to_string(),
    };
    Ok(reply)
}
