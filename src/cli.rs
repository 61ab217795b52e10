//! Interactive terminal session against a running onboarding server.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::client::ApiClient;
use crate::error::ClientError;
use crate::onboarding::service::{MessageResponse, StatusResponse};
use crate::onboarding::session::UserIdentity;

const RULE_WIDTH: usize = 50;

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Help,
    Status,
    Quit,
    Say(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "help" => Self::Help,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            _ => Self::Say(line.to_string()),
        }
    }
}

/// Start a session for `user` and chat until `quit`, `exit`, or end of input.
///
/// Returns the session id so callers can point the user at `status` later.
pub async fn run_interactive<R, W>(
    client: &ApiClient,
    user: &UserIdentity,
    input: R,
    out: &mut W,
) -> Result<String, ClientError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Welcome to the onboarding agent!").ok();
    writeln!(
        out,
        "Starting interactive session for {} ({})\n",
        user.username, user.email
    )
    .ok();

    let started = client
        .start_session(&user.user_id, &user.username, &user.email)
        .await?;
    let session_id = started.session_id;

    writeln!(out, "Session ID: {session_id}").ok();
    writeln!(out, "\nAgent: {}\n", started.message).ok();
    writeln!(
        out,
        "Type 'help' for available commands, 'status' for progress, or 'quit' to exit\n"
    )
    .ok();

    let mut lines = input.lines();
    loop {
        write!(out, "You: ").ok();
        out.flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => {
                writeln!(out, "Goodbye! You can resume your onboarding session later.").ok();
                break;
            }
            ReplCommand::Help => print_help(out),
            ReplCommand::Status => match client.status(&session_id).await {
                Ok(status) => print_status(out, &status),
                Err(e) => {
                    writeln!(out, "Failed to get status: {e}").ok();
                }
            },
            ReplCommand::Say(message) => match client.send_message(&session_id, &message).await {
                Ok(reply) => print_reply(out, &reply),
                Err(e) => {
                    writeln!(out, "Error: {e}").ok();
                }
            },
        }
    }

    Ok(session_id)
}

fn print_help<W: Write>(out: &mut W) {
    writeln!(out, "\nCommands:").ok();
    writeln!(out, "  help    show this list").ok();
    writeln!(out, "  status  show onboarding progress").ok();
    writeln!(out, "  quit    leave (exit works too)").ok();
    writeln!(out, "Anything else is sent to the onboarding agent.\n").ok();
}

fn print_reply<W: Write>(out: &mut W, reply: &MessageResponse) {
    writeln!(out, "\nAgent: {}", reply.message).ok();
    if !reply.next_actions.is_empty() {
        writeln!(out, "\nNext actions:").ok();
        for action in &reply.next_actions {
            writeln!(out, "  • {action}").ok();
        }
    }
    if let Some(ref warning) = reply.sync_warning {
        writeln!(out, "\n(ticket not updated: {warning})").ok();
    }
    writeln!(out, "\nProgress: {:.0}% complete", reply.progress * 100.0).ok();
    writeln!(out, "{}", "-".repeat(RULE_WIDTH)).ok();
}

/// Print a status report.
pub fn print_status<W: Write>(out: &mut W, status: &StatusResponse) {
    writeln!(out, "\nOnboarding status for {}", status.session_id).ok();
    writeln!(out, "  Stage:    {}", status.stage_name).ok();
    writeln!(out, "  Progress: {:.0}%", status.progress * 100.0).ok();
    writeln!(out, "  Complete: {}", if status.completed { "yes" } else { "no" }).ok();
    if let Some(ref ticket_id) = status.ticket.ticket_id {
        writeln!(out, "  Ticket:   {ticket_id}").ok();
    }
    if let Some(ref err) = status.ticket.last_error {
        writeln!(out, "  Ticket sync error: {err}").ok();
    }
    writeln!(out, "  {}\n", status.summary).ok();
}
