//! Interactive loop: plain lines are stored as user messages, slash
//! commands inspect or switch memory.

use anyhow::Result;
use mnemo_core::MemoryWorker;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /history        show the session's messages
  /context        show the session's context string
  /clear          clear the session in the active module
  /use <id>       switch the active memory module
  /modules        list memory modules
  /help           show this help
  /quit           exit
Anything else is stored as a user message.";

#[derive(Debug, PartialEq)]
enum ReplCommand {
    Message(String),
    History,
    Context,
    Clear,
    Use(String),
    Modules,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match (name, arg) {
        ("history", _) => ReplCommand::History,
        ("context", _) => ReplCommand::Context,
        ("clear", _) => ReplCommand::Clear,
        ("use", id) if !id.is_empty() => ReplCommand::Use(id.to_string()),
        ("modules", _) => ReplCommand::Modules,
        ("help", _) => ReplCommand::Help,
        ("quit" | "exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

pub async fn run(worker: &MemoryWorker, session: String) -> Result<()> {
    println!(
        "mnemo - session '{}', module {} (/help for commands)",
        session,
        worker.active_module_id().as_deref().unwrap_or("<none>")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        // Errors are reported and the loop continues
        let outcome = match parse_line(&line) {
            ReplCommand::Empty => Ok(()),
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ReplCommand::Message(content) => worker.add_message("user", &content, &session).await,
            ReplCommand::History => worker.get_messages(&session).await.map(|messages| {
                if messages.is_empty() {
                    println!("(empty)");
                }
                for message in messages {
                    println!("[{}] {}", message.role, message.content);
                }
            }),
            ReplCommand::Context => worker
                .get_context_string(&session)
                .await
                .map(|context| println!("{}", context)),
            ReplCommand::Clear => worker
                .clear(&session)
                .await
                .map(|()| println!("🧹 Cleared session '{}'", session)),
            ReplCommand::Use(id) => worker
                .set_active_module(&id)
                .await
                .map(|()| println!("✅ Active memory module: {}", id)),
            ReplCommand::Modules => {
                crate::print_modules(worker);
                Ok(())
            }
            ReplCommand::Unknown(input) => {
                println!("Unknown command: {} (try /help)", input);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            eprintln!("❌ {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_messages() {
        assert_eq!(
            parse_line("  what is memory?  "),
            ReplCommand::Message("what is memory?".to_string())
        );
        assert_eq!(parse_line("   "), ReplCommand::Empty);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse_line("/history"), ReplCommand::History);
        assert_eq!(parse_line("/context"), ReplCommand::Context);
        assert_eq!(parse_line("/clear"), ReplCommand::Clear);
        assert_eq!(parse_line("/use  stm_prp "), ReplCommand::Use("stm_prp".to_string()));
        assert_eq!(parse_line("/modules"), ReplCommand::Modules);
        assert_eq!(parse_line("/quit"), ReplCommand::Quit);
        assert_eq!(parse_line("/exit"), ReplCommand::Quit);
    }

    #[test]
    fn test_bad_commands() {
        assert_eq!(parse_line("/use"), ReplCommand::Unknown("/use".to_string()));
        assert_eq!(parse_line("/dance"), ReplCommand::Unknown("/dance".to_string()));
    }
}
