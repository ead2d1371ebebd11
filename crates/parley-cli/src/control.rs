//! Operator commands read line by line from stdin: `wake <chat>`,
//! `resume <chat>` and `stop`.

use parley_runtime::ControlSignal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub fn parse_control_line(line: &str) -> Result<Option<ControlSignal>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };
    match command.to_ascii_lowercase().as_str() {
        "wake" | "resume" if argument.is_empty() => {
            Err(format!("'{command}' needs a chat name"))
        }
        "wake" => Ok(Some(ControlSignal::Wake(argument.to_string()))),
        "resume" => Ok(Some(ControlSignal::Resume(argument.to_string()))),
        "stop" | "shutdown" | "quit" => Ok(Some(ControlSignal::Shutdown)),
        _ => Err(format!("unknown command '{command}'")),
    }
}

/// Forwards stdin commands to the event loop until stdin closes or the loop
/// stops listening.
pub fn spawn_stdin_control(control_tx: mpsc::Sender<ControlSignal>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "stdin control channel closed");
                    break;
                }
            };
            match parse_control_line(&line) {
                Ok(Some(signal)) => {
                    if control_tx.send(signal).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(reason) => tracing::warn!(line = %line.trim(), %reason, "ignored control command"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use parley_runtime::ControlSignal;

    use super::parse_control_line;

    #[test]
    fn unit_parses_wake_resume_and_stop() {
        assert_eq!(
            parse_control_line("wake Tennis A"),
            Ok(Some(ControlSignal::Wake("Tennis A".to_string())))
        );
        assert_eq!(
            parse_control_line("  RESUME   Family "),
            Ok(Some(ControlSignal::Resume("Family".to_string())))
        );
        assert_eq!(parse_control_line("stop"), Ok(Some(ControlSignal::Shutdown)));
        assert_eq!(parse_control_line("# note"), Ok(None));
    }

    #[test]
    fn regression_commands_without_chat_are_rejected() {
        assert!(parse_control_line("wake").is_err());
        assert!(parse_control_line("dance Tennis A").is_err());
    }
}
