use std::io::BufRead;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::display::PlayerCommand;

/// Parses one line of operator input.
///
/// `p` or `space` toggles pause, `pause` and `resume` (or `play`) set it,
/// `s N` or `seek N` jumps to slider step N, `q` or `quit` exits.
pub fn parse_command(line: &str) -> Option<PlayerCommand> {
    let mut words = line.split_whitespace();
    let command = words.next()?.to_ascii_lowercase();
    let arg = words.next();

    match (command.as_str(), arg) {
        ("p" | "space", None) => Some(PlayerCommand::TogglePause),
        ("pause", None) => Some(PlayerCommand::Pause),
        ("resume" | "play", None) => Some(PlayerCommand::Resume),
        ("q" | "quit" | "exit", None) => Some(PlayerCommand::Quit),
        ("s" | "seek", Some(step)) => step.parse().ok().map(PlayerCommand::Seek),
        _ => None,
    }
}

/// Forwards parsed commands from `reader` until it closes or the receiver is gone.
pub fn forward_commands<R: BufRead>(reader: R, commands: &flume::Sender<PlayerCommand>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read input");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            warn!(input = line.trim(), "unrecognised command");
            continue;
        };
        if commands.send(command).is_err() {
            return;
        }
    }
    debug!("input closed");
}

/// Reads commands from `reader` on a dedicated thread.
///
/// Reads block without a way to cancel them, so the thread is never joined:
/// it ends with the input, with the receiver on its next line, or with the
/// process.
pub fn spawn_reader<R>(reader: R, commands: flume::Sender<PlayerCommand>) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("player-input".into())
        .spawn(move || forward_commands(reader, &commands))
}

/// Reads commands from standard input on a dedicated thread.
pub fn spawn_stdin_reader(commands: flume::Sender<PlayerCommand>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("player-stdin".into())
        .spawn(move || forward_commands(std::io::stdin().lock(), &commands))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("p"), Some(PlayerCommand::TogglePause));
        assert_eq!(parse_command("  SPACE "), Some(PlayerCommand::TogglePause));
        assert_eq!(parse_command("pause"), Some(PlayerCommand::Pause));
        assert_eq!(parse_command("play"), Some(PlayerCommand::Resume));
        assert_eq!(parse_command("q"), Some(PlayerCommand::Quit));
        assert_eq!(parse_command("s 250"), Some(PlayerCommand::Seek(250)));
        assert_eq!(parse_command("seek 0"), Some(PlayerCommand::Seek(0)));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("seek"), None);
        assert_eq!(parse_command("seek -3"), None);
        assert_eq!(parse_command("seek ten"), None);
        assert_eq!(parse_command("p now"), None);
        assert_eq!(parse_command("rewind"), None);
    }

    #[test]
    fn forwards_lines_until_input_closes() {
        let input: &[u8] = b"p\n\nbogus\ns 10\nq\n";
        let (tx, rx) = flume::unbounded();
        forward_commands(input, &tx);

        let received: Vec<_> = rx.drain().collect();
        assert_eq!(
            received,
            vec![
                PlayerCommand::TogglePause,
                PlayerCommand::Seek(10),
                PlayerCommand::Quit
            ]
        );
    }

    #[test]
    fn reader_stops_once_receiver_is_gone() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        let handle = spawn_reader(&b"p\np\np\n"[..], tx).unwrap();
        handle.join().unwrap();
    }
}
