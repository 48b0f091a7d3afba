use booth_common::state::BoothState;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    Filter(String),
    Mode(String),
    Status,
    Quit,
}

/// Parse one console line. Blank and unrecognised lines give `None`.
pub fn parse_line(line: &str) -> Option<KeyCommand> {
    let mut words = line.split_whitespace();
    let verb = words.next()?.to_ascii_lowercase();
    let arg = words.next();
    match (verb.as_str(), arg) {
        ("filter", Some(name)) => Some(KeyCommand::Filter(name.to_string())),
        ("mode", Some(name)) => Some(KeyCommand::Mode(name.to_string())),
        ("status", _) => Some(KeyCommand::Status),
        ("quit" | "q" | "exit", _) => Some(KeyCommand::Quit),
        _ => None,
    }
}

/// Apply one command. Returns `false` when the console should stop.
pub fn apply(command: KeyCommand, state: &BoothState) -> bool {
    match command {
        KeyCommand::Filter(name) => {
            if let Err(e) = state.set_filter_named(&name) {
                warn!(error = %e, "console filter change rejected");
            }
        }
        KeyCommand::Mode(name) => {
            if let Err(e) = state.set_mode_named(&name) {
                warn!(error = %e, "console mode change rejected");
            }
        }
        KeyCommand::Status => {
            let snapshot = state.snapshot();
            info!(filter = %snapshot.filter, mode = %snapshot.mode, "booth status");
        }
        KeyCommand::Quit => return false,
    }
    true
}

/// Read commands from `input` until `quit` or end of input. `quit` flips
/// the shutdown flag; end of input just stops listening.
pub async fn run<R>(input: R, state: Arc<BoothState>, shutdown: watch::Sender<bool>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "console read failed");
                return;
            }
        };
        let Some(command) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!(line = %line.trim(), "unknown console command, try: filter <name> | mode <name> | status | quit");
            }
            continue;
        };
        if !apply(command, &state) {
            info!("quit requested from console");
            let _ = shutdown.send(true);
            return;
        }
    }
}

/// Console on the process's stdin.
pub fn spawn_stdin(state: Arc<BoothState>, shutdown: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(BufReader::new(tokio::io::stdin()), state, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use booth_common::state::{CaptureMode, FilterKind};

    #[test]
    fn parses_commands() {
        assert_eq!(parse_line("filter neon"), Some(KeyCommand::Filter("neon".into())));
        assert_eq!(parse_line("  MODE  burst "), Some(KeyCommand::Mode("burst".into())));
        assert_eq!(parse_line("status"), Some(KeyCommand::Status));
        assert_eq!(parse_line("q"), Some(KeyCommand::Quit));
        assert_eq!(parse_line("filter"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("dance"), None);
    }

    #[test]
    fn invalid_names_leave_state_alone() {
        let state = BoothState::new();
        assert!(apply(KeyCommand::Filter("noir".into()), &state));
        assert!(apply(KeyCommand::Filter("sparkle".into()), &state));
        assert_eq!(state.filter(), FilterKind::Noir);
        assert!(apply(KeyCommand::Mode("gif".into()), &state));
        assert_eq!(state.mode(), CaptureMode::Gif);
        assert!(!apply(KeyCommand::Quit, &state));
    }

    #[tokio::test]
    async fn script_runs_until_quit() {
        let state = Arc::new(BoothState::new());
        let (tx, rx) = watch::channel(false);
        let script: &[u8] = b"filter glitch\nhello\nmode burst\nquit\nfilter bw\n";
        run(script, Arc::clone(&state), tx).await;

        assert!(*rx.borrow());
        assert_eq!(state.filter(), FilterKind::Glitch);
        assert_eq!(state.mode(), CaptureMode::Burst);
    }
}
