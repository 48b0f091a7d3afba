use booth_common::config::SerialConfig;
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Words understood by the LED controller. Each is sent as one line; nothing
/// is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    Normal,
    Photo,
    Love,
    Sus,
    Rainbow,
    Welcome,
    Wink,
    Flash,
    Custom,
}

impl LedCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            LedCommand::Normal => "NORMAL",
            LedCommand::Photo => "PHOTO",
            LedCommand::Love => "LOVE",
            LedCommand::Sus => "SUS",
            LedCommand::Rainbow => "RAINBOW",
            LedCommand::Welcome => "WELCOME",
            LedCommand::Wink => "WINK",
            LedCommand::Flash => "FLASH",
            LedCommand::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for LedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where LED commands go. Sends never fail from the caller's point of view.
pub trait CommandSink: Send {
    fn send(&mut self, command: LedCommand);
}

/// Used when no controller is attached.
pub struct NullSink;

impl CommandSink for NullSink {
    fn send(&mut self, command: LedCommand) {
        debug!(%command, "no LED controller, command dropped");
    }
}

type Port = Box<dyn Write + Send>;
type Opener = Box<dyn FnMut() -> Result<Port, LedError> + Send>;

/// Serial link to the controller.
///
/// A missing or failed port does not stop the booth: commands are skipped
/// while disconnected and reopening is attempted at most once per
/// `reconnect_every`.
pub struct SerialBridge {
    label: String,
    open: Opener,
    port: Option<Port>,
    last_attempt: Option<Instant>,
    reconnect_every: Duration,
}

impl SerialBridge {
    pub fn new(config: &SerialConfig) -> Self {
        let path = config.port.clone();
        let baud = config.baud_rate;
        let opener: Opener = Box::new(move || -> Result<Port, LedError> {
            let port = serialport::new(path.as_str(), baud)
                .timeout(Duration::from_secs(1))
                .open()?;
            Ok(Box::new(port) as Port)
        });
        Self::with_opener(
            format!("{}@{}", config.port, config.baud_rate),
            Duration::from_secs(config.reconnect_secs),
            opener,
        )
    }

    fn with_opener(label: String, reconnect_every: Duration, open: Opener) -> Self {
        let mut bridge = Self {
            label,
            open,
            port: None,
            last_attempt: None,
            reconnect_every,
        };
        bridge.connect();
        bridge
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn connect(&mut self) {
        self.last_attempt = Some(Instant::now());
        match (self.open)() {
            Ok(port) => {
                info!(port = %self.label, "LED controller connected");
                self.port = Some(port);
            }
            Err(e) => warn!(port = %self.label, error = %e, "could not open LED controller"),
        }
    }

    fn reconnect_due(&self) -> bool {
        self.last_attempt
            .map_or(true, |at| at.elapsed() >= self.reconnect_every)
    }
}

impl CommandSink for SerialBridge {
    fn send(&mut self, command: LedCommand) {
        if self.port.is_none() && self.reconnect_due() {
            self.connect();
        }
        let Some(port) = self.port.as_mut() else {
            debug!(%command, "LED controller disconnected, command skipped");
            return;
        };

        let line = format!("{command}\n");
        match port.write_all(line.as_bytes()).and_then(|()| port.flush()) {
            Ok(()) => debug!(%command, "LED command sent"),
            Err(e) => {
                warn!(port = %self.label, %command, error = %e, "LED write failed, reconnecting");
                self.port = None;
                self.connect();
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedError {
    #[error("failed to open serial port: {0}")]
    Open(#[from] serialport::Error),
    #[error("serial write failed: {0}")]
    Write(#[from] std::io::Error),
}
