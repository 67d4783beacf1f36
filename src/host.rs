//! Host line protocol
//!
//! The game talks to us over stdin/stdout, one `|`-separated message per line.
//!
//! In:  `START_DIALOGUE|id|line0|line1…`, `STOP_DIALOGUE`, `FAVORITES|item|item…`
//! Out: `DIALOGUE|id|index`, `EQUIP|command`, `COMMAND|command`

use crate::config::Config;
use crate::error::VoxResult;
use crate::grammar::GrammarCompiler;
use crate::provider::{CommandList, DialogueList, FavoritesList, GrammarProvider, Resolution};
use crate::session::{Mode, RecognitionReceiver, SessionHandle};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// A message from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// Everything after `START_DIALOGUE|`
    StartDialogue(String),
    StopDialogue,
    /// Everything after `FAVORITES|`
    Favorites(String),
}

impl HostRequest {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (command, rest) = line.split_once('|').unwrap_or((line, ""));
        match command {
            "START_DIALOGUE" => Some(Self::StartDialogue(rest.to_string())),
            "STOP_DIALOGUE" => Some(Self::StopDialogue),
            "FAVORITES" => Some(Self::Favorites(rest.to_string())),
            _ => None,
        }
    }
}

/// Trim and drop carriage returns
pub fn sanitize(command: &str) -> String {
    command.trim().replace('\r', "")
}

/// Output line for a resolved recognition
pub fn response_line(resolution: &Resolution) -> String {
    let line = match resolution {
        Resolution::DialogueLine { dialogue_id, index } => {
            format!("DIALOGUE|{}|{}", dialogue_id, index)
        }
        Resolution::Equip(command) => format!("EQUIP|{}", command),
        Resolution::Command(command) => format!("COMMAND|{}", command),
    };
    sanitize(&line)
}

/// Host-side state: which providers back each mode
pub struct Host {
    session: SessionHandle,
    compiler: GrammarCompiler,
    goodbye_phrases: Vec<String>,
    dialogue_enabled: bool,
    commands: Arc<CommandList>,
    favorites: Arc<FavoritesList>,
    dialogue: Option<Arc<DialogueList>>,
}

impl Host {
    pub fn new(config: &Config, compiler: GrammarCompiler, session: SessionHandle) -> Self {
        let commands = CommandList::new(&config.console_commands, &compiler);
        let favorites = FavoritesList::new(&config.favorites, &compiler);
        Self {
            session,
            goodbye_phrases: Config::phrases(&config.goodbye_phrases),
            dialogue_enabled: config.dialogue_enabled,
            commands: Arc::new(commands),
            favorites: Arc::new(favorites),
            dialogue: None,
            compiler,
        }
    }

    pub fn in_dialogue(&self) -> bool {
        self.dialogue.is_some()
    }

    /// Enter command mode
    pub fn start(&self) -> VoxResult<()> {
        self.activate_commands()
    }

    fn activate_commands(&self) -> VoxResult<()> {
        let commands: Arc<dyn GrammarProvider> = self.commands.clone();
        let favorites: Arc<dyn GrammarProvider> = self.favorites.clone();
        let providers = vec![commands, favorites];
        self.session.activate(Mode::Command, providers)
    }

    pub fn handle_line(&mut self, line: &str) -> VoxResult<()> {
        info!("Received command: {}", line.trim_end());
        let Some(request) = HostRequest::parse(line) else {
            warn!("Unknown host message: {}", line.trim_end());
            return Ok(());
        };
        self.handle(request)
    }

    pub fn handle(&mut self, request: HostRequest) -> VoxResult<()> {
        match request {
            HostRequest::StartDialogue(body) => {
                if !self.dialogue_enabled {
                    info!("Dialogue is disabled, staying in command mode");
                    return Ok(());
                }
                match DialogueList::parse(&body, &self.goodbye_phrases, &self.compiler) {
                    Ok(dialogue) => {
                        let dialogue = Arc::new(dialogue);
                        self.dialogue = Some(dialogue.clone());
                        let provider: Arc<dyn GrammarProvider> = dialogue;
                        self.session.activate(Mode::Dialogue, vec![provider])
                    }
                    Err(e) => {
                        error!("❌ Bad dialogue message: {}", e);
                        Ok(())
                    }
                }
            }
            HostRequest::StopDialogue => {
                self.dialogue = None;
                self.activate_commands()
            }
            HostRequest::Favorites(body) => {
                Arc::make_mut(&mut self.favorites).update(&body);
                if self.dialogue.is_none() {
                    self.activate_commands()
                } else {
                    debug!("Favorites updated during dialogue, applied after it ends");
                    Ok(())
                }
            }
        }
    }
}

/// Pump host messages into the session and recognitions back out until the
/// host closes its input.
pub async fn run<R, W>(
    mut host: Host,
    input: R,
    mut recognitions: RecognitionReceiver,
    mut output: W,
) -> VoxResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    host.start()?;
    let mut lines = input.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => host.handle_line(&line)?,
                    None => {
                        info!("Host closed its input");
                        break;
                    }
                }
            }
            recognition = recognitions.recv() => {
                let Some(recognition) = recognition else { break };
                let line = response_line(&recognition.resolution);
                info!("Sending command: {}", line);
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }
    }

    host.session.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            HostRequest::parse("START_DIALOGUE|12|Hello|Goodbye\r"),
            Some(HostRequest::StartDialogue("12|Hello|Goodbye".to_string()))
        );
        assert_eq!(HostRequest::parse("STOP_DIALOGUE"), Some(HostRequest::StopDialogue));
        assert_eq!(
            HostRequest::parse("FAVORITES|Iron Dagger,1,2,1,3"),
            Some(HostRequest::Favorites("Iron Dagger,1,2,1,3".to_string()))
        );
        assert_eq!(HostRequest::parse("FAVORITES"), Some(HostRequest::Favorites(String::new())));
        assert_eq!(HostRequest::parse("HELLO|1"), None);
    }

    #[test]
    fn test_response_lines() {
        assert_eq!(
            response_line(&Resolution::DialogueLine {
                dialogue_id: 7,
                index: -2
            }),
            "DIALOGUE|7|-2"
        );
        assert_eq!(response_line(&Resolution::Equip("1;2;3;0".to_string())), "EQUIP|1;2;3;0");
        assert_eq!(
            response_line(&Resolution::Command("player.additem f 100\r ".to_string())),
            "COMMAND|player.additem f 100"
        );
    }
}
