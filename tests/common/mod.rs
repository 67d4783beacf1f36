#![allow(dead_code)]

pub mod mock_backend;
pub mod mock_engine;

use std::sync::Arc;
use std::time::Duration;
use voxbind::config::{CommandEntry, Config};
use voxbind::grammar::GrammarCompiler;
use voxbind::provider::{CommandList, GrammarProvider};
use voxbind::session::{SessionHandle, SessionSnapshot};

pub fn command(phrase: &str, command: &str) -> CommandEntry {
    CommandEntry {
        phrase: phrase.to_string(),
        command: command.to_string(),
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.console_commands = vec![command("draw sword", "CMD1"), command("open map", "CMD2")];
    config.pause_phrases = vec!["stop listening".to_string()];
    config.resume_phrases = vec!["start listening".to_string()];
    config
}

pub fn compiler(config: &Config) -> GrammarCompiler {
    GrammarCompiler::from_config(config).expect("default expressions compile")
}

pub fn command_provider(config: &Config) -> Arc<dyn GrammarProvider> {
    Arc::new(CommandList::new(&config.console_commands, &compiler(config)))
}

/// Poll the session until `check` holds, panicking after two seconds
pub async fn wait_until<F>(handle: &SessionHandle, mut check: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = handle.snapshot().await.expect("session is running");
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for session, last state: {:?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a plain condition, panicking after two seconds
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for condition");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
