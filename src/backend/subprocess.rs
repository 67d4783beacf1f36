//! voice2json pipeline backend
//!
//! Grammars are written as intents to `sentences.ini` and the profile is
//! retrained. Recognition runs `transcribe-stream | recognize-intent` with
//! microphone PCM on stdin and one JSON record per line on stdout. Each intent
//! is named `<prefix>_<generation>_<index>` so late records from an older
//! grammar set can be told apart.

use super::record::{IntentTag, RecognitionRecord};
use super::{BackendAdapter, BackendEvent, EventSender};
use crate::audio::{signal_issue, AudioInput, AudioStream};
use crate::config::{AudioEncoding, Voice2JsonConfig};
use crate::error::{VoxError, VoxResult};
use crate::grammar::CompiledGrammar;
use async_trait::async_trait;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// No generation is being recognized
const NO_GENERATION: u64 = 0;
const SPAWN_ATTEMPTS: usize = 3;
/// A pipeline that exits this fast failed to start
const STARTUP_GRACE: Duration = Duration::from_millis(200);

/// Render the sentences file for a grammar set
pub fn sentences_ini(prefix: &str, generation: u64, grammars: &[Arc<CompiledGrammar>]) -> String {
    let mut out = String::new();
    for (index, grammar) in grammars.iter().enumerate() {
        out.push_str(&format!(
            "[{}]\n{}\n\n",
            IntentTag::new(generation, index).encode(prefix),
            grammar.jsgf()
        ));
    }
    out
}

/// Encode one PCM frame for the recognizer's stdin
pub fn encode_frame(samples: &[i16], encoding: AudioEncoding) -> Vec<u8> {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    match encoding {
        AudioEncoding::Raw => bytes,
        AudioEncoding::Base64Lines => {
            let mut line = base64::engine::general_purpose::STANDARD
                .encode(&bytes)
                .into_bytes();
            line.push(b'\n');
            line
        }
    }
}

type Pipes = (
    Vec<Child>,
    ChildStdin,
    tokio::process::ChildStdout,
    tokio::process::ChildStderr,
);

struct Pipeline {
    children: Vec<Child>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SubprocessAdapter {
    config: Voice2JsonConfig,
    profile: String,
    input: Arc<dyn AudioInput>,
    events: EventSender,
    /// Generation the stdout reader accepts
    active: Arc<AtomicU64>,
    loaded: Option<u64>,
    pipeline: Option<Pipeline>,
    setup_done: bool,
    log_signal_issues: bool,
}

impl SubprocessAdapter {
    pub fn new(
        config: Voice2JsonConfig,
        profile: &str,
        input: Arc<dyn AudioInput>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            profile: profile.to_string(),
            input,
            events,
            active: Arc::new(AtomicU64::new(NO_GENERATION)),
            loaded: None,
            pipeline: None,
            setup_done: false,
            log_signal_issues: false,
        }
    }

    pub fn with_signal_logging(mut self, enabled: bool) -> Self {
        self.log_signal_issues = enabled;
        self
    }

    fn command(&self, action: &str) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("-p").arg(&self.profile).arg(action);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a voice2json action to completion within `limit`
    async fn run(&self, action: &str, limit: Duration) -> VoxResult<()> {
        let mut cmd = self.command(action);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        info!("Executing: {} -p {} {}", self.config.command, self.profile, action);

        let child = cmd
            .spawn()
            .map_err(|e| VoxError::Subprocess(format!("{} not runnable: {}", self.config.command, e)))?;

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(VoxError::Subprocess(format!(
                    "{} timed out after {:?}",
                    action, limit
                )))
            }
        };

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!("[voice2json] {}", line);
        }
        if !output.status.success() {
            return Err(VoxError::EngineLoad(format!(
                "{} exited with {}",
                action, output.status
            )));
        }
        Ok(())
    }

    /// One-time profile preparation: download/train the profile and link
    /// every profile's `sentences.ini` to the file this adapter writes.
    pub async fn setup(&mut self) -> VoxResult<()> {
        if self.setup_done {
            return Ok(());
        }
        info!("📦 Preparing voice2json profile '{}'", self.profile);
        self.run("train-profile", Duration::from_secs(self.config.setup_timeout_secs))
            .await?;

        if let Some(parent) = self.config.sentences_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !self.config.sentences_path.exists() {
            tokio::fs::write(&self.config.sentences_path, "").await?;
        }

        for dir in self.profile_dirs() {
            if let Err(e) = link_sentences(&self.config.sentences_path, &dir) {
                warn!("⚠️ Could not link sentences.ini into {}: {}", dir.display(), e);
            }
        }
        self.setup_done = true;
        Ok(())
    }

    fn profile_dirs(&self) -> Vec<PathBuf> {
        if !self.config.profile_dirs.is_empty() {
            return self.config.profile_dirs.clone();
        }
        let root = dirs::data_dir().unwrap_or_default().join("voice2json");
        match std::fs::read_dir(&root) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn spawn_pipeline(&self) -> VoxResult<Pipes> {
        let mut transcribe = self.command("transcribe-stream");
        transcribe
            .arg("--audio-source")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut transcriber = transcribe
            .spawn()
            .map_err(|e| VoxError::Subprocess(format!("transcribe-stream: {}", e)))?;

        let piped: Stdio = transcriber
            .stdout
            .take()
            .ok_or_else(|| VoxError::Subprocess("transcribe-stream has no stdout".to_string()))?
            .try_into()?;

        let mut recognize = self.command("recognize-intent");
        recognize
            .stdin(piped)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut recognizer = recognize
            .spawn()
            .map_err(|e| VoxError::Subprocess(format!("recognize-intent: {}", e)))?;

        let missing = || VoxError::Subprocess("pipeline pipes unavailable".to_string());
        let stdin = transcriber.stdin.take().ok_or_else(missing)?;
        let stdout = recognizer.stdout.take().ok_or_else(missing)?;
        let stderr = recognizer.stderr.take().ok_or_else(missing)?;
        Ok((vec![transcriber, recognizer], stdin, stdout, stderr))
    }

    /// Spawn the pipeline and make sure it survives its first moments
    async fn spawn_checked(&self) -> VoxResult<Pipes> {
        let (mut children, stdin, stdout, stderr) = self.spawn_pipeline()?;
        tokio::time::sleep(STARTUP_GRACE).await;
        let exited = children
            .iter_mut()
            .find_map(|child| child.try_wait().ok().flatten());
        if let Some(status) = exited {
            error!("Recognizer exited immediately with status: {}", status);
            for child in children.iter_mut() {
                let _ = child.start_kill();
            }
            return Err(VoxError::Subprocess(format!(
                "recognizer exited prematurely ({})",
                status
            )));
        }
        Ok((children, stdin, stdout, stderr))
    }
}

#[cfg(unix)]
fn link_sentences(target: &Path, profile_dir: &Path) -> std::io::Result<()> {
    let link = profile_dir.join("sentences.ini");
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)?;
    }
    std::os::unix::fs::symlink(target, &link)
}

#[cfg(not(unix))]
fn link_sentences(target: &Path, profile_dir: &Path) -> std::io::Result<()> {
    std::fs::copy(target, profile_dir.join("sentences.ini")).map(|_| ())
}

#[async_trait]
impl BackendAdapter for SubprocessAdapter {
    fn name(&self) -> &str {
        "voice2json"
    }

    async fn load(&mut self, generation: u64, grammars: &[Arc<CompiledGrammar>]) -> VoxResult<()> {
        self.cancel().await;
        self.setup().await?;

        let sentences = sentences_ini(&self.config.intent_prefix, generation, grammars);
        tokio::fs::write(&self.config.sentences_path, sentences).await?;

        // The profile is in an unknown state until training succeeds
        self.loaded = None;
        self.run(
            "train-profile",
            Duration::from_secs(self.config.train_timeout_secs),
        )
        .await?;

        self.loaded = Some(generation);
        info!(
            "⚙️ voice2json trained generation {} ({} intents)",
            generation,
            grammars.len()
        );
        Ok(())
    }

    async fn start(&mut self) -> VoxResult<()> {
        let Some(generation) = self.loaded else {
            return Err(VoxError::EngineLoad("no grammar loaded".to_string()));
        };
        if self.pipeline.is_some() {
            return Ok(());
        }

        let stream = self.input.open()?;

        // 100ms, then 200ms
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .map(jitter)
            .take(SPAWN_ATTEMPTS - 1);
        let (children, stdin, stdout, stderr) =
            Retry::start(strategy, || self.spawn_checked()).await?;

        self.active.store(generation, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_audio(
            stream,
            stdin,
            self.config.audio_encoding,
            self.log_signal_issues,
            cancel.clone(),
        ));
        let reader = tokio::spawn(read_records(
            stdout,
            self.config.intent_prefix.clone(),
            generation,
            self.active.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        let logger = tokio::spawn(log_stderr(stderr));

        self.pipeline = Some(Pipeline {
            children,
            cancel,
            tasks: vec![writer, reader, logger],
        });
        info!("🎙️ voice2json listening (generation {})", generation);
        Ok(())
    }

    async fn cancel(&mut self) {
        self.active.store(NO_GENERATION, Ordering::SeqCst);
        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };

        pipeline.cancel.cancel();
        for child in pipeline.children.iter_mut() {
            if let Err(e) = child.kill().await {
                debug!("Kill recognizer: {}", e);
            }
        }
        for task in pipeline.tasks {
            if let Err(e) = task.await {
                warn!("Recognizer task ended abnormally: {}", e);
            }
        }
        debug!("voice2json pipeline stopped");
    }

    fn loaded_generation(&self) -> Option<u64> {
        self.loaded
    }
}

async fn write_audio(
    mut stream: AudioStream,
    mut stdin: ChildStdin,
    encoding: AudioEncoding,
    log_signal_issues: bool,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.frames.recv() => {
                let Some(samples) = frame else {
                    warn!("🎙️ Audio input closed");
                    break;
                };
                if log_signal_issues {
                    if let Some(issue) = signal_issue(&samples) {
                        info!("Audio signal problem: {:?}", issue);
                    }
                }
                let data = encode_frame(&samples, encoding);
                if let Err(e) = stdin.write_all(&data).await {
                    debug!("Recognizer stdin closed: {}", e);
                    break;
                }
            }
        }
    }
    let _ = stdin.shutdown().await;
}

async fn read_records(
    stdout: tokio::process::ChildStdout,
    prefix: String,
    generation: u64,
    active: Arc<AtomicU64>,
    events: EventSender,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Recognizer stdout error: {}", e);
                break;
            }
        };

        match RecognitionRecord::parse(&line) {
            Ok(RecognitionRecord::Empty) => debug!("Nothing recognized"),
            Ok(RecognitionRecord::Matched {
                text,
                intent,
                confidence,
            }) => {
                let Some(tag) = IntentTag::decode(&prefix, &intent) else {
                    debug!("Ignoring foreign intent '{}'", intent);
                    continue;
                };
                if tag.generation != active.load(Ordering::SeqCst) {
                    debug!("Dropping stale record for generation {}", tag.generation);
                    continue;
                }
                let event = BackendEvent::Recognized {
                    generation: tag.generation,
                    index: tag.index,
                    text,
                    confidence,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => debug!("Ignoring garbled record: {}", e),
        }
    }

    if !cancel.is_cancelled() {
        let _ = events.send(BackendEvent::Failed {
            generation,
            error: "recognizer exited".to_string(),
        });
    }
}

async fn log_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[voice2json] {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::grammar::GrammarCompiler;

    #[test]
    fn test_sentences_ini() {
        let c = GrammarCompiler::from_config(&Config::default()).unwrap();
        let grammars = vec![
            Arc::new(c.compile_phrase("draw sword", false).unwrap()),
            Arc::new(c.compile_phrase("equip (the) bow", false).unwrap()),
        ];
        assert_eq!(
            sentences_ini("vox", 3, &grammars),
            "[vox_3_0]\ndraw sword\n\n[vox_3_1]\nequip [ the ] bow\n\n"
        );
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode_frame(&[1, -2], AudioEncoding::Raw), vec![1, 0, 0xFE, 0xFF]);
        assert_eq!(
            encode_frame(&[1, -2], AudioEncoding::Base64Lines),
            b"AQD+/w==\n".to_vec()
        );
    }
}
