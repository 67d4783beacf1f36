//! Pause/resume feedback cues

use std::path::PathBuf;
use tracing::info;

/// Played when recognition is paused or resumed
pub trait FeedbackCue: Send + Sync {
    fn play(&self, paused: bool);
}

/// Cue that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCue;

impl FeedbackCue for LogCue {
    fn play(&self, paused: bool) {
        info!(
            "****** Recognition {} ******",
            if paused { "Paused" } else { "Resumed" }
        );
    }
}

/// Pause and resume sound files; empty paths mean silence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueFiles {
    pub pause: Option<PathBuf>,
    pub resume: Option<PathBuf>,
}

impl CueFiles {
    pub fn new(pause: &str, resume: &str) -> Self {
        let path = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| PathBuf::from(s))
        };
        Self {
            pause: path(pause),
            resume: path(resume),
        }
    }

    pub fn for_state(&self, paused: bool) -> Option<&PathBuf> {
        if paused {
            self.pause.as_ref()
        } else {
            self.resume.as_ref()
        }
    }
}

#[cfg(feature = "native-audio")]
pub use sound::SoundCue;

#[cfg(feature = "native-audio")]
mod sound {
    //! Uses a channel-based architecture to handle rodio's non-Send stream.
    //! A dedicated audio thread owns the playback infrastructure.

    use super::{CueFiles, FeedbackCue, LogCue};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::thread;
    use tracing::{error, info, warn};

    /// Commands sent to the audio thread
    enum AudioCommand {
        PlayFile(PathBuf),
        Stop,
    }

    /// Thread-safe handle to the cue player
    pub struct SoundCue {
        files: CueFiles,
        sender: mpsc::Sender<AudioCommand>,
    }

    impl std::fmt::Debug for SoundCue {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SoundCue").field("files", &self.files).finish()
        }
    }

    impl SoundCue {
        pub fn new(files: CueFiles) -> Self {
            let (sender, receiver) = mpsc::channel::<AudioCommand>();

            thread::spawn(move || {
                Self::audio_thread(receiver);
            });

            Self { files, sender }
        }

        fn audio_thread(receiver: mpsc::Receiver<AudioCommand>) {
            use rodio::OutputStream;

            let (stream, stream_handle) = match OutputStream::try_default() {
                Ok(s) => s,
                Err(e) => {
                    warn!("🔇 Failed to initialize audio output: {}", e);
                    return;
                }
            };

            // Keep stream alive
            let _stream = stream;
            let mut sink = match rodio::Sink::try_new(&stream_handle) {
                Ok(s) => s,
                Err(e) => {
                    error!("❌ Failed to create audio sink: {}", e);
                    return;
                }
            };

            while let Ok(cmd) = receiver.recv() {
                match cmd {
                    AudioCommand::PlayFile(path) => {
                        if let Err(e) = Self::queue_file(&sink, &path) {
                            error!("❌ Play {:?} failed: {}", path, e);
                        }
                    }
                    AudioCommand::Stop => {
                        sink.stop();
                        // A stopped sink cannot play again
                        if let Ok(new_sink) = rodio::Sink::try_new(&stream_handle) {
                            sink = new_sink;
                        }
                    }
                }
            }

            info!("🔇 Audio thread stopped");
        }

        fn queue_file(sink: &rodio::Sink, path: &Path) -> anyhow::Result<()> {
            use rodio::Decoder;
            use std::fs::File;
            use std::io::BufReader;

            if !path.exists() {
                anyhow::bail!("Audio file not found: {:?}", path);
            }

            let file = File::open(path)?;
            let source = Decoder::new(BufReader::new(file))?;
            sink.append(source);
            Ok(())
        }
    }

    impl FeedbackCue for SoundCue {
        fn play(&self, paused: bool) {
            LogCue.play(paused);
            let Some(path) = self.files.for_state(paused) else {
                return;
            };
            // Interrupt a cue that is still playing
            let _ = self.sender.send(AudioCommand::Stop);
            if self.sender.send(AudioCommand::PlayFile(path.clone())).is_err() {
                warn!("Audio thread disconnected");
            }
        }
    }
}
