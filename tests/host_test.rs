use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;
use voxbind::audio::ChannelInput;
use voxbind::backend::{BackendEvent, Backends};
use voxbind::config::Config;
use voxbind::host::{self, Host};
use voxbind::session::{Mode, Phase, RecognitionSession, SessionSettings};

mod common;
use common::mock_backend::RecordingBackend;
use common::{compiler, test_config, wait_until};

async fn next_line(lines: &mut Lines<BufReader<DuplexStream>>) -> String {
    tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("host answered in time")
        .unwrap()
        .expect("host output open")
}

struct HostHarness {
    session: voxbind::session::SessionHandle,
    events: voxbind::backend::EventSender,
    to_host: DuplexStream,
    from_host: Lines<BufReader<DuplexStream>>,
    task: tokio::task::JoinHandle<voxbind::error::VoxResult<()>>,
}

fn spawn_host(config: &Config) -> HostHarness {
    let (events, events_rx) = mpsc::unbounded_channel();
    let input = std::sync::Arc::new(ChannelInput::new(Some("mic")));
    let settings = SessionSettings::from_config(config, &compiler(config));
    let (session, recognitions, _task) = RecognitionSession::new(
        settings,
        Backends::new(Box::new(RecordingBackend::new("primary")), None),
        events_rx,
        input,
    )
    .spawn();

    let (to_host, host_in) = tokio::io::duplex(4096);
    let (host_out, from_host) = tokio::io::duplex(4096);
    let host = Host::new(config, compiler(config), session.clone());
    let task = tokio::spawn(host::run(host, BufReader::new(host_in), recognitions, host_out));

    HostHarness {
        session,
        events,
        to_host,
        from_host: BufReader::new(from_host).lines(),
        task,
    }
}

impl HostHarness {
    fn recognized(&self, generation: u64, index: usize, text: &str, confidence: f32) {
        self.events
            .send(BackendEvent::Recognized {
                generation,
                index,
                text: text.to_string(),
                confidence,
            })
            .unwrap();
    }

    async fn send(&mut self, line: &str) {
        self.to_host.write_all(line.as_bytes()).await.unwrap();
        self.to_host.write_all(b"\n").await.unwrap();
    }

    async fn recognizing(&self, mode: Mode, grammar_count: usize) -> u64 {
        wait_until(&self.session, |s| {
            s.phase == Phase::Recognizing && s.mode == mode && s.grammar_count == grammar_count
        })
        .await
        .generation
        .unwrap()
    }
}

#[tokio::test]
async fn test_command_mode_at_start() {
    let config = test_config();
    let mut h = spawn_host(&config);

    // draw sword, open map, stop listening
    let generation = h.recognizing(Mode::Command, 3).await;
    h.recognized(generation, 0, "draw sword", 0.9);
    assert_eq!(next_line(&mut h.from_host).await, "COMMAND|CMD1");

    drop(h.to_host);
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dialogue_round_trip() {
    let mut config = test_config();
    config.goodbye_phrases = vec!["goodbye".to_string()];
    let mut h = spawn_host(&config);
    h.recognizing(Mode::Command, 3).await;

    h.send("START_DIALOGUE|42|What news from the capital?||I need to go\r").await;
    // two lines, one goodbye, one pause phrase
    let generation = h.recognizing(Mode::Dialogue, 4).await;

    // Index 1 of the loaded set is line 2; the blank line keeps its slot
    h.recognized(generation, 1, "i need to go", 0.55);
    assert_eq!(next_line(&mut h.from_host).await, "DIALOGUE|42|2");

    h.recognized(generation, 2, "goodbye", 0.9);
    assert_eq!(next_line(&mut h.from_host).await, "DIALOGUE|42|-2");

    h.send("STOP_DIALOGUE").await;
    let generation = h.recognizing(Mode::Command, 3).await;
    h.recognized(generation, 1, "open map", 0.8);
    assert_eq!(next_line(&mut h.from_host).await, "COMMAND|CMD2");
}

#[tokio::test]
async fn test_dialogue_disabled_stays_in_command_mode() {
    let mut config = test_config();
    config.dialogue_enabled = false;
    let mut h = spawn_host(&config);
    let generation = h.recognizing(Mode::Command, 3).await;

    h.send("START_DIALOGUE|42|Hello").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.mode, Mode::Command);
    assert_eq!(snapshot.generation, Some(generation));
}

#[tokio::test]
async fn test_favorites_equip() {
    let config = test_config();
    let mut h = spawn_host(&config);
    h.recognizing(Mode::Command, 3).await;

    h.send("FAVORITES|Iron Dagger,11,22,1,4|Daedric Battleaxe,33,44,0,6").await;
    // 2 commands, dagger + type, battleaxe + type, pause phrase
    let generation = h.recognizing(Mode::Command, 7).await;

    h.recognized(generation, 2, "equip Iron Dagger left", 0.8);
    assert_eq!(next_line(&mut h.from_host).await, "EQUIP|11;22;4;2");

    h.recognized(generation, 5, "equip battleaxe", 0.8);
    assert_eq!(next_line(&mut h.from_host).await, "EQUIP|33;44;6;0");
}
