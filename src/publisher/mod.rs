//! Broadcast orchestrator
//!
//! `Publisher` sits above the connection engine and turns a fallible
//! network into a long-lived broadcast: it dials, publishes, watches the
//! connection, reconnects on failure within an outage budget, and
//! retunes the encoder bitrate from transport backpressure. The caller
//! observes the whole thing as a stream of `BroadcastStatus` changes.

pub mod qos;
pub mod retry;

use std::future::pending;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::client::connection::{ConnectionEvent, EngineStats, RtmpConnection, SampleSink};
use crate::client::config::{ConnectionConfig, RtmpAddress};
use crate::error::{Error, Result};
use crate::media::{EncoderControl, MediaSample, Recorder, RecorderEvent, StreamMetadata, Track};
use crate::session::PublishKind;

use qos::{QosConfig, QosController};
use retry::{RetryConfig, RetryState, RetryTick};

/// Externally visible lifecycle of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    /// Publisher exists but has not finished setting up
    Init,
    /// Idle and ready to start
    Ready,
    /// Live: the server accepted the publish
    Start,
    /// First connection attempt in progress
    StartTrying,
    /// The stream never came up
    StartFailed,
    /// A live stream went down
    Failed,
    /// Reconnecting after a failure
    FailedRetrying,
    /// The outage outlived the retry budget
    FailedTimeout,
    Pause,
    Stop,
    /// Final state, the publisher task has given up or shut down
    Terminated,
}

/// Events reported to the caller
#[derive(Debug)]
pub enum PublisherEvent {
    Status(BroadcastStatus),
    /// QoS changed the video bitrate (bits per second)
    BitrateChanged(u32),
    Stats(EngineStats),
    Recorder(RecorderEvent),
}

/// Stream preferences: geometry, rates and the QoS envelope
#[derive(Debug, Clone)]
pub struct Preferences {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Initial video bitrate, bits per second
    pub video_bitrate: u32,
    pub min_video_bitrate: u32,
    pub max_video_bitrate: u32,
    pub bitrate_step: u32,
    pub audio_bitrate: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 24,
            video_bitrate: 1024 * 1024,
            min_video_bitrate: 512 * 1024,
            max_video_bitrate: 3 * 1024 * 1024,
            bitrate_step: 512 * 1024,
            audio_bitrate: 192 * 1024,
        }
    }
}

impl Preferences {
    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
        }
    }

    fn qos_config(&self) -> QosConfig {
        QosConfig {
            initial_bitrate: self.video_bitrate,
            min_bitrate: self.min_video_bitrate,
            max_bitrate: self.max_video_bitrate,
            step: self.bitrate_step,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    /// Full publish URL, `rtmp://[user:pass@]host[:port]/app/stream_key`
    pub url: String,
    pub preferences: Preferences,
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
}

#[derive(Debug)]
enum PublisherCommand {
    Start,
    Stop,
    Pause,
    Resume,
    SetMuted { track: Track, muted: bool },
    SetVideoBitrate(u32),
    SetAudioBitrate(u32),
    SetAbrEnabled(bool),
    Shutdown,
}

type RecorderSlot = Arc<Mutex<Option<Box<dyn Recorder>>>>;

/// Media entry point that survives reconnects. While no connection is
/// live, network samples are dropped; the recorder keeps receiving.
#[derive(Clone)]
pub struct PublisherSink {
    network: Arc<Mutex<Option<SampleSink>>>,
    recorder: RecorderSlot,
}

impl PublisherSink {
    /// Returns true if the sample was accepted for the network
    pub fn push(&self, sample: MediaSample) -> bool {
        if let Ok(mut recorder) = self.recorder.lock() {
            if let Some(recorder) = recorder.as_mut() {
                recorder.write(&sample);
            }
        }
        match self.network.lock() {
            Ok(slot) => slot.as_ref().map(|sink| sink.push(sample)).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Handle to the orchestrator task
pub struct Publisher {
    commands: mpsc::UnboundedSender<PublisherCommand>,
    sink: PublisherSink,
    task: JoinHandle<()>,
}

impl Publisher {
    /// Validate the config and spawn the orchestrator task. The task
    /// idles in `Ready` until `start_streaming`.
    pub fn new(
        config: PublisherConfig,
        encoder: Arc<dyn EncoderControl>,
        recorder: Option<Box<dyn Recorder>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PublisherEvent>)> {
        let address = RtmpAddress::parse(&config.url)?;
        if address.stream_key.is_none() {
            return Err(Error::Config("publish URL has no stream key".into()));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sink = PublisherSink {
            network: Arc::new(Mutex::new(None)),
            recorder: Arc::new(Mutex::new(recorder)),
        };

        let orchestrator = Orchestrator {
            address,
            qos: QosController::new(config.preferences.qos_config()),
            retry: RetryState::new(config.retry.clone()),
            config,
            encoder,
            recorder: Arc::clone(&sink.recorder),
            events: event_tx,
            status: BroadcastStatus::Init,
            user_wants_connect: false,
            paused: false,
            abr_enabled: true,
            has_published: false,
            next_retry: None,
            connection: None,
            conn_events: None,
            network_slot: Arc::clone(&sink.network),
        };
        let task = tokio::spawn(orchestrator.run(command_rx));

        Ok((
            Self {
                commands: command_tx,
                sink,
                task,
            },
            event_rx,
        ))
    }

    pub fn sink(&self) -> PublisherSink {
        self.sink.clone()
    }

    pub fn start_streaming(&self) {
        let _ = self.commands.send(PublisherCommand::Start);
    }

    pub fn stop_streaming(&self) {
        let _ = self.commands.send(PublisherCommand::Stop);
    }

    pub fn pause_streaming(&self) {
        let _ = self.commands.send(PublisherCommand::Pause);
    }

    pub fn resume_streaming(&self) {
        let _ = self.commands.send(PublisherCommand::Resume);
    }

    pub fn set_muted(&self, track: Track, muted: bool) {
        let _ = self
            .commands
            .send(PublisherCommand::SetMuted { track, muted });
    }

    /// Manually retarget the video bitrate. The value is clamped to the
    /// configured bounds; QoS keeps adapting from it unless disabled.
    pub fn set_video_bitrate(&self, bitrate: u32) {
        let _ = self.commands.send(PublisherCommand::SetVideoBitrate(bitrate));
    }

    pub fn set_audio_bitrate(&self, bitrate: u32) {
        let _ = self.commands.send(PublisherCommand::SetAudioBitrate(bitrate));
    }

    /// Turn queue-depth bitrate adaptation on or off. While off, stats
    /// still flow but never change the bitrate.
    pub fn set_abr_enabled(&self, enabled: bool) {
        let _ = self.commands.send(PublisherCommand::SetAbrEnabled(enabled));
    }

    /// Stop everything and wait for the task to finish. The final
    /// status is always `Terminated`.
    pub async fn shutdown(self) {
        let _ = self.commands.send(PublisherCommand::Shutdown);
        let _ = self.task.await;
    }
}

struct Orchestrator {
    config: PublisherConfig,
    address: RtmpAddress,
    encoder: Arc<dyn EncoderControl>,
    recorder: RecorderSlot,
    events: mpsc::UnboundedSender<PublisherEvent>,
    status: BroadcastStatus,
    user_wants_connect: bool,
    paused: bool,
    abr_enabled: bool,
    /// The current start cycle has reached a live publish at least once
    has_published: bool,
    retry: RetryState,
    next_retry: Option<Instant>,
    qos: QosController,
    connection: Option<RtmpConnection>,
    conn_events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    network_slot: Arc<Mutex<Option<SampleSink>>>,
}

enum Step {
    Command(Option<PublisherCommand>),
    Connection(Option<ConnectionEvent>),
    RetryTick,
}

impl Orchestrator {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PublisherCommand>) {
        self.set_status(BroadcastStatus::Ready);

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = Self::next_connection_event(&mut self.conn_events) => {
                    Step::Connection(event)
                }
                _ = Self::sleep_until_opt(self.next_retry) => Step::RetryTick,
            };

            match step {
                Step::Command(None) | Step::Command(Some(PublisherCommand::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Connection(None) => self.conn_events = None,
                Step::Connection(Some(event)) => self.handle_connection_event(event),
                Step::RetryTick => self.handle_retry_tick().await,
            }
            self.forward_recorder_events();
        }

        self.drop_connection();
        self.encoder.stop();
        self.stop_recorder();
        self.forward_recorder_events();
        self.set_status(BroadcastStatus::Terminated);
    }

    async fn next_connection_event(
        events: &mut Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    ) -> Option<ConnectionEvent> {
        match events {
            Some(events) => events.recv().await,
            None => pending().await,
        }
    }

    async fn sleep_until_opt(at: Option<Instant>) {
        match at {
            Some(at) => sleep_until(at).await,
            None => pending().await,
        }
    }

    async fn handle_command(&mut self, command: PublisherCommand) {
        match command {
            PublisherCommand::Start => {
                if self.user_wants_connect {
                    return;
                }
                self.user_wants_connect = true;
                self.paused = false;
                self.has_published = false;
                self.retry.reset();
                self.start_recorder();
                self.set_status(BroadcastStatus::StartTrying);
                self.attempt_connect().await;
            }
            PublisherCommand::Stop => {
                self.user_wants_connect = false;
                self.next_retry = None;
                self.drop_connection();
                self.encoder.stop();
                self.stop_recorder();
                self.set_status(BroadcastStatus::Stop);
            }
            PublisherCommand::Pause => {
                self.paused = true;
                self.apply_mutes(true);
                if self.status == BroadcastStatus::Start {
                    self.set_status(BroadcastStatus::Pause);
                }
            }
            PublisherCommand::Resume => {
                self.paused = false;
                self.apply_mutes(false);
                if self.status == BroadcastStatus::Pause {
                    self.set_status(BroadcastStatus::Start);
                }
            }
            PublisherCommand::SetMuted { track, muted } => {
                self.encoder.set_muted(track, muted);
                if let Some(connection) = &self.connection {
                    let _ = connection.set_muted(track, muted);
                }
            }
            PublisherCommand::SetVideoBitrate(bitrate) => {
                let applied = self.qos.set_bitrate(bitrate);
                self.config.preferences.video_bitrate = applied;
                self.encoder.set_video_bitrate(applied);
                let _ = self.events.send(PublisherEvent::BitrateChanged(applied));
            }
            PublisherCommand::SetAudioBitrate(bitrate) => {
                self.config.preferences.audio_bitrate = bitrate;
                self.encoder.set_audio_bitrate(bitrate);
            }
            PublisherCommand::SetAbrEnabled(enabled) => {
                tracing::info!(enabled = enabled, "adaptive bitrate");
                self.abr_enabled = enabled;
                if enabled {
                    self.qos.reset_window();
                }
            }
            PublisherCommand::Shutdown => {}
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::PublishStarted { name } => {
                tracing::info!(name = %name, "broadcast is live");
                self.has_published = true;
                self.retry.reset();
                self.next_retry = None;
                self.set_status(if self.paused {
                    BroadcastStatus::Pause
                } else {
                    BroadcastStatus::Start
                });
            }
            ConnectionEvent::Stats(stats) => {
                let _ = self.events.send(PublisherEvent::Stats(stats));
                if self.abr_enabled && self.status == BroadcastStatus::Start {
                    if let Some(bitrate) = self.qos.on_queue_depth(stats.queued_bytes) {
                        self.encoder.set_video_bitrate(bitrate);
                        let _ = self.events.send(PublisherEvent::BitrateChanged(bitrate));
                    }
                }
            }
            ConnectionEvent::Status(info) => {
                // Connection-level closes surface through Closed below;
                // everything else is informational.
                tracing::debug!(code = info.code.as_str(), "server status");
            }
            ConnectionEvent::Closed { error } => {
                if let Some(error) = &error {
                    tracing::warn!(error = %error, "connection lost");
                }
                self.connection_lost();
            }
        }
    }

    async fn handle_retry_tick(&mut self) {
        self.next_retry = None;
        match self.retry.on_tick() {
            RetryTick::Terminated => {
                tracing::warn!("retry budget exhausted, giving up");
                self.user_wants_connect = false;
                self.encoder.stop();
                self.stop_recorder();
                self.set_status(BroadcastStatus::FailedTimeout);
                self.set_status(BroadcastStatus::Terminated);
            }
            RetryTick::Reconnect => {
                self.set_status(if self.has_published {
                    BroadcastStatus::FailedRetrying
                } else {
                    BroadcastStatus::StartTrying
                });
                self.attempt_connect().await;
            }
        }
    }

    async fn attempt_connect(&mut self) {
        self.qos.reset_window();
        let connect = RtmpConnection::connect(
            self.address.clone(),
            self.config.connection.clone(),
        )
        .await;

        match connect {
            Ok((connection, events)) => {
                // Key presence was validated in Publisher::new
                let key = self.address.stream_key.clone().unwrap_or_default();
                let _ = connection.set_metadata(self.config.preferences.metadata());
                let _ = connection.publish(&key, PublishKind::Live);
                if self.paused {
                    let _ = connection.set_muted(Track::Audio, true);
                    let _ = connection.set_muted(Track::Video, true);
                }
                if let Ok(mut slot) = self.network_slot.lock() {
                    *slot = Some(connection.sink());
                }
                self.connection = Some(connection);
                self.conn_events = Some(events);
                self.encoder.start();
            }
            Err(error) => {
                tracing::warn!(error = %error, "connection attempt failed");
                self.connection_lost();
            }
        }
    }

    /// A connection went away, by failure or rejection. Decide between
    /// retrying and stopping based on what the caller wants.
    fn connection_lost(&mut self) {
        self.drop_connection();
        if !self.user_wants_connect {
            self.set_status(BroadcastStatus::Stop);
            return;
        }
        self.set_status(if self.has_published {
            BroadcastStatus::Failed
        } else {
            BroadcastStatus::StartFailed
        });
        self.next_retry = Some(Instant::now() + self.retry.interval());
    }

    fn drop_connection(&mut self) {
        if let Ok(mut slot) = self.network_slot.lock() {
            *slot = None;
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.conn_events = None;
    }

    fn apply_mutes(&mut self, muted: bool) {
        self.encoder.set_muted(Track::Audio, muted);
        self.encoder.set_muted(Track::Video, muted);
        if let Some(connection) = &self.connection {
            let _ = connection.set_muted(Track::Audio, muted);
            let _ = connection.set_muted(Track::Video, muted);
        }
    }

    fn start_recorder(&mut self) {
        if let Ok(mut recorder) = self.recorder.lock() {
            if let Some(recorder) = recorder.as_mut() {
                if let Err(error) = recorder.start() {
                    tracing::warn!(error = %error, "recorder failed to start");
                }
            }
        }
    }

    fn stop_recorder(&mut self) {
        if let Ok(mut recorder) = self.recorder.lock() {
            if let Some(recorder) = recorder.as_mut() {
                recorder.stop();
            }
        }
    }

    fn poll_recorder(&mut self) -> Option<RecorderEvent> {
        match self.recorder.lock() {
            Ok(mut recorder) => recorder.as_mut().and_then(|r| r.poll_event()),
            Err(_) => None,
        }
    }

    /// Drain pending recorder events. Runs on every loop step so the
    /// recorder is heard even while no connection exists.
    fn forward_recorder_events(&mut self) {
        while let Some(event) = self.poll_recorder() {
            let _ = self.events.send(PublisherEvent::Recorder(event));
        }
    }

    fn set_status(&mut self, status: BroadcastStatus) {
        if self.status == status {
            return;
        }
        tracing::info!(from = ?self.status, to = ?status, "broadcast status");
        self.status = status;
        let _ = self.events.send(PublisherEvent::Status(status));
    }
}
