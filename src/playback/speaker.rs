use anyhow::{Context, Result};
use bytes::Bytes;
use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::renderer::AudioRenderer;
use crate::audio::AudioSegment;

/// How often the player thread checks for a stop while a segment plays
const PLAYER_POLL_INTERVAL: Duration = Duration::from_millis(20);

enum PlayerCommand {
    Play {
        data: Bytes,
        /// The render's stop token; a Play that arrives already stopped is dropped
        stop: CancellationToken,
        done: oneshot::Sender<Result<()>>,
    },
    Stop,
}

/// Plays segments on the default output device
///
/// The output stream lives on a dedicated player thread; this handle only
/// sends it commands.
pub struct SpeakerRenderer {
    commands: Sender<PlayerCommand>,
}

impl SpeakerRenderer {
    pub fn open() -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        thread::Builder::new()
            .name("voicebot-player".to_string())
            .spawn(move || {
                let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow::anyhow!(
                            "Failed to open output device: {}",
                            e
                        )));
                        return;
                    }
                };

                run_player(command_rx, |data, stop, commands| {
                    play_segment(&stream, data, stop, commands)
                });
                info!("Player thread stopped");
            })
            .context("Failed to spawn player thread")?;

        ready_rx
            .recv()
            .context("Player thread exited during startup")??;

        info!("Speaker renderer ready");
        Ok(Self { commands })
    }
}

#[async_trait::async_trait]
impl AudioRenderer for SpeakerRenderer {
    async fn render(&self, segment: &AudioSegment, stop: &CancellationToken) -> Result<()> {
        let (done, done_rx) = oneshot::channel();

        self.commands
            .send(PlayerCommand::Play {
                data: segment.data.clone(),
                stop: stop.clone(),
                done,
            })
            .map_err(|_| anyhow::anyhow!("Player thread is gone"))?;

        done_rx.await.context("Player dropped the segment")?
    }

    fn stop(&self) {
        if self.commands.send(PlayerCommand::Stop).is_err() {
            warn!("Stop requested but player thread is gone");
        }
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

fn run_player<F>(commands: Receiver<PlayerCommand>, mut play: F)
where
    F: FnMut(Bytes, &CancellationToken, &Receiver<PlayerCommand>) -> Result<()>,
{
    while let Ok(command) = commands.recv() {
        match command {
            // Nothing playing
            PlayerCommand::Stop => {}
            PlayerCommand::Play { stop, done, .. } if stop.is_cancelled() => {
                debug!("Dropping segment stopped before it reached the player");
                let _ = done.send(Ok(()));
            }
            PlayerCommand::Play { data, stop, done } => {
                let result = play(data, &stop, &commands);
                if let Err(e) = &result {
                    error!("Playback failed: {:#}", e);
                }
                let _ = done.send(result);
            }
        }
    }
}

fn play_segment(
    stream: &rodio::OutputStream,
    data: Bytes,
    stop: &CancellationToken,
    commands: &Receiver<PlayerCommand>,
) -> Result<()> {
    let source = rodio::Decoder::new(Cursor::new(data)).context("Failed to decode segment")?;
    let sink = rodio::Sink::connect_new(stream.mixer());
    sink.append(source);

    while !sink.empty() {
        if stop.is_cancelled() {
            sink.stop();
            return Ok(());
        }

        match commands.recv_timeout(PLAYER_POLL_INTERVAL) {
            Ok(PlayerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                sink.stop();
                return Ok(());
            }
            Ok(PlayerCommand::Play { done, .. }) => {
                // The scheduler never overlaps renders
                let _ = done.send(Err(anyhow::anyhow!("Player is busy")));
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    Ok(())
}
