//! Timed playback over a [`ReplayTimeline`].
//!
//! [`ReplayPlayer`] holds the cursor and play state and is driven either
//! manually through [`ReplayPlayer::tick`] or by the task started with
//! [`spawn_playback`]. The task applies every control command before the next
//! tick fires and never runs two ticks at once.

use crate::replay::{FrameState, ReplayTimeline};
use dispatch_config::{EngineConfig, ReplayEndMode};
use dispatch_core::{DispatchError, DispatchResult};
use dispatch_observability::names;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

const MIN_TICK: Duration = Duration::from_millis(1);
const MAX_TICK: Duration = Duration::from_secs(3_600);

/// Slowest accepted playback speed.
pub const MIN_SPEED: f64 = 0.01;
/// Fastest accepted playback speed.
pub const MAX_SPEED: f64 = 1_000.0;

#[derive(Debug, Clone)]
pub struct ReplayPlayer {
    timeline: Arc<ReplayTimeline>,
    index: usize,
    playing: bool,
    speed: f64,
    base_interval: Duration,
    end_mode: ReplayEndMode,
}

impl ReplayPlayer {
    pub fn new(timeline: Arc<ReplayTimeline>, config: &EngineConfig) -> Self {
        Self {
            timeline,
            index: 0,
            playing: false,
            speed: 1.0,
            base_interval: Duration::from_millis(config.replay_tick_ms).clamp(MIN_TICK, MAX_TICK),
            end_mode: config.replay_end,
        }
    }

    pub fn timeline(&self) -> &Arc<ReplayTimeline> {
        &self.timeline
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn end_mode(&self) -> ReplayEndMode {
        self.end_mode
    }

    /// Period between ticks at the current speed, kept between 1 ms and
    /// one hour.
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.base_interval.as_secs_f64() / self.speed)
            .unwrap_or(MAX_TICK)
            .clamp(MIN_TICK, MAX_TICK)
    }

    pub fn current_frame(&self) -> FrameState {
        self.timeline
            .step_to(self.index)
            .unwrap_or_else(|_| FrameState::empty())
    }

    /// Starts playback. A player parked on the final frame under
    /// [`ReplayEndMode::StopAtEnd`] rewinds first.
    pub fn play(&mut self) {
        if self.timeline.is_empty() {
            return;
        }
        if self.end_mode == ReplayEndMode::StopAtEnd && self.index + 1 >= self.timeline.len() {
            self.index = 0;
        }
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn reset(&mut self) -> FrameState {
        self.playing = false;
        self.index = 0;
        self.current_frame()
    }

    pub fn set_speed(&mut self, speed: f64) -> DispatchResult<()> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(DispatchError::validation(format!(
                "playback speed must be between {MIN_SPEED} and {MAX_SPEED}, got {speed}"
            )));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn seek(&mut self, index: usize) -> DispatchResult<FrameState> {
        let frame = self.timeline.step_to(index)?;
        if !self.timeline.is_empty() {
            self.index = index;
        }
        Ok(frame)
    }

    /// Advances one frame while playing. Past the final frame the cursor
    /// either wraps to the start or parks and stops, per the end mode.
    pub fn tick(&mut self) -> Option<FrameState> {
        if !self.playing || self.timeline.is_empty() {
            return None;
        }
        let next = self.index + 1;
        if next < self.timeline.len() {
            self.index = next;
        } else {
            match self.end_mode {
                ReplayEndMode::Loop => self.index = 0,
                ReplayEndMode::StopAtEnd => {
                    self.playing = false;
                    tracing::debug!(index = self.index, "replay reached final frame");
                    return None;
                }
            }
        }
        metrics::counter!(names::REPLAY_TICKS).increment(1);
        Some(self.current_frame())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Reset,
    SetSpeed(f64),
    Seek(usize),
    Shutdown,
}

/// Control side of a running playback task.
#[derive(Debug)]
pub struct PlaybackHandle {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    task: JoinHandle<ReplayPlayer>,
}

impl PlaybackHandle {
    pub fn send(&self, command: PlaybackCommand) -> DispatchResult<()> {
        self.commands
            .send(command)
            .map_err(|_| DispatchError::invalid_state("playback task has stopped"))
    }

    pub fn play(&self) -> DispatchResult<()> {
        self.send(PlaybackCommand::Play)
    }

    pub fn pause(&self) -> DispatchResult<()> {
        self.send(PlaybackCommand::Pause)
    }

    pub fn reset(&self) -> DispatchResult<()> {
        self.send(PlaybackCommand::Reset)
    }

    pub fn set_speed(&self, speed: f64) -> DispatchResult<()> {
        self.send(PlaybackCommand::SetSpeed(speed))
    }

    pub fn seek(&self, index: usize) -> DispatchResult<()> {
        self.send(PlaybackCommand::Seek(index))
    }

    /// Stops the task and hands back the player in its final state.
    pub async fn shutdown(self) -> DispatchResult<ReplayPlayer> {
        let _ = self.commands.send(PlaybackCommand::Shutdown);
        self.task
            .await
            .map_err(|err| DispatchError::invalid_state(format!("playback task failed: {err}")))
    }
}

/// Runs `player` on a tokio task, publishing each frame on `frames`.
///
/// Reset and seek publish the frame they land on. The task ends on
/// [`PlaybackCommand::Shutdown`], when every handle is dropped, or when the
/// frame receiver goes away.
pub fn spawn_playback(player: ReplayPlayer, frames: mpsc::Sender<FrameState>) -> PlaybackHandle {
    let (commands, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_playback(player, receiver, frames));
    PlaybackHandle { commands, task }
}

async fn run_playback(
    mut player: ReplayPlayer,
    mut commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    frames: mpsc::Sender<FrameState>,
) -> ReplayPlayer {
    tracing::debug!(frames = player.timeline().len(), "replay playback started");
    let mut ticker = schedule(player.tick_interval());

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => {
                let Some(command) = command else { break };
                let published = match command {
                    PlaybackCommand::Shutdown => break,
                    PlaybackCommand::Play => {
                        player.play();
                        ticker = schedule(player.tick_interval());
                        None
                    }
                    PlaybackCommand::Pause => {
                        player.pause();
                        None
                    }
                    PlaybackCommand::Reset => Some(player.reset()),
                    PlaybackCommand::SetSpeed(speed) => match player.set_speed(speed) {
                        Ok(()) => {
                            ticker = schedule(player.tick_interval());
                            None
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "ignoring playback speed change");
                            None
                        }
                    },
                    PlaybackCommand::Seek(index) => match player.seek(index) {
                        Ok(frame) => {
                            ticker = schedule(player.tick_interval());
                            Some(frame)
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "ignoring playback seek");
                            None
                        }
                    },
                };
                if let Some(frame) = published {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            _ = ticker.tick(), if player.is_playing() => {
                if let Some(frame) = player.tick() {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(index = player.index(), "replay playback ended");
    player
}

fn schedule(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
