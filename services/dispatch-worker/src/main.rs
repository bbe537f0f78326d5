use dispatch_config::{EngineConfig, ServiceConfig};
use dispatch_core::{DispatchError, PositionSample, UnitId};
use dispatch_engine::{spawn_playback, FrameState, ReplayPlayer, ReplayTimeline, Trail};
use dispatch_observability::{init, log_startup, ObservabilityConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
enum ReplayFileError {
    #[error("failed to read replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("replay file is not a JSON array of position samples: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("replay file holds an unusable sample: {0}")]
    Invalid(#[from] DispatchError),
}

#[tokio::main]
async fn main() {
    let config = ServiceConfig::from_env("dispatch-worker");
    let obs_config = ObservabilityConfig {
        service_name: config.service_name.clone(),
        environment: config.environment.to_string(),
        log_level: config.log_level.clone(),
        metrics_addr: config.metrics_addr.clone(),
    };
    let handle = init(&obs_config);
    log_startup(&handle, &obs_config.environment);
    let engine = EngineConfig::from_env();

    let explicit = std::env::var("DISPATCH_REPLAY_FILE").ok();
    let from_env = explicit.is_some();
    let path = replay_path(explicit, &config.data_dir);
    if !from_env && !path.exists() {
        tracing::warn!(path = %path.display(), "no replay file found, nothing to replay");
        return;
    }
    let timeline = match load_timeline(&path) {
        Ok(timeline) => timeline,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "replay file rejected");
            std::process::exit(1);
        }
    };
    tracing::info!(
        path = %path.display(),
        frames = timeline.len(),
        units = timeline.trails().count(),
        duration_ms = timeline.duration_ms(),
        end_mode = ?engine.replay_end,
        "replay loaded"
    );

    replay(Arc::new(timeline), &engine).await;
}

/// `DISPATCH_REPLAY_FILE` when set, otherwise `replay.json` in the data dir.
fn replay_path(explicit: Option<String>, data_dir: &str) -> PathBuf {
    explicit
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(data_dir).join("replay.json"))
}

fn load_timeline(path: &Path) -> Result<ReplayTimeline, ReplayFileError> {
    let raw = std::fs::read_to_string(path)?;
    let samples: Vec<PositionSample> = serde_json::from_str(&raw)?;
    timeline_from_samples(samples)
}

fn timeline_from_samples(
    samples: Vec<PositionSample>,
) -> Result<ReplayTimeline, ReplayFileError> {
    let mut by_unit: BTreeMap<UnitId, Vec<PositionSample>> = BTreeMap::new();
    for sample in samples {
        by_unit.entry(sample.unit_id).or_default().push(sample);
    }
    let trails = by_unit
        .into_iter()
        .map(|(unit_id, samples)| Trail::new(unit_id, unit_id.to_string(), samples))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ReplayTimeline::new(trails))
}

/// Plays the timeline through once, logging every frame, or until Ctrl-C.
async fn replay(timeline: Arc<ReplayTimeline>, engine: &EngineConfig) {
    let player = ReplayPlayer::new(Arc::clone(&timeline), engine);
    log_frame(&player.current_frame());
    let Some(last) = timeline.len().checked_sub(1).filter(|last| *last > 0) else {
        return;
    };

    let (frames_tx, mut frames) = mpsc::channel(32);
    let playback = spawn_playback(player, frames_tx);
    if let Err(err) = playback.play() {
        tracing::error!(error = %err, "replay could not start");
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                log_frame(&frame);
                if frame.index == Some(last) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping replay");
                break;
            }
        }
    }

    match playback.shutdown().await {
        Ok(player) => tracing::info!(index = player.index(), "replay finished"),
        Err(err) => tracing::warn!(error = %err, "replay task ended abnormally"),
    }
}

fn log_frame(frame: &FrameState) {
    let reporting = frame.units.iter().filter(|unit| unit.marker.is_some()).count();
    tracing::info!(
        index = ?frame.index,
        timestamp_ms = ?frame.timestamp_ms,
        total = frame.total_frames,
        reporting,
        "replay frame"
    );
    for unit in &frame.units {
        if let Some(marker) = &unit.marker {
            tracing::debug!(
                unit = %unit.label,
                latitude = marker.position.latitude,
                longitude = marker.position.longitude,
                status = %marker.status,
                trail = unit.polyline.len(),
                "unit position"
            );
        }
    }
}
