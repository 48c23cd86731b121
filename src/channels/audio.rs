use super::tone::Tone;
use super::{AudioChannel, ChannelError};
use crate::config::{Alerts, PlayerCommand};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("sound asset missing: {0}")]
    AssetMissing(PathBuf),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {status}")]
    Exit { program: String, status: String },
    #[error("all playback methods failed: {0:?}")]
    Exhausted(Vec<String>),
}

/// One step of the playback fallback chain.
#[async_trait]
pub trait SoundStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self) -> Result<(), AudioError>;
}

/// Plays the sound asset through an external player.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: &'static str,
    command: PlayerCommand,
    sound_path: PathBuf,
}

impl CommandStage {
    pub fn new(name: &'static str, command: PlayerCommand, sound_path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            command,
            sound_path: sound_path.into(),
        }
    }

    pub fn sound_path(&self) -> &Path {
        &self.sound_path
    }
}

#[async_trait]
impl SoundStage for CommandStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(&self) -> Result<(), AudioError> {
        if !tokio::fs::try_exists(&self.sound_path).await.unwrap_or(false) {
            return Err(AudioError::AssetMissing(self.sound_path.clone()));
        }
        let status = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(self.sound_path.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| AudioError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(AudioError::Exit {
                program: self.command.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Pipes a synthesized beep into a player reading WAV from stdin.
#[derive(Debug, Clone)]
pub struct ToneStage {
    command: PlayerCommand,
    tone: Tone,
}

impl ToneStage {
    pub fn new(command: PlayerCommand, tone: Tone) -> Self {
        Self { command, tone }
    }
}

#[async_trait]
impl SoundStage for ToneStage {
    fn name(&self) -> &'static str {
        "tone"
    }

    async fn attempt(&self) -> Result<(), AudioError> {
        let spawn_err = |source| AudioError::Spawn {
            program: self.command.program.clone(),
            source,
        };
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&self.tone.to_wav()).await.map_err(spawn_err)?;
            // Close stdin so the player sees end of input.
            drop(stdin);
        }
        let status = child.wait().await.map_err(spawn_err)?;
        if !status.success() {
            return Err(AudioError::Exit {
                program: self.command.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Tries each stage in order, moving on only after the previous one failed.
#[derive(Clone)]
pub struct FallbackAudio {
    stages: Vec<Arc<dyn SoundStage>>,
}

impl std::fmt::Debug for FallbackAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("FallbackAudio").field("stages", &names).finish()
    }
}

impl FallbackAudio {
    pub fn new(stages: Vec<Arc<dyn SoundStage>>) -> Self {
        Self { stages }
    }

    /// Players from config in order (first is "primary", the rest
    /// "alternate"), then the synthesized tone.
    pub fn from_config(alerts: &Alerts) -> Self {
        let mut stages: Vec<Arc<dyn SoundStage>> = Vec::new();
        for (i, player) in alerts.players.iter().enumerate() {
            let name = if i == 0 { "primary" } else { "alternate" };
            stages.push(Arc::new(CommandStage::new(
                name,
                player.clone(),
                &alerts.sound_path,
            )));
        }
        stages.push(Arc::new(ToneStage::new(
            alerts.tone_player.clone(),
            Tone::default(),
        )));
        Self::new(stages)
    }

    #[instrument(skip_all)]
    pub async fn play_chain(&self) -> Result<&'static str, AudioError> {
        let mut failures = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            match stage.attempt().await {
                Ok(()) => {
                    info!(stage = stage.name(), "alert sound played");
                    return Ok(stage.name());
                }
                Err(err) => {
                    warn!(stage = stage.name(), %err, "alert sound stage failed; falling back");
                    failures.push(format!("{}: {}", stage.name(), err));
                }
            }
        }
        Err(AudioError::Exhausted(failures))
    }
}

#[async_trait]
impl AudioChannel for FallbackAudio {
    async fn play(&self) -> Result<&'static str, ChannelError> {
        Ok(self.play_chain().await?)
    }
}
