//! Timed emission sequences
//!
//! Playback runs in its own tokio task and never blocks the event loop.
//! Every playback owns a child of the player's root [`CancellationToken`],
//! so a single macro can be restarted and everything can be stopped at once
//! on deactivation.

use super::binding::MacroId;
use super::sink::{OutputCommand, VirtualOutputSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens when a macro is triggered while it is still playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroPolicy {
    /// Cancel the running playback and start over
    #[default]
    Restart,
    /// Play again once the running playback has finished
    Queue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroStep {
    Emit(OutputCommand),
    Pause(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    pub name: String,
    pub policy: MacroPolicy,
    pub steps: Vec<MacroStep>,
    /// Inserted between two consecutive emissions
    pub delay: Duration,
}

struct Playback {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MacroPlayer {
    sink: Arc<dyn VirtualOutputSink>,
    root: CancellationToken,
    running: HashMap<MacroId, Playback>,
}

impl MacroPlayer {
    pub fn new(sink: Arc<dyn VirtualOutputSink>) -> Self {
        Self {
            sink,
            root: CancellationToken::new(),
            running: HashMap::new(),
        }
    }

    /// Must be called from within a tokio runtime
    pub fn trigger(&mut self, id: MacroId, definition: Arc<MacroDefinition>) {
        self.running.retain(|_, p| !p.handle.is_finished());

        let token = self.root.child_token();
        let sink = self.sink.clone();
        let previous = self.running.remove(&id);

        let handle = match (definition.policy, previous) {
            (MacroPolicy::Restart, previous) => {
                if let Some(previous) = previous {
                    debug!("Restarting macro {}", definition.name);
                    previous.token.cancel();
                }
                tokio::spawn(play(definition, sink, token.clone()))
            }
            (MacroPolicy::Queue, Some(previous)) => {
                debug!("Queueing macro {} behind running playback", definition.name);
                let token = token.clone();
                tokio::spawn(async move {
                    let _ = previous.handle.await;
                    play(definition, sink, token).await;
                })
            }
            (MacroPolicy::Queue, None) => tokio::spawn(play(definition, sink, token.clone())),
        };

        self.running.insert(id, Playback { token, handle });
    }

    pub fn active_count(&self) -> usize {
        self.running
            .values()
            .filter(|p| !p.handle.is_finished())
            .count()
    }

    /// Cancels every playback, the player stays usable afterwards
    pub fn cancel_all(&mut self) {
        if !self.running.is_empty() {
            info!("Cancelling {} macro playbacks", self.running.len());
        }
        self.root.cancel();
        self.root = CancellationToken::new();
    }

    /// Cancels and waits for every playback task
    pub async fn shutdown(&mut self) {
        self.cancel_all();
        for (id, playback) in self.running.drain() {
            if let Err(e) = playback.handle.await {
                warn!("Macro playback {} ended abnormally: {}", id, e);
            }
        }
    }
}

async fn play(definition: Arc<MacroDefinition>, sink: Arc<dyn VirtualOutputSink>, token: CancellationToken) {
    debug!("Playing macro {}", definition.name);
    let mut emitted = false;

    for step in &definition.steps {
        if token.is_cancelled() {
            debug!("Macro {} cancelled", definition.name);
            return;
        }
        match step {
            MacroStep::Pause(duration) => {
                if !sleep_or_cancel(*duration, &token).await {
                    return;
                }
            }
            MacroStep::Emit(command) => {
                if emitted
                    && !definition.delay.is_zero()
                    && !sleep_or_cancel(definition.delay, &token).await
                {
                    return;
                }
                if let Err(e) = sink.apply(command) {
                    warn!("Macro {} failed to write {:?}: {}", definition.name, command, e);
                }
                emitted = true;
            }
        }
    }
    debug!("Macro {} finished", definition.name);
}

async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::sink::RecordingSink;

    fn button(pressed: bool) -> OutputCommand {
        OutputCommand::Button {
            device: 1,
            index: 3,
            pressed,
        }
    }

    fn tap(policy: MacroPolicy) -> Arc<MacroDefinition> {
        Arc::new(MacroDefinition {
            name: "tap".to_string(),
            policy,
            steps: vec![MacroStep::Emit(button(true)), MacroStep::Emit(button(false))],
            delay: Duration::from_millis(50),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_running_playback() {
        let sink = Arc::new(RecordingSink::new());
        let mut player = MacroPlayer::new(sink.clone());

        player.trigger(MacroId(0), tap(MacroPolicy::Restart));
        tokio::time::sleep(Duration::from_millis(20)).await;
        player.trigger(MacroId(0), tap(MacroPolicy::Restart));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.commands(), vec![button(true), button(true), button(false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_plays_both_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let mut player = MacroPlayer::new(sink.clone());

        player.trigger(MacroId(0), tap(MacroPolicy::Queue));
        tokio::time::sleep(Duration::from_millis(20)).await;
        player.trigger(MacroId(0), tap(MacroPolicy::Queue));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            sink.commands(),
            vec![button(true), button(false), button(true), button(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_steps_and_cancel_all() {
        let sink = Arc::new(RecordingSink::new());
        let mut player = MacroPlayer::new(sink.clone());
        let definition = Arc::new(MacroDefinition {
            name: "slow".to_string(),
            policy: MacroPolicy::Restart,
            steps: vec![
                MacroStep::Emit(button(true)),
                MacroStep::Pause(Duration::from_secs(1)),
                MacroStep::Emit(button(false)),
            ],
            delay: Duration::ZERO,
        });

        player.trigger(MacroId(1), definition.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(player.active_count(), 1);
        player.shutdown().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.commands(), vec![button(true)]);

        player.trigger(MacroId(1), definition);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.commands().len(), 3);
    }
}
