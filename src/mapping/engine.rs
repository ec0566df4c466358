//! Mapping engine with statum state machine around the dispatcher
//!
//! Each engine owns one activated profile and runs in its own tokio task.
//! It drains the controller event queue strictly in order and hands every
//! event to the [`Dispatcher`].
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//!                                   │             ▲
//!                                   └─────────────┘
//!                               (shutdown / queue closed)
//! ```
//!
//! # Architecture
//!
//! ```text
//! EventStream ──► [Dispatcher] ──► VirtualOutputSink
//!                      ▲    │
//!        EngineCommand ┘    └──► watch<active mode>
//! ```

use super::custom::CustomHandlers;
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::error::MappingError;
use super::mode_switcher::ModeTransition;
use super::profile::{reachable_modes, CompiledProfile};
use super::sink::VirtualOutputSink;
use crate::controller::event_queue::EventStream;
use crate::persistence::ProfileConfig;
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests from the handle to the running engine
#[derive(Debug)]
pub enum EngineCommand {
    SwitchMode {
        name: String,
        reply: oneshot::Sender<Result<ModeTransition, MappingError>>,
    },
}

/// States for mapping engine lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum MappingEngineState {
    Initializing, // Setting up engine structure
    Configured,   // Profile compiled and validated
    Active,       // Processing events in main loop
    Deactivating, // Stopping macros and relative axes
    Deactivated,  // Fully stopped
}

#[machine]
pub struct MappingEngine<S: MappingEngineState> {
    name: String,
    stream: EventStream,
    sink: Arc<dyn VirtualOutputSink>,
    handlers: CustomHandlers,
    commands: mpsc::Receiver<EngineCommand>,
    mode_tx: watch::Sender<String>,
    profile: Option<Arc<CompiledProfile>>,
    dispatcher: Option<Dispatcher>,
}

impl<S: MappingEngineState> MappingEngine<S> {
    pub fn get_name(&self) -> &str {
        &self.name
    }
}

impl MappingEngine<Initializing> {
    pub fn create(
        name: String,
        stream: EventStream,
        sink: Arc<dyn VirtualOutputSink>,
        handlers: CustomHandlers,
        commands: mpsc::Receiver<EngineCommand>,
        mode_tx: watch::Sender<String>,
    ) -> Self {
        info!("Initializing new mapping engine: {}", name);

        Self::new(
            name,
            stream,
            sink,
            handlers,
            commands,
            mode_tx,
            None, // profile
            None, // dispatcher
        )
    }

    /// Compiles and validates the profile, nothing is written yet
    pub fn configure(
        mut self,
        config: &ProfileConfig,
    ) -> Result<MappingEngine<Configured>, MappingError> {
        info!("Configuring mapping engine {} with profile {}", self.name, config.name);

        let profile = CompiledProfile::compile(config, &self.handlers).map_err(|e| {
            error!("Failed to compile profile {}: {}", config.name, e);
            e
        })?;

        let reachable = reachable_modes(&profile);
        for (id, name) in profile.graph.modes() {
            if !reachable.contains(&id) {
                warn!("Mode {} cannot be reached from {}", name, profile.mode_name(profile.startup_mode));
            }
        }

        debug!(
            "Profile {} compiled: {} modes, {} bindings, {} merge axes, {} macros",
            profile.name,
            profile.graph.len(),
            profile.graph.binding_count(),
            profile.merges.len(),
            profile.macros.len()
        );
        self.profile = Some(Arc::new(profile));
        Ok(self.transition())
    }
}

impl MappingEngine<Configured> {
    /// Builds the dispatcher and writes initial outputs and merge axis neutrals
    pub fn activate(mut self) -> Result<MappingEngine<Active>, MappingError> {
        info!("Activating mapping engine: {}", self.name);
        let profile = self.profile.clone().ok_or_else(|| {
            MappingError::InitializationError("No profile configured".to_string())
        })?;

        let dispatcher = Dispatcher::new(profile, self.handlers.clone(), self.sink.clone());
        let primed = dispatcher.prime_outputs();
        debug!("Primed {} outputs", primed);
        self.mode_tx.send_replace(dispatcher.active_mode_name().to_string());
        self.dispatcher = Some(dispatcher);
        Ok(self.transition())
    }
}

impl MappingEngine<Active> {
    /// Main processing loop with graceful shutdown support
    ///
    /// Runs until the shutdown signal fires or every producer of the event
    /// queue is gone. Failing actions are logged and never stop the loop.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<MappingEngine<Deactivating>, MappingError> {
        info!("Starting event processing loop for: {}", self.name);
        let mut dispatcher = self.dispatcher.take().ok_or_else(|| {
            MappingError::InitializationError("Engine activated without dispatcher".to_string())
        })?;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for: {}", self.name);
                    break;
                }

                command = self.commands.recv(), if commands_open => match command {
                    Some(EngineCommand::SwitchMode { name, reply }) => {
                        let result = dispatcher.switch_mode(&name);
                        if result.is_ok() {
                            self.mode_tx.send_replace(dispatcher.active_mode_name().to_string());
                        }
                        if reply.send(result).is_err() {
                            debug!("Mode switch requester went away");
                        }
                    }
                    None => commands_open = false,
                },

                queued = self.stream.recv() => {
                    let Some(queued) = queued else {
                        info!("Event queue closed for: {}", self.name);
                        break;
                    };
                    // Disconnects can release temporary modes without a ModeChanged outcome
                    let before = dispatcher.active_mode();
                    if let DispatchOutcome::Rejected(reason) = dispatcher.dispatch(&queued.event) {
                        debug!("Event {} rejected: {}", queued.sequence, reason);
                    }
                    if dispatcher.active_mode() != before {
                        self.mode_tx.send_replace(dispatcher.active_mode_name().to_string());
                    }
                }
            }
        }

        info!(
            "Processed {} events, transitioning to Deactivating state: {}",
            self.stream.received(),
            self.name
        );
        self.dispatcher = Some(dispatcher);
        Ok(self.transition())
    }
}

impl MappingEngine<Deactivating> {
    /// Stops macro playback and relative axes, then transitions to Deactivated state
    pub async fn shutdown(mut self) -> MappingEngine<Deactivated> {
        info!("Shutting down mapping engine: {}", self.name);

        if let Some(dispatcher) = &mut self.dispatcher {
            debug!("Cancelling running macros and relative axes");
            dispatcher.shutdown().await;
        }

        info!("Engine shut down successfully: {}", self.name);
        self.transition()
    }
}

impl MappingEngine<Deactivated> {}

/// Handle for managing a mapping engine in a tokio task
#[derive(Debug)]
pub struct MappingEngineHandle {
    pub name: String,

    task_handle: Option<JoinHandle<Result<(), MappingError>>>,

    shutdown_tx: Option<oneshot::Sender<()>>,

    command_tx: Option<mpsc::Sender<EngineCommand>>,

    mode_rx: Option<watch::Receiver<String>>,
}

impl MappingEngineHandle {
    pub fn new(name: String) -> Self {
        Self {
            name,
            task_handle: None,
            shutdown_tx: None,
            command_tx: None,
            mode_rx: None,
        }
    }

    /// Compiles the profile, activates the engine and spawns its processing loop
    ///
    /// Configuration errors are returned before anything is spawned or
    /// written to the sink.
    ///
    /// # Returns
    ///
    /// A watch receiver that always holds the name of the active mode.
    pub fn start(
        &mut self,
        profile: &ProfileConfig,
        stream: EventStream,
        sink: Arc<dyn VirtualOutputSink>,
        handlers: CustomHandlers,
    ) -> Result<watch::Receiver<String>, MappingError> {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (mode_tx, mut mode_rx) = watch::channel(String::new());
        let engine_name = self.name.clone();

        let active_engine = MappingEngine::create(
            engine_name.clone(),
            stream,
            sink,
            handlers,
            command_rx,
            mode_tx,
        )
        .configure(profile)?
        .activate()?;

        // The activation value counts as seen, `changed` waits for the first switch
        drop(mode_rx.borrow_and_update());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task_handle = tokio::spawn(async move {
            info!("Spawning running engine: {}", engine_name);
            match active_engine.run_until_shutdown(shutdown_rx).await {
                Ok(deactivating_engine) => {
                    info!("Engine entering deactivating state: {}", engine_name);
                    let _ = deactivating_engine.shutdown().await;
                    Ok(())
                }
                Err(e) => {
                    error!("Error running engine: {} - {}", engine_name, e);
                    Err(e)
                }
            }
        });

        self.task_handle = Some(task_handle);
        self.shutdown_tx = Some(shutdown_tx);
        self.command_tx = Some(command_tx);
        self.mode_rx = Some(mode_rx.clone());

        info!("Mapping engine activated: {} ({})", self.name, profile.name);
        Ok(mode_rx)
    }

    /// Name of the active mode, `None` before `start`
    pub fn active_mode(&self) -> Option<String> {
        self.mode_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Switches permanently to the named mode
    pub async fn switch_mode(&self, name: &str) -> Result<ModeTransition, MappingError> {
        let command_tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| MappingError::ChannelError("Engine not started".to_string()))?;
        let (reply, response) = oneshot::channel();
        command_tx
            .send(EngineCommand::SwitchMode {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| MappingError::ChannelError("Engine task terminated".to_string()))?;
        response
            .await
            .map_err(|_| MappingError::ChannelError("Engine dropped the request".to_string()))?
    }

    /// Gracefully shuts down engine and waits for task completion
    pub async fn shutdown(&mut self) -> Result<(), MappingError> {
        debug!("Sending shutdown signal to engine: {}", self.name);

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Engine task already terminated: {}", self.name);
            }
        }
        self.command_tx = None;

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => {
                    debug!("Engine task completed: {}", self.name);
                    result
                }
                Err(e) => {
                    error!("Engine task panicked: {} - {}", self.name, e);
                    Err(MappingError::ThreadError(format!(
                        "Engine task panicked: {}",
                        e
                    )))
                }
            }
        } else {
            debug!("Engine already shut down: {}", self.name);
            Ok(())
        }
    }
}
