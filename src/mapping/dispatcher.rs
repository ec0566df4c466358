//! Binding resolution and action dispatch
//!
//! One [`Dispatcher`] owns all mutable mapping state of an activated profile:
//! the mode switcher, merge-axis state, per-binding button edges and the
//! macro player and relative axis integrators. It is driven by exactly one
//! task, so none of it is locked.
//!
//! For every input event:
//!
//! 1. Events from disabled devices are dropped.
//! 2. The release of an input holding a temporary mode is handled first,
//!    since the temporary mode may not bind that input at all.
//! 3. The binding is resolved through the mode graph for the active mode.
//! 4. The bound action runs and its result goes to the virtual output sink.
//!
//! An input without a binding in the active mode is not an error.
//! Write failures are logged and never stop dispatching.

use super::binding::{
    Binding, BindingId, BindingSlot, MacroId, MergeRole, ModeId, OutputTarget, PipelineId,
    RemapMode,
};
use super::custom::CustomHandlers;
use super::error::{ConfigError, MappingError};
use super::macros::MacroPlayer;
use super::merge_axis::MergeAxis;
use super::mode_switcher::{ModeSwitcher, ModeTransition};
use super::profile::CompiledProfile;
use super::relative::{RelativeAxes, DEFAULT_TICK, REST_THRESHOLD};
use super::sink::{OutputError, VirtualOutputSink};
use crate::controller::device::{
    normalize_axis, ControllerEvent, DeviceId, DeviceSnapshot, InputId, InputKey, InputValue,
    RawInputEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No binding for the input in the active mode or its ancestors
    Unbound,
    /// Event came from a device that is currently disconnected
    DeviceDisabled,
    DeviceConnected { reenabled: bool },
    DeviceDisconnected,
    /// Bound, but nothing to do (no edge, handler returned nothing)
    Ignored,
    Written,
    WriteFailed(OutputError),
    ModeChanged { from: ModeId, to: ModeId },
    MacroStarted(MacroId),
    /// Relative remap now moves its target at this rate
    RelativeRate(f64),
    /// Action refused, e.g. temporary mode stack full
    Rejected(String),
}

pub struct Dispatcher {
    profile: Arc<CompiledProfile>,
    handlers: CustomHandlers,
    sink: Arc<dyn VirtualOutputSink>,
    switcher: ModeSwitcher,
    merges: Vec<MergeAxis>,
    macros: MacroPlayer,
    relative: RelativeAxes,
    devices: DeviceSnapshot,
    // Last button view per binding, for edge detection
    pressed: Vec<bool>,
    // Binding each input resolved to last time
    last_binding: HashMap<InputKey, BindingId>,
    // Inputs currently holding a temporary mode
    temporary: HashMap<InputKey, BindingId>,
    // Inputs that last drove a relative remap
    relative_inputs: HashMap<InputKey, OutputTarget>,
}

impl Dispatcher {
    pub fn new(
        profile: Arc<CompiledProfile>,
        handlers: CustomHandlers,
        sink: Arc<dyn VirtualOutputSink>,
    ) -> Self {
        let switcher = ModeSwitcher::new(profile.startup_mode, profile.max_temporary_depth);
        let mut merges = profile.merges.clone();
        merges.iter_mut().for_each(MergeAxis::reset);
        let pressed = vec![false; profile.graph.binding_count()];
        info!(
            "Dispatcher ready for profile '{}' in mode {}",
            profile.name,
            profile.mode_name(profile.startup_mode)
        );

        Self {
            macros: MacroPlayer::new(sink.clone()),
            relative: RelativeAxes::new(sink.clone(), DEFAULT_TICK),
            profile,
            handlers,
            sink,
            switcher,
            merges,
            devices: DeviceSnapshot::new(),
            pressed,
            last_binding: HashMap::new(),
            temporary: HashMap::new(),
            relative_inputs: HashMap::new(),
        }
    }

    /// Writes the configured initial outputs, then every merge axis at its
    /// neutral position. Returns the number of successful writes.
    pub fn prime_outputs(&self) -> usize {
        let mut written = 0;
        for (target, value) in &self.profile.initial_outputs {
            match self.sink.set_axis(target.device, target.input.index(), *value) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to prime {}: {}", target, e),
            }
        }
        for merge in 0..self.merges.len() {
            if let DispatchOutcome::Written = self.write_merge(merge) {
                written += 1;
            }
        }
        written
    }

    pub fn dispatch(&mut self, event: &ControllerEvent) -> DispatchOutcome {
        match event {
            ControllerEvent::Input(raw) => self.dispatch_input(raw),
            ControllerEvent::Connected(device) => {
                let reenabled = self.devices.connect(device.clone());
                if reenabled {
                    info!("Re-enabled bindings of {}", device.id);
                }
                DispatchOutcome::DeviceConnected { reenabled }
            }
            ControllerEvent::Disconnected(id) => {
                self.disable_device(*id);
                DispatchOutcome::DeviceDisconnected
            }
        }
    }

    /// Programmatic permanent switch by mode name
    pub fn switch_mode(&mut self, name: &str) -> Result<ModeTransition, MappingError> {
        let target = self
            .profile
            .graph
            .mode_id(name)
            .ok_or_else(|| ConfigError::UnknownMode(name.to_string()))?;
        let transition = self.switcher.switch_to(target);
        self.finish_transition(transition);
        Ok(transition)
    }

    pub fn active_mode(&self) -> ModeId {
        self.switcher.active()
    }

    pub fn active_mode_name(&self) -> &str {
        self.profile.mode_name(self.switcher.active())
    }

    pub fn devices(&self) -> &DeviceSnapshot {
        &self.devices
    }

    pub fn merge(&self, name: &str) -> Option<&MergeAxis> {
        self.merges.iter().find(|m| m.name() == name)
    }

    pub fn macros_running(&self) -> usize {
        self.macros.active_count()
    }

    pub fn relative_moving(&self) -> usize {
        self.relative.moving()
    }

    /// Stops all macro playback and relative axes
    pub async fn shutdown(&mut self) {
        self.macros.shutdown().await;
        self.relative.shutdown().await;
    }

    fn dispatch_input(&mut self, raw: &RawInputEvent) -> DispatchOutcome {
        if self.devices.is_disabled(raw.device) {
            debug!("Dropping {} from disabled device", raw.key());
            return DispatchOutcome::DeviceDisabled;
        }
        self.devices.record(raw);

        let key = raw.key();
        if let Some(outcome) = self.handle_temporary_release(&key, &raw.value) {
            return outcome;
        }

        let profile = Arc::clone(&self.profile);
        let Some((id, slot)) = profile.graph.resolve(self.switcher.active(), &key) else {
            debug!(
                "{} is unbound in mode {}",
                key,
                self.active_mode_name()
            );
            return DispatchOutcome::Unbound;
        };

        match &slot.binding {
            Binding::Remap {
                target,
                pipeline,
                mode: RemapMode::Relative { rate },
            } => self.relative_remap(key, target, *pipeline, *rate, &raw.value),
            Binding::Remap {
                target, pipeline, ..
            } => self.remap(id, slot, raw, target, *pipeline),
            Binding::MergeAxis { role, merge } => self.merge_axis(*role, merge.index(), &raw.value),
            Binding::Macro(macro_id) => match self.edge(raw.key(), id, slot, &raw.value) {
                Some(true) => match profile.macros.get(macro_id.index()) {
                    Some(definition) => {
                        debug!("Starting macro {}", definition.name);
                        self.macros.trigger(*macro_id, definition.clone());
                        DispatchOutcome::MacroStarted(*macro_id)
                    }
                    None => DispatchOutcome::Rejected(format!("unknown macro {}", macro_id)),
                },
                _ => DispatchOutcome::Ignored,
            },
            Binding::Custom { handler, target } => self.custom(handler, target.as_ref(), &raw.value),
            Binding::SwitchMode(target) => match self.edge(raw.key(), id, slot, &raw.value) {
                Some(true) => {
                    let transition = self.switcher.switch_to(*target);
                    self.finish_transition(transition)
                }
                _ => DispatchOutcome::Ignored,
            },
            Binding::SwitchModePrevious => match self.edge(raw.key(), id, slot, &raw.value) {
                Some(true) => {
                    let transition = self.switcher.switch_previous();
                    self.finish_transition(transition)
                }
                _ => DispatchOutcome::Ignored,
            },
            Binding::SwitchModeTemporary(target) => match self.edge(raw.key(), id, slot, &raw.value) {
                Some(true) => match self.switcher.push_temporary(key, *target) {
                    Ok(transition) => {
                        self.temporary.insert(key, id);
                        self.finish_transition(transition)
                    }
                    Err(e) => {
                        warn!("Temporary switch from {} rejected: {}", key, e);
                        DispatchOutcome::Rejected(e.to_string())
                    }
                },
                _ => DispatchOutcome::Ignored,
            },
        }
    }

    fn handle_temporary_release(
        &mut self,
        key: &InputKey,
        value: &InputValue,
    ) -> Option<DispatchOutcome> {
        let id = *self.temporary.get(key)?;
        let pressed = self.profile.graph.slot(id).and_then(|s| s.pressed(value));
        if pressed != Some(false) {
            return Some(DispatchOutcome::Ignored);
        }

        self.temporary.remove(key);
        self.pressed[id.index()] = false;
        let transition = self
            .switcher
            .release_temporary(key)
            .unwrap_or(ModeTransition::Unchanged);
        Some(self.finish_transition(transition))
    }

    fn finish_transition(&mut self, transition: ModeTransition) -> DispatchOutcome {
        self.sync_temporary();
        self.sync_relative();
        self.log_transition(transition)
    }

    /// Forgets triggers the switcher no longer holds so their next press is a fresh edge
    fn sync_temporary(&mut self) {
        let switcher = &self.switcher;
        let pressed = &mut self.pressed;
        self.temporary.retain(|key, id| {
            let held = switcher.is_temporary_trigger(key);
            if !held {
                pressed[id.index()] = false;
            }
            held
        });
    }

    /// Holds relative targets whose input no longer resolves to them
    fn sync_relative(&mut self) {
        let profile = Arc::clone(&self.profile);
        let active = self.switcher.active();
        let relative = &mut self.relative;
        self.relative_inputs.retain(|key, target| {
            let bound = profile
                .graph
                .resolve(active, key)
                .and_then(|(_, slot)| relative_target(&slot.binding))
                == Some(*target);
            if !bound {
                relative.stop(target);
            }
            bound
        });
    }

    fn disable_device(&mut self, device: DeviceId) {
        self.devices.disconnect(device);

        let pressed = &mut self.pressed;
        self.last_binding.retain(|key, id| {
            if key.device == device {
                pressed[id.index()] = false;
            }
            key.device != device
        });

        let held: Vec<InputKey> = self
            .switcher
            .temporary_triggers()
            .filter(|k| k.device == device)
            .copied()
            .collect();
        for key in held {
            if let Some(transition) = self.switcher.release_temporary(&key) {
                info!("Released temporary mode held by {}", key);
                self.log_transition(transition);
            }
        }
        self.sync_temporary();
        self.sync_relative();

        let relative = &mut self.relative;
        self.relative_inputs.retain(|key, target| {
            if key.device == device {
                relative.stop(target);
            }
            key.device != device
        });

        // Merged outputs fall back to the rest position of the lost side
        let profile = Arc::clone(&self.profile);
        for (index, wiring) in profile.merge_wiring.iter().enumerate() {
            let Some(axis) = self.merges.get_mut(index) else {
                continue;
            };
            let mut released = false;
            for (role, key) in [(MergeRole::Lower, wiring.lower), (MergeRole::Upper, wiring.upper)] {
                if key.device == device {
                    axis.release(role);
                    released = true;
                }
            }
            if released {
                debug!("Released {} inputs of merge axis {}", device, axis.name());
                self.write_merge(index);
            }
        }
    }

    /// A mode change while an input is held hands its release to another
    /// binding, so the binding it leaves is reset to released
    fn edge(
        &mut self,
        key: InputKey,
        id: BindingId,
        slot: &BindingSlot,
        value: &InputValue,
    ) -> Option<bool> {
        if let Some(old) = self.last_binding.insert(key, id) {
            if old != id {
                self.pressed[old.index()] = false;
            }
        }
        let pressed = slot.pressed(value)?;
        let state = self.pressed.get_mut(id.index())?;
        if *state == pressed {
            None
        } else {
            *state = pressed;
            Some(pressed)
        }
    }

    fn remap(
        &mut self,
        id: BindingId,
        slot: &BindingSlot,
        raw: &RawInputEvent,
        target: &OutputTarget,
        pipeline: Option<PipelineId>,
    ) -> DispatchOutcome {
        match target.input {
            InputId::Axis(index) => {
                let value = match raw.value {
                    InputValue::Axis(v) => self.run_pipeline(pipeline, v),
                    InputValue::Button(pressed) => {
                        if pressed {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    InputValue::Hat(_) => {
                        return DispatchOutcome::Rejected(format!("hat cannot drive {}", target))
                    }
                };
                self.written(target, self.sink.set_axis(target.device, index, value))
            }
            InputId::Button(index) => match self.edge(raw.key(), id, slot, &raw.value) {
                Some(pressed) => {
                    self.written(target, self.sink.set_button(target.device, index, pressed))
                }
                None => DispatchOutcome::Ignored,
            },
            InputId::Hat(index) => match raw.value {
                InputValue::Hat(direction) => {
                    self.written(target, self.sink.set_hat(target.device, index, direction))
                }
                _ => DispatchOutcome::Rejected(format!("{} needs a hat input", target)),
            },
        }
    }

    fn merge_axis(&mut self, role: MergeRole, merge: usize, value: &InputValue) -> DispatchOutcome {
        let InputValue::Axis(v) = value else {
            return DispatchOutcome::Rejected("merge axis needs an axis input".to_string());
        };
        let Some(axis) = self.merges.get_mut(merge) else {
            return DispatchOutcome::Rejected(format!("unknown merge axis {}", merge));
        };
        axis.update(role, *v);
        self.write_merge(merge)
    }

    fn write_merge(&self, merge: usize) -> DispatchOutcome {
        let (Some(axis), Some(wiring)) = (self.merges.get(merge), self.profile.merge_wiring.get(merge))
        else {
            return DispatchOutcome::Rejected(format!("unknown merge axis {}", merge));
        };
        let out = self.run_pipeline(wiring.pipeline, axis.output());
        self.written(
            &wiring.target,
            self.sink
                .set_axis(wiring.target.device, wiring.target.input.index(), out),
        )
    }

    fn relative_remap(
        &mut self,
        key: InputKey,
        target: &OutputTarget,
        pipeline: Option<PipelineId>,
        rate: f64,
        value: &InputValue,
    ) -> DispatchOutcome {
        let InputValue::Axis(v) = value else {
            return DispatchOutcome::Rejected("relative remap needs an axis input".to_string());
        };
        let deflection = self.run_pipeline(pipeline, *v);
        let speed = if deflection.abs() < REST_THRESHOLD {
            0.0
        } else {
            deflection * rate
        };
        if let Some(previous) = self.relative_inputs.insert(key, *target) {
            if previous != *target {
                self.relative.stop(&previous);
            }
        }
        let start = self.profile.initial_output(target).unwrap_or(0.0);
        self.relative.set_rate(*target, speed, start);
        DispatchOutcome::RelativeRate(speed)
    }

    fn run_pipeline(&self, pipeline: Option<PipelineId>, value: f64) -> f64 {
        match pipeline.and_then(|p| self.profile.pipeline(p)) {
            Some(pipeline) => pipeline.apply(value),
            None => value,
        }
    }

    fn custom(
        &mut self,
        handler: &str,
        target: Option<&OutputTarget>,
        value: &InputValue,
    ) -> DispatchOutcome {
        let Some(callback) = self.handlers.get(handler) else {
            return DispatchOutcome::Rejected(format!("unknown handler {}", handler));
        };
        let (Some(result), Some(target)) = (callback.handle(value), target) else {
            return DispatchOutcome::Ignored;
        };
        let write = match (target.input, result) {
            (InputId::Axis(i), InputValue::Axis(v)) => {
                self.sink.set_axis(target.device, i, normalize_axis(v))
            }
            (InputId::Axis(i), InputValue::Button(b)) => {
                self.sink
                    .set_axis(target.device, i, if b { 1.0 } else { -1.0 })
            }
            (InputId::Button(i), InputValue::Button(b)) => self.sink.set_button(target.device, i, b),
            (InputId::Hat(i), InputValue::Hat(d)) => self.sink.set_hat(target.device, i, d),
            (_, other) => {
                return DispatchOutcome::Rejected(format!(
                    "handler {} returned {:?} for {}",
                    handler, other, target
                ))
            }
        };
        self.written(target, write)
    }

    fn written(&self, target: &OutputTarget, result: Result<(), OutputError>) -> DispatchOutcome {
        match result {
            Ok(()) => DispatchOutcome::Written,
            Err(e) => {
                warn!("Failed to write {}: {}", target, e);
                DispatchOutcome::WriteFailed(e)
            }
        }
    }

    fn log_transition(&self, transition: ModeTransition) -> DispatchOutcome {
        match transition {
            ModeTransition::Changed { from, to } => {
                info!(
                    "Mode changed: {} -> {}",
                    self.profile.mode_name(from),
                    self.profile.mode_name(to)
                );
                DispatchOutcome::ModeChanged { from, to }
            }
            ModeTransition::Unchanged => DispatchOutcome::Ignored,
        }
    }
}

fn relative_target(binding: &Binding) -> Option<OutputTarget> {
    match binding {
        Binding::Remap {
            target,
            mode: RemapMode::Relative { .. },
            ..
        } => Some(*target),
        _ => None,
    }
}
