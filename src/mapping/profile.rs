//! Compiles a [`ProfileConfig`] into runtime mapping state
//!
//! All references are resolved to arena ids here, so nothing in the event
//! loop ever looks anything up by name. Every semantic problem in a profile
//! surfaces as a [`ConfigError`] before activation.

use super::binding::{
    Binding, BindingSlot, MacroId, MergeId, MergeRole, ModeId, OutputTarget, PipelineId,
    RemapMode, VirtualButton,
};
use super::curve::ResponseCurve;
use super::custom::CustomHandlers;
use super::error::ConfigError;
use super::macros::{MacroDefinition, MacroStep};
use super::merge_axis::MergeAxis;
use super::mode_graph::ModeGraph;
use super::sink::OutputCommand;
use super::transform::{Operator, Pipeline};
use crate::controller::device::{DeviceId, InputId, InputKey, InputKind};
use crate::persistence::{
    ActionConfig, AxisMode, BindingConfig, InitialOutputConfig, MacroStepConfig, MergeAxisConfig,
    OperatorConfig, ProfileConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where a merge axis reads from and writes to
#[derive(Debug, Clone, PartialEq)]
pub struct MergeWiring {
    pub lower: InputKey,
    pub upper: InputKey,
    pub target: OutputTarget,
    pub pipeline: Option<PipelineId>,
}

#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub name: String,
    pub graph: ModeGraph,
    pub pipelines: Vec<Pipeline>,
    /// Rest state, cloned into every activation
    pub merges: Vec<MergeAxis>,
    pub merge_wiring: Vec<MergeWiring>,
    pub macros: Vec<Arc<MacroDefinition>>,
    /// Virtual axes written once on activation, before any merge axis
    pub initial_outputs: Vec<(OutputTarget, f64)>,
    pub startup_mode: ModeId,
    pub max_temporary_depth: usize,
}

impl CompiledProfile {
    pub fn compile(config: &ProfileConfig, handlers: &CustomHandlers) -> Result<Self, ConfigError> {
        info!("Compiling profile '{}'", config.name);

        if config.settings.max_temporary_depth == 0 {
            return Err(ConfigError::InvalidTemporaryDepth);
        }

        let devices = device_ids(config)?;
        let initial_outputs = initial_outputs(&config.settings.initial_outputs)?;

        let pipeline_ids = unique_names("pipeline", config.pipelines.iter().map(|p| &p.name))?;
        let pipelines = config
            .pipelines
            .iter()
            .map(|p| {
                let operators = p
                    .operators
                    .iter()
                    .map(compile_operator)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pipeline::new(p.name.clone(), operators))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let merge_ids = unique_names("merge axis", config.merge_axes.iter().map(|m| &m.name))?;
        let mut merges = Vec::with_capacity(config.merge_axes.len());
        let mut merge_wiring = Vec::with_capacity(config.merge_axes.len());
        for merge in &config.merge_axes {
            let (axis, wiring) = compile_merge(config, merge, &devices, &pipeline_ids)?;
            merges.push(axis);
            merge_wiring.push(wiring);
        }

        let macro_ids = unique_names("macro", config.macros.iter().map(|m| &m.name))?;
        let macros = config
            .macros
            .iter()
            .map(|m| {
                let delay = Duration::from_millis(m.delay_ms.unwrap_or(config.settings.default_delay_ms));
                let steps = m.steps.iter().map(compile_step).collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(MacroDefinition {
                    name: m.name.clone(),
                    policy: m.policy,
                    steps,
                    delay,
                }))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let modes: Vec<(&str, Option<&str>)> = config
            .modes
            .iter()
            .map(|m| (m.name.as_str(), m.parent.as_deref()))
            .collect();
        let mut graph = ModeGraph::from_modes(&modes)?;
        let mode_ids = graph_mode_ids(&graph);

        let refs = References {
            graph_modes: &mode_ids,
            pipelines: &pipeline_ids,
            merges: &merge_ids,
            macros: &macro_ids,
            handlers,
            merge_wiring: &merge_wiring,
            merge_names: &config.merge_axes,
        };

        for (index, mode) in config.modes.iter().enumerate() {
            for binding in &mode.bindings {
                let device = *devices
                    .get(binding.device.as_str())
                    .ok_or_else(|| ConfigError::UnknownDevice(binding.device.clone()))?;
                let key = InputKey::new(device, binding.input);
                let slot = compile_binding(binding, key, &refs)?;
                graph.bind(ModeId(index), key, slot)?;
            }
        }

        let startup_mode = match &config.settings.startup_mode {
            Some(name) => graph
                .mode_id(name)
                .ok_or_else(|| ConfigError::UnknownMode(name.clone()))?,
            None => ModeId(0),
        };

        debug!(
            "Profile '{}': {} modes, {} bindings, {} pipelines, {} merge axes, {} macros",
            config.name,
            graph.len(),
            graph.binding_count(),
            pipelines.len(),
            merges.len(),
            macros.len()
        );

        Ok(Self {
            name: config.name.clone(),
            graph,
            pipelines,
            merges,
            merge_wiring,
            macros,
            initial_outputs,
            startup_mode,
            max_temporary_depth: config.settings.max_temporary_depth,
        })
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(id.index())
    }

    pub fn mode_name(&self, id: ModeId) -> &str {
        self.graph.name(id)
    }

    pub fn initial_output(&self, target: &OutputTarget) -> Option<f64> {
        self.initial_outputs
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, value)| *value)
    }
}

struct References<'a> {
    graph_modes: &'a HashMap<String, ModeId>,
    pipelines: &'a HashMap<String, usize>,
    merges: &'a HashMap<String, usize>,
    macros: &'a HashMap<String, usize>,
    handlers: &'a CustomHandlers,
    merge_wiring: &'a [MergeWiring],
    merge_names: &'a [MergeAxisConfig],
}

impl References<'_> {
    fn mode(&self, name: &str) -> Result<ModeId, ConfigError> {
        self.graph_modes
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownMode(name.to_string()))
    }

    fn pipeline(&self, name: &str) -> Result<PipelineId, ConfigError> {
        self.pipelines
            .get(name)
            .map(|i| PipelineId(*i))
            .ok_or_else(|| ConfigError::UnknownPipeline(name.to_string()))
    }
}

fn graph_mode_ids(graph: &ModeGraph) -> HashMap<String, ModeId> {
    graph.modes().map(|(id, name)| (name.to_string(), id)).collect()
}

fn device_ids(config: &ProfileConfig) -> Result<HashMap<&str, DeviceId>, ConfigError> {
    let mut devices = HashMap::new();
    for device in &config.devices {
        if devices
            .insert(device.name.as_str(), DeviceId(device.id))
            .is_some()
        {
            return Err(ConfigError::DuplicateName {
                kind: "device",
                name: device.name.clone(),
            });
        }
        for axis in &device.axes {
            check_index("axis", axis.axis)?;
            check_unit(&format!("{}.axis{}", device.name, axis.axis), axis.initial_value)?;
        }
    }
    Ok(devices)
}

fn initial_outputs(outputs: &[InitialOutputConfig]) -> Result<Vec<(OutputTarget, f64)>, ConfigError> {
    let mut compiled: Vec<(OutputTarget, f64)> = Vec::with_capacity(outputs.len());
    for output in outputs {
        let target = OutputTarget {
            device: output.device,
            input: InputId::Axis(output.axis),
        };
        check_target(&target)?;
        check_unit(&format!("initial output {}", target), output.value)?;
        if compiled.iter().any(|(t, _)| *t == target) {
            return Err(ConfigError::DuplicateName {
                kind: "initial output",
                name: target.to_string(),
            });
        }
        compiled.push((target, output.value));
    }
    Ok(compiled)
}

fn unique_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a String>,
) -> Result<HashMap<String, usize>, ConfigError> {
    let mut ids = HashMap::new();
    for (index, name) in names.enumerate() {
        if ids.insert(name.clone(), index).is_some() {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.clone(),
            });
        }
    }
    Ok(ids)
}

fn check_index(what: &str, index: u8) -> Result<(), ConfigError> {
    if index == 0 {
        Err(ConfigError::ZeroIndex(what.to_string()))
    } else {
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InitialValueOutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

fn check_target(target: &OutputTarget) -> Result<(), ConfigError> {
    if target.device == 0 {
        return Err(ConfigError::ZeroIndex("virtual device".to_string()));
    }
    check_index("virtual output", target.input.index())
}

fn compile_operator(operator: &OperatorConfig) -> Result<Operator, ConfigError> {
    match operator {
        OperatorConfig::DeadZone(dz) => {
            dz.validate()?;
            Ok(Operator::DeadZone(*dz))
        }
        OperatorConfig::ResponseCurve {
            interpolation,
            points,
        } => Ok(Operator::Curve(ResponseCurve::new(*interpolation, points)?)),
        OperatorConfig::Invert => Ok(Operator::Invert),
    }
}

fn compile_merge(
    config: &ProfileConfig,
    merge: &MergeAxisConfig,
    devices: &HashMap<&str, DeviceId>,
    pipelines: &HashMap<String, usize>,
) -> Result<(MergeAxis, MergeWiring), ConfigError> {
    let side = |input: &crate::persistence::MergeInputConfig| -> Result<(InputKey, f64), ConfigError> {
        check_index("axis", input.axis)?;
        let device = *devices
            .get(input.device.as_str())
            .ok_or_else(|| ConfigError::UnknownDevice(input.device.clone()))?;
        let initial = input.initial_value.unwrap_or_else(|| {
            config
                .device(&input.device)
                .map(|d| d.initial_value(input.axis))
                .unwrap_or(0.0)
        });
        Ok((InputKey::new(device, InputId::Axis(input.axis)), initial))
    };

    let (lower, lower_initial) = side(&merge.lower)?;
    let (upper, upper_initial) = side(&merge.upper)?;

    check_target(&merge.target)?;
    if merge.target.input.kind() != InputKind::Axis {
        return Err(ConfigError::InputKindMismatch {
            input: merge.target.to_string(),
            action: format!("merge axis {}", merge.name),
        });
    }

    let pipeline = merge
        .pipeline
        .as_ref()
        .map(|name| {
            pipelines
                .get(name)
                .map(|i| PipelineId(*i))
                .ok_or_else(|| ConfigError::UnknownPipeline(name.clone()))
        })
        .transpose()?;

    let axis = MergeAxis::new(
        merge.name.clone(),
        merge.operation,
        lower_initial,
        upper_initial,
        merge.neutral,
    )?;
    Ok((
        axis,
        MergeWiring {
            lower,
            upper,
            target: merge.target,
            pipeline,
        },
    ))
}

fn compile_step(step: &MacroStepConfig) -> Result<MacroStep, ConfigError> {
    let command = match step {
        MacroStepConfig::Pause { ms } => return Ok(MacroStep::Pause(Duration::from_millis(*ms))),
        MacroStepConfig::Button {
            device,
            button,
            pressed,
        } => {
            check_index("button", *button)?;
            OutputCommand::Button {
                device: *device,
                index: *button,
                pressed: *pressed,
            }
        }
        MacroStepConfig::Axis {
            device,
            axis,
            value,
        } => {
            check_index("axis", *axis)?;
            check_unit(&format!("macro axis {}", axis), *value)?;
            OutputCommand::Axis {
                device: *device,
                index: *axis,
                value: *value,
            }
        }
        MacroStepConfig::Hat {
            device,
            hat,
            direction,
        } => {
            check_index("hat", *hat)?;
            OutputCommand::Hat {
                device: *device,
                index: *hat,
                direction: *direction,
            }
        }
        MacroStepConfig::Key { key, pressed } => OutputCommand::Key {
            key: key.clone(),
            pressed: *pressed,
        },
    };
    if let Some(0) = command.device() {
        return Err(ConfigError::ZeroIndex("virtual device".to_string()));
    }
    Ok(MacroStep::Emit(command))
}

fn compile_binding(
    config: &BindingConfig,
    key: InputKey,
    refs: &References<'_>,
) -> Result<BindingSlot, ConfigError> {
    let source = key.input.kind();
    check_index(&source.to_string(), key.input.index())?;

    let mismatch = |action: &str| ConfigError::InputKindMismatch {
        input: key.input.to_string(),
        action: action.to_string(),
    };

    let virtual_button = config.virtual_button.clone().map(VirtualButton::normalized);
    match (&virtual_button, source) {
        (None, _)
        | (Some(VirtualButton::AxisRange { .. }), InputKind::Axis)
        | (Some(VirtualButton::HatDirections { .. }), InputKind::Hat) => {}
        _ => return Err(mismatch("a virtual button of this kind")),
    }
    // Axes need a virtual button to act as a button, hats and buttons do not
    let button_capable = source != InputKind::Axis || virtual_button.is_some();

    let binding = match &config.action {
        ActionConfig::Remap {
            target,
            pipeline,
            mode,
            axis_scaling,
        } => {
            check_target(target)?;
            let ok = match (source, target.input.kind()) {
                (InputKind::Axis, InputKind::Axis) | (InputKind::Button, InputKind::Axis) => true,
                (_, InputKind::Button) => button_capable,
                (InputKind::Hat, InputKind::Hat) => true,
                _ => false,
            };
            if !ok {
                return Err(mismatch(&format!("remap to {}", target)));
            }
            let pipeline = match pipeline {
                Some(name) if source == InputKind::Axis && target.input.kind() == InputKind::Axis => {
                    Some(refs.pipeline(name)?)
                }
                Some(_) => return Err(mismatch("an axis pipeline")),
                None => None,
            };
            let axis_to_axis = source == InputKind::Axis && target.input.kind() == InputKind::Axis;
            let mode = match (mode, axis_scaling) {
                (AxisMode::Absolute, None) => RemapMode::Absolute,
                (AxisMode::Absolute, Some(_)) => return Err(mismatch("an axis scaling without relative mode")),
                (AxisMode::Relative, _) if !axis_to_axis => return Err(mismatch("a relative remap")),
                (AxisMode::Relative, scaling) => {
                    let rate = scaling.unwrap_or(1.0);
                    if !rate.is_finite() || rate <= 0.0 {
                        return Err(ConfigError::InvalidAxisScaling(rate));
                    }
                    RemapMode::Relative { rate }
                }
            };
            Binding::Remap {
                target: *target,
                pipeline,
                mode,
            }
        }
        ActionConfig::MergeAxis { merge, role } => {
            let index = *refs
                .merges
                .get(merge)
                .ok_or_else(|| ConfigError::UnknownMergeAxis(merge.clone()))?;
            let wiring = &refs.merge_wiring[index];
            let expected = match role {
                MergeRole::Lower => wiring.lower,
                MergeRole::Upper => wiring.upper,
            };
            if expected != key {
                return Err(ConfigError::MergeRoleMismatch {
                    merge: refs.merge_names[index].name.clone(),
                    role: role.to_string(),
                    expected: expected.to_string(),
                });
            }
            Binding::MergeAxis {
                role: *role,
                merge: MergeId(index),
            }
        }
        ActionConfig::Macro { name } => {
            if !button_capable {
                return Err(mismatch("a macro"));
            }
            let index = *refs
                .macros
                .get(name)
                .ok_or_else(|| ConfigError::UnknownMacro(name.clone()))?;
            Binding::Macro(MacroId(index))
        }
        ActionConfig::Custom { handler, target } => {
            if !refs.handlers.contains(handler) {
                return Err(ConfigError::UnknownHandler(handler.clone()));
            }
            if let Some(target) = target {
                check_target(target)?;
            }
            Binding::Custom {
                handler: handler.clone(),
                target: *target,
            }
        }
        ActionConfig::SwitchMode { mode } => {
            if !button_capable {
                return Err(mismatch("a mode switch"));
            }
            Binding::SwitchMode(refs.mode(mode)?)
        }
        ActionConfig::SwitchModePrevious => {
            if !button_capable {
                return Err(mismatch("a mode switch"));
            }
            Binding::SwitchModePrevious
        }
        ActionConfig::SwitchModeTemporary { mode } => {
            if !button_capable {
                return Err(mismatch("a temporary mode switch"));
            }
            Binding::SwitchModeTemporary(refs.mode(mode)?)
        }
    };

    Ok(BindingSlot {
        binding,
        virtual_button,
    })
}

/// Modes reachable from the startup mode through switch bindings
pub fn reachable_modes(profile: &CompiledProfile) -> HashSet<ModeId> {
    let mut seen = HashSet::from([profile.startup_mode]);
    let mut stack = vec![profile.startup_mode];
    while let Some(mode) = stack.pop() {
        for ancestor in profile.graph.ancestors(mode) {
            seen.insert(ancestor);
            for (_, slot) in profile.graph.bindings_of(ancestor) {
                if let Binding::SwitchMode(target) | Binding::SwitchModeTemporary(target) =
                    slot.binding
                {
                    if seen.insert(target) {
                        stack.push(target);
                    }
                }
            }
        }
    }
    seen
}
