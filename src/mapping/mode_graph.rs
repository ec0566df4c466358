//! Hierarchical modes with single-parent inheritance
//!
//! Modes live in a flat arena and reference their parent by index. A
//! binding lookup walks from the active mode towards the root and stops at
//! the first mode that binds the requested input, so child modes only need
//! to define what they change.
//!
//! The inheritance graph is checked for cycles when it is built; every
//! later walk therefore terminates after at most `max_depth` steps.

use super::binding::{BindingId, BindingSlot, ModeId};
use super::error::ConfigError;
use crate::controller::device::InputKey;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct ModeNode {
    name: String,
    parent: Option<ModeId>,
    bindings: HashMap<InputKey, BindingId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    InProgress,
    Done,
}

#[derive(Debug, Clone)]
pub struct ModeGraph {
    nodes: Vec<ModeNode>,
    by_name: HashMap<String, ModeId>,
    slots: Vec<BindingSlot>,
    max_depth: usize,
}

impl ModeGraph {
    /// Builds the arena from `(name, parent)` pairs in declaration order
    pub fn from_modes<N, P>(modes: &[(N, Option<P>)]) -> Result<Self, ConfigError>
    where
        N: AsRef<str>,
        P: AsRef<str>,
    {
        if modes.is_empty() {
            return Err(ConfigError::NoModes);
        }

        let mut by_name = HashMap::with_capacity(modes.len());
        for (index, (name, _)) in modes.iter().enumerate() {
            let name = name.as_ref().to_string();
            if by_name.insert(name.clone(), ModeId(index)).is_some() {
                return Err(ConfigError::DuplicateMode(name));
            }
        }

        let mut nodes = Vec::with_capacity(modes.len());
        for (name, parent) in modes {
            let parent = match parent {
                Some(p) => Some(*by_name.get(p.as_ref()).ok_or_else(|| {
                    ConfigError::UnknownParent {
                        mode: name.as_ref().to_string(),
                        parent: p.as_ref().to_string(),
                    }
                })?),
                None => None,
            };
            nodes.push(ModeNode {
                name: name.as_ref().to_string(),
                parent,
                bindings: HashMap::new(),
            });
        }

        check_acyclic(&nodes)?;

        let mut graph = Self {
            nodes,
            by_name,
            slots: Vec::new(),
            max_depth: 0,
        };
        graph.max_depth = (0..graph.nodes.len())
            .map(|i| graph.depth(ModeId(i)))
            .max()
            .unwrap_or(0);
        debug!(
            "Mode graph built: {} modes, max depth {}",
            graph.nodes.len(),
            graph.max_depth
        );
        Ok(graph)
    }

    /// Adds a binding to `mode`; a second binding for the same input in the same mode is rejected
    pub fn bind(
        &mut self,
        mode: ModeId,
        key: InputKey,
        slot: BindingSlot,
    ) -> Result<BindingId, ConfigError> {
        let id = BindingId(self.slots.len());
        let node = self
            .nodes
            .get_mut(mode.index())
            .ok_or_else(|| ConfigError::UnknownMode(mode.to_string()))?;
        if node.bindings.contains_key(&key) {
            return Err(ConfigError::DuplicateBinding {
                mode: node.name.clone(),
                device: key.device.to_string(),
                input: key.input.to_string(),
            });
        }
        node.bindings.insert(key, id);
        self.slots.push(slot);
        Ok(id)
    }

    /// First binding for `key` on the path from `active` to its root
    pub fn resolve(&self, active: ModeId, key: &InputKey) -> Option<(BindingId, &BindingSlot)> {
        self.ancestors(active).find_map(|mode| {
            let id = *self.nodes[mode.index()].bindings.get(key)?;
            Some((id, &self.slots[id.index()]))
        })
    }

    /// `mode` itself followed by each parent up to the root
    pub fn ancestors(&self, mode: ModeId) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: (mode.index() < self.nodes.len()).then_some(mode),
            remaining: self.nodes.len(),
        }
    }

    /// Number of modes on the path to the root, including `mode`
    pub fn depth(&self, mode: ModeId) -> usize {
        self.ancestors(mode).count()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn mode_id(&self, name: &str) -> Option<ModeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, mode: ModeId) -> &str {
        self.nodes
            .get(mode.index())
            .map(|n| n.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn parent(&self, mode: ModeId) -> Option<ModeId> {
        self.nodes.get(mode.index()).and_then(|n| n.parent)
    }

    pub fn slot(&self, binding: BindingId) -> Option<&BindingSlot> {
        self.slots.get(binding.index())
    }

    /// Bindings declared directly on `mode`, inherited ones excluded
    pub fn bindings_of(&self, mode: ModeId) -> impl Iterator<Item = (&InputKey, &BindingSlot)> {
        self.nodes
            .get(mode.index())
            .into_iter()
            .flat_map(|node| node.bindings.iter())
            .map(|(key, id)| (key, &self.slots[id.index()]))
    }

    pub fn binding_count(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn modes(&self) -> impl Iterator<Item = (ModeId, &str)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (ModeId(i), n.name.as_str()))
    }
}

pub struct Ancestors<'a> {
    graph: &'a ModeGraph,
    next: Option<ModeId>,
    remaining: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = ModeId;

    fn next(&mut self) -> Option<ModeId> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = self.graph.nodes[current.index()].parent;
        Some(current)
    }
}

fn check_acyclic(nodes: &[ModeNode]) -> Result<(), ConfigError> {
    let mut state = vec![Visit::New; nodes.len()];

    for start in 0..nodes.len() {
        let mut path = Vec::new();
        let mut cursor = Some(start);

        while let Some(id) = cursor {
            match state[id] {
                Visit::Done => break,
                Visit::InProgress => {
                    let begin = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[begin..].iter().map(|i: &usize| nodes[*i].name.clone()).collect();
                    cycle.push(nodes[id].name.clone());
                    return Err(ConfigError::CyclicInheritance(cycle));
                }
                Visit::New => {
                    state[id] = Visit::InProgress;
                    path.push(id);
                    cursor = nodes[id].parent.map(ModeId::index);
                }
            }
        }

        for id in path {
            state[id] = Visit::Done;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::device::{DeviceId, InputId};
    use crate::mapping::binding::Binding;

    fn key(input: InputId) -> InputKey {
        InputKey::new(DeviceId::from_u128(1), input)
    }

    fn graph(modes: &[(&str, Option<&str>)]) -> Result<ModeGraph, ConfigError> {
        ModeGraph::from_modes(modes)
    }

    #[test]
    fn child_inherits_parent_bindings() {
        let mut g = graph(&[("Base", None), ("Flight", Some("Base"))]).unwrap();
        let base = g.mode_id("Base").unwrap();
        let flight = g.mode_id("Flight").unwrap();

        let axis = g
            .bind(base, key(InputId::Axis(1)), BindingSlot::new(Binding::SwitchModePrevious))
            .unwrap();
        let button = g
            .bind(flight, key(InputId::Button(1)), BindingSlot::new(Binding::SwitchMode(base)))
            .unwrap();

        assert_eq!(g.resolve(flight, &key(InputId::Axis(1))).map(|r| r.0), Some(axis));
        assert_eq!(g.resolve(flight, &key(InputId::Button(1))).map(|r| r.0), Some(button));
        assert!(g.resolve(base, &key(InputId::Button(1))).is_none());
        assert!(g.resolve(flight, &key(InputId::Hat(1))).is_none());
    }

    #[test]
    fn child_binding_shadows_parent() {
        let mut g = graph(&[("Base", None), ("Child", Some("Base"))]).unwrap();
        let base = g.mode_id("Base").unwrap();
        let child = g.mode_id("Child").unwrap();
        g.bind(base, key(InputId::Button(2)), BindingSlot::new(Binding::SwitchModePrevious))
            .unwrap();
        let shadow = g
            .bind(child, key(InputId::Button(2)), BindingSlot::new(Binding::SwitchMode(base)))
            .unwrap();
        assert_eq!(g.resolve(child, &key(InputId::Button(2))).map(|r| r.0), Some(shadow));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = graph(&[("A", Some("C")), ("B", Some("A")), ("C", Some("B"))]).unwrap_err();
        match err {
            ConfigError::CyclicInheritance(names) => {
                assert_eq!(names.first(), names.last());
                assert_eq!(names.len(), 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            graph(&[("Self", Some("Self"))]),
            Err(ConfigError::CyclicInheritance(_))
        ));
    }

    #[test]
    fn invalid_mode_lists() {
        assert_eq!(graph(&[]).unwrap_err(), ConfigError::NoModes);
        assert_eq!(
            graph(&[("A", None), ("A", None)]).unwrap_err(),
            ConfigError::DuplicateMode("A".to_string())
        );
        assert!(matches!(
            graph(&[("A", Some("Missing"))]),
            Err(ConfigError::UnknownParent { .. })
        ));
    }

    #[test]
    fn duplicate_binding_in_one_mode_is_rejected() {
        let mut g = graph(&[("Base", None)]).unwrap();
        let base = ModeId(0);
        g.bind(base, key(InputId::Button(1)), BindingSlot::new(Binding::SwitchModePrevious))
            .unwrap();
        assert!(matches!(
            g.bind(base, key(InputId::Button(1)), BindingSlot::new(Binding::SwitchModePrevious)),
            Err(ConfigError::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn depth_counts_the_whole_chain() {
        let g = graph(&[("A", None), ("B", Some("A")), ("C", Some("B")), ("D", None)]).unwrap();
        assert_eq!(g.depth(ModeId(2)), 3);
        assert_eq!(g.depth(ModeId(3)), 1);
        assert_eq!(g.max_depth(), 3);
        assert_eq!(
            g.ancestors(ModeId(2)).collect::<Vec<_>>(),
            vec![ModeId(2), ModeId(1), ModeId(0)]
        );
        assert_eq!(g.ancestors(ModeId(42)).count(), 0);
    }
}
