//! Active mode tracking
//!
//! Permanent switches remember the mode they left so `switch_previous` can
//! return to it. Temporary switches are held on a bounded stack keyed by the
//! input that triggered them; releasing that input restores the mode that
//! was active when it was pressed.

use super::binding::ModeId;
use super::error::MappingError;
use crate::controller::device::InputKey;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    Changed { from: ModeId, to: ModeId },
    Unchanged,
}

impl ModeTransition {
    fn between(from: ModeId, to: ModeId) -> Self {
        if from == to {
            ModeTransition::Unchanged
        } else {
            ModeTransition::Changed { from, to }
        }
    }
}

#[derive(Debug, Clone)]
struct TemporarySwitch {
    trigger: InputKey,
    restore: ModeId,
}

#[derive(Debug, Clone)]
pub struct ModeSwitcher {
    active: ModeId,
    previous: Option<ModeId>,
    temporary: Vec<TemporarySwitch>,
    max_depth: usize,
}

impl ModeSwitcher {
    pub fn new(startup: ModeId, max_temporary_depth: usize) -> Self {
        Self {
            active: startup,
            previous: None,
            temporary: Vec::new(),
            max_depth: max_temporary_depth.max(1),
        }
    }

    pub fn active(&self) -> ModeId {
        self.active
    }

    pub fn previous(&self) -> Option<ModeId> {
        self.previous
    }

    pub fn temporary_depth(&self) -> usize {
        self.temporary.len()
    }

    pub fn max_temporary_depth(&self) -> usize {
        self.max_depth
    }

    /// Permanent switch; pending temporary switches are abandoned
    pub fn switch_to(&mut self, target: ModeId) -> ModeTransition {
        if !self.temporary.is_empty() {
            debug!(
                "Dropping {} temporary mode switches",
                self.temporary.len()
            );
            self.temporary.clear();
        }
        let from = self.active;
        if from != target {
            self.previous = Some(from);
            self.active = target;
        }
        ModeTransition::between(from, target)
    }

    pub fn switch_previous(&mut self) -> ModeTransition {
        match self.previous {
            Some(previous) => self.switch_to(previous),
            None => {
                debug!("No previous mode recorded");
                ModeTransition::Unchanged
            }
        }
    }

    /// Enters `target` until `trigger` is released
    ///
    /// A repeated push from a trigger that is already held is a no-op.
    pub fn push_temporary(
        &mut self,
        trigger: InputKey,
        target: ModeId,
    ) -> Result<ModeTransition, MappingError> {
        if self.is_temporary_trigger(&trigger) {
            return Ok(ModeTransition::Unchanged);
        }
        if self.temporary.len() >= self.max_depth {
            warn!(
                "Ignoring temporary switch from {}: stack depth {} reached",
                trigger, self.max_depth
            );
            return Err(MappingError::ModeStackOverflow {
                depth: self.max_depth,
            });
        }
        let from = self.active;
        self.temporary.push(TemporarySwitch {
            trigger,
            restore: from,
        });
        self.active = target;
        Ok(ModeTransition::between(from, target))
    }

    /// Pops the switch held by `trigger` and every switch pushed after it
    ///
    /// Returns `None` if `trigger` holds no temporary switch.
    pub fn release_temporary(&mut self, trigger: &InputKey) -> Option<ModeTransition> {
        let position = self.temporary.iter().position(|t| t.trigger == *trigger)?;
        let restore = self.temporary[position].restore;
        if position + 1 < self.temporary.len() {
            debug!(
                "Releasing {} nested temporary switches above {}",
                self.temporary.len() - position - 1,
                trigger
            );
        }
        self.temporary.truncate(position);
        let from = self.active;
        self.active = restore;
        Some(ModeTransition::between(from, restore))
    }

    pub fn is_temporary_trigger(&self, key: &InputKey) -> bool {
        self.temporary.iter().any(|t| t.trigger == *key)
    }

    pub fn temporary_triggers(&self) -> impl Iterator<Item = &InputKey> {
        self.temporary.iter().map(|t| &t.trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::device::{DeviceId, InputId};

    fn trigger(button: u8) -> InputKey {
        InputKey::new(DeviceId::from_u128(9), InputId::Button(button))
    }

    #[test]
    fn permanent_switch_records_previous() {
        let mut s = ModeSwitcher::new(ModeId(0), 4);
        assert_eq!(
            s.switch_to(ModeId(1)),
            ModeTransition::Changed {
                from: ModeId(0),
                to: ModeId(1)
            }
        );
        assert_eq!(s.switch_to(ModeId(1)), ModeTransition::Unchanged);
        assert_eq!(s.previous(), Some(ModeId(0)));
        s.switch_previous();
        assert_eq!(s.active(), ModeId(0));
        assert_eq!(s.previous(), Some(ModeId(1)));
    }

    #[test]
    fn switch_previous_without_history_is_noop() {
        let mut s = ModeSwitcher::new(ModeId(3), 4);
        assert_eq!(s.switch_previous(), ModeTransition::Unchanged);
        assert_eq!(s.active(), ModeId(3));
    }

    #[test]
    fn releasing_outer_trigger_unwinds_nested_switches() {
        let mut s = ModeSwitcher::new(ModeId(0), 4);
        s.push_temporary(trigger(1), ModeId(1)).unwrap();
        s.push_temporary(trigger(2), ModeId(2)).unwrap();
        assert_eq!(s.temporary_depth(), 2);

        s.release_temporary(&trigger(1));
        assert_eq!(s.active(), ModeId(0));
        assert_eq!(s.temporary_depth(), 0);
        assert_eq!(s.release_temporary(&trigger(2)), None);
    }

    #[test]
    fn overflow_is_reported_and_ignored() {
        let mut s = ModeSwitcher::new(ModeId(0), 1);
        s.push_temporary(trigger(1), ModeId(1)).unwrap();
        assert!(matches!(
            s.push_temporary(trigger(2), ModeId(2)),
            Err(MappingError::ModeStackOverflow { depth: 1 })
        ));
        assert_eq!(s.active(), ModeId(1));
        s.release_temporary(&trigger(1));
        assert_eq!(s.active(), ModeId(0));
    }

    #[test]
    fn permanent_switch_clears_temporary_stack() {
        let mut s = ModeSwitcher::new(ModeId(0), 4);
        s.push_temporary(trigger(1), ModeId(1)).unwrap();
        s.switch_to(ModeId(2));
        assert!(!s.is_temporary_trigger(&trigger(1)));
        assert_eq!(s.release_temporary(&trigger(1)), None);
        assert_eq!(s.active(), ModeId(2));
        assert_eq!(s.previous(), Some(ModeId(1)));
    }
}
