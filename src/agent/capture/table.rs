//! Variable table: an append-only arena of composite values discovered during one capture.
//!
//! Variables reference composite values by index. A live object gets its index once
//! (identity memoization), so shared and cyclic references become repeated indices.

use crate::agent::breakpoint::{Reference, StatusMessage, Variable};
use crate::agent::engine::ObjectId;
use crate::agent::format;
use std::collections::HashMap;

pub const BUFFER_FULL_INDEX: usize = 0;
pub const NATIVE_PROPERTY_INDEX: usize = 1;
pub const GETTER_PROPERTY_INDEX: usize = 2;
pub const FRAME_DEPTH_INDEX: usize = 3;
/// Number of reserved sentinel slots at the table start.
pub const SENTINEL_COUNT: usize = 4;

enum Slot {
    Pending { object: ObjectId, description: String },
    Resolved(Variable),
}

pub struct VariableTable {
    slots: Vec<Slot>,
    memo: HashMap<ObjectId, usize>,
}

impl VariableTable {
    /// Create a table with sentinels at indices `0..SENTINEL_COUNT`.
    pub fn new(max_expand_frames: usize) -> Self {
        let sentinel = |refers_to, text: String| {
            Slot::Resolved(Variable::default().with_status(StatusMessage::error(refers_to, text)))
        };
        Self {
            slots: vec![
                sentinel(Reference::VariableValue, format::BUFFER_FULL.to_string()),
                sentinel(Reference::VariableValue, format::NATIVE_PROPERTY.to_string()),
                sentinel(Reference::VariableValue, format::GETTER_PROPERTY.to_string()),
                sentinel(
                    Reference::VariableName,
                    format::frame_depth_limit(max_expand_frames),
                ),
            ],
            memo: HashMap::new(),
        }
    }

    /// Return index of a live object, the object is queued for resolution if it is
    /// seen for the first time.
    pub fn intern(&mut self, object: ObjectId, description: &str) -> usize {
        if let Some(&idx) = self.memo.get(&object) {
            return idx;
        }
        let idx = self.slots.len();
        self.slots.push(Slot::Pending {
            object,
            description: description.to_string(),
        });
        self.memo.insert(object, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Object queued at `idx`, `None` if slot is resolved or not exists.
    pub fn pending(&self, idx: usize) -> Option<(ObjectId, String)> {
        match self.slots.get(idx)? {
            Slot::Pending {
                object,
                description,
            } => Some((*object, description.clone())),
            Slot::Resolved(_) => None,
        }
    }

    pub fn resolve(&mut self, idx: usize, variable: Variable) {
        if idx >= SENTINEL_COUNT {
            if let Some(slot) = self.slots.get_mut(idx) {
                *slot = Slot::Resolved(variable);
            }
        }
    }

    /// Drop all slots starting from `len`, sentinels are never dropped.
    pub fn truncate(&mut self, len: usize) {
        let len = len.max(SENTINEL_COUNT);
        self.slots.truncate(len);
        self.memo.retain(|_, idx| *idx < len);
    }

    /// Resolved variables of the table.
    pub fn variables_mut(&mut self) -> impl Iterator<Item = &mut Variable> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Resolved(var) => Some(var),
            Slot::Pending { .. } => None,
        })
    }

    /// Finish the table. Slots that are still pending become bare descriptions.
    pub fn into_variables(self) -> Vec<Variable> {
        self.slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Resolved(var) => var,
                Slot::Pending { description, .. } => Variable::default().with_value(description),
            })
            .collect()
    }
}
