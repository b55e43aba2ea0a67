//! Deduplication of logical breakpoints onto native breakpoints.
//!
//! Several logical breakpoints (set by different users, for example) often target the
//! same line. The engine tracks one native breakpoint per resolved location, logical
//! breakpoints hold a reference to it. The native breakpoint is removed together with
//! its last reference.

use crate::agent::breakpoint::BreakpointId;
use crate::agent::engine::{EngineError, ExecutionEngine, NativeBreakpointId};
use crate::agent::location::ResolvedLocation;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Canonical key of a resolved location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocationKey(String);

impl LocationKey {
    /// Create a key, `condition` is a part of the key when the engine evaluates it.
    pub fn new(location: &ResolvedLocation, condition: Option<&str>) -> Self {
        match condition {
            None => Self(location.to_string()),
            Some(condition) => Self(format!("{location}:{condition}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LocationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference of a logical breakpoint to a native one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub native: NativeBreakpointId,
    pub key: LocationKey,
}

struct Located {
    native: NativeBreakpointId,
    logical: SmallVec<[BreakpointId; 2]>,
}

#[derive(Default)]
pub struct BreakpointRegistry {
    by_location: HashMap<LocationKey, Located>,
    by_native: HashMap<NativeBreakpointId, LocationKey>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a logical breakpoint to a native breakpoint at `location`. Native breakpoint
    /// is set if no other logical breakpoint uses this location.
    ///
    /// # Arguments
    ///
    /// * `engine`: execution engine
    /// * `id`: logical breakpoint id
    /// * `location`: resolved location
    /// * `condition`: breakpoint condition, forwarded to the engine only if it supports
    ///   native conditions
    pub fn attach<E: ExecutionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        id: &str,
        location: &ResolvedLocation,
        condition: Option<&str>,
    ) -> Result<Attachment, EngineError> {
        let condition = condition.filter(|_| engine.supports_native_conditions());
        let key = LocationKey::new(location, condition);

        if let Some(located) = self.by_location.get_mut(&key) {
            if !located.logical.iter().any(|logical| logical == id) {
                located.logical.push(id.to_string());
            }
            return Ok(Attachment {
                native: located.native.clone(),
                key,
            });
        }

        let native = engine.set_breakpoint(
            &location.file,
            location.line.saturating_sub(1),
            location.column.saturating_sub(1),
            condition,
        )?;
        crate::lb_debug!(target: "agent", "native breakpoint {native} set at {key}");

        self.by_native.insert(native.clone(), key.clone());
        self.by_location.insert(
            key.clone(),
            Located {
                native: native.clone(),
                logical: SmallVec::from_elem(id.to_string(), 1),
            },
        );
        Ok(Attachment { native, key })
    }

    /// Detach a logical breakpoint. Return true if the native breakpoint is not
    /// referenced anymore and was removed from the engine.
    ///
    /// Registry records are dropped before the engine is asked for removal, so an engine
    /// error leaves the registry consistent.
    pub fn detach<E: ExecutionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        id: &str,
        attachment: &Attachment,
    ) -> Result<bool, EngineError> {
        let Some(located) = self.by_location.get_mut(&attachment.key) else {
            return Ok(false);
        };
        located.logical.retain(|logical| logical != id);
        if !located.logical.is_empty() {
            return Ok(false);
        }

        self.by_location.remove(&attachment.key);
        self.by_native.remove(&attachment.native);
        engine.remove_breakpoint(&attachment.native)?;
        crate::lb_debug!(target: "agent", "native breakpoint {} removed", attachment.native);
        Ok(true)
    }

    /// Logical breakpoints attached to a native breakpoint.
    pub fn logical_ids(&self, native: &NativeBreakpointId) -> &[BreakpointId] {
        self.by_native
            .get(native)
            .and_then(|key| self.by_location.get(key))
            .map(|located| located.logical.as_slice())
            .unwrap_or_default()
    }

    pub fn native_count(&self) -> usize {
        self.by_native.len()
    }

    /// Forget all native breakpoints, used when engine state is lost.
    pub fn reset(&mut self) {
        self.by_location.clear();
        self.by_native.clear();
    }
}
