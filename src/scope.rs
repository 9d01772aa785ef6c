//! Variable scope shared across snippet evaluations
//!
//! A [`Scope`] is the global namespace a snippet reads and writes. When scope
//! retention is enabled a session keeps one scope in a [`ScopeSlot`]; an
//! evaluation checks it out for its whole duration and gives it back on
//! completion. A second evaluation arriving while the scope is checked out
//! gets [`ScopeBusy`] instead of a shared mutable view.

use crate::executor::Val;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/* ===================== Scope ===================== */

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    globals: BTreeMap<String, Val>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.globals.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Val> {
        self.globals.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Bind `name`, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: Val) -> Option<Val> {
        self.globals.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Val> {
        self.globals.remove(name)
    }

    /// Bind every pair, overwriting existing names
    pub fn update<I, K>(&mut self, bindings: I)
    where
        I: IntoIterator<Item = (K, Val)>,
        K: Into<String>,
    {
        for (name, value) in bindings {
            self.globals.insert(name.into(), value);
        }
    }

    /// Remove every binding whose name and value both still match `bindings`
    ///
    /// Names the snippet rebound to a different value are kept.
    pub fn clear_intersection(&mut self, bindings: &BTreeMap<String, Val>) {
        for (name, value) in bindings {
            if self.globals.get(name) == Some(value) {
                self.globals.remove(name);
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Val)> {
        self.globals.iter()
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

/* ===================== Retained Scope Slot ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the retained scope is in use by another evaluation")]
pub struct ScopeBusy;

#[derive(Debug)]
enum SlotState {
    Idle(Scope),
    Leased,
}

/// Holder of a retained scope that grants exclusive checkouts
#[derive(Debug, Clone)]
pub struct ScopeSlot {
    state: Arc<Mutex<SlotState>>,
}

impl Default for ScopeSlot {
    fn default() -> Self {
        Self::new(Scope::new())
    }
}

impl ScopeSlot {
    pub fn new(scope: Scope) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Idle(scope))),
        }
    }

    /// Take exclusive ownership of the scope until the lease is dropped
    pub fn checkout(&self) -> Result<ScopeLease, ScopeBusy> {
        let mut state = lock(&self.state);
        match std::mem::replace(&mut *state, SlotState::Leased) {
            SlotState::Idle(scope) => Ok(ScopeLease {
                state: Arc::clone(&self.state),
                held: Some(scope),
            }),
            SlotState::Leased => Err(ScopeBusy),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(*lock(&self.state), SlotState::Leased)
    }

    /// Replace the retained scope with an empty one
    pub fn reset(&self) -> Result<(), ScopeBusy> {
        let mut state = lock(&self.state);
        match &mut *state {
            SlotState::Idle(scope) => {
                *scope = Scope::new();
                Ok(())
            }
            SlotState::Leased => Err(ScopeBusy),
        }
    }
}

/// Exclusive checkout of a retained scope
///
/// Dropping the lease returns whatever scope it holds to the slot. A lease
/// whose scope was taken and never restored returns an empty scope.
#[derive(Debug)]
pub struct ScopeLease {
    state: Arc<Mutex<SlotState>>,
    held: Option<Scope>,
}

impl ScopeLease {
    /// Move the scope out of the lease so it can be handed to an execution
    pub fn take(&mut self) -> Scope {
        self.held.take().unwrap_or_default()
    }

    /// Give the (possibly modified) scope back
    pub fn restore(mut self, scope: Scope) {
        self.held = Some(scope);
    }
}

impl Drop for ScopeLease {
    fn drop(&mut self) {
        let scope = self.held.take().unwrap_or_default();
        *lock(&self.state) = SlotState::Idle(scope);
    }
}

fn lock(state: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
