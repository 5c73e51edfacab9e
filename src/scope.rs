//! The scope chain threaded through every traversal.
//!
//! A [`Scope`] is an immutable-per-level key/value environment. Nodes that
//! introduce bindings (the scene root, `bindings` nodes) create a child scope
//! on the traversal call stack; everything below them resolves lookups
//! local-first and then walks up through the parent chain. Scopes never
//! outlive the visit that created them.
//!
//! The `fixed` flag is the purity bit the whole memoization story hangs off:
//! a scope is fixed only if it was created from constant bindings *and* its
//! parent is fixed. A dynamic provider anywhere up the chain poisons fixity
//! for everything beneath it, which is exactly what forces downstream caches
//! to recompute.

use glam::Vec3;
use std::collections::HashMap;

/// A value that can be bound in a scope and read by dynamic node providers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    Vec3(Vec3),
}

impl Value {
    /// Returns the value as an `f64`, if it is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as an `f32`, if it is numeric.
    pub fn as_f32(&self) -> Option<f32> {
        self.as_number().map(|n| n as f32)
    }

    /// Returns the value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a [`Vec3`], if it is one.
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vec3(v)
    }
}

/// One level of the lookup environment handed to dynamic node providers.
///
/// Lookup is constant-time locally and O(depth) through the parent chain.
/// `put` only ever touches the local map; parent levels are immutable from
/// here.
pub struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    fixed: bool,
    entries: HashMap<String, Value>,
}

impl<'a> Scope<'a> {
    /// Creates a root scope with no parent.
    pub fn root(fixed: bool) -> Self {
        Self {
            parent: None,
            fixed,
            entries: HashMap::new(),
        }
    }

    /// Creates a child scope.
    ///
    /// The child is fixed only if `fixed` is true *and* the parent is fixed —
    /// constancy cannot be reintroduced below a dynamic ancestor.
    pub fn child(parent: &'a Scope<'a>, fixed: bool) -> Self {
        Self {
            parent: Some(parent),
            fixed: fixed && parent.fixed,
            entries: HashMap::new(),
        }
    }

    /// Binds `key` in this scope level, shadowing any parent binding.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Looks up `key` locally first, then up through the parent chain.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.get(key)),
        }
    }

    /// Whether every level from here to the root holds constant bindings.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_lookup_wins_over_parent() {
        let mut parent = Scope::root(true);
        parent.put("angle", 10.0);
        parent.put("speed", 2.0);

        let mut child = Scope::child(&parent, true);
        child.put("angle", 45.0);

        assert_eq!(child.get("angle").and_then(Value::as_number), Some(45.0));
        assert_eq!(child.get("speed").and_then(Value::as_number), Some(2.0));
        assert_eq!(child.get("missing"), None);
    }

    #[test]
    fn fixity_is_conjunctive_down_the_chain() {
        let dynamic_root = Scope::root(false);
        let child = Scope::child(&dynamic_root, true);
        assert!(!child.is_fixed());

        let fixed_root = Scope::root(true);
        let child = Scope::child(&fixed_root, true);
        assert!(child.is_fixed());

        let grandchild = Scope::child(&child, false);
        assert!(!grandchild.is_fixed());
    }
}
