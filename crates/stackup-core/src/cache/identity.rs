//! Canonical action identities.
//!
//! An identity is the action name plus its ordered positional arguments and
//! its keyword arguments. Keyword arguments are kept sorted, so the encoded
//! form depends only on the values, never on the order a caller supplied them.

use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct ActionId {
    name: String,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
    /// Positions in `args` that are hidden when the identity is displayed.
    secret: BTreeSet<usize>,
}

/// The durable form. Field order is fixed by this struct.
#[derive(Serialize)]
struct Canonical<'a> {
    name: &'a str,
    args: &'a [String],
    kwargs: &'a BTreeMap<String, String>,
}

impl ActionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            secret: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// A positional argument that takes part in the identity but is never
    /// printed (passwords).
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.secret.insert(self.args.len());
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key bytes stored in the cache.
    pub fn to_key(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Canonical {
            name: &self.name,
            args: &self.args,
            kwargs: &self.kwargs,
        })?)
    }
}

impl PartialEq for ActionId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.args == other.args && self.kwargs == other.kwargs
    }
}

impl Eq for ActionId {}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if self.secret.contains(&i) {
                    "<redacted>".to_string()
                } else {
                    a.clone()
                }
            })
            .collect();
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")));
        write!(f, "{}({})", self.name, parts.join(", "))
    }
}
