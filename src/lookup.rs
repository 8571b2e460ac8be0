//! Entity name resolution for report labels.
//!
//! Hospital codes in an extract are opaque keys. Reports label them through an
//! [`EntityLookup`]; the resolver behind it may be slow (a remote catalogue),
//! so [`CachedLookup`] memoizes answers, including "unknown".

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};

use crate::io_utils;

/// Resolves an entity name for a key.
pub trait EntityLookup: Send + Sync {
    fn resolve(&self, key: &str) -> Option<String>;

    /// `"name (key)"` when the key resolves, the bare key otherwise.
    fn label(&self, key: &str) -> String {
        match self.resolve(key) {
            Some(name) => format!("{name} ({key})"),
            None => key.to_string(),
        }
    }
}

/// Fixed key → name map.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    names: BTreeMap<String, String>,
}

impl StaticLookup {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: entries
                .into_iter()
                .map(|(key, name)| (key.into(), name.into()))
                .collect(),
        }
    }

    /// Reads a YAML mapping of key to name.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = io_utils::read_utf8_source(path)?;
        let names: BTreeMap<String, String> = serde_yaml::from_str(&text)
            .with_context(|| format!("Parsing entity names from {path:?}"))?;
        Ok(Self { names })
    }
}

impl EntityLookup for StaticLookup {
    fn resolve(&self, key: &str) -> Option<String> {
        self.names.get(key.trim()).cloned()
    }
}

/// Memoizing wrapper: each key reaches the inner lookup at most once.
#[derive(Debug)]
pub struct CachedLookup<L> {
    inner: L,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl<L: EntityLookup> CachedLookup<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: EntityLookup> EntityLookup for CachedLookup<L> {
    fn resolve(&self, key: &str) -> Option<String> {
        let Ok(mut cache) = self.cache.lock() else {
            // Poisoned cache: answer without memoizing.
            return self.inner.resolve(key);
        };
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.inner.resolve(key))
            .clone()
    }
}
