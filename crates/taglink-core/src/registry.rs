// ── Tag registry ──
//
// Owns the tag handles of one endpoint, keyed by program-qualified name.
// Insertion order is preserved so groups and snapshots read in the order
// tags were configured. Every mutation bumps a version the scan loop
// watches to know when its tag group must be rebuilt.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use taglink_api::{DataType, TagAddress, TagValue};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::tag::{validate_program_name, validate_tag_name};
use crate::model::{Tag, TagHandle};

/// One entry of a tag table, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    /// Owning program. `None` or empty means controller scope.
    #[serde(default)]
    pub program: Option<String>,
    pub name: String,
    /// Declared type; `None` lets the controller decide.
    #[serde(default, rename = "type")]
    pub data_type: Option<DataType>,
}

impl TagDefinition {
    pub fn new(program: Option<&str>, name: &str, data_type: Option<DataType>) -> Self {
        Self {
            program: program.map(str::to_owned),
            name: name.to_owned(),
            data_type,
        }
    }
}

/// An entry `register_table` refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTag {
    pub definition: TagDefinition,
    pub error: CoreError,
}

/// Outcome of registering a whole tag table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Keys registered, in table order. A key appears once even if the
    /// table defined it twice.
    pub registered: Vec<String>,
    pub skipped: Vec<SkippedTag>,
}

impl RegistrationReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// The set of tags known to one endpoint.
pub struct TagRegistry {
    tags: RwLock<IndexMap<String, TagHandle>>,
    version: watch::Sender<u64>,
}

impl TagRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            tags: RwLock::new(IndexMap::new()),
            version,
        }
    }

    /// Build a registry from a table, skipping invalid entries.
    pub fn from_table<I>(definitions: I) -> (Self, RegistrationReport)
    where
        I: IntoIterator<Item = TagDefinition>,
    {
        let registry = Self::new();
        let report = registry.register_table(definitions);
        (registry, report)
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register one tag. A later registration under the same key replaces
    /// the earlier handle.
    pub fn register(
        &self,
        program: Option<&str>,
        name: &str,
        data_type: Option<DataType>,
    ) -> Result<TagHandle, CoreError> {
        let program = program.filter(|p| !p.is_empty());
        let invalid = |reason: String| CoreError::InvalidTagName {
            name: match program {
                Some(p) => format!("{p}:{name}"),
                None => name.to_owned(),
            },
            reason,
        };
        if let Some(p) = program {
            validate_program_name(p).map_err(|reason| invalid(format!("program {reason}")))?;
        }
        validate_tag_name(name).map_err(invalid)?;

        let tag = Arc::new(Tag::new(TagAddress::new(program, name, data_type)));
        let replaced = self
            .tags
            .write()
            .insert(tag.key().to_owned(), Arc::clone(&tag));
        if replaced.is_some() {
            debug!(key = tag.key(), "tag redefined");
        }
        self.bump_version();
        Ok(tag)
    }

    /// Register every entry, skipping (and warning about) invalid ones.
    pub fn register_table<I>(&self, definitions: I) -> RegistrationReport
    where
        I: IntoIterator<Item = TagDefinition>,
    {
        let mut report = RegistrationReport::default();
        for definition in definitions {
            match self.register(
                definition.program.as_deref(),
                &definition.name,
                definition.data_type,
            ) {
                Ok(tag) => {
                    if !report.registered.iter().any(|k| k == tag.key()) {
                        report.registered.push(tag.key().to_owned());
                    }
                }
                Err(error) => {
                    warn!(error = %error, "skipping tag definition");
                    report.skipped.push(SkippedTag { definition, error });
                }
            }
        }
        report
    }

    /// Swap the whole tag set for a new table. Handles held elsewhere stay
    /// valid but are no longer scanned.
    pub fn replace_all<I>(&self, definitions: I) -> RegistrationReport
    where
        I: IntoIterator<Item = TagDefinition>,
    {
        let staging = Self::new();
        let report = staging.register_table(definitions);
        let tags = std::mem::take(&mut *staging.tags.write());
        *self.tags.write() = tags;
        self.bump_version();
        report
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn lookup(&self, key: &str) -> Option<TagHandle> {
        self.tags.read().get(key).cloned()
    }

    /// Every tag, in registration order.
    pub fn all(&self) -> Vec<TagHandle> {
        self.tags.read().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.tags.read().keys().cloned().collect()
    }

    /// Current value of every tag, `None` where unknown.
    pub fn values(&self) -> IndexMap<String, Option<TagValue>> {
        self.tags
            .read()
            .iter()
            .map(|(key, tag)| (key.clone(), tag.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }

    /// Mutation counter.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Reset every cached value to unknown.
    pub(crate) fn invalidate_all(&self) {
        for tag in self.tags.read().values() {
            tag.invalidate();
        }
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
