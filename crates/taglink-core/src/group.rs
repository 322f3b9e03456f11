// ── Tag group ──
//
// The unit of one coalesced read: an ordered, de-duplicated list of tag
// handles plus the addresses handed to the protocol client.

use std::collections::HashSet;
use std::sync::Arc;

use taglink_api::{TagAddress, TagValue};

use crate::error::CoreError;
use crate::model::{TagChange, TagHandle};
use crate::registry::TagRegistry;

/// Tags read together in one exchange.
#[derive(Debug, Clone, Default)]
pub struct TagGroup {
    tags: Vec<TagHandle>,
    addresses: Vec<TagAddress>,
    /// Registry version this group was built from.
    version: u64,
}

impl TagGroup {
    /// Snapshot the registry's current tag set.
    pub fn from_registry(registry: &TagRegistry) -> Self {
        let version = registry.version();
        let mut group = Self::from_handles(registry.all());
        group.version = version;
        group
    }

    /// Build from handles, keeping the first occurrence of each key.
    pub fn from_handles<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = TagHandle>,
    {
        let mut seen = HashSet::new();
        let tags: Vec<TagHandle> = handles
            .into_iter()
            .filter(|tag| seen.insert(tag.key().to_owned()))
            .collect();
        let addresses = tags.iter().map(|tag| tag.address().clone()).collect();
        Self {
            tags,
            addresses,
            version: 0,
        }
    }

    pub fn tags(&self) -> &[TagHandle] {
        &self.tags
    }

    pub fn addresses(&self) -> &[TagAddress] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply one read result, positionally aligned with the group, and
    /// return the changes in group order.
    pub(crate) fn apply_read(&self, values: Vec<TagValue>) -> Result<Vec<Arc<TagChange>>, CoreError> {
        if values.len() != self.tags.len() {
            return Err(CoreError::CycleFailed {
                reason: format!(
                    "read returned {} values for {} tags",
                    values.len(),
                    self.tags.len()
                ),
            });
        }

        Ok(self
            .tags
            .iter()
            .zip(values)
            .filter_map(|(tag, value)| tag.apply_read(value))
            .map(Arc::new)
            .collect())
    }
}
