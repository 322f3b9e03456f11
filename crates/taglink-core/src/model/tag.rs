// ── Tag handle ──
//
// One named controller value: its address, the cached value the scan loop
// maintains, and the bookkeeping change detection relies on.

use std::sync::Arc;

use parking_lot::RwLock;
use taglink_api::{DataType, TagAddress, TagValue};

use super::change::TagChange;
use crate::error::CoreError;

/// Controller tag and program names are capped at 40 characters.
const MAX_IDENTIFIER_LEN: usize = 40;

/// Shared handle to a registered tag.
pub type TagHandle = Arc<Tag>;

/// A registered tag.
///
/// The cached value is `None` until the first successful read and again
/// after every disconnect, so a stale value is never reported as current.
/// `last_known_good` survives disconnects for diagnostics.
#[derive(Debug)]
pub struct Tag {
    key: String,
    address: TagAddress,
    state: RwLock<TagState>,
}

#[derive(Debug, Default)]
struct TagState {
    value: Option<TagValue>,
    last_known_good: Option<TagValue>,
    initialized: bool,
    inferred_type: Option<DataType>,
}

impl Tag {
    pub(crate) fn new(address: TagAddress) -> Self {
        Self {
            key: address.key(),
            address,
            state: RwLock::new(TagState::default()),
        }
    }

    /// Registry key: `name`, or `program:name` for program-scoped tags.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn program(&self) -> Option<&str> {
        self.address.program.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.address.name
    }

    pub fn address(&self) -> &TagAddress {
        &self.address
    }

    pub fn declared_type(&self) -> Option<DataType> {
        self.address.data_type
    }

    /// Declared type, else the type last reported by the controller.
    pub fn data_type(&self) -> Option<DataType> {
        self.address
            .data_type
            .or_else(|| self.state.read().inferred_type)
    }

    /// Current value, `None` while unknown.
    pub fn value(&self) -> Option<TagValue> {
        self.state.read().value.clone()
    }

    pub fn last_known_good(&self) -> Option<TagValue> {
        self.state.read().last_known_good.clone()
    }

    /// Whether a value has been read since the last (re)connect.
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Convert a requested write value to the tag's type.
    ///
    /// Tags with neither a declared nor an inferred type pass the value
    /// through untouched and let the controller decide.
    pub fn coerce_for_write(&self, value: TagValue) -> Result<TagValue, CoreError> {
        match self.data_type() {
            Some(target) => value.coerce(target).map_err(|e| CoreError::InvalidValue {
                key: self.key.clone(),
                reason: e.to_string(),
            }),
            None => Ok(value),
        }
    }

    /// Store a freshly read value. Returns the change to publish when the
    /// value differs from the cached one or the tag was uninitialized.
    pub(crate) fn apply_read(&self, value: TagValue) -> Option<TagChange> {
        let mut state = self.state.write();
        state.inferred_type = Some(value.data_type());

        let unchanged = state.initialized
            && state
                .value
                .as_ref()
                .is_some_and(|current| current.same_as(&value));
        if unchanged {
            return None;
        }

        let previous = state.value.replace(value.clone());
        state.last_known_good = Some(value.clone());
        state.initialized = true;
        Some(TagChange::new(self.key.clone(), value, previous))
    }

    /// Reset to the unknown sentinel after a disconnect.
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.write();
        state.value = None;
        state.initialized = false;
    }
}

// ── TagRef ───────────────────────────────────────────────────────────

/// Anything that names a registered tag: a key string or a handle.
pub trait TagRef {
    fn tag_key(&self) -> &str;
}

impl TagRef for str {
    fn tag_key(&self) -> &str {
        self
    }
}

impl TagRef for String {
    fn tag_key(&self) -> &str {
        self
    }
}

impl TagRef for Tag {
    fn tag_key(&self) -> &str {
        self.key()
    }
}

impl TagRef for TagHandle {
    fn tag_key(&self) -> &str {
        self.key()
    }
}

impl<T: TagRef + ?Sized> TagRef for &T {
    fn tag_key(&self) -> &str {
        (**self).tag_key()
    }
}

// ── Name validation ──────────────────────────────────────────────────

/// Validate a tag name: dot-separated identifiers, each optionally
/// subscripted (`Buffer[3]`, `Grid[1,2]`), the last one optionally a bare
/// bit index (`Status.3`).
pub(crate) fn validate_tag_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is empty".into());
    }

    let segments: Vec<&str> = name.split('.').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err("empty member name".into());
        }
        if i > 0 && i == last && segment.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        validate_segment(segment)?;
    }
    Ok(())
}

/// Program names are plain identifiers.
pub(crate) fn validate_program_name(program: &str) -> Result<(), String> {
    validate_identifier(program)
}

fn validate_segment(segment: &str) -> Result<(), String> {
    let Some(open) = segment.find('[') else {
        return validate_identifier(segment);
    };

    let (ident, subscript) = segment.split_at(open);
    validate_identifier(ident)?;

    let indices = subscript
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("malformed subscript in {segment:?}"))?;
    let valid = indices.split(',').all(|index| {
        let index = index.trim();
        !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
    });
    if valid {
        Ok(())
    } else {
        Err(format!("array index must be numeric in {segment:?}"))
    }
}

fn validate_identifier(ident: &str) -> Result<(), String> {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return Err("identifier is empty".into());
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!("{ident:?} must start with a letter or underscore"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("unexpected character {bad:?} in {ident:?}"));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "{ident:?} is longer than {MAX_IDENTIFIER_LEN} characters"
        ));
    }
    Ok(())
}
