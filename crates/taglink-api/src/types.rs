// ── Controller data types ──
//
// Atomic CIP data types, typed tag values, and the addressing record a
// protocol client needs to reach one tag on the controller.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

// ── DataType ─────────────────────────────────────────────────────────

/// Atomic data types a controller tag can declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DataType {
    Bool,
    Sint,
    Int,
    Dint,
    Lint,
    Usint,
    Uint,
    Udint,
    Ulint,
    Real,
    Lreal,
    String,
}

impl DataType {
    /// Parse a tag-table type string. Empty or unrecognised names mean
    /// "infer from the controller" and yield `None`.
    pub fn from_table(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        trimmed.parse().ok()
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Sint
                | Self::Int
                | Self::Dint
                | Self::Lint
                | Self::Usint
                | Self::Uint
                | Self::Udint
                | Self::Ulint
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Real | Self::Lreal)
    }
}

// ── TagValue ─────────────────────────────────────────────────────────

/// A typed value as exchanged with the controller.
///
/// Serializes to a plain JSON scalar so consumers see `5`, `true` or
/// `"text"` rather than a tagged object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Ulint(u64),
    Real(f32),
    Lreal(f64),
    String(String),
}

impl TagValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Sint(_) => DataType::Sint,
            Self::Int(_) => DataType::Int,
            Self::Dint(_) => DataType::Dint,
            Self::Lint(_) => DataType::Lint,
            Self::Usint(_) => DataType::Usint,
            Self::Uint(_) => DataType::Uint,
            Self::Udint(_) => DataType::Udint,
            Self::Ulint(_) => DataType::Ulint,
            Self::Real(_) => DataType::Real,
            Self::Lreal(_) => DataType::Lreal,
            Self::String(_) => DataType::String,
        }
    }

    /// The zero value of `data_type`: `false`, `0`, `0.0` or `""`.
    pub fn zero(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => Self::Bool(false),
            DataType::Sint => Self::Sint(0),
            DataType::Int => Self::Int(0),
            DataType::Dint => Self::Dint(0),
            DataType::Lint => Self::Lint(0),
            DataType::Usint => Self::Usint(0),
            DataType::Uint => Self::Uint(0),
            DataType::Udint => Self::Udint(0),
            DataType::Ulint => Self::Ulint(0),
            DataType::Real => Self::Real(0.0),
            DataType::Lreal => Self::Lreal(0.0),
            DataType::String => Self::String(String::new()),
        }
    }

    /// Value equality for change detection.
    ///
    /// Floats compare by bit pattern so a `NaN` that stays `NaN` is not
    /// reported as a change on every cycle.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Lreal(a), Self::Lreal(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Convert to `target`, checking ranges.
    ///
    /// Integers convert between widths when the value fits, booleans map
    /// to and from `0`/`1` (any non-zero integer reads as `true`), floats
    /// convert to integers only when integral and in range. Strings only
    /// convert to strings.
    pub fn coerce(&self, target: DataType) -> Result<Self, Error> {
        if self.data_type() == target {
            return Ok(self.clone());
        }

        let mismatch = || Error::TypeMismatch {
            value: self.to_string(),
            target,
        };

        if let Self::String(_) = self {
            return Err(mismatch());
        }

        match target {
            DataType::String => Err(mismatch()),
            DataType::Bool => match self.as_integer() {
                Some(i) => Ok(Self::Bool(i != 0)),
                None => Err(mismatch()),
            },
            DataType::Real | DataType::Lreal => {
                let f = self.as_float().ok_or_else(mismatch)?;
                if target == DataType::Lreal {
                    Ok(Self::Lreal(f))
                } else {
                    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
                    let narrowed = f as f32;
                    if f.is_finite() && !narrowed.is_finite() {
                        return Err(mismatch());
                    }
                    Ok(Self::Real(narrowed))
                }
            }
            _ => {
                let i = self.as_integer().ok_or_else(mismatch)?;
                Self::integer_of(target, i).ok_or_else(mismatch)
            }
        }
    }

    /// Integer view of the value, if it has one without loss.
    fn as_integer(&self) -> Option<i128> {
        match *self {
            Self::Bool(b) => Some(i128::from(b)),
            Self::Sint(v) => Some(i128::from(v)),
            Self::Int(v) => Some(i128::from(v)),
            Self::Dint(v) => Some(i128::from(v)),
            Self::Lint(v) => Some(i128::from(v)),
            Self::Usint(v) => Some(i128::from(v)),
            Self::Uint(v) => Some(i128::from(v)),
            Self::Udint(v) => Some(i128::from(v)),
            Self::Ulint(v) => Some(i128::from(v)),
            Self::Real(v) => integral(f64::from(v)),
            Self::Lreal(v) => integral(v),
            Self::String(_) => None,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Bool(_) | Self::String(_) => None,
            Self::Real(v) => Some(f64::from(v)),
            Self::Lreal(v) => Some(v),
            _ => self.as_integer().map(|i| i as f64),
        }
    }

    fn integer_of(target: DataType, i: i128) -> Option<Self> {
        Some(match target {
            DataType::Sint => Self::Sint(i8::try_from(i).ok()?),
            DataType::Int => Self::Int(i16::try_from(i).ok()?),
            DataType::Dint => Self::Dint(i32::try_from(i).ok()?),
            DataType::Lint => Self::Lint(i64::try_from(i).ok()?),
            DataType::Usint => Self::Usint(u8::try_from(i).ok()?),
            DataType::Uint => Self::Uint(u16::try_from(i).ok()?),
            DataType::Udint => Self::Udint(u32::try_from(i).ok()?),
            DataType::Ulint => Self::Ulint(u64::try_from(i).ok()?),
            _ => return None,
        })
    }
}

/// Integral floats within `i64` range convert to an integer view.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn integral(f: f64) -> Option<i128> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.3e18 {
        Some(f as i128)
    } else {
        None
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Sint(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Dint(v) => write!(f, "{v}"),
            Self::Lint(v) => write!(f, "{v}"),
            Self::Usint(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Udint(v) => write!(f, "{v}"),
            Self::Ulint(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Lreal(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for TagValue {
    fn from(v: i16) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        Self::Dint(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Lint(v)
    }
}

impl From<f32> for TagValue {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Lreal(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// ── TagAddress ───────────────────────────────────────────────────────

/// Everything a protocol client needs to address one tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagAddress {
    /// Owning program, `None` for controller-scoped tags.
    pub program: Option<String>,
    /// Tag name within its scope, e.g. `Motor.Speed` or `Buffer[3]`.
    pub name: String,
    /// Declared type; `None` lets the controller report it.
    pub data_type: Option<DataType>,
}

impl TagAddress {
    pub fn new(program: Option<&str>, name: &str, data_type: Option<DataType>) -> Self {
        Self {
            program: program.filter(|p| !p.is_empty()).map(str::to_owned),
            name: name.to_owned(),
            data_type,
        }
    }

    /// Stable registry key: `name` for controller scope, `program:name`
    /// otherwise.
    pub fn key(&self) -> String {
        match &self.program {
            Some(program) => format!("{program}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Symbolic path in controller notation, `Program:Main.Speed`.
    pub fn symbolic_path(&self) -> String {
        match &self.program {
            Some(program) => format!("Program:{program}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for TagAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbolic_path())
    }
}

/// One entry of a batched write exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TagWrite {
    pub address: TagAddress,
    pub value: TagValue,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_type_parses_case_insensitively() {
        assert_eq!(DataType::from_table("dint"), Some(DataType::Dint));
        assert_eq!(DataType::from_table(" REAL "), Some(DataType::Real));
        assert_eq!(DataType::from_table(""), None);
        assert_eq!(DataType::from_table("UDT_Motor"), None);
        assert_eq!(DataType::Lreal.to_string(), "LREAL");
    }

    #[test]
    fn coerce_widens_and_narrows_integers() {
        assert_eq!(
            TagValue::Sint(-5).coerce(DataType::Lint).unwrap(),
            TagValue::Lint(-5)
        );
        assert_eq!(
            TagValue::Dint(200).coerce(DataType::Usint).unwrap(),
            TagValue::Usint(200)
        );
        assert!(TagValue::Dint(300).coerce(DataType::Sint).is_err());
        assert!(TagValue::Dint(-1).coerce(DataType::Udint).is_err());
    }

    #[test]
    fn coerce_between_floats_and_integers() {
        assert_eq!(
            TagValue::Dint(10).coerce(DataType::Real).unwrap(),
            TagValue::Real(10.0)
        );
        assert_eq!(
            TagValue::Lreal(42.0).coerce(DataType::Dint).unwrap(),
            TagValue::Dint(42)
        );
        assert!(TagValue::Lreal(1.5).coerce(DataType::Dint).is_err());
        assert!(TagValue::Lreal(f64::NAN).coerce(DataType::Int).is_err());
        assert!(TagValue::Lreal(1e300).coerce(DataType::Real).is_err());
    }

    #[test]
    fn coerce_bool_and_string_rules() {
        assert_eq!(
            TagValue::Dint(7).coerce(DataType::Bool).unwrap(),
            TagValue::Bool(true)
        );
        assert_eq!(
            TagValue::Bool(true).coerce(DataType::Int).unwrap(),
            TagValue::Int(1)
        );
        assert!(TagValue::Real(1.0).coerce(DataType::Bool).is_ok());
        assert!(TagValue::Real(0.5).coerce(DataType::Bool).is_err());
        assert!(TagValue::from("on").coerce(DataType::Bool).is_err());
        assert!(TagValue::Dint(1).coerce(DataType::String).is_err());
    }

    #[test]
    fn nan_is_the_same_as_nan() {
        let a = TagValue::Real(f32::NAN);
        assert!(a.same_as(&TagValue::Real(f32::NAN)));
        assert!(!TagValue::Real(1.0).same_as(&TagValue::Real(2.0)));
        assert!(!TagValue::Dint(1).same_as(&TagValue::Lint(1)));
    }

    #[test]
    fn values_serialize_as_plain_scalars() {
        assert_eq!(serde_json::to_string(&TagValue::Dint(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&TagValue::Bool(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&TagValue::from("run")).unwrap(),
            "\"run\""
        );
    }

    #[test]
    fn zero_matches_its_type() {
        for data_type in [DataType::Bool, DataType::Udint, DataType::Lreal, DataType::String] {
            assert_eq!(TagValue::zero(data_type).data_type(), data_type);
        }
    }

    #[test]
    fn address_keys_and_paths() {
        let scoped = TagAddress::new(Some("Main"), "Speed", Some(DataType::Real));
        assert_eq!(scoped.key(), "Main:Speed");
        assert_eq!(scoped.symbolic_path(), "Program:Main.Speed");

        let global = TagAddress::new(Some(""), "Alarm", None);
        assert_eq!(global.program, None);
        assert_eq!(global.key(), "Alarm");
        assert_eq!(global.to_string(), "Alarm");
    }
}
