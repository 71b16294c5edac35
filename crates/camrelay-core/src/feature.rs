use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single device attribute value as reported by (or written to) the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FeatureValue {
    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FeatureValue::Int(_) | FeatureValue::Float(_))
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(v) => write!(f, "{v}"),
            FeatureValue::Int(v) => write!(f, "{v}"),
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Str(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Str(v)
    }
}

/// The attributes a snapshot can carry.
///
/// Wire names are the keys used by the remote-control protocol and by the
/// external UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKey {
    /// Exposure time in microseconds.
    Exposure,
    ExposureMin,
    ExposureMax,
    /// Exposure auto mode (`Off`, `Once`, `Continuous`).
    ExposureMode,
    Gain,
    GainMin,
    GainMax,
    /// Gain auto mode (`Off`, `Once`, `Continuous`).
    GainMode,
    /// Measured frame frequency in Hz.
    FrameRate,
    Width,
    Height,
    Model,
    InterfaceId,
    IpAddress,
    /// Whether the device currently permits an exclusive (capture) session.
    CaptureAllowed,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 15] = [
        FeatureKey::Exposure,
        FeatureKey::ExposureMin,
        FeatureKey::ExposureMax,
        FeatureKey::ExposureMode,
        FeatureKey::Gain,
        FeatureKey::GainMin,
        FeatureKey::GainMax,
        FeatureKey::GainMode,
        FeatureKey::FrameRate,
        FeatureKey::Width,
        FeatureKey::Height,
        FeatureKey::Model,
        FeatureKey::InterfaceId,
        FeatureKey::IpAddress,
        FeatureKey::CaptureAllowed,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            FeatureKey::Exposure => "Exposure",
            FeatureKey::ExposureMin => "ExposureMin",
            FeatureKey::ExposureMax => "ExposureMax",
            FeatureKey::ExposureMode => "ExposureAuto",
            FeatureKey::Gain => "Gain",
            FeatureKey::GainMin => "GainMin",
            FeatureKey::GainMax => "GainMax",
            FeatureKey::GainMode => "GainAuto",
            FeatureKey::FrameRate => "Frequency",
            FeatureKey::Width => "Width",
            FeatureKey::Height => "Height",
            FeatureKey::Model => "Model",
            FeatureKey::InterfaceId => "Interface",
            FeatureKey::IpAddress => "IP",
            FeatureKey::CaptureAllowed => "CaptureAllowed",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An immutable, wholesale-published set of feature values.
///
/// Snapshots are assembled with [`SnapshotBuilder`] and never mutated after
/// that; a refresh produces a new snapshot that replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<String, Option<FeatureValue>>")]
pub struct FeatureSnapshot {
    values: BTreeMap<FeatureKey, FeatureValue>,
}

impl FeatureSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn get(&self, key: FeatureKey) -> Option<&FeatureValue> {
        self.values.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureKey, &FeatureValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Every known key is emitted; keys without a value are `null`.
impl Serialize for FeatureSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FeatureKey::ALL.len()))?;
        for key in FeatureKey::ALL {
            map.serialize_entry(key.wire_name(), &self.values.get(&key))?;
        }
        map.end()
    }
}

impl From<BTreeMap<String, Option<FeatureValue>>> for FeatureSnapshot {
    fn from(raw: BTreeMap<String, Option<FeatureValue>>) -> Self {
        raw.into_iter()
            .filter_map(|(name, value)| Some((FeatureKey::from_wire_name(&name)?, value?)))
            .collect()
    }
}

impl FromIterator<(FeatureKey, FeatureValue)> for FeatureSnapshot {
    fn from_iter<I: IntoIterator<Item = (FeatureKey, FeatureValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Accumulates values for one refresh cycle before publication.
///
/// The first value recorded for a key wins, so callers probing several
/// device names for the same attribute keep the preferred one.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    values: BTreeMap<FeatureKey, FeatureValue>,
}

impl SnapshotBuilder {
    pub fn insert(&mut self, key: FeatureKey, value: impl Into<FeatureValue>) -> &mut Self {
        self.values.entry(key).or_insert_with(|| value.into());
        self
    }

    pub fn with(mut self, key: FeatureKey, value: impl Into<FeatureValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains(&self, key: FeatureKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn build(self) -> FeatureSnapshot {
        FeatureSnapshot {
            values: self.values,
        }
    }
}
