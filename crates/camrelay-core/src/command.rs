use crate::feature::FeatureValue;
use std::collections::BTreeMap;
use std::fmt;

/// The attributes a [`Command`] may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandKey {
    Exposure,
    Gain,
    GainMode,
    ExposureMode,
}

impl CommandKey {
    pub const ALL: [CommandKey; 4] = [
        CommandKey::Exposure,
        CommandKey::Gain,
        CommandKey::GainMode,
        CommandKey::ExposureMode,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            CommandKey::Exposure => "Exposure",
            CommandKey::Gain => "Gain",
            CommandKey::GainMode => "GainAuto",
            CommandKey::ExposureMode => "ExposureAuto",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }

    /// Exposure and gain take numbers, the auto modes take mode strings.
    pub fn accepts(self, value: &FeatureValue) -> bool {
        match self {
            CommandKey::Exposure | CommandKey::Gain => value.is_numeric(),
            CommandKey::GainMode | CommandKey::ExposureMode => value.as_str().is_some(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A partial parameter-change request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    changes: BTreeMap<CommandKey, FeatureValue>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: CommandKey, value: impl Into<FeatureValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: CommandKey, value: impl Into<FeatureValue>) {
        self.changes.insert(key, value.into());
    }

    pub fn get(&self, key: CommandKey) -> Option<&FeatureValue> {
        self.changes.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommandKey, &FeatureValue)> {
        self.changes.iter().map(|(k, v)| (*k, v))
    }

    /// Fold a later command into this one: keys present in `later` override,
    /// keys absent from it are kept.
    pub fn merge(&mut self, later: Command) {
        self.changes.extend(later.changes);
    }

    /// Build a command from the `parameters` object of a `change` request.
    ///
    /// Unknown keys and values of the wrong kind are skipped.
    pub fn from_parameters(params: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut cmd = Command::new();
        for (name, raw) in params {
            let Some(key) = CommandKey::from_wire_name(name) else {
                tracing::debug!(parameter = %name, "ignoring unknown parameter");
                continue;
            };
            let value = match serde_json::from_value::<FeatureValue>(raw.clone()) {
                Ok(v) if key.accepts(&v) => v,
                _ => {
                    tracing::debug!(parameter = %name, value = %raw, "ignoring parameter with invalid value");
                    continue;
                }
            };
            cmd.set(key, value);
        }
        cmd
    }
}

impl IntoIterator for Command {
    type Item = (CommandKey, FeatureValue);
    type IntoIter = std::collections::btree_map::IntoIter<CommandKey, FeatureValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}
