//! Typed, unit-carrying descriptors for the slots of a sample.
//!
//! Each node direction carries an immutable list of signals describing what
//! flows through the corresponding sample slots. The list is frozen once a
//! path reaches the prepared state; the only sanctioned mutation is the cast
//! hook swapping a single descriptor before start.

use std::str::FromStr;

/// Number representation of one sample slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SignalType {
    #[default]
    Float,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal type")]
pub struct UnknownSignalType;

impl FromStr for SignalType {
    type Err = UnknownSignalType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(Self::Float),
            "integer" => Ok(Self::Integer),
            _ => Err(UnknownSignalType),
        }
    }
}

/// Descriptor for a single sample slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    pub name: String,
    pub unit: Option<String>,
    pub ty: SignalType,
}

impl Signal {
    pub fn new(name: impl Into<String>, ty: SignalType) -> Self {
        Self {
            name: name.into(),
            unit: None,
            ty,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// An ordered list of signal descriptors for one node direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalList {
    signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("no signal named {0:?}")]
    UnknownName(String),
    #[error("signal index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

impl SignalList {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }

    /// A list of `count` anonymous float signals, the default layout for
    /// nodes that do not describe their data.
    pub fn floats(count: usize) -> Self {
        Self {
            signals: (0..count)
                .map(|i| Signal::new(format!("signal{i}"), SignalType::Float))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Signal> {
        self.signals.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, SignalError> {
        self.signals
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SignalError::UnknownName(name.to_string()))
    }

    /// Swap one descriptor. Only valid before the owning path is started.
    pub fn replace(&mut self, index: usize, signal: Signal) -> Result<Signal, SignalError> {
        let len = self.signals.len();
        let slot = self
            .signals
            .get_mut(index)
            .ok_or(SignalError::OutOfRange { index, len })?;
        Ok(std::mem::replace(slot, signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_type_from_str() {
        assert_eq!("float".parse::<SignalType>(), Ok(SignalType::Float));
        assert_eq!("integer".parse::<SignalType>(), Ok(SignalType::Integer));
        assert!("double".parse::<SignalType>().is_err());
    }

    #[test]
    fn test_lookup_and_replace() {
        let mut list = SignalList::new(vec![
            Signal::new("voltage", SignalType::Float).with_unit("V"),
            Signal::new("current", SignalType::Float).with_unit("A"),
        ]);

        assert_eq!(list.index_of("current"), Ok(1));
        assert!(list.index_of("power").is_err());

        let old = list
            .replace(1, Signal::new("current", SignalType::Integer))
            .unwrap();
        assert_eq!(old.ty, SignalType::Float);
        assert_eq!(list.get(1).unwrap().ty, SignalType::Integer);

        let err = list.replace(5, Signal::default()).unwrap_err();
        assert_eq!(err, SignalError::OutOfRange { index: 5, len: 2 });
    }

    #[test]
    fn test_floats_layout() {
        let list = SignalList::floats(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2).unwrap().name, "signal2");
        assert!(list.iter().all(|s| s.ty == SignalType::Float));
    }
}
