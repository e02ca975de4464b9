//! Global objects and property descriptors.
//!
//! A [`GlobalObject`] is a flat property table with per-key descriptors. The
//! shared window is one, and every sandbox keeps a private one as its local
//! record.

use std::collections::BTreeMap;

use crate::error::{EnvError, Result};
use crate::value::Value;

/// Attributes of a single property slot.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDescriptor {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// A plain data property: writable, enumerable, configurable.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A frozen property: not writable, not enumerable, not configurable.
    pub fn frozen(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Set writability.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Set enumerability.
    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable;
        self
    }

    /// Set configurability.
    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable;
        self
    }

    /// Same attributes, different value.
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }
}

/// A table of named properties with descriptor semantics.
#[derive(Clone, Debug, Default)]
pub struct GlobalObject {
    props: BTreeMap<String, PropertyDescriptor>,
}

impl GlobalObject {
    /// Create an empty global object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a property value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.get(key).map(|d| d.value.clone())
    }

    /// Get the descriptor of an own property.
    pub fn get_own_property(&self, key: &str) -> Option<&PropertyDescriptor> {
        self.props.get(key)
    }

    /// Whether the property exists.
    pub fn has_own(&self, key: &str) -> bool {
        self.props.contains_key(key)
    }

    /// Assign a value.
    ///
    /// New keys become plain data properties. Existing keys keep their
    /// attributes and fail if not writable.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        match self.props.get_mut(key) {
            Some(desc) if !desc.writable => Err(EnvError::ReadOnly(key.to_string())),
            Some(desc) => {
                desc.value = value;
                Ok(())
            }
            None => {
                self.props
                    .insert(key.to_string(), PropertyDescriptor::data(value));
                Ok(())
            }
        }
    }

    /// Define (or redefine) a property with an explicit descriptor.
    pub fn define_property(&mut self, key: &str, desc: PropertyDescriptor) -> Result<()> {
        if let Some(existing) = self.props.get(key) {
            if !existing.configurable {
                // A non-configurable writable slot may still change value.
                let same_shape = existing.enumerable == desc.enumerable
                    && existing.configurable == desc.configurable
                    && (existing.writable || !desc.writable);
                if !same_shape || (!existing.writable && existing.value != desc.value) {
                    return Err(EnvError::NotConfigurable(key.to_string()));
                }
            }
        }
        self.props.insert(key.to_string(), desc);
        Ok(())
    }

    /// Delete a property. Missing keys delete trivially.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        match self.props.get(key) {
            Some(desc) if !desc.configurable => Err(EnvError::NotConfigurable(key.to_string())),
            Some(_) => {
                self.props.remove(key);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    /// All own keys in order.
    pub fn own_keys(&self) -> Vec<String> {
        self.props.keys().cloned().collect()
    }

    /// Number of own properties.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// True if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_creates_data_property() {
        let mut g = GlobalObject::new();
        g.set("a", Value::from(1i64)).unwrap();
        let d = g.get_own_property("a").unwrap();
        assert!(d.writable && d.enumerable && d.configurable);
    }

    #[test]
    fn set_rejects_read_only() {
        let mut g = GlobalObject::new();
        g.define_property("Infinity", PropertyDescriptor::frozen(f64::INFINITY))
            .unwrap();
        let err = g.set("Infinity", Value::from(1i64)).unwrap_err();
        assert!(matches!(err, EnvError::ReadOnly(_)));
    }

    #[test]
    fn set_keeps_attributes() {
        let mut g = GlobalObject::new();
        g.define_property(
            "name",
            PropertyDescriptor::data("").enumerable(false),
        )
        .unwrap();
        g.set("name", Value::from("x")).unwrap();
        let d = g.get_own_property("name").unwrap();
        assert!(!d.enumerable);
        assert_eq!(d.value, Value::from("x"));
    }

    #[test]
    fn non_configurable_cannot_be_deleted_or_redefined() {
        let mut g = GlobalObject::new();
        g.define_property("k", PropertyDescriptor::frozen(1i64)).unwrap();
        assert!(g.delete("k").is_err());
        assert!(g
            .define_property("k", PropertyDescriptor::data(2i64))
            .is_err());
    }

    #[test]
    fn delete_missing_is_ok() {
        let mut g = GlobalObject::new();
        assert!(g.delete("nope").unwrap());
    }
}
