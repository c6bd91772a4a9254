use crate::realm::PropertyDescriptor;
use crate::types::JsValue;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAttributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl GlobalAttributes {
    /// Constructors and namespaces: reassignable and deletable, hidden from
    /// enumeration.
    pub const BUILTIN: Self = Self {
        writable: true,
        enumerable: false,
        configurable: true,
    };
    pub const SCRIPT: Self = Self {
        writable: true,
        enumerable: true,
        configurable: true,
    };
    pub const FROZEN: Self = Self {
        writable: false,
        enumerable: false,
        configurable: false,
    };
}

#[derive(Debug, Clone)]
pub struct Accessor {
    pub getter: JsValue,
    pub setter: JsValue,
}

#[derive(Debug, Clone)]
pub struct GlobalBindingEntry {
    pub key: String,
    // data value, or an accessor's backing value once its setter has run
    value: Option<JsValue>,
    pub attributes: GlobalAttributes,
    accessor: Option<Accessor>,
}

impl GlobalBindingEntry {
    pub fn is_accessor(&self) -> bool {
        self.accessor.is_some()
    }

    pub fn accessor(&self) -> Option<&Accessor> {
        self.accessor.as_ref()
    }

    pub fn value(&self) -> Option<&JsValue> {
        self.value.as_ref()
    }

    pub fn descriptor(&self) -> PropertyDescriptor {
        match &self.accessor {
            Some(acc) => PropertyDescriptor {
                value: None,
                writable: None,
                get: Some(acc.getter.clone()),
                set: Some(acc.setter.clone()),
                enumerable: Some(self.attributes.enumerable),
                configurable: Some(self.attributes.configurable),
            },
            None => PropertyDescriptor::data(
                self.value.clone().unwrap_or(JsValue::Undefined),
                self.attributes.writable,
                self.attributes.enumerable,
                self.attributes.configurable,
            ),
        }
    }
}

/// Outcome of a read; accessors are resolved by the realm, which owns the
/// call machinery.
#[derive(Debug, Clone)]
pub enum GlobalRead {
    Missing,
    Value(JsValue),
    Getter(JsValue),
}

#[derive(Debug, Clone)]
pub enum GlobalWrite {
    Stored,
    ReadOnly,
    Setter(JsValue),
}

/// The realm's named global bindings. Deleting an entry removes it outright,
/// so later lookups cannot tell it from a name that was never defined.
#[derive(Debug, Default)]
pub struct GlobalBindingTable {
    entries: FxHashMap<String, GlobalBindingEntry>,
    order: Vec<String>,
}

impl GlobalBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or redefines a data entry. Redefining a non-configurable entry
    /// fails and leaves it untouched.
    pub fn define(&mut self, key: &str, value: JsValue, attributes: GlobalAttributes) -> bool {
        self.insert(GlobalBindingEntry {
            key: key.to_string(),
            value: Some(value),
            attributes,
            accessor: None,
        })
    }

    pub fn define_accessor(
        &mut self,
        key: &str,
        getter: JsValue,
        setter: JsValue,
        enumerable: bool,
        configurable: bool,
    ) -> bool {
        self.insert(GlobalBindingEntry {
            key: key.to_string(),
            value: None,
            attributes: GlobalAttributes {
                writable: false,
                enumerable,
                configurable,
            },
            accessor: Some(Accessor { getter, setter }),
        })
    }

    fn insert(&mut self, entry: GlobalBindingEntry) -> bool {
        match self.entries.get(&entry.key) {
            Some(existing) if !existing.attributes.configurable => false,
            Some(_) => {
                self.entries.insert(entry.key.clone(), entry);
                true
            }
            None => {
                self.order.push(entry.key.clone());
                self.entries.insert(entry.key.clone(), entry);
                true
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&GlobalBindingEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> GlobalRead {
        match self.entries.get(key) {
            None => GlobalRead::Missing,
            Some(entry) => match &entry.accessor {
                Some(acc) => GlobalRead::Getter(acc.getter.clone()),
                None => GlobalRead::Value(entry.value.clone().unwrap_or(JsValue::Undefined)),
            },
        }
    }

    pub fn set(&mut self, key: &str, value: JsValue) -> GlobalWrite {
        match self.entries.get_mut(key) {
            Some(entry) => {
                // caller runs the setter, the table has no realm
                if let Some(acc) = &entry.accessor {
                    return GlobalWrite::Setter(acc.setter.clone());
                }
                if !entry.attributes.writable {
                    return GlobalWrite::ReadOnly;
                }
                entry.value = Some(value);
                GlobalWrite::Stored
            }
            None => {
                self.define(key, value, GlobalAttributes::SCRIPT);
                GlobalWrite::Stored
            }
        }
    }

    /// Removes `key` if it is configurable. Returns whether the key is absent
    /// afterwards.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(entry) if !entry.attributes.configurable => false,
            Some(_) => {
                self.entries.remove(key);
                self.order.retain(|k| k != key);
                log::debug!("deleted global {key}");
                true
            }
        }
    }

    pub fn accessor_backing(&self, key: &str) -> Option<JsValue> {
        self.entries.get(key).and_then(|e| e.value.clone())
    }

    pub fn set_accessor_backing(&mut self, key: &str, value: JsValue) {
        if let Some(entry) = self.entries.get_mut(key)
            && entry.accessor.is_some()
        {
            entry.value = Some(value);
        }
    }

    pub fn descriptor(&self, key: &str) -> Option<PropertyDescriptor> {
        self.entries.get(key).map(GlobalBindingEntry::descriptor)
    }

    pub fn enumerable_keys(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|k| {
                self.entries
                    .get(k.as_str())
                    .is_some_and(|e| e.attributes.enumerable)
            })
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &GlobalBindingEntry> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn trace(&self, worklist: &mut Vec<u64>) {
        for entry in self.entries.values() {
            if let Some(JsValue::Object(o)) = &entry.value {
                worklist.push(o.id);
            }
            if let Some(acc) = &entry.accessor {
                for v in [&acc.getter, &acc.setter] {
                    if let JsValue::Object(o) = v {
                        worklist.push(o.id);
                    }
                }
            }
        }
    }
}
