use crate::construct::ScriptClassRecord;
use crate::error::BindingError;
use crate::registry::ClassId;
use crate::slots::{InternalSlots, SlotInit};
use crate::types::{JsObject, JsValue};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use super::Realm;

pub type ObjectRef = Rc<RefCell<ObjectData>>;

pub type NativeFn = Rc<dyn Fn(&mut Realm, &JsValue, &[JsValue]) -> Result<JsValue, BindingError>>;

/// Body of a script-defined method. Receives the call with its home object so
/// it can delegate through [`Realm::call_super`].
pub type ScriptBody = Rc<dyn Fn(&mut Realm, &MethodCall) -> Result<JsValue, BindingError>>;

/// Validates constructor arguments and produces the instance's internal slots.
pub type ConstructHook = Rc<dyn Fn(&mut Realm, &[JsValue]) -> Result<SlotInit, BindingError>>;

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub this: JsValue,
    pub args: Vec<JsValue>,
    /// The prototype the method was defined on.
    pub home: JsObject,
}

impl MethodCall {
    pub fn arg(&self, index: usize) -> JsValue {
        self.args.get(index).cloned().unwrap_or(JsValue::Undefined)
    }
}

#[derive(Clone)]
pub enum ClassKind {
    Native(ClassId),
    Script(Rc<ScriptClassRecord>),
}

#[derive(Clone)]
pub enum JsFunction {
    Native(String, usize, NativeFn),
    Method {
        name: String,
        home: JsObject,
        body: ScriptBody,
    },
    Class(ClassKind),
}

impl JsFunction {
    pub fn native(
        name: &str,
        arity: usize,
        f: impl Fn(&mut Realm, &JsValue, &[JsValue]) -> Result<JsValue, BindingError> + 'static,
    ) -> Self {
        JsFunction::Native(name.to_string(), arity, Rc::new(f))
    }
}

impl std::fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsFunction::Native(name, arity, _) => write!(f, "JsFunction::Native({name:?}, {arity})"),
            JsFunction::Method { name, home, .. } => {
                write!(f, "JsFunction::Method({name:?}, home={})", home.id)
            }
            JsFunction::Class(ClassKind::Native(id)) => write!(f, "JsFunction::Class(native {id:?})"),
            JsFunction::Class(ClassKind::Script(rec)) => {
                write!(f, "JsFunction::Class(script {:?})", rec.name)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub value: Option<JsValue>,
    pub writable: Option<bool>,
    pub get: Option<JsValue>,
    pub set: Option<JsValue>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    pub fn data(value: JsValue, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            value: Some(value),
            writable: Some(writable),
            get: None,
            set: None,
            enumerable: Some(enumerable),
            configurable: Some(configurable),
        }
    }

    pub fn data_default(value: JsValue) -> Self {
        Self::data(value, true, true, true)
    }

    pub fn accessor(get: JsValue, set: JsValue, enumerable: bool, configurable: bool) -> Self {
        Self {
            value: None,
            writable: None,
            get: Some(get),
            set: Some(set),
            enumerable: Some(enumerable),
            configurable: Some(configurable),
        }
    }

    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(JsValue),
    Rejected(JsValue),
}

#[derive(Debug, Clone)]
pub(crate) struct PromiseReaction {
    pub(crate) on_fulfilled: JsValue,
    pub(crate) on_rejected: JsValue,
    pub(crate) derived: JsObject,
}

#[derive(Debug)]
pub(crate) struct PromiseData {
    pub(crate) state: PromiseState,
    pub(crate) reactions: Vec<PromiseReaction>,
}

pub struct ObjectData {
    pub id: Option<u64>,
    pub properties: FxHashMap<String, PropertyDescriptor>,
    pub property_order: Vec<String>,
    pub prototype: Option<ObjectRef>,
    pub callable: Option<JsFunction>,
    pub array_elements: Option<Vec<JsValue>>,
    pub class_name: String,
    pub slots: Option<Rc<InternalSlots>>,
    pub(crate) promise: Option<PromiseData>,
}

impl ObjectData {
    pub(crate) fn new() -> Self {
        Self {
            id: None,
            properties: FxHashMap::default(),
            property_order: Vec::new(),
            prototype: None,
            callable: None,
            array_elements: None,
            class_name: "Object".to_string(),
            slots: None,
            promise: None,
        }
    }

    pub fn get_property_descriptor(&self, key: &str) -> Option<PropertyDescriptor> {
        if let Some(desc) = self.get_own_property(key) {
            return Some(desc);
        }
        if let Some(proto) = &self.prototype {
            return proto.borrow().get_property_descriptor(key);
        }
        None
    }

    pub fn get_own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        if let Some(desc) = self.properties.get(key) {
            return Some(desc.clone());
        }
        if let Some(ref elems) = self.array_elements {
            if key == "length" {
                return Some(PropertyDescriptor::data(
                    JsValue::Number(elems.len() as f64),
                    true,
                    false,
                    false,
                ));
            }
            if let Ok(idx) = key.parse::<usize>()
                && idx < elems.len()
            {
                return Some(PropertyDescriptor::data_default(elems[idx].clone()));
            }
        }
        None
    }

    pub fn has_own_property(&self, key: &str) -> bool {
        self.get_own_property(key).is_some()
    }

    pub fn has_property(&self, key: &str) -> bool {
        if self.has_own_property(key) {
            return true;
        }
        if let Some(proto) = &self.prototype {
            return proto.borrow().has_property(key);
        }
        false
    }

    pub fn get_property_value(&self, key: &str) -> Option<JsValue> {
        self.properties.get(key).and_then(|d| d.value.clone())
    }

    pub fn insert_property(&mut self, key: String, desc: PropertyDescriptor) {
        if !self.properties.contains_key(&key) {
            self.property_order.push(key.clone());
        }
        self.properties.insert(key, desc);
    }

    pub fn insert_value(&mut self, key: String, value: JsValue) {
        self.insert_property(key, PropertyDescriptor::data_default(value));
    }

    pub fn insert_builtin(&mut self, key: String, value: JsValue) {
        self.insert_property(key, PropertyDescriptor::data(value, true, false, true));
    }

    /// Ordinary [[Set]] on an own data slot. Returns false when the write was
    /// refused.
    pub(crate) fn set_own_value(&mut self, key: &str, value: JsValue) -> bool {
        if let Some(ref mut elems) = self.array_elements
            && let Ok(idx) = key.parse::<usize>()
            && idx < elems.len()
        {
            elems[idx] = value;
            return true;
        }
        match self.properties.get_mut(key) {
            Some(desc) if desc.writable == Some(false) => false,
            Some(desc) => {
                desc.value = Some(value);
                true
            }
            None => {
                self.insert_value(key.to_string(), value);
                true
            }
        }
    }

    pub(crate) fn delete_own(&mut self, key: &str) -> bool {
        match self.properties.get(key) {
            None => !(self.array_elements.is_some() && key == "length"),
            Some(desc) if desc.configurable == Some(false) => false,
            Some(_) => {
                self.properties.remove(key);
                self.property_order.retain(|k| k != key);
                true
            }
        }
    }

    pub fn own_enumerable_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match &self.array_elements {
            Some(elems) => (0..elems.len()).map(|i| i.to_string()).collect(),
            None => Vec::new(),
        };
        for k in &self.property_order {
            if let Some(desc) = self.properties.get(k)
                && desc.enumerable != Some(false)
            {
                keys.push(k.clone());
            }
        }
        keys
    }

    pub(crate) fn estimated_size(&self) -> usize {
        let mut size = std::mem::size_of::<ObjectData>();
        for (k, _) in &self.properties {
            size += k.len() + std::mem::size_of::<(String, PropertyDescriptor)>();
        }
        if let Some(ref elems) = self.array_elements {
            size += elems.capacity() * std::mem::size_of::<JsValue>();
        }
        if let Some(ref slots) = self.slots {
            size += slots.estimated_size();
        }
        size
    }
}
