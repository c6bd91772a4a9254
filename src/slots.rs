use crate::error::BindingError;
use crate::natives::blob::BlobContent;
use crate::natives::events::Listener;
use crate::natives::fetch::HeaderList;
use crate::natives::rewriter::RewriteHandler;
use crate::registry::{ClassDescriptor, ClassId, SlotKey};
use crate::types::JsValue;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

/// Value stored in one internal slot. Slots that model mutable native state
/// hold shared cells; the cell itself never changes after construction.
#[derive(Debug, Clone)]
pub enum SlotValue {
    Str(String),
    Number(f64),
    Bool(bool),
    Flag(Rc<Cell<bool>>),
    Bytes(Rc<Vec<u8>>),
    Blob(Rc<BlobContent>),
    Body(Option<Rc<BlobContent>>),
    Value(JsValue),
    HeaderList(Rc<RefCell<HeaderList>>),
    Listeners(Rc<RefCell<Vec<Listener>>>),
    Handlers(Rc<RefCell<Vec<RewriteHandler>>>),
}

pub type SlotInit = Vec<(SlotKey, SlotValue)>;

/// The opaque native state of one instance.
#[derive(Debug)]
pub struct InternalSlots {
    brand: ClassId,
    values: FxHashMap<SlotKey, SlotValue>,
}

fn missing(name: &str) -> BindingError {
    BindingError::type_error(format!("missing internal slot [[{name}]]"))
}

macro_rules! typed_slot {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(&self, owner: ClassId, name: &'static str) -> Result<$ty, BindingError> {
            match self.values.get(&SlotKey::new(owner, name)) {
                Some(SlotValue::$variant(v)) => Ok(v.clone()),
                _ => Err(missing(name)),
            }
        }
    };
}

impl InternalSlots {
    /// Builds the slot set for `brand`. Every schema entry must be supplied
    /// exactly once and nothing outside the schema is accepted.
    pub(crate) fn populate(
        brand: ClassId,
        descriptor: &ClassDescriptor,
        init: SlotInit,
    ) -> Result<Self, BindingError> {
        let schema = descriptor.slot_schema();
        let mut values = FxHashMap::default();
        for (key, value) in init {
            if !schema.contains(&key) {
                return Err(BindingError::construction(format!(
                    "{} has no internal slot [[{}]]",
                    descriptor.name(),
                    key.name
                )));
            }
            // schema keys are class-qualified, duplicates are real repeats
            if values.insert(key, value).is_some() {
                return Err(BindingError::construction(format!(
                    "internal slot [[{}]] populated twice",
                    key.name
                )));
            }
        }
        if let Some(absent) = schema.iter().find(|k| !values.contains_key(*k)) {
            return Err(BindingError::construction(format!(
                "{} constructed without internal slot [[{}]]",
                descriptor.name(),
                absent.name
            )));
        }
        Ok(Self { brand, values })
    }

    pub fn brand(&self) -> ClassId {
        self.brand
    }

    pub fn satisfies(&self, schema: &BTreeSet<SlotKey>) -> bool {
        schema.iter().all(|k| self.values.contains_key(k))
    }

    pub fn get(&self, owner: ClassId, name: &'static str) -> Option<&SlotValue> {
        self.values.get(&SlotKey::new(owner, name))
    }

    pub fn str(&self, owner: ClassId, name: &'static str) -> Result<&str, BindingError> {
        match self.values.get(&SlotKey::new(owner, name)) {
            Some(SlotValue::Str(s)) => Ok(s),
            _ => Err(missing(name)),
        }
    }

    typed_slot!(number, Number, f64);
    typed_slot!(boolean, Bool, bool);
    typed_slot!(flag, Flag, Rc<Cell<bool>>);
    typed_slot!(bytes, Bytes, Rc<Vec<u8>>);
    typed_slot!(blob, Blob, Rc<BlobContent>);
    typed_slot!(body, Body, Option<Rc<BlobContent>>);
    typed_slot!(value, Value, JsValue);
    typed_slot!(header_list, HeaderList, Rc<RefCell<HeaderList>>);
    typed_slot!(listeners, Listeners, Rc<RefCell<Vec<Listener>>>);
    typed_slot!(handlers, Handlers, Rc<RefCell<Vec<RewriteHandler>>>);

    pub(crate) fn trace(&self, worklist: &mut Vec<u64>) {
        for value in self.values.values() {
            match value {
                SlotValue::Value(JsValue::Object(o)) => worklist.push(o.id),
                SlotValue::Listeners(list) => {
                    for l in list.borrow().iter() {
                        if let JsValue::Object(o) = &l.callback {
                            worklist.push(o.id);
                        }
                    }
                }
                SlotValue::Handlers(list) => {
                    for h in list.borrow().iter() {
                        if let JsValue::Object(o) = &h.handlers {
                            worklist.push(o.id);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn estimated_size(&self) -> usize {
        self.values
            .values()
            .map(|v| {
                std::mem::size_of::<(SlotKey, SlotValue)>()
                    + match v {
                        SlotValue::Str(s) => s.len(),
                        SlotValue::Bytes(b) => b.len(),
                        SlotValue::Blob(b) => b.size(),
                        SlotValue::Body(Some(b)) => b.size(),
                        _ => 0,
                    }
            })
            .sum()
    }
}
