use crate::config::RealmOptions;
use crate::error::{BindingError, RegistryError};
use crate::globals::{GlobalAttributes, GlobalBindingTable, GlobalRead, GlobalWrite};
use crate::host::{HostCollaborators, PassthroughHost};
use crate::registry::{ClassId, ClassRegistry};
use crate::types::{JsObject, JsString, JsSymbol, JsValue, number_ops};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

mod types;
pub use types::*;

mod gc;
pub use gc::{GcReport, HeapStats};
mod jobs;
pub(crate) use jobs::Microtask;

pub(crate) struct ClassBinding {
    pub(crate) constructor: JsObject,
    pub(crate) prototype: JsObject,
    pub(crate) construct: ConstructHook,
}

/// An isolated execution context: its own heap, root object, class registry
/// and global binding table. A realm is confined to the thread that created
/// it; independent realms share nothing.
pub struct Realm {
    options: RealmOptions,
    host: Rc<dyn HostCollaborators>,
    objects: Vec<Option<ObjectRef>>,
    generations: Vec<u32>,
    free_list: Vec<usize>,
    object_prototype: Option<ObjectRef>,
    function_prototype: Option<ObjectRef>,
    promise_prototype: Option<ObjectRef>,
    root: JsObject,
    pub(crate) registry: ClassRegistry,
    pub(crate) classes: FxHashMap<ClassId, ClassBinding>,
    pub(crate) globals: GlobalBindingTable,
    microtasks: VecDeque<Microtask>,
    gc_temp_roots: Vec<JsValue>,
    pinned: Vec<JsValue>,
    next_symbol_id: u64,
    time_origin: DateTime<Utc>,
    gc_runs: usize,
}

fn collected(key: &str) -> BindingError {
    BindingError::type_error(format!(
        "Cannot access properties of a collected object (accessing '{key}')"
    ))
}

pub(crate) fn to_boolean(val: &JsValue) -> bool {
    match val {
        JsValue::Undefined | JsValue::Null => false,
        JsValue::Boolean(b) => *b,
        JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
        JsValue::String(s) => !s.is_empty(),
        JsValue::BigInt(b) => b.value != num_bigint::BigInt::from(0),
        JsValue::Symbol(_) | JsValue::Object(_) => true,
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = |prefix: [&str; 2], radix: u32| {
        prefix
            .iter()
            .find_map(|p| trimmed.strip_prefix(p))
            .map(|digits| {
                i64::from_str_radix(digits, radix)
                    .map(|n| n as f64)
                    .unwrap_or(f64::NAN)
            })
    };
    if let Some(n) = radix(["0x", "0X"], 16)
        .or_else(|| radix(["0o", "0O"], 8))
        .or_else(|| radix(["0b", "0B"], 2))
    {
        return n;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            f64::NAN
        }
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

impl Realm {
    pub fn new(options: RealmOptions) -> Result<Self, RegistryError> {
        Self::with_host(options, Rc::new(PassthroughHost))
    }

    pub fn with_host(
        options: RealmOptions,
        host: Rc<dyn HostCollaborators>,
    ) -> Result<Self, RegistryError> {
        let mut realm = Self {
            options,
            host,
            objects: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            object_prototype: None,
            function_prototype: None,
            promise_prototype: None,
            root: JsObject { id: 0 },
            registry: ClassRegistry::new(),
            classes: FxHashMap::default(),
            globals: GlobalBindingTable::new(),
            microtasks: VecDeque::new(),
            gc_temp_roots: Vec::new(),
            pinned: Vec::new(),
            next_symbol_id: 1,
            time_origin: Utc::now(),
            gc_runs: 0,
        };
        realm.setup_intrinsics();
        realm.setup_natives()?;
        realm.setup_globals();
        realm.install_gc_trigger();
        log::debug!(
            "realm ready: {} classes, {} globals, expose_gc={}",
            realm.registry.len(),
            realm.globals.len(),
            realm.options.expose_gc
        );
        Ok(realm)
    }

    fn setup_intrinsics(&mut self) {
        let object_proto = Rc::new(RefCell::new(ObjectData::new()));
        self.allocate_object_slot(object_proto.clone());
        self.object_prototype = Some(object_proto);

        let mut function_proto = ObjectData::new();
        function_proto.prototype = self.object_prototype.clone();
        function_proto.class_name = "Function".to_string();
        function_proto.callable = Some(JsFunction::native("", 0, |_realm, _this, _args| {
            Ok(JsValue::Undefined)
        }));
        let function_proto = Rc::new(RefCell::new(function_proto));
        self.allocate_object_slot(function_proto.clone());
        self.function_prototype = Some(function_proto);

        let mut root = ObjectData::new();
        root.prototype = self.object_prototype.clone();
        root.class_name = "global".to_string();
        self.root = self.allocate(root);

        let mut promise_proto = ObjectData::new();
        promise_proto.prototype = self.object_prototype.clone();
        promise_proto.class_name = "Promise".to_string();
        let promise_proto = Rc::new(RefCell::new(promise_proto));
        self.allocate_object_slot(promise_proto.clone());
        self.promise_prototype = Some(promise_proto);
        self.setup_promise_prototype();
    }

    fn setup_globals(&mut self) {
        for (name, value) in [
            ("undefined", JsValue::Undefined),
            ("NaN", JsValue::Number(f64::NAN)),
            ("Infinity", JsValue::Number(f64::INFINITY)),
        ] {
            self.globals.define(name, value, GlobalAttributes::FROZEN);
        }

        let root = self.global_object();
        self.globals
            .define("globalThis", root, GlobalAttributes::BUILTIN);

        let getter = self.create_function(JsFunction::native(
            "get self",
            0,
            |realm, _this, _args| {
                Ok(realm
                    .globals
                    .accessor_backing("self")
                    .unwrap_or_else(|| realm.global_object()))
            },
        ));
        let setter = self.create_function(JsFunction::native(
            "set self",
            1,
            |realm, _this, args| {
                let value = args.first().cloned().unwrap_or(JsValue::Undefined);
                realm.globals.set_accessor_backing("self", value);
                Ok(JsValue::Undefined)
            },
        ));
        self.globals
            .define_accessor("self", getter, setter, true, true);

        let object_ctor = self.create_function(JsFunction::native(
            "Object",
            1,
            |realm, _this, args| match args.first() {
                Some(v @ JsValue::Object(_)) => Ok(v.clone()),
                _ => Ok(realm.new_object().into()),
            },
        ));
        let function_ctor = self.create_function(JsFunction::native(
            "Function",
            1,
            |_realm, _this, _args| {
                Err(BindingError::type_error(
                    "Code generation from strings is not supported",
                ))
            },
        ));
        for (ctor, proto) in [
            (&object_ctor, self.object_prototype.clone()),
            (&function_ctor, self.function_prototype.clone()),
        ] {
            if let (JsValue::Object(c), Some(proto)) = (ctor, proto) {
                let proto_id = proto.borrow().id;
                if let (Some(ctor_obj), Some(pid)) = (self.get_object(c.id), proto_id) {
                    ctor_obj.borrow_mut().insert_property(
                        "prototype".to_string(),
                        PropertyDescriptor::data(JsObject { id: pid }.into(), false, false, false),
                    );
                }
                proto
                    .borrow_mut()
                    .insert_builtin("constructor".to_string(), ctor.clone());
            }
        }
        self.globals
            .define("Object", object_ctor, GlobalAttributes::BUILTIN);
        self.globals
            .define("Function", function_ctor, GlobalAttributes::BUILTIN);

        self.expose_native_classes();
    }

    pub fn options(&self) -> &RealmOptions {
        &self.options
    }

    pub fn host(&self) -> Rc<dyn HostCollaborators> {
        self.host.clone()
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn globals(&self) -> &GlobalBindingTable {
        &self.globals
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.registry.lookup_id(name)
    }

    /// The constructor of a registered native class. Unaffected by global
    /// reassignment or deletion.
    pub fn class_constructor(&self, id: ClassId) -> Option<JsValue> {
        self.classes
            .get(&id)
            .map(|binding| JsValue::Object(binding.constructor))
    }

    pub fn global_object(&self) -> JsValue {
        JsValue::Object(self.root)
    }

    pub(crate) fn is_root(&self, obj: JsObject) -> bool {
        obj.id == self.root.id
    }

    pub(crate) fn elapsed_ms(&self) -> f64 {
        (Utc::now() - self.time_origin).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }

    // ---- object allocation ----

    pub(crate) fn allocate(&mut self, data: ObjectData) -> JsObject {
        let obj = Rc::new(RefCell::new(data));
        JsObject {
            id: self.allocate_object_slot(obj),
        }
    }

    pub(crate) fn object_prototype(&self) -> Option<ObjectRef> {
        self.object_prototype.clone()
    }

    pub(crate) fn function_prototype(&self) -> Option<ObjectRef> {
        self.function_prototype.clone()
    }

    /// Roots `values` for the duration of a native operation. Pass the
    /// returned mark to [`Realm::pop_temp_roots`].
    pub(crate) fn push_temp_roots(&mut self, values: &[JsValue]) -> usize {
        let mark = self.gc_temp_roots.len();
        self.gc_temp_roots.extend_from_slice(values);
        mark
    }

    pub(crate) fn pop_temp_roots(&mut self, mark: usize) {
        self.gc_temp_roots.truncate(mark);
    }

    pub fn new_object(&mut self) -> JsObject {
        let mut data = ObjectData::new();
        data.prototype = self.object_prototype.clone();
        self.allocate(data)
    }

    /// `None` once the object has been collected, even if its slot has been
    /// reused since.
    pub fn get_object(&self, id: u64) -> Option<ObjectRef> {
        let idx = gc::slot_index(id);
        if self.generations.get(idx) != Some(&gc::slot_generation(id)) {
            return None;
        }
        self.objects.get(idx).and_then(|slot| slot.clone())
    }

    pub(crate) fn object_ref(&self, value: &JsValue) -> Option<ObjectRef> {
        value.as_object().and_then(|o| self.get_object(o.id))
    }

    pub fn create_function(&mut self, func: JsFunction) -> JsValue {
        let (name, length) = match &func {
            JsFunction::Native(name, arity, _) => (name.clone(), *arity),
            JsFunction::Method { name, .. } => (name.clone(), 0),
            JsFunction::Class(_) => (String::new(), 0),
        };
        let mut data = ObjectData::new();
        data.prototype = self.function_prototype.clone();
        data.callable = Some(func);
        data.class_name = "Function".to_string();
        data.insert_property(
            "length".to_string(),
            PropertyDescriptor::data(JsValue::Number(length as f64), false, false, true),
        );
        data.insert_property(
            "name".to_string(),
            PropertyDescriptor::data(JsValue::from(name), false, false, true),
        );
        self.allocate(data).into()
    }

    pub fn create_array(&mut self, values: Vec<JsValue>) -> JsValue {
        let mut data = ObjectData::new();
        data.prototype = self.object_prototype.clone();
        data.class_name = "Array".to_string();
        data.array_elements = Some(values);
        self.allocate(data).into()
    }

    pub fn create_plain_object(&mut self, entries: Vec<(&str, JsValue)>) -> JsValue {
        let obj = self.new_object();
        if let Some(o) = self.get_object(obj.id) {
            let mut b = o.borrow_mut();
            for (k, v) in entries {
                b.insert_value(k.to_string(), v);
            }
        }
        obj.into()
    }

    pub fn create_symbol(&mut self, description: Option<&str>) -> JsValue {
        let id = self.next_symbol_id;
        self.next_symbol_id += 1;
        JsValue::Symbol(JsSymbol {
            id,
            description: description.map(JsString::from_str),
        })
    }

    pub fn array_elements(&self, value: &JsValue) -> Option<Vec<JsValue>> {
        self.object_ref(value)
            .and_then(|o| o.borrow().array_elements.clone())
    }

    /// Keeps `value` alive across collections until [`Realm::unpin`].
    pub fn pin(&mut self, value: &JsValue) {
        self.pinned.push(value.clone());
    }

    pub fn unpin(&mut self, value: &JsValue) {
        if let Some(pos) = self.pinned.iter().position(|v| v.strict_equals(value)) {
            self.pinned.swap_remove(pos);
        }
    }

    // ---- property access ----

    pub fn get(&mut self, target: &JsValue, key: &str) -> Result<JsValue, BindingError> {
        match target {
            JsValue::Undefined | JsValue::Null => Err(BindingError::type_error(format!(
                "Cannot read properties of {target} (reading '{key}')"
            ))),
            JsValue::Object(o) if self.is_root(*o) => match self.globals.get(key) {
                GlobalRead::Missing => Ok(JsValue::Undefined),
                GlobalRead::Value(v) => Ok(v),
                GlobalRead::Getter(getter) => self.call(&getter, target, &[]),
            },
            JsValue::Object(o) => {
                let Some(obj) = self.get_object(o.id) else {
                    return Err(collected(key));
                };
                let desc = obj.borrow().get_property_descriptor(key);
                match desc {
                    None => Ok(JsValue::Undefined),
                    Some(d) if d.is_accessor_descriptor() => match d.get {
                        Some(getter) if !getter.is_undefined() => self.call(&getter, target, &[]),
                        _ => Ok(JsValue::Undefined),
                    },
                    Some(d) => Ok(d.value.unwrap_or(JsValue::Undefined)),
                }
            }
            JsValue::String(s) if key == "length" => Ok(JsValue::Number(s.len() as f64)),
            _ => Ok(JsValue::Undefined),
        }
    }

    /// Sloppy-mode [[Set]]: writes refused by a non-writable property are
    /// ignored.
    pub fn set(&mut self, target: &JsValue, key: &str, value: JsValue) -> Result<(), BindingError> {
        match target {
            JsValue::Undefined | JsValue::Null => Err(BindingError::type_error(format!(
                "Cannot set properties of {target} (setting '{key}')"
            ))),
            JsValue::Object(o) if self.is_root(*o) => {
                if let GlobalWrite::Setter(setter) = self.globals.set(key, value.clone())
                    && !setter.is_undefined()
                {
                    self.call(&setter, target, &[value])?;
                }
                Ok(())
            }
            JsValue::Object(o) => {
                let Some(obj) = self.get_object(o.id) else {
                    return Err(collected(key));
                };
                let desc = obj.borrow().get_property_descriptor(key);
                match desc {
                    Some(d) if d.is_accessor_descriptor() => {
                        if let Some(setter) = d.set
                            && !setter.is_undefined()
                        {
                            self.call(&setter, target, &[value])?;
                        }
                    }
                    Some(d) if d.writable == Some(false) => {}
                    _ => {
                        obj.borrow_mut().set_own_value(key, value);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn has_property(&self, target: &JsValue, key: &str) -> Result<bool, BindingError> {
        match target {
            JsValue::Object(o) if self.is_root(*o) => Ok(self.globals.contains(key)),
            JsValue::Object(o) => Ok(self
                .get_object(o.id)
                .is_some_and(|obj| obj.borrow().has_property(key))),
            other => Err(BindingError::type_error(format!(
                "Cannot use 'in' operator to search for '{key}' in {other}"
            ))),
        }
    }

    /// The `delete` operator. Returns whether the property is gone.
    pub fn delete_property(&mut self, target: &JsValue, key: &str) -> Result<bool, BindingError> {
        match target {
            JsValue::Undefined | JsValue::Null => Err(BindingError::type_error(format!(
                "Cannot convert undefined or null to object (deleting '{key}')"
            ))),
            JsValue::Object(o) if self.is_root(*o) => Ok(self.globals.delete(key)),
            JsValue::Object(o) => Ok(self
                .get_object(o.id)
                .is_none_or(|obj| obj.borrow_mut().delete_own(key))),
            _ => Ok(true),
        }
    }

    pub fn get_own_property_descriptor(
        &self,
        target: &JsValue,
        key: &str,
    ) -> Option<PropertyDescriptor> {
        match target {
            JsValue::Object(o) if self.is_root(*o) => self.globals.descriptor(key),
            JsValue::Object(o) => self
                .get_object(o.id)
                .and_then(|obj| obj.borrow().get_own_property(key)),
            _ => None,
        }
    }

    pub fn own_enumerable_keys(&self, target: &JsValue) -> Vec<String> {
        match target {
            JsValue::Object(o) if self.is_root(*o) => self.globals.enumerable_keys(),
            JsValue::Object(o) => self
                .get_object(o.id)
                .map(|obj| obj.borrow().own_enumerable_keys())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn get_prototype_of(&self, target: &JsValue) -> JsValue {
        self.object_ref(target)
            .and_then(|o| o.borrow().prototype.clone())
            .and_then(|p| p.borrow().id)
            .map(|id| JsValue::Object(JsObject { id }))
            .unwrap_or(JsValue::Null)
    }

    /// `Object.setPrototypeOf` for ordinary objects.
    pub fn set_prototype_of(&mut self, target: &JsValue, proto: &JsValue) -> Result<(), BindingError> {
        let Some(obj) = self.object_ref(target) else {
            return Err(BindingError::type_error("Object.setPrototypeOf called on non-object"));
        };
        let new_proto = match proto {
            JsValue::Null => None,
            JsValue::Object(_) => self.object_ref(proto),
            other => {
                return Err(BindingError::type_error(format!(
                    "Object prototype may only be an Object or null: {other}"
                )));
            }
        };
        // Chains must stay acyclic: property lookups walk them unbounded.
        let mut cursor = new_proto.clone();
        while let Some(p) = cursor {
            if Rc::ptr_eq(&p, &obj) {
                return Err(BindingError::type_error("Cyclic __proto__ value"));
            }
            cursor = p.borrow().prototype.clone();
        }
        obj.borrow_mut().prototype = new_proto;
        Ok(())
    }

    // ---- identifiers ----

    pub fn resolve_identifier(&mut self, name: &str) -> Result<JsValue, BindingError> {
        if !self.globals.contains(name) {
            return Err(BindingError::Reference(format!("{name} is not defined")));
        }
        let root = self.global_object();
        self.get(&root, name)
    }

    /// `typeof name`; unresolvable names are "undefined" rather than an error.
    pub fn type_of_identifier(&mut self, name: &str) -> Result<&'static str, BindingError> {
        if !self.globals.contains(name) {
            return Ok("undefined");
        }
        let value = self.resolve_identifier(name)?;
        Ok(self.type_of(&value))
    }

    pub fn assign_identifier(&mut self, name: &str, value: JsValue) -> Result<(), BindingError> {
        let root = self.global_object();
        self.set(&root, name, value)
    }

    // ---- calls ----

    pub fn is_callable(&self, value: &JsValue) -> bool {
        self.object_ref(value)
            .is_some_and(|o| o.borrow().callable.is_some())
    }

    pub fn call(
        &mut self,
        func: &JsValue,
        this: &JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, BindingError> {
        let callable = self
            .object_ref(func)
            .and_then(|o| o.borrow().callable.clone());
        let Some(callable) = callable else {
            return Err(BindingError::type_error(format!(
                "{} is not a function",
                self.describe(func)
            )));
        };
        let mark = self.push_temp_roots(&[func.clone(), this.clone()]);
        self.gc_temp_roots.extend_from_slice(args);
        let result = match callable {
            JsFunction::Native(_, _, f) => f(self, this, args),
            JsFunction::Method { home, body, .. } => {
                let call = MethodCall {
                    this: this.clone(),
                    args: args.to_vec(),
                    home,
                };
                body(self, &call)
            }
            JsFunction::Class(kind) => Err(BindingError::ConstructorMisuse(self.class_kind_name(&kind))),
        };
        self.pop_temp_roots(mark);
        result
    }

    pub fn call_method(
        &mut self,
        this: &JsValue,
        name: &str,
        args: &[JsValue],
    ) -> Result<JsValue, BindingError> {
        let func = self.get(this, name)?;
        if !self.is_callable(&func) {
            return Err(BindingError::type_error(format!(
                "{}.{name} is not a function",
                self.describe(this)
            )));
        }
        self.call(&func, this, args)
    }

    pub(crate) fn class_kind_name(&self, kind: &ClassKind) -> String {
        match kind {
            ClassKind::Native(id) => self.registry.get(*id).name().to_string(),
            ClassKind::Script(rec) => rec.name.clone(),
        }
    }

    pub(crate) fn describe(&self, value: &JsValue) -> String {
        match value {
            JsValue::String(s) => format!("\"{s}\""),
            JsValue::Object(_) => match self.object_ref(value) {
                Some(o) if o.borrow().callable.is_some() => "function".to_string(),
                Some(o) => format!("#<{}>", o.borrow().class_name),
                None => "object".to_string(),
            },
            other => other.to_string(),
        }
    }

    // ---- conversions ----

    pub fn type_of(&self, value: &JsValue) -> &'static str {
        if self.is_callable(value) {
            return "function";
        }
        value.primitive_type_tag()
    }

    pub fn to_string(&mut self, value: &JsValue) -> Result<String, BindingError> {
        match value {
            JsValue::Symbol(_) => Err(BindingError::type_error(
                "Cannot convert a Symbol value to a string",
            )),
            JsValue::Object(_) => {
                if let Some(elems) = self.array_elements(value) {
                    let mut parts = Vec::with_capacity(elems.len());
                    for e in &elems {
                        parts.push(if e.is_nullish() {
                            String::new()
                        } else {
                            self.to_string(e)?
                        });
                    }
                    return Ok(parts.join(","));
                }
                Ok("[object Object]".to_string())
            }
            other => Ok(other.to_string()),
        }
    }

    pub fn to_number(&self, value: &JsValue) -> Result<f64, BindingError> {
        match value {
            JsValue::Undefined => Ok(f64::NAN),
            JsValue::Null => Ok(0.0),
            JsValue::Boolean(b) => Ok(*b as u8 as f64),
            JsValue::Number(n) => Ok(*n),
            JsValue::String(s) => Ok(string_to_number(&s.to_rust_string())),
            JsValue::Symbol(_) => Err(BindingError::type_error(
                "Cannot convert a Symbol value to a number",
            )),
            JsValue::BigInt(_) => Err(BindingError::type_error(
                "Cannot convert a BigInt value to a number",
            )),
            JsValue::Object(_) => Ok(f64::NAN),
        }
    }

    /// The script-visible error object for `err`: `{ name, message, code? }`.
    pub fn error_to_value(&mut self, err: &BindingError) -> JsValue {
        if let BindingError::Thrown(v) = err {
            return v.clone();
        }
        let obj = self.new_object();
        if let Some(o) = self.get_object(obj.id) {
            let mut b = o.borrow_mut();
            b.class_name = err.name().to_string();
            b.insert_builtin("name".to_string(), JsValue::from(err.name()));
            b.insert_builtin("message".to_string(), JsValue::from(err.message()));
            if let Some(code) = err.code() {
                b.insert_builtin("code".to_string(), JsValue::from(code));
            }
        }
        obj.into()
    }

    // ---- number formatting shared by the natives ----

    pub(crate) fn number_repr(n: f64) -> String {
        number_ops::to_string(n)
    }
}
