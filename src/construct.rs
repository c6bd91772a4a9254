use crate::error::BindingError;
use crate::realm::{
    ClassKind, JsFunction, MethodCall, ObjectData, ObjectRef, PropertyDescriptor, Realm,
    ScriptBody,
};
use crate::registry::ClassId;
use crate::slots::InternalSlots;
use crate::types::JsValue;
use std::rc::Rc;

/// Computes the initial value of an instance field. Receives the instance,
/// already initialized by every superclass.
pub type FieldInit = Rc<dyn Fn(&mut Realm, &JsValue) -> Result<JsValue, BindingError>>;

/// Maps the subclass constructor's arguments to the arguments of the
/// superclass constructor (the `super(...)` call).
pub type SuperArgs = Rc<dyn Fn(&mut Realm, &[JsValue]) -> Result<Vec<JsValue>, BindingError>>;

pub struct ScriptClassRecord {
    pub name: String,
    // None for a base class, Some(Null) for `extends null`
    pub parent: Option<JsValue>,
    super_args: Option<SuperArgs>,
    fields: Vec<(String, FieldInit)>,
}

/// Builder for a script-defined class.
///
/// ```ignore
/// let ctor = realm.define_class(
///     ScriptClass::new("Upload")
///         .extends(file_ctor)
///         .field("tag", |_realm, _this| Ok("upload".into()))
///         .method("text", |realm, call| realm.call_super(call, "text", &[])),
/// )?;
/// ```
pub struct ScriptClass {
    name: String,
    parent: Option<JsValue>,
    super_args: Option<SuperArgs>,
    fields: Vec<(String, FieldInit)>,
    methods: Vec<(String, ScriptBody)>,
}

impl ScriptClass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            super_args: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: JsValue) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Explicit constructor body for a derived class: returns the arguments
    /// passed to `super(...)`. Without one, arguments are forwarded as is.
    pub fn constructor(
        mut self,
        super_args: impl Fn(&mut Realm, &[JsValue]) -> Result<Vec<JsValue>, BindingError> + 'static,
    ) -> Self {
        self.super_args = Some(Rc::new(super_args));
        self
    }

    pub fn field(
        mut self,
        name: &str,
        init: impl Fn(&mut Realm, &JsValue) -> Result<JsValue, BindingError> + 'static,
    ) -> Self {
        self.fields.push((name.to_string(), Rc::new(init)));
        self
    }

    pub fn method(
        mut self,
        name: &str,
        body: impl Fn(&mut Realm, &MethodCall) -> Result<JsValue, BindingError> + 'static,
    ) -> Self {
        self.methods.push((name.to_string(), Rc::new(body)));
        self
    }
}

impl Realm {
    pub fn define_class(&mut self, class: ScriptClass) -> Result<JsValue, BindingError> {
        let (proto_parent, ctor_parent) = match &class.parent {
            None => (self.object_prototype(), self.function_prototype()),
            Some(JsValue::Null) => (None, self.function_prototype()),
            Some(parent) => {
                if !self.is_constructor(parent) {
                    return Err(BindingError::type_error(format!(
                        "Class extends value {} is not a constructor or null",
                        self.describe(parent)
                    )));
                }
                let parent_proto = self.get(parent, "prototype")?;
                let proto_parent = match &parent_proto {
                    JsValue::Null => None,
                    JsValue::Object(_) => self.object_ref(&parent_proto),
                    other => {
                        return Err(BindingError::type_error(format!(
                            "Class extends value does not have valid prototype property {other}"
                        )));
                    }
                };
                (proto_parent, self.object_ref(parent))
            }
        };

        let mut proto = ObjectData::new();
        proto.prototype = proto_parent;
        let proto = self.allocate(proto);
        let proto_value = JsValue::Object(proto);
        let mark = self.push_temp_roots(std::slice::from_ref(&proto_value));

        let record = ScriptClassRecord {
            name: class.name.clone(),
            parent: class.parent,
            super_args: class.super_args,
            fields: class.fields,
        };
        let mut ctor = ObjectData::new();
        ctor.prototype = ctor_parent;
        ctor.class_name = "Function".to_string();
        ctor.callable = Some(JsFunction::Class(ClassKind::Script(Rc::new(record))));
        ctor.insert_property(
            "length".to_string(),
            PropertyDescriptor::data(JsValue::Number(0.0), false, false, true),
        );
        ctor.insert_property(
            "name".to_string(),
            PropertyDescriptor::data(JsValue::from(class.name.as_str()), false, false, true),
        );
        ctor.insert_property(
            "prototype".to_string(),
            PropertyDescriptor::data(proto_value.clone(), false, false, false),
        );
        let ctor_value = JsValue::Object(self.allocate(ctor));

        for (name, body) in class.methods {
            let method = self.create_function(JsFunction::Method {
                name: name.clone(),
                home: proto,
                body,
            });
            if let Some(p) = self.object_ref(&proto_value) {
                p.borrow_mut().insert_builtin(name, method);
            }
        }
        if let Some(p) = self.object_ref(&proto_value) {
            p.borrow_mut()
                .insert_builtin("constructor".to_string(), ctor_value.clone());
        }
        self.pop_temp_roots(mark);
        log::trace!("defined script class {}", class.name);
        Ok(ctor_value)
    }

    pub fn is_constructor(&self, value: &JsValue) -> bool {
        let Some(obj) = self.object_ref(value) else {
            return false;
        };
        let obj = obj.borrow();
        match &obj.callable {
            Some(JsFunction::Class(_)) => true,
            Some(JsFunction::Native(..)) => obj.has_own_property("prototype"),
            _ => false,
        }
    }

    pub fn construct(&mut self, ctor: &JsValue, args: &[JsValue]) -> Result<JsValue, BindingError> {
        self.construct_with_new_target(ctor, args, ctor)
    }

    /// Runs `ctor`'s construction chain. The instance's prototype comes from
    /// `new_target`, the class `new` was applied to.
    pub fn construct_with_new_target(
        &mut self,
        ctor: &JsValue,
        args: &[JsValue],
        new_target: &JsValue,
    ) -> Result<JsValue, BindingError> {
        if !self.is_constructor(ctor) {
            return Err(BindingError::type_error(format!(
                "{} is not a constructor",
                self.describe(ctor)
            )));
        }
        let callable = self
            .object_ref(ctor)
            .and_then(|o| o.borrow().callable.clone());
        let mut roots = vec![ctor.clone(), new_target.clone()];
        roots.extend_from_slice(args);
        let mark = self.push_temp_roots(&roots);
        let result = match callable {
            Some(JsFunction::Class(ClassKind::Native(id))) => {
                self.construct_native(id, args, new_target)
            }
            Some(JsFunction::Class(ClassKind::Script(record))) => {
                self.construct_script(&record, args, new_target)
            }
            _ => {
                let proto = self.prototype_for(new_target)?;
                let mut data = ObjectData::new();
                data.prototype = proto.or_else(|| self.object_prototype());
                Ok(self.allocate(data).into())
            }
        };
        self.pop_temp_roots(mark);
        result
    }

    fn construct_native(
        &mut self,
        id: ClassId,
        args: &[JsValue],
        new_target: &JsValue,
    ) -> Result<JsValue, BindingError> {
        let descriptor = self.registry.get(id);
        let name = descriptor.name().to_string();
        if !descriptor.is_constructible() {
            return Err(BindingError::type_error(format!("{name} is not a constructor")));
        }
        let Some(binding) = self.classes.get(&id) else {
            return Err(BindingError::construction(format!("{name} has no native binding")));
        };
        let hook = binding.construct.clone();
        let fallback = binding.prototype;
        // Slots are validated before allocation so a failed hook leaves no
        // half-built object behind.
        let init = hook(self, args)?;
        let slots = InternalSlots::populate(id, self.registry.get(id), init)?;
        // new.target decides the prototype; subclasses get theirs here
        let proto = match self.prototype_for(new_target)? {
            Some(p) => Some(p),
            None => self.get_object(fallback.id),
        };
        let mut data = ObjectData::new();
        data.prototype = proto;
        data.class_name = name;
        data.slots = Some(Rc::new(slots));
        Ok(self.allocate(data).into())
    }

    fn construct_script(
        &mut self,
        record: &ScriptClassRecord,
        args: &[JsValue],
        new_target: &JsValue,
    ) -> Result<JsValue, BindingError> {
        let this = match &record.parent {
            Some(parent) if !parent.is_null() => {
                let super_args = match &record.super_args {
                    Some(map) => map(self, args)?,
                    None => args.to_vec(),
                };
                self.construct_with_new_target(parent, &super_args, new_target)?
            }
            // base class, or `extends null`
            _ => {
                let proto = self.prototype_for(new_target)?;
                let mut data = ObjectData::new();
                data.prototype = proto;
                self.allocate(data).into()
            }
        };
        let mark = self.push_temp_roots(std::slice::from_ref(&this));
        for (name, init) in &record.fields {
            let value = match init(self, &this) {
                Ok(v) => v,
                Err(e) => {
                    self.pop_temp_roots(mark);
                    return Err(e);
                }
            };
            if let Some(obj) = self.object_ref(&this) {
                obj.borrow_mut()
                    .insert_property(name.clone(), PropertyDescriptor::data_default(value));
            }
        }
        self.pop_temp_roots(mark);
        Ok(this)
    }

    fn prototype_for(&mut self, new_target: &JsValue) -> Result<Option<ObjectRef>, BindingError> {
        let proto = self.get(new_target, "prototype")?;
        Ok(self.object_ref(&proto))
    }

    /// `super[name]` from inside a method: looked up on the prototype above
    /// the method's home object, with getters run against the current `this`.
    pub fn get_super(&mut self, call: &MethodCall, name: &str) -> Result<JsValue, BindingError> {
        let desc = self
            .get_object(call.home.id)
            .and_then(|home| home.borrow().prototype.clone())
            .and_then(|parent| parent.borrow().get_property_descriptor(name));
        match desc {
            None => Ok(JsValue::Undefined),
            Some(d) if d.is_accessor_descriptor() => match d.get {
                Some(getter) if !getter.is_undefined() => self.call(&getter, &call.this, &[]),
                _ => Ok(JsValue::Undefined),
            },
            Some(d) => Ok(d.value.unwrap_or(JsValue::Undefined)),
        }
    }

    /// `super.name(...args)`. The inherited implementation runs against the
    /// same receiver, so native methods see the instance's own slots.
    pub fn call_super(
        &mut self,
        call: &MethodCall,
        name: &str,
        args: &[JsValue],
    ) -> Result<JsValue, BindingError> {
        let method = self.get_super(call, name)?;
        if !self.is_callable(&method) {
            return Err(BindingError::type_error(format!(
                "(intermediate value).{name} is not a function"
            )));
        }
        self.call(&method, &call.this, args)
    }

    pub fn instance_of(&mut self, value: &JsValue, ctor: &JsValue) -> Result<bool, BindingError> {
        if !self.is_callable(ctor) {
            return Err(BindingError::type_error(
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        let proto = self.get(ctor, "prototype")?;
        let Some(target) = proto.as_object() else {
            return Err(BindingError::type_error(format!(
                "Function has non-object prototype '{proto}' in instanceof check"
            )));
        };
        let mut current = self
            .object_ref(value)
            .and_then(|o| o.borrow().prototype.clone());
        while let Some(p) = current {
            let p = p.borrow();
            if p.id == Some(target.id) {
                return Ok(true);
            }
            current = p.prototype.clone();
        }
        Ok(false)
    }
}
