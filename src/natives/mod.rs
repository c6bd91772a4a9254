//! Native classes installed into every realm.

pub(crate) mod blob;
pub(crate) mod buffer;
pub(crate) mod encoding;
pub(crate) mod events;
pub(crate) mod fetch;
pub(crate) mod rewriter;

use crate::error::{BindingError, RegistryError};
use crate::globals::GlobalAttributes;
use crate::realm::{ClassBinding, ClassKind, JsFunction, ObjectData, PropertyDescriptor, Realm};
use crate::registry::{ClassDescriptor, ClassId, SlotKey};
use crate::slots::{InternalSlots, SlotInit, SlotValue};
use crate::types::JsValue;
use std::rc::Rc;

pub const BUN_NAMESPACE: &str = "Bun";

impl Realm {
    pub(crate) fn setup_natives(&mut self) -> Result<(), RegistryError> {
        blob::install(self)?;
        buffer::install(self)?;
        encoding::install(self)?;
        fetch::install(self)?;
        events::install(self)?;
        rewriter::install(self)?;
        Ok(())
    }

    /// Binds every native class as a global, except the namespace members
    /// which go on the `Bun` object.
    pub(crate) fn expose_native_classes(&mut self) {
        let classes: Vec<(String, JsValue)> = self
            .registry
            .iter()
            .filter_map(|(id, desc)| {
                self.class_constructor(id)
                    .map(|ctor| (desc.name().to_string(), ctor))
            })
            .collect();
        let namespace = self.new_object();
        for (name, ctor) in classes {
            if rewriter::NAMESPACE_MEMBERS.contains(&name.as_str()) {
                if let Some(ns) = self.get_object(namespace.id) {
                    ns.borrow_mut().insert_builtin(name, ctor);
                }
            } else {
                self.globals.define(&name, ctor, GlobalAttributes::BUILTIN);
            }
        }
        self.globals
            .define(BUN_NAMESPACE, namespace.into(), GlobalAttributes::BUILTIN);
    }

    /// Registers `descriptor` and builds its constructor and prototype,
    /// chained to the superclass's when there is one.
    pub(crate) fn define_native_class(
        &mut self,
        descriptor: ClassDescriptor,
        construct: impl Fn(&mut Realm, &[JsValue]) -> Result<SlotInit, BindingError> + 'static,
    ) -> Result<ClassId, RegistryError> {
        let parent = descriptor.superclass();
        let name = descriptor.name().to_string();
        let id = self.registry.register(descriptor)?;
        let parent_binding = parent.and_then(|p| self.classes.get(&p));
        let (proto_parent, ctor_parent) = match parent_binding {
            Some(b) => (
                self.get_object(b.prototype.id),
                self.get_object(b.constructor.id),
            ),
            None => (self.object_prototype(), self.function_prototype()),
        };
        // Both chains mirror the class hierarchy: Sub.prototype -> Parent.prototype
        // and Sub -> Parent.

        let mut proto = ObjectData::new();
        proto.prototype = proto_parent;
        proto.class_name = name.clone();
        let prototype = self.allocate(proto);

        let mut ctor = ObjectData::new();
        ctor.prototype = ctor_parent;
        ctor.class_name = "Function".to_string();
        ctor.callable = Some(JsFunction::Class(ClassKind::Native(id)));
        ctor.insert_property(
            "length".to_string(),
            PropertyDescriptor::data(JsValue::Number(0.0), false, false, true),
        );
        ctor.insert_property(
            "name".to_string(),
            PropertyDescriptor::data(JsValue::from(name.as_str()), false, false, true),
        );
        ctor.insert_property(
            "prototype".to_string(),
            // non-writable, like class constructors
            PropertyDescriptor::data(prototype.into(), false, false, false),
        );
        let constructor = self.allocate(ctor);
        if let Some(p) = self.get_object(prototype.id) {
            p.borrow_mut()
                .insert_builtin("constructor".to_string(), constructor.into());
        }
        self.classes.insert(
            id,
            ClassBinding {
                constructor,
                prototype,
                construct: Rc::new(construct),
            },
        );
        Ok(id)
    }

    /// Installs a prototype method that only runs once `this` passed
    /// receiver validation for `id`.
    pub(crate) fn define_method(
        &mut self,
        id: ClassId,
        name: &str,
        arity: usize,
        f: impl Fn(&mut Realm, &JsValue, Rc<InternalSlots>, &[JsValue]) -> Result<JsValue, BindingError>
        + 'static,
    ) {
        let func = self.create_function(JsFunction::native(name, arity, move |realm, this, args| {
            let slots = realm.validate_receiver(this, id)?;
            f(realm, this, slots, args)
        }));
        self.install_on_prototype(id, name, PropertyDescriptor::data(func, true, false, true));
    }

    pub(crate) fn define_getter(
        &mut self,
        id: ClassId,
        name: &str,
        f: impl Fn(&mut Realm, Rc<InternalSlots>) -> Result<JsValue, BindingError> + 'static,
    ) {
        let getter = self.create_function(JsFunction::native(
            &format!("get {name}"),
            0,
            move |realm, this, _args| {
                let slots = realm.validate_receiver(this, id)?;
                f(realm, slots)
            },
        ));
        self.install_on_prototype(
            id,
            name,
            PropertyDescriptor::accessor(getter, JsValue::Undefined, false, true),
        );
    }

    pub(crate) fn define_static(
        &mut self,
        id: ClassId,
        name: &str,
        arity: usize,
        f: impl Fn(&mut Realm, &JsValue, &[JsValue]) -> Result<JsValue, BindingError> + 'static,
    ) {
        let func = self.create_function(JsFunction::native(name, arity, f));
        if let Some(binding) = self.classes.get(&id)
            && let Some(ctor) = self.get_object(binding.constructor.id)
        {
            ctor.borrow_mut().insert_builtin(name.to_string(), func);
        }
    }

    fn install_on_prototype(&mut self, id: ClassId, name: &str, desc: PropertyDescriptor) {
        if let Some(binding) = self.classes.get(&id)
            && let Some(proto) = self.get_object(binding.prototype.id)
        {
            proto.borrow_mut().insert_property(name.to_string(), desc);
        }
    }

    pub(crate) fn slots_of(&self, value: &JsValue, id: ClassId) -> Option<Rc<InternalSlots>> {
        match self.classify_receiver(value, id) {
            crate::receiver::Receiver::Valid(slots) => Some(slots),
            _ => None,
        }
    }

    /// Allocates an instance of native class `id` directly from slot values,
    /// bypassing the constructor.
    pub(crate) fn instantiate(&mut self, id: ClassId, init: SlotInit) -> Result<JsValue, BindingError> {
        let slots = InternalSlots::populate(id, self.registry.get(id), init)?;
        let prototype = self
            .classes
            .get(&id)
            .and_then(|b| self.get_object(b.prototype.id));
        let mut data = ObjectData::new();
        data.prototype = prototype;
        data.class_name = self.registry.get(id).name().to_string();
        data.slots = Some(Rc::new(slots));
        Ok(self.allocate(data).into())
    }

    pub(crate) fn option(
        &mut self,
        options: Option<&JsValue>,
        key: &str,
    ) -> Result<Option<JsValue>, BindingError> {
        match options {
            Some(opts) => {
                let v = self.get(opts, key)?;
                Ok((!v.is_undefined()).then_some(v))
            }
            None => Ok(None),
        }
    }
}

pub(crate) fn slot(owner: ClassId, name: &'static str, value: SlotValue) -> (SlotKey, SlotValue) {
    (SlotKey::new(owner, name), value)
}

pub(crate) fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).cloned().unwrap_or(JsValue::Undefined)
}

pub(crate) fn require_args(
    args: &[JsValue],
    count: usize,
    class: &str,
    method: &str,
) -> Result<(), BindingError> {
    if args.len() >= count {
        return Ok(());
    }
    let noun = if count == 1 { "argument" } else { "arguments" };
    Err(BindingError::type_error(format!(
        "{class}.{method} requires at least {count} {noun}"
    )))
}

/// An options bag: `undefined` and `null` mean none, any other primitive is
/// rejected.
pub(crate) fn options_object(value: &JsValue, context: &str) -> Result<Option<JsValue>, BindingError> {
    match value {
        JsValue::Undefined | JsValue::Null => Ok(None),
        JsValue::Object(_) => Ok(Some(value.clone())),
        _ => Err(BindingError::type_error(format!(
            "{context}: options must be an object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmOptions;

    #[test]
    fn missing_argument_message() {
        let err = require_args(&[], 1, "Headers", "get").unwrap_err();
        assert!(err.is_type_error());
        assert_eq!(err.message(), "Headers.get requires at least 1 argument");
        let err = require_args(&[JsValue::Null], 2, "Headers", "set").unwrap_err();
        assert_eq!(err.message(), "Headers.set requires at least 2 arguments");
        assert!(require_args(&[JsValue::Null], 1, "Headers", "get").is_ok());
    }

    #[test]
    fn options_must_be_objects() {
        assert!(options_object(&JsValue::Undefined, "Blob").unwrap().is_none());
        assert!(options_object(&JsValue::Null, "Blob").unwrap().is_none());
        assert!(options_object(&JsValue::Number(1.0), "Blob").is_err());
    }

    #[test]
    fn every_native_class_has_a_binding() {
        let r = Realm::new(RealmOptions::default()).unwrap();
        for (id, desc) in r.registry().iter() {
            let ctor = r.class_constructor(id).unwrap();
            assert_eq!(r.type_of(&ctor), "function", "{}", desc.name());
        }
        assert!(r.registry().lookup("Transpiler").is_some());
        assert!(!r.globals().contains("Transpiler"));
        assert!(r.globals().contains(BUN_NAMESPACE));
    }

    #[test]
    fn instantiate_skips_the_constructor() {
        let mut r = Realm::new(RealmOptions::default()).unwrap();
        let dom = r.class_id("DOMException").unwrap();
        let ex = r
            .instantiate(
                dom,
                vec![
                    slot(dom, "name", SlotValue::Str("AbortError".into())),
                    slot(dom, "message", SlotValue::Str("stop".into())),
                    slot(dom, "code", SlotValue::Number(20.0)),
                ],
            )
            .unwrap();
        assert!(r.slots_of(&ex, dom).is_some());
        assert_eq!(r.get(&ex, "name").unwrap().to_string(), "AbortError");
        assert!(matches!(r.get(&ex, "code").unwrap(), JsValue::Number(n) if n == 20.0));
    }
}
