use super::{arg, options_object, require_args, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::{Realm, to_boolean};
use crate::registry::{ClassDescriptor, ClassId};
use crate::slots::{SlotInit, SlotValue};
use crate::types::JsValue;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// One registration made through `addEventListener`.
#[derive(Debug, Clone)]
pub struct Listener {
    pub event_type: String,
    pub callback: JsValue,
    pub once: bool,
}

impl Listener {
    fn matches(&self, event_type: &str, callback: &JsValue) -> bool {
        self.event_type == event_type && self.callback.strict_equals(callback)
    }
}

/// Legacy numeric codes, keyed by DOMException name.
const DOM_EXCEPTION_CODES: &[(&str, u16)] = &[
    ("IndexSizeError", 1),
    ("HierarchyRequestError", 3),
    ("WrongDocumentError", 4),
    ("InvalidCharacterError", 5),
    ("NoModificationAllowedError", 7),
    ("NotFoundError", 8),
    ("NotSupportedError", 9),
    ("InvalidStateError", 11),
    ("SyntaxError", 12),
    ("InvalidModificationError", 13),
    ("NamespaceError", 14),
    ("InvalidAccessError", 15),
    ("TypeMismatchError", 17),
    ("SecurityError", 18),
    ("NetworkError", 19),
    ("AbortError", 20),
    ("URLMismatchError", 21),
    ("QuotaExceededError", 22),
    ("TimeoutError", 23),
    ("InvalidNodeTypeError", 24),
    ("DataCloneError", 25),
];

pub fn dom_exception_code(name: &str) -> u16 {
    DOM_EXCEPTION_CODES
        .iter()
        .find(|(n, _)| *n == name)
        .map_or(0, |(_, code)| *code)
}

fn class(realm: &Realm, name: &str) -> Result<ClassId, BindingError> {
    realm
        .class_id(name)
        .ok_or_else(|| BindingError::construction(format!("{name} is not registered")))
}

/// Slots shared by Event and its subclasses, plus the init dictionary for the
/// subclass to read its own members from.
fn event_slots(
    realm: &mut Realm,
    args: &[JsValue],
    class_name: &str,
) -> Result<(SlotInit, Option<JsValue>), BindingError> {
    require_args(args, 1, class_name, "constructor")?;
    let event = class(realm, "Event")?;
    let event_type = realm.to_string(&args[0])?;
    let init = options_object(&arg(args, 1), &format!("Failed to construct '{class_name}'"))?;
    let bubbles = realm.option(init.as_ref(), "bubbles")?;
    let cancelable = realm.option(init.as_ref(), "cancelable")?;
    let slots = vec![
        slot(event, "type", SlotValue::Str(event_type)),
        slot(event, "bubbles", SlotValue::Bool(bubbles.as_ref().is_some_and(to_boolean))),
        slot(event, "cancelable", SlotValue::Bool(cancelable.as_ref().is_some_and(to_boolean))),
        slot(event, "defaultPrevented", SlotValue::Flag(Rc::new(Cell::new(false)))),
        slot(event, "timeStamp", SlotValue::Number(realm.elapsed_ms())),
    ];
    Ok((slots, init))
}

fn string_member(realm: &mut Realm, init: Option<&JsValue>, key: &str) -> Result<String, BindingError> {
    match realm.option(init, key)? {
        Some(v) => realm.to_string(&v),
        None => Ok(String::new()),
    }
}

fn number_member(realm: &mut Realm, init: Option<&JsValue>, key: &str) -> Result<f64, BindingError> {
    match realm.option(init, key)? {
        Some(v) => realm.to_number(&v),
        None => Ok(0.0),
    }
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    let event = realm.define_native_class(
        ClassDescriptor::new("Event").slots(&[
            "type",
            "bubbles",
            "cancelable",
            "defaultPrevented",
            "timeStamp",
        ]),
        |realm, args| Ok(event_slots(realm, args, "Event")?.0),
    )?;
    realm.define_getter(event, "type", move |_realm, slots| {
        Ok(JsValue::from(slots.str(event, "type")?))
    });
    for name in ["bubbles", "cancelable"] {
        realm.define_getter(event, name, move |_realm, slots| {
            Ok(JsValue::Boolean(slots.boolean(event, name)?))
        });
    }
    realm.define_getter(event, "defaultPrevented", move |_realm, slots| {
        Ok(JsValue::Boolean(slots.flag(event, "defaultPrevented")?.get()))
    });
    realm.define_getter(event, "timeStamp", move |_realm, slots| {
        Ok(JsValue::Number(slots.number(event, "timeStamp")?))
    });
    realm.define_method(event, "preventDefault", 0, move |_realm, _this, slots, _args| {
        if slots.boolean(event, "cancelable")? {
            slots.flag(event, "defaultPrevented")?.set(true);
        }
        Ok(JsValue::Undefined)
    });

    let custom = realm.define_native_class(
        ClassDescriptor::new("CustomEvent").extends(event).slots(&["detail"]),
        |realm, args| {
            let (mut slots, init) = event_slots(realm, args, "CustomEvent")?;
            let detail = realm.option(init.as_ref(), "detail")?.unwrap_or(JsValue::Null);
            slots.push(slot(class(realm, "CustomEvent")?, "detail", SlotValue::Value(detail)));
            Ok(slots)
        },
    )?;
    realm.define_getter(custom, "detail", move |_realm, slots| slots.value(custom, "detail"));

    let error_event = realm.define_native_class(
        ClassDescriptor::new("ErrorEvent")
            .extends(event)
            .slots(&["message", "filename", "lineno", "colno", "error"]),
        |realm, args| {
            let (mut slots, init) = event_slots(realm, args, "ErrorEvent")?;
            let id = class(realm, "ErrorEvent")?;
            let init = init.as_ref();
            let message = string_member(realm, init, "message")?;
            let filename = string_member(realm, init, "filename")?;
            let lineno = number_member(realm, init, "lineno")?;
            let colno = number_member(realm, init, "colno")?;
            let error = realm.option(init, "error")?.unwrap_or(JsValue::Undefined);
            slots.extend([
                slot(id, "message", SlotValue::Str(message)),
                slot(id, "filename", SlotValue::Str(filename)),
                slot(id, "lineno", SlotValue::Number(lineno)),
                slot(id, "colno", SlotValue::Number(colno)),
                slot(id, "error", SlotValue::Value(error)),
            ]);
            Ok(slots)
        },
    )?;
    for name in ["message", "filename"] {
        realm.define_getter(error_event, name, move |_realm, slots| {
            Ok(JsValue::from(slots.str(error_event, name)?))
        });
    }
    for name in ["lineno", "colno"] {
        realm.define_getter(error_event, name, move |_realm, slots| {
            Ok(JsValue::Number(slots.number(error_event, name)?))
        });
    }
    realm.define_getter(error_event, "error", move |_realm, slots| {
        slots.value(error_event, "error")
    });

    let close = realm.define_native_class(
        ClassDescriptor::new("CloseEvent")
            .extends(event)
            .slots(&["code", "reason", "wasClean"]),
        |realm, args| {
            let (mut slots, init) = event_slots(realm, args, "CloseEvent")?;
            let id = class(realm, "CloseEvent")?;
            let init = init.as_ref();
            let code = number_member(realm, init, "code")?;
            let reason = string_member(realm, init, "reason")?;
            let was_clean = realm.option(init, "wasClean")?;
            slots.extend([
                slot(id, "code", SlotValue::Number(code)),
                slot(id, "reason", SlotValue::Str(reason)),
                slot(id, "wasClean", SlotValue::Bool(was_clean.as_ref().is_some_and(to_boolean))),
            ]);
            Ok(slots)
        },
    )?;
    realm.define_getter(close, "code", move |_realm, slots| {
        Ok(JsValue::Number(slots.number(close, "code")?))
    });
    realm.define_getter(close, "reason", move |_realm, slots| {
        Ok(JsValue::from(slots.str(close, "reason")?))
    });
    realm.define_getter(close, "wasClean", move |_realm, slots| {
        Ok(JsValue::Boolean(slots.boolean(close, "wasClean")?))
    });

    install_event_target(realm, event)?;
    install_dom_exception(realm)?;
    Ok(())
}

fn install_event_target(realm: &mut Realm, event: ClassId) -> Result<(), RegistryError> {
    let target = realm.define_native_class(
        ClassDescriptor::new("EventTarget").slots(&["listeners"]),
        |realm, _args| {
            let id = class(realm, "EventTarget")?;
            Ok(vec![slot(
                id,
                "listeners",
                SlotValue::Listeners(Rc::new(RefCell::new(Vec::new()))),
            )])
        },
    )?;
    realm.define_method(target, "addEventListener", 2, move |realm, _this, slots, args| {
        require_args(args, 2, "EventTarget", "addEventListener")?;
        let event_type = realm.to_string(&args[0])?;
        let callback = args[1].clone();
        if callback.is_nullish() {
            return Ok(JsValue::Undefined);
        }
        let once = match arg(args, 2) {
            opts @ JsValue::Object(_) => to_boolean(&realm.get(&opts, "once")?),
            _ => false,
        };
        let list = slots.listeners(target, "listeners")?;
        let mut list = list.borrow_mut();
        if !list.iter().any(|l| l.matches(&event_type, &callback)) {
            list.push(Listener {
                event_type,
                callback,
                once,
            });
        }
        Ok(JsValue::Undefined)
    });
    realm.define_method(target, "removeEventListener", 2, move |realm, _this, slots, args| {
        require_args(args, 2, "EventTarget", "removeEventListener")?;
        let event_type = realm.to_string(&args[0])?;
        slots
            .listeners(target, "listeners")?
            .borrow_mut()
            .retain(|l| !l.matches(&event_type, &args[1]));
        Ok(JsValue::Undefined)
    });
    realm.define_method(target, "dispatchEvent", 1, move |realm, this, slots, args| {
        require_args(args, 1, "EventTarget", "dispatchEvent")?;
        let ev = args[0].clone();
        let Some(event_slots) = realm.slots_of(&ev, event) else {
            return Err(BindingError::type_error(format!(
                "The \"event\" argument must be an instance of Event. Received {}",
                realm.describe(&ev)
            )));
        };
        let event_type = event_slots.str(event, "type")?.to_string();
        let list = slots.listeners(target, "listeners")?;
        let matching: Vec<Listener> = list
            .borrow()
            .iter()
            .filter(|l| l.event_type == event_type)
            .cloned()
            .collect();
        log::trace!("dispatching {event_type} to {} listeners", matching.len());
        for listener in matching {
            // removed by an earlier listener of this dispatch
            if !list.borrow().iter().any(|l| l.matches(&event_type, &listener.callback)) {
                continue;
            }
            if listener.once {
                list.borrow_mut()
                    .retain(|l| !l.matches(&event_type, &listener.callback));
            }
            if realm.is_callable(&listener.callback) {
                realm.call(&listener.callback, this, std::slice::from_ref(&ev))?;
            } else {
                realm.call_method(&listener.callback, "handleEvent", std::slice::from_ref(&ev))?;
            }
        }
        let prevented = event_slots.flag(event, "defaultPrevented")?.get();
        Ok(JsValue::Boolean(!prevented))
    });
    Ok(())
}

fn install_dom_exception(realm: &mut Realm) -> Result<(), RegistryError> {
    let dom = realm.define_native_class(
        ClassDescriptor::new("DOMException").slots(&["name", "message", "code"]),
        |realm, args| {
            let id = class(realm, "DOMException")?;
            let message = match arg(args, 0) {
                JsValue::Undefined => String::new(),
                v => realm.to_string(&v)?,
            };
            let name = match arg(args, 1) {
                JsValue::Undefined => "Error".to_string(),
                v => realm.to_string(&v)?,
            };
            let code = dom_exception_code(&name) as f64;
            Ok(vec![
                slot(id, "name", SlotValue::Str(name)),
                slot(id, "message", SlotValue::Str(message)),
                slot(id, "code", SlotValue::Number(code)),
            ])
        },
    )?;
    for name in ["name", "message"] {
        realm.define_getter(dom, name, move |_realm, slots| {
            Ok(JsValue::from(slots.str(dom, name)?))
        });
    }
    realm.define_getter(dom, "code", move |_realm, slots| {
        Ok(JsValue::Number(slots.number(dom, "code")?))
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmOptions;
    use crate::realm::JsFunction;

    fn realm() -> Realm {
        Realm::new(RealmOptions::default()).unwrap()
    }

    #[test]
    fn exception_codes() {
        assert_eq!(dom_exception_code("AbortError"), 20);
        assert_eq!(dom_exception_code("DataCloneError"), 25);
        assert_eq!(dom_exception_code("Error"), 0);
    }

    #[test]
    fn event_init_and_prevent_default() {
        let mut r = realm();
        let ctor = r.resolve_identifier("Event").unwrap();
        let init = r.create_plain_object(vec![("cancelable", JsValue::Boolean(true))]);
        let ev = r.construct(&ctor, &[JsValue::from("ping"), init]).unwrap();
        assert_eq!(r.get(&ev, "type").unwrap().to_string(), "ping");
        assert!(matches!(r.get(&ev, "bubbles").unwrap(), JsValue::Boolean(false)));
        r.call_method(&ev, "preventDefault", &[]).unwrap();
        assert!(matches!(r.get(&ev, "defaultPrevented").unwrap(), JsValue::Boolean(true)));

        let plain = r.construct(&ctor, &[JsValue::from("x")]).unwrap();
        r.call_method(&plain, "preventDefault", &[]).unwrap();
        assert!(matches!(r.get(&plain, "defaultPrevented").unwrap(), JsValue::Boolean(false)));
        assert!(r.construct(&ctor, &[]).unwrap_err().is_type_error());
    }

    #[test]
    fn subclass_members() {
        let mut r = realm();
        let custom = r.resolve_identifier("CustomEvent").unwrap();
        let event = r.resolve_identifier("Event").unwrap();
        let init = r.create_plain_object(vec![("detail", JsValue::Number(5.0))]);
        let ev = r.construct(&custom, &[JsValue::from("c"), init]).unwrap();
        assert!(matches!(r.get(&ev, "detail").unwrap(), JsValue::Number(n) if n == 5.0));
        assert!(r.instance_of(&ev, &event).unwrap());
        assert_eq!(r.get(&ev, "type").unwrap().to_string(), "c");

        let close = r.resolve_identifier("CloseEvent").unwrap();
        let init = r.create_plain_object(vec![
            ("code", JsValue::Number(1000.0)),
            ("reason", JsValue::from("bye")),
            ("wasClean", JsValue::Boolean(true)),
        ]);
        let ev = r.construct(&close, &[JsValue::from("close"), init]).unwrap();
        assert!(matches!(r.get(&ev, "code").unwrap(), JsValue::Number(n) if n == 1000.0));
        assert_eq!(r.get(&ev, "reason").unwrap().to_string(), "bye");

        let error_event = r.resolve_identifier("ErrorEvent").unwrap();
        let ev = r.construct(&error_event, &[JsValue::from("error")]).unwrap();
        assert_eq!(r.get(&ev, "message").unwrap().to_string(), "");
        assert!(r.get(&ev, "error").unwrap().is_undefined());
    }

    #[test]
    fn dispatch_runs_listeners_in_order() {
        let mut r = realm();
        let target_ctor = r.resolve_identifier("EventTarget").unwrap();
        let event_ctor = r.resolve_identifier("Event").unwrap();
        let target = r.construct(&target_ctor, &[]).unwrap();
        let log = r.create_array(Vec::new());
        r.assign_identifier("log", log).unwrap();
        let listener = r.create_function(JsFunction::native("l", 1, |realm, this, args| {
            let ty = realm.get(&args[0], "type")?;
            let log = realm.resolve_identifier("log")?;
            let mut items = realm.array_elements(&log).unwrap_or_default();
            items.push(ty);
            items.push(this.clone());
            let next = realm.create_array(items);
            realm.assign_identifier("log", next)?;
            realm.call_method(&args[0], "preventDefault", &[])?;
            Ok(JsValue::Undefined)
        }));
        let once = r.create_plain_object(vec![("once", JsValue::Boolean(true))]);
        r.call_method(&target, "addEventListener", &[JsValue::from("go"), listener.clone(), once])
            .unwrap();
        r.call_method(&target, "addEventListener", &[JsValue::from("go"), listener.clone()])
            .unwrap();

        let init = r.create_plain_object(vec![("cancelable", JsValue::Boolean(true))]);
        let ev = r.construct(&event_ctor, &[JsValue::from("go"), init]).unwrap();
        let result = r.call_method(&target, "dispatchEvent", &[ev]).unwrap();
        assert!(matches!(result, JsValue::Boolean(false)));
        let log = r.resolve_identifier("log").unwrap();
        let items = r.array_elements(&log).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[1].strict_equals(&target));

        let ev = r.construct(&event_ctor, &[JsValue::from("go")]).unwrap();
        r.call_method(&target, "dispatchEvent", &[ev]).unwrap();
        let log = r.resolve_identifier("log").unwrap();
        assert_eq!(r.array_elements(&log).unwrap().len(), 2);

        r.call_method(&target, "removeEventListener", &[JsValue::from("go"), listener])
            .unwrap();
        let not_event: JsValue = r.new_object().into();
        let err = r.call_method(&target, "dispatchEvent", &[not_event]).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn listener_removed_mid_dispatch_is_skipped() {
        let mut r = realm();
        let target_ctor = r.resolve_identifier("EventTarget").unwrap();
        let event_ctor = r.resolve_identifier("Event").unwrap();
        let target = r.construct(&target_ctor, &[]).unwrap();
        let late = r.create_function(JsFunction::native("late", 1, |realm, _this, _args| {
            realm.assign_identifier("lateRan", JsValue::Boolean(true))?;
            Ok(JsValue::Undefined)
        }));
        r.assign_identifier("late", late.clone()).unwrap();
        let early = r.create_function(JsFunction::native("early", 1, |realm, this, _args| {
            let late = realm.resolve_identifier("late")?;
            realm.call_method(this, "removeEventListener", &[JsValue::from("go"), late])?;
            Ok(JsValue::Undefined)
        }));
        r.call_method(&target, "addEventListener", &[JsValue::from("go"), early])
            .unwrap();
        r.call_method(&target, "addEventListener", &[JsValue::from("go"), late])
            .unwrap();

        let ev = r.construct(&event_ctor, &[JsValue::from("go")]).unwrap();
        let result = r.call_method(&target, "dispatchEvent", &[ev]).unwrap();
        assert!(matches!(result, JsValue::Boolean(true)));
        assert_eq!(r.type_of_identifier("lateRan").unwrap(), "undefined");
    }

    #[test]
    fn dom_exception_fields() {
        let mut r = realm();
        let ctor = r.resolve_identifier("DOMException").unwrap();
        let ex = r
            .construct(&ctor, &[JsValue::from("late"), JsValue::from("TimeoutError")])
            .unwrap();
        assert_eq!(r.get(&ex, "message").unwrap().to_string(), "late");
        assert!(matches!(r.get(&ex, "code").unwrap(), JsValue::Number(n) if n == 23.0));
        let plain = r.construct(&ctor, &[]).unwrap();
        assert_eq!(r.get(&plain, "name").unwrap().to_string(), "Error");
    }
}
