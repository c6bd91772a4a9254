//! End-to-end scenarios against a fresh realm, written the way script code
//! would exercise the globals.

use crate::construct::ScriptClass;
use crate::error::{BindingError, ERR_INVALID_THIS};
use crate::gc_gate::GC_GLOBAL;
use crate::natives::BUN_NAMESPACE;
use crate::{JsValue, Realm, RealmOptions};

fn realm() -> Realm {
    Realm::new(RealmOptions::default()).unwrap()
}

fn global(r: &mut Realm, name: &str) -> JsValue {
    r.resolve_identifier(name).unwrap()
}

fn number(v: &JsValue) -> f64 {
    match v {
        JsValue::Number(n) => *n,
        other => panic!("expected a number, got {other}"),
    }
}

fn file_options(r: &mut Realm, extra: Vec<(&str, JsValue)>) -> JsValue {
    let mut entries = vec![("type", JsValue::from("text/plain;charset=utf-8"))];
    entries.extend(extra);
    r.create_plain_object(entries)
}

fn foo_parts(r: &mut Realm) -> JsValue {
    r.create_array(vec![JsValue::from("foo")])
}

#[test]
fn form_data_rejects_bad_receivers() {
    let mut r = realm();
    let request = global(&mut r, "Request");
    let proto = r.get(&request, "prototype").unwrap();
    let form_data = r.get(&proto, "formData").unwrap();
    let boop_class = r.define_class(ScriptClass::new("Boop")).unwrap();
    let boop = r.construct(&boop_class, &[]).unwrap();

    let cases = [
        (JsValue::Undefined, "Expected this to be instanceof Request".to_string()),
        (
            JsValue::Null,
            "Expected this to be instanceof Request, but received null".to_string(),
        ),
        (
            boop,
            "Expected this to be instanceof Request, but received an instance of Boop".to_string(),
        ),
        (
            JsValue::from("hellooo"),
            "Expected this to be instanceof Request, but received type string ('hellooo')".to_string(),
        ),
    ];
    for (this, message) in cases {
        let err = r.call(&form_data, &this, &[]).unwrap_err();
        assert!(matches!(err, BindingError::InvalidThis(_)));
        assert_eq!(err.code(), Some(ERR_INVALID_THIS));
        assert_eq!(err.name(), "TypeError");
        assert_eq!(err.message(), message);

        let thrown = r.error_to_value(&err);
        assert_eq!(r.get(&thrown, "code").unwrap().to_string(), ERR_INVALID_THIS);
        assert_eq!(r.get(&thrown, "name").unwrap().to_string(), "TypeError");
    }
}

fn minimal_args(r: &mut Realm, class: &str) -> Vec<JsValue> {
    match class {
        "Event" | "CustomEvent" | "ErrorEvent" | "CloseEvent" => vec![JsValue::from("ping")],
        "File" => vec![foo_parts(r), JsValue::from("foo.txt")],
        "Request" => vec![JsValue::from("https://example.com")],
        _ => Vec::new(),
    }
}

#[test]
fn every_registered_class_is_extendable() {
    let mut r = realm();
    let object = global(&mut r, "Object");
    let function = global(&mut r, "Function");
    let classes: Vec<_> = r
        .registry()
        .iter()
        .map(|(id, desc)| (id, desc.name().to_string()))
        .collect();
    assert!(classes.len() >= 16);

    for (id, name) in classes {
        let class = r.class_constructor(id).unwrap();
        let sub = r.define_class(ScriptClass::new("Sub").extends(class.clone())).unwrap();
        let args = minimal_args(&mut r, &name);
        let instance = r.construct(&sub, &args).unwrap();

        assert!(r.instance_of(&instance, &sub).unwrap(), "{name}");
        let ancestors = r.registry().ancestry(id);
        for ancestor in ancestors {
            let ctor = r.class_constructor(ancestor).unwrap();
            assert!(r.instance_of(&instance, &ctor).unwrap(), "{name}");
        }
        assert!(r.instance_of(&instance, &object).unwrap(), "{name}");
        assert!(!r.instance_of(&instance, &function).unwrap(), "{name}");
        assert!(r.validate_receiver(&instance, id).is_ok(), "{name}");
        let proto = r.get(&class, "prototype").unwrap();
        assert_eq!(r.type_of(&proto), "object", "{name}");
    }
}

#[test]
fn request_is_constructible_from_an_object_with_url() {
    let mut r = realm();
    let request = global(&mut r, "Request");
    let init = r.create_plain_object(vec![("url", JsValue::from("https://example.com"))]);
    let req = r.construct(&request, &[init]).unwrap();
    assert!(r.instance_of(&req, &request).unwrap());
    assert_eq!(r.get(&req, "url").unwrap().to_string(), "https://example.com");
}

#[test]
fn class_globals_are_writable() {
    let mut r = realm();
    let root = r.global_object();
    for name in [
        "TextDecoder",
        "Request",
        "Response",
        "Headers",
        "Buffer",
        "Event",
        "DOMException",
        "EventTarget",
        "ErrorEvent",
        "CustomEvent",
        "CloseEvent",
        "File",
    ] {
        let class = global(&mut r, name);
        r.set(&root, name, JsValue::Number(123.0)).unwrap();
        assert_eq!(number(&r.get(&root, name).unwrap()), 123.0);
        r.set(&root, name, class.clone()).unwrap();
        assert!(r.get(&root, name).unwrap().strict_equals(&class));
    }
}

#[test]
fn class_names() {
    let mut r = realm();
    let bun = global(&mut r, BUN_NAMESPACE);
    for name in [
        "Blob",
        "TextDecoder",
        "TextEncoder",
        "Request",
        "Response",
        "Headers",
        "HTMLRewriter",
        "Buffer",
        "File",
    ] {
        let class = global(&mut r, name);
        assert_eq!(r.get(&class, "name").unwrap().to_string(), name);
    }
    let transpiler = r.get(&bun, "Transpiler").unwrap();
    assert_eq!(r.get(&transpiler, "name").unwrap().to_string(), "Transpiler");
}

#[test]
fn file_construction() {
    let mut r = realm();
    let file_class = global(&mut r, "File");

    let parts = foo_parts(&mut r);
    let opts = file_options(&mut r, Vec::new());
    let file = r.construct(&file_class, &[parts, JsValue::from("bar.txt"), opts]).unwrap();
    assert_eq!(r.get(&file, "name").unwrap().to_string(), "bar.txt");
    assert_eq!(r.get(&file, "type").unwrap().to_string(), "text/plain;charset=utf-8");
    assert_eq!(number(&r.get(&file, "size").unwrap()), 3.0);
    assert!(number(&r.get(&file, "lastModified").unwrap()) > 0.0);

    let empty = r.create_array(Vec::new());
    let opts = file_options(&mut r, Vec::new());
    let file = r.construct(&file_class, &[empty, JsValue::from("empty.txt"), opts]).unwrap();
    assert_eq!(r.get(&file, "name").unwrap().to_string(), "empty.txt");
    assert_eq!(number(&r.get(&file, "size").unwrap()), 0.0);

    let parts = foo_parts(&mut r);
    let opts = file_options(&mut r, vec![("lastModified", JsValue::Number(123.0))]);
    let file = r.construct(&file_class, &[parts, JsValue::from("bar.txt"), opts]).unwrap();
    assert_eq!(number(&r.get(&file, "lastModified").unwrap()), 123.0);

    let parts = foo_parts(&mut r);
    let file = r.construct(&file_class, &[parts, JsValue::Undefined]).unwrap();
    assert_eq!(r.get(&file, "name").unwrap().to_string(), "undefined");
    assert_eq!(r.get(&file, "type").unwrap().to_string(), "");
    assert_eq!(number(&r.get(&file, "size").unwrap()), 3.0);
    assert!(number(&r.get(&file, "lastModified").unwrap()) > 0.0);
}

#[test]
fn file_rejects_invalid_arguments() {
    let mut r = realm();
    let file_class = global(&mut r, "File");
    let symbol = r.create_symbol(None);
    let invalid: Vec<Vec<JsValue>> = vec![
        vec![],
        vec![JsValue::Undefined],
        vec![JsValue::Null],
        vec![symbol.clone(), JsValue::from("foo")],
        vec![symbol.clone(), symbol.clone(), symbol],
    ];
    for args in invalid {
        let err = r.construct(&file_class, &args).unwrap_err();
        assert!(err.is_type_error(), "{args:?}");
    }
}

#[test]
fn file_without_new() {
    let mut r = realm();
    let file_class = global(&mut r, "File");
    let err = r.call(&file_class, &JsValue::Undefined, &[]).unwrap_err();
    assert_eq!(err.name(), "TypeError");
    assert_eq!(err.message(), "Class constructor File cannot be invoked without 'new'");
}

#[test]
fn file_instanceof() {
    let mut r = realm();
    let file_class = global(&mut r, "File");
    let blob_class = global(&mut r, "Blob");
    let object = global(&mut r, "Object");
    let function = global(&mut r, "Function");

    let parts = foo_parts(&mut r);
    let opts = file_options(&mut r, Vec::new());
    let file = r.construct(&file_class, &[parts, JsValue::from("bar.txt"), opts]).unwrap();
    assert!(r.instance_of(&file, &file_class).unwrap());
    assert!(r.instance_of(&file, &blob_class).unwrap());
    assert!(r.instance_of(&file, &object).unwrap());
    assert!(!r.instance_of(&file, &function).unwrap());

    let parts = foo_parts(&mut r);
    let opts = file_options(&mut r, Vec::new());
    let blob = r.construct(&blob_class, &[parts, opts]).unwrap();
    assert!(!r.instance_of(&blob, &file_class).unwrap());
}

#[test]
fn file_subclass_with_super_text() {
    let mut r = realm();
    let file_class = global(&mut r, "File");
    let blob_class = global(&mut r, "Blob");
    let object = global(&mut r, "Object");
    let function = global(&mut r, "Function");
    let foo = r
        .define_class(
            ScriptClass::new("Foo")
                .extends(file_class.clone())
                .constructor(|_realm, args| Ok(args.to_vec()))
                .method("bar", |_realm, _call| Ok(JsValue::Boolean(true)))
                .method("text", |realm, call| realm.call_super(call, "text", &[])),
        )
        .unwrap();

    let parts = foo_parts(&mut r);
    let opts = file_options(&mut r, Vec::new());
    let instance = r.construct(&foo, &[parts, JsValue::from("bar.txt"), opts]).unwrap();
    for ancestor in [&file_class, &blob_class, &object, &foo] {
        assert!(r.instance_of(&instance, ancestor).unwrap());
    }
    assert!(!r.instance_of(&instance, &function).unwrap());
    assert!(matches!(r.call_method(&instance, "bar", &[]).unwrap(), JsValue::Boolean(true)));
    assert_eq!(r.get(&instance, "name").unwrap().to_string(), "bar.txt");
    assert_eq!(r.get(&instance, "type").unwrap().to_string(), "text/plain;charset=utf-8");
    assert_eq!(number(&r.get(&instance, "size").unwrap()), 3.0);
    assert!(number(&r.get(&instance, "lastModified").unwrap()) >= 0.0);

    let pending = r.call_method(&instance, "text", &[]).unwrap();
    assert_eq!(r.await_promise(&pending).unwrap().to_string(), "foo");
}

#[test]
fn globals_are_deletable() {
    let mut r = realm();
    let root = r.global_object();
    for name in [
        "Blob",
        "File",
        "TextDecoder",
        "TextEncoder",
        "Request",
        "Response",
        "Headers",
        "Buffer",
        "Event",
        "EventTarget",
        "ErrorEvent",
        "CustomEvent",
        "CloseEvent",
        "DOMException",
        "HTMLRewriter",
        BUN_NAMESPACE,
        "self",
    ] {
        assert!(r.has_property(&root, name).unwrap(), "{name}");
        assert!(r.delete_property(&root, name).unwrap(), "{name}");
        assert!(!r.has_property(&root, name).unwrap(), "{name}");
        assert_eq!(r.type_of_identifier(name).unwrap(), "undefined");
        assert!(r.resolve_identifier(name).is_err());
    }
    assert!(!r.delete_property(&root, "undefined").unwrap());
    assert!(r.has_property(&root, "undefined").unwrap());
}

#[test]
fn self_is_an_accessor() {
    let mut r = realm();
    let root = r.global_object();
    let function = global(&mut r, "Function");
    let desc = r.get_own_property_descriptor(&root, "self").unwrap();
    let getter = desc.get.clone().unwrap();
    let setter = desc.set.clone().unwrap();
    assert!(r.instance_of(&getter, &function).unwrap());
    assert!(r.instance_of(&setter, &function).unwrap());
    assert_eq!(desc.enumerable, Some(true));
    assert_eq!(desc.configurable, Some(true));
    assert!(r.get(&root, "self").unwrap().strict_equals(&root));
    let this_global = global(&mut r, "globalThis");
    assert!(this_global.strict_equals(&root));
}

#[test]
fn native_argument_errors_are_type_errors() {
    let mut r = realm();
    let request = global(&mut r, "Request");
    let init = r.create_plain_object(vec![("body", JsValue::from("123"))]);
    let err = r
        .construct(&request, &[JsValue::from("http://localhost"), init])
        .unwrap_err();
    assert!(err.is_type_error());
    assert_eq!(err.message(), "Request with GET/HEAD method cannot have body.");

    let headers = global(&mut r, "Headers");
    let h = r.construct(&headers, &[]).unwrap();
    assert!(r.call_method(&h, "get", &[]).unwrap_err().is_type_error());
}

#[test]
fn gc_is_absent_by_default() {
    let mut r = realm();
    let root = r.global_object();
    assert_eq!(r.type_of_identifier(GC_GLOBAL).unwrap(), "undefined");
    assert!(!r.has_property(&root, GC_GLOBAL).unwrap());
    assert!(r.get(&root, GC_GLOBAL).unwrap().is_undefined());
}

#[test]
fn gc_when_exposed() {
    let mut r = Realm::new(RealmOptions::new().expose_gc(true)).unwrap();
    let root = r.global_object();
    assert_eq!(r.type_of_identifier(GC_GLOBAL).unwrap(), "function");
    let gc = global(&mut r, GC_GLOBAL);
    assert!(gc.strict_equals(&r.get(&root, GC_GLOBAL).unwrap()));

    for _ in 0..100 {
        r.create_array(vec![JsValue::Undefined; 1000]);
    }
    let before = r.heap_stats().heap_used as i64;
    r.call(&gc, &JsValue::Undefined, &[]).unwrap();
    let after = r.heap_stats().heap_used as i64;
    assert!(before - after >= 0);
}

#[test]
fn realms_on_separate_threads_are_independent() {
    let handles: Vec<_> = (0..2)
        .map(|i| {
            std::thread::spawn(move || {
                let mut r = realm();
                let root = r.global_object();
                if i == 0 {
                    r.delete_property(&root, "Blob").unwrap();
                }
                r.has_property(&root, "Blob").unwrap()
            })
        })
        .collect();
    let present: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(present, vec![false, true]);
}
