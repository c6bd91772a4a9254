use super::{arg, options_object, require_args, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::Realm;
use crate::registry::{ClassDescriptor, ClassId};
use crate::slots::SlotValue;
use crate::types::JsValue;
use super::blob::BlobContent;
use super::fetch::{new_response, response_parts};
use std::cell::RefCell;
use std::rc::Rc;

/// Classes reachable only through the `Bun` namespace.
pub(crate) const NAMESPACE_MEMBERS: &[&str] = &["Transpiler"];

const LOADERS: &[&str] = &["js", "jsx", "ts", "tsx"];
const DEFAULT_LOADER: &str = "tsx";

/// Handlers registered with `on` (selector set) or `onDocument` (none).
#[derive(Debug, Clone)]
pub struct RewriteHandler {
    pub selector: Option<String>,
    pub handlers: JsValue,
}

fn class(realm: &Realm, name: &str) -> Result<ClassId, BindingError> {
    realm
        .class_id(name)
        .ok_or_else(|| BindingError::construction(format!("{name} is not registered")))
}

fn check_loader(loader: String) -> Result<String, BindingError> {
    if LOADERS.contains(&loader.as_str()) {
        Ok(loader)
    } else {
        Err(BindingError::type_error(format!(
            "Expected loader to be one of {}, received \"{loader}\"",
            LOADERS.join(", ")
        )))
    }
}

fn handlers_object(value: &JsValue, method: &str) -> Result<JsValue, BindingError> {
    match value {
        JsValue::Object(_) => Ok(value.clone()),
        _ => Err(BindingError::type_error(format!(
            "HTMLRewriter.{method}: handlers must be an object"
        ))),
    }
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    install_rewriter(realm)?;
    install_transpiler(realm)?;
    Ok(())
}

fn install_rewriter(realm: &mut Realm) -> Result<(), RegistryError> {
    let rewriter = realm.define_native_class(
        ClassDescriptor::new("HTMLRewriter").slots(&["handlers"]),
        |realm, _args| {
            let id = class(realm, "HTMLRewriter")?;
            Ok(vec![slot(
                id,
                "handlers",
                SlotValue::Handlers(Rc::new(RefCell::new(Vec::new()))),
            )])
        },
    )?;
    realm.define_method(rewriter, "on", 2, move |realm, this, slots, args| {
        require_args(args, 2, "HTMLRewriter", "on")?;
        let selector = realm.to_string(&args[0])?;
        if selector.trim().is_empty() {
            return Err(BindingError::type_error("HTMLRewriter.on: selector must not be empty"));
        }
        let handlers = handlers_object(&args[1], "on")?;
        slots.handlers(rewriter, "handlers")?.borrow_mut().push(RewriteHandler {
            selector: Some(selector),
            handlers,
        });
        Ok(this.clone())
    });
    realm.define_method(rewriter, "onDocument", 1, move |_realm, this, slots, args| {
        require_args(args, 1, "HTMLRewriter", "onDocument")?;
        let handlers = handlers_object(&args[0], "onDocument")?;
        slots
            .handlers(rewriter, "handlers")?
            .borrow_mut()
            .push(RewriteHandler { selector: None, handlers });
        Ok(this.clone())
    });
    realm.define_method(rewriter, "transform", 1, move |realm, _this, slots, args| {
        require_args(args, 1, "HTMLRewriter", "transform")?;
        let (status, status_text, headers, body) = response_parts(realm, &args[0])
            .map_err(|_| BindingError::type_error("HTMLRewriter.transform expects a Response"))?;
        let selectors: Vec<String> = slots
            .handlers(rewriter, "handlers")?
            .borrow()
            .iter()
            .filter_map(|h| h.selector.clone())
            .collect();
        let input = body.map(|b| b.text()).unwrap_or_default();
        log::trace!("rewriting {} bytes for {} selectors", input.len(), selectors.len());
        let output = realm
            .host()
            .rewrite_markup(&input, &selectors)
            .map_err(BindingError::type_error)?;
        new_response(
            realm,
            status,
            &status_text,
            headers,
            Some(BlobContent::new(output.into_bytes())),
        )
    });
    Ok(())
}

fn install_transpiler(realm: &mut Realm) -> Result<(), RegistryError> {
    let transpiler = realm.define_native_class(
        ClassDescriptor::new("Transpiler").slots(&["loader"]),
        |realm, args| {
            let id = class(realm, "Transpiler")?;
            let options = options_object(&arg(args, 0), "Failed to construct 'Transpiler'")?;
            let loader = match realm.option(options.as_ref(), "loader")? {
                Some(v) => check_loader(realm.to_string(&v)?)?,
                None => DEFAULT_LOADER.to_string(),
            };
            Ok(vec![slot(id, "loader", SlotValue::Str(loader))])
        },
    )?;
    realm.define_getter(transpiler, "loader", move |_realm, slots| {
        Ok(JsValue::from(slots.str(transpiler, "loader")?))
    });
    realm.define_method(transpiler, "transformSync", 2, move |realm, _this, slots, args| {
        require_args(args, 1, "Transpiler", "transformSync")?;
        let code = realm.to_string(&args[0])?;
        let loader = match arg(args, 1) {
            JsValue::Undefined => slots.str(transpiler, "loader")?.to_string(),
            v => check_loader(realm.to_string(&v)?)?,
        };
        let output = realm
            .host()
            .transpile(&code, &loader)
            .map_err(BindingError::type_error)?;
        Ok(JsValue::from(output))
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmOptions;
    use crate::host::HostCollaborators;
    use crate::natives::BUN_NAMESPACE;

    struct Recording;

    impl HostCollaborators for Recording {
        fn rewrite_markup(&self, input: &str, selectors: &[String]) -> Result<String, String> {
            if input.is_empty() {
                return Err("nothing to rewrite".to_string());
            }
            Ok(format!("{input}|{}", selectors.join(",")))
        }

        fn transpile(&self, code: &str, loader: &str) -> Result<String, String> {
            Ok(format!("/* {loader} */ {code}"))
        }
    }

    fn realm() -> Realm {
        Realm::with_host(RealmOptions::default(), Rc::new(Recording)).unwrap()
    }

    fn response(r: &mut Realm, body: &str) -> JsValue {
        let ctor = r.resolve_identifier("Response").unwrap();
        r.construct(&ctor, &[JsValue::from(body)]).unwrap()
    }

    #[test]
    fn transform_passes_selectors_to_host() {
        let mut r = realm();
        let ctor = r.resolve_identifier("HTMLRewriter").unwrap();
        let rw = r.construct(&ctor, &[]).unwrap();
        let handlers: JsValue = r.new_object().into();
        let chained = r
            .call_method(&rw, "on", &[JsValue::from("div"), handlers.clone()])
            .unwrap();
        assert!(chained.strict_equals(&rw));
        r.call_method(&rw, "onDocument", &[handlers.clone()]).unwrap();
        r.call_method(&rw, "on", &[JsValue::from("a[href]"), handlers]).unwrap();

        let input = response(&mut r, "<div></div>");
        let out = r.call_method(&rw, "transform", &[input]).unwrap();
        let text = r.call_method(&out, "text", &[]).unwrap();
        let text = r.await_promise(&text).unwrap();
        assert_eq!(text.to_string(), "<div></div>|div,a[href]");
    }

    #[test]
    fn transform_errors() {
        let mut r = realm();
        let ctor = r.resolve_identifier("HTMLRewriter").unwrap();
        let rw = r.construct(&ctor, &[]).unwrap();
        let empty = response(&mut r, "");
        assert!(r.call_method(&rw, "transform", &[empty]).unwrap_err().is_type_error());
        let not_response = JsValue::from("<p>");
        assert!(r.call_method(&rw, "transform", &[not_response]).unwrap_err().is_type_error());
        assert!(
            r.call_method(&rw, "on", &[JsValue::from("p"), JsValue::Number(1.0)])
                .unwrap_err()
                .is_type_error()
        );
    }

    #[test]
    fn transpiler_lives_on_namespace() {
        let mut r = realm();
        assert!(r.resolve_identifier("Transpiler").is_err());
        let ns = r.resolve_identifier(BUN_NAMESPACE).unwrap();
        let ctor = r.get(&ns, "Transpiler").unwrap();
        let default = r.construct(&ctor, &[]).unwrap();
        assert_eq!(r.get(&default, "loader").unwrap().to_string(), "tsx");

        let opts = r.create_plain_object(vec![("loader", JsValue::from("ts"))]);
        let t = r.construct(&ctor, &[opts]).unwrap();
        let out = r
            .call_method(&t, "transformSync", &[JsValue::from("let x: number = 1")])
            .unwrap();
        assert_eq!(out.to_string(), "/* ts */ let x: number = 1");
        let out = r
            .call_method(&t, "transformSync", &[JsValue::from("x"), JsValue::from("jsx")])
            .unwrap();
        assert_eq!(out.to_string(), "/* jsx */ x");
        assert!(
            r.call_method(&t, "transformSync", &[JsValue::from("x"), JsValue::from("css")])
                .unwrap_err()
                .is_type_error()
        );
    }
}
