use super::blob::BlobContent;
use super::{arg, options_object, require_args, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::Realm;
use crate::registry::{ClassDescriptor, ClassId};
use crate::slots::{InternalSlots, SlotValue};
use crate::types::{JsValue, number_ops};
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").expect("valid pattern"));
static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid pattern"));

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Ordered header list. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

fn check_name(name: &str) -> Result<String, BindingError> {
    if !TOKEN.is_match(name) {
        return Err(BindingError::type_error(format!(
            "Invalid header name: '{name}'"
        )));
    }
    Ok(name.to_ascii_lowercase())
}

fn check_value(name: &str, value: &str) -> Result<String, BindingError> {
    let value = value.trim_matches([' ', '\t', '\r', '\n']);
    if value.contains(['\r', '\n', '\0']) {
        return Err(BindingError::type_error(format!(
            "Invalid header value for '{name}'"
        )));
    }
    Ok(value.to_string())
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values for `name` joined with `", "`.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let values: Vec<&str> = self
            .entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    pub fn has(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    pub fn append(&mut self, name: &str, value: &str) -> Result<(), BindingError> {
        let lower = check_name(name)?;
        let value = check_value(name, value)?;
        self.entries.push((lower, value));
        Ok(())
    }

    /// Replaces every value of `name` with `value`, keeping the position of
    /// the first occurrence.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), BindingError> {
        let lower = check_name(name)?;
        let value = check_value(name, value)?;
        match self.entries.iter().position(|(n, _)| *n == lower) {
            Some(first) => {
                self.entries[first].1 = value;
                // drop later duplicates only
                let mut idx = 0;
                self.entries.retain(|(n, _)| {
                    let keep = idx <= first || *n != lower;
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((lower, value)),
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<(), BindingError> {
        let lower = check_name(name)?;
        self.entries.retain(|(n, _)| *n != lower);
        Ok(())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn class(realm: &Realm, name: &str) -> Result<ClassId, BindingError> {
    realm
        .class_id(name)
        .ok_or_else(|| BindingError::construction(format!("{name} is not registered")))
}

/// Copies a HeadersInit (Headers, array of pairs, or plain object) into
/// `list`.
fn fill_headers(realm: &mut Realm, list: &mut HeaderList, init: &JsValue) -> Result<(), BindingError> {
    match init {
        JsValue::Undefined | JsValue::Null => Ok(()),
        JsValue::Object(_) => {
            let headers = class(realm, "Headers")?;
            if let Some(slots) = realm.slots_of(init, headers) {
                let other = slots.header_list(headers, "headerList")?;
                for (n, v) in other.borrow().entries() {
                    list.append(n, v)?;
                }
                return Ok(());
            }
            if let Some(pairs) = realm.array_elements(init) {
                for pair in &pairs {
                    let items = realm.array_elements(pair).unwrap_or_default();
                    if items.len() != 2 {
                        return Err(BindingError::type_error(
                            "Header pairs must contain exactly 2 items",
                        ));
                    }
                    let name = realm.to_string(&items[0])?;
                    let value = realm.to_string(&items[1])?;
                    list.append(&name, &value)?;
                }
                return Ok(());
            }
            for key in realm.own_enumerable_keys(init) {
                let v = realm.get(init, &key)?;
                let value = realm.to_string(&v)?;
                list.append(&key, &value)?;
            }
            Ok(())
        }
        _ => Err(BindingError::type_error(
            "Failed to construct 'Headers': The provided value is not of type 'HeadersInit'.",
        )),
    }
}

pub(crate) fn new_headers(realm: &mut Realm, list: HeaderList) -> Result<JsValue, BindingError> {
    let id = class(realm, "Headers")?;
    realm.instantiate(
        id,
        vec![slot(id, "headerList", SlotValue::HeaderList(Rc::new(RefCell::new(list))))],
    )
}

/// Body bytes for a BodyInit, with the content type it implies.
fn extract_body(
    realm: &mut Realm,
    body: &JsValue,
) -> Result<Option<(BlobContent, Option<String>)>, BindingError> {
    match body {
        JsValue::Undefined | JsValue::Null => Ok(None),
        JsValue::String(s) => Ok(Some((
            BlobContent::new(s.to_rust_string().into_bytes()),
            Some("text/plain;charset=UTF-8".to_string()),
        ))),
        _ => {
            if let Some(blob) = realm.class_id("Blob")
                && let Some(slots) = realm.slots_of(body, blob)
            {
                let mime = slots.str(blob, "type")?.to_string();
                let content = slots.blob(blob, "content")?;
                return Ok(Some((content.as_ref().clone(), (!mime.is_empty()).then_some(mime))));
            }
            if let Some(bytes) = super::buffer::bytes_of(realm, body) {
                return Ok(Some((BlobContent::new(bytes.as_ref().clone()), None)));
            }
            let text = realm.to_string(body)?;
            Ok(Some((
                BlobContent::new(text.into_bytes()),
                Some("text/plain;charset=UTF-8".to_string()),
            )))
        }
    }
}

fn normalize_method(method: &str) -> Result<String, BindingError> {
    if !TOKEN.is_match(method) {
        return Err(BindingError::type_error(format!(
            "'{method}' is not a valid HTTP method."
        )));
    }
    let upper = method.to_ascii_uppercase();
    if ["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"].contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Ok(method.to_string())
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit) =>
            {
                let digit = |b: u8| (b as char).to_digit(16).unwrap_or(0) as u8;
                out.push(digit(bytes[i + 1]) << 4 | digit(bytes[i + 2]));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn parse_urlencoded(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn header_list_of(realm: &Realm, headers: &JsValue) -> Result<Rc<RefCell<HeaderList>>, BindingError> {
    let id = class(realm, "Headers")?;
    match realm.slots_of(headers, id) {
        Some(slots) => slots.header_list(id, "headerList"),
        None => Err(BindingError::type_error("headers slot does not hold a Headers object")),
    }
}

fn body_text(slots: &InternalSlots, owner: ClassId) -> Result<String, BindingError> {
    Ok(slots
        .body(owner, "body")?
        .map(|b| b.text())
        .unwrap_or_default())
}

/// Builds a Response from parts without running the constructor's checks.
pub(crate) fn new_response(
    realm: &mut Realm,
    status: f64,
    status_text: &str,
    headers: HeaderList,
    body: Option<BlobContent>,
) -> Result<JsValue, BindingError> {
    let id = class(realm, "Response")?;
    let headers = new_headers(realm, headers)?;
    realm.instantiate(
        id,
        vec![
            slot(id, "status", SlotValue::Number(status)),
            slot(id, "statusText", SlotValue::Str(status_text.to_string())),
            slot(id, "headers", SlotValue::Value(headers)),
            slot(id, "body", SlotValue::Body(body.map(Rc::new))),
        ],
    )
}

pub(crate) fn response_parts(
    realm: &Realm,
    response: &JsValue,
) -> Result<(f64, String, HeaderList, Option<Rc<BlobContent>>), BindingError> {
    let id = class(realm, "Response")?;
    let slots = realm.validate_receiver(response, id)?;
    let headers = header_list_of(realm, &slots.value(id, "headers")?)?;
    let list = headers.borrow().clone();
    Ok((
        slots.number(id, "status")?,
        slots.str(id, "statusText")?.to_string(),
        list,
        slots.body(id, "body")?,
    ))
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    install_headers(realm)?;
    install_request(realm)?;
    install_response(realm)?;
    Ok(())
}

fn install_headers(realm: &mut Realm) -> Result<(), RegistryError> {
    let headers = realm.define_native_class(
        ClassDescriptor::new("Headers").slots(&["headerList"]),
        |realm, args| {
            let id = class(realm, "Headers")?;
            let mut list = HeaderList::new();
            fill_headers(realm, &mut list, &arg(args, 0))?;
            Ok(vec![slot(
                id,
                "headerList",
                SlotValue::HeaderList(Rc::new(RefCell::new(list))),
            )])
        },
    )?;
    realm.define_method(headers, "get", 1, move |realm, _this, slots, args| {
        require_args(args, 1, "Headers", "get")?;
        let name = realm.to_string(&args[0])?;
        let list = slots.header_list(headers, "headerList")?;
        let value = list.borrow().get(&name);
        Ok(value.map_or(JsValue::Null, JsValue::from))
    });
    realm.define_method(headers, "has", 1, move |realm, _this, slots, args| {
        require_args(args, 1, "Headers", "has")?;
        let name = realm.to_string(&args[0])?;
        let list = slots.header_list(headers, "headerList")?;
        let found = list.borrow().has(&name);
        Ok(JsValue::Boolean(found))
    });
    realm.define_method(headers, "set", 2, move |realm, _this, slots, args| {
        require_args(args, 2, "Headers", "set")?;
        let name = realm.to_string(&args[0])?;
        let value = realm.to_string(&args[1])?;
        slots
            .header_list(headers, "headerList")?
            .borrow_mut()
            .set(&name, &value)?;
        Ok(JsValue::Undefined)
    });
    realm.define_method(headers, "append", 2, move |realm, _this, slots, args| {
        require_args(args, 2, "Headers", "append")?;
        let name = realm.to_string(&args[0])?;
        let value = realm.to_string(&args[1])?;
        slots
            .header_list(headers, "headerList")?
            .borrow_mut()
            .append(&name, &value)?;
        Ok(JsValue::Undefined)
    });
    realm.define_method(headers, "delete", 1, move |realm, _this, slots, args| {
        require_args(args, 1, "Headers", "delete")?;
        let name = realm.to_string(&args[0])?;
        slots
            .header_list(headers, "headerList")?
            .borrow_mut()
            .delete(&name)?;
        Ok(JsValue::Undefined)
    });
    Ok(())
}

fn install_request(realm: &mut Realm) -> Result<(), RegistryError> {
    let request = realm.define_native_class(
        ClassDescriptor::new("Request").slots(&["url", "method", "headers", "body"]),
        |realm, args| {
            require_args(args, 1, "Request", "constructor")?;
            let id = class(realm, "Request")?;
            let input = &args[0];
            let mut list = HeaderList::new();
            let mut method = "GET".to_string();
            let mut body: Option<Rc<BlobContent>> = None;
            let url = if let Some(source) = realm.slots_of(input, id) {
                method = source.str(id, "method")?.to_string();
                body = source.body(id, "body")?;
                let source_headers = header_list_of(realm, &source.value(id, "headers")?)?;
                list = source_headers.borrow().clone();
                source.str(id, "url")?.to_string()
            } else if input.is_object() && !realm.is_callable(input) {
                let url = realm.get(input, "url")?;
                realm.to_string(&url)?
            } else {
                realm.to_string(input)?
            };
            if !URL_SCHEME.is_match(&url) {
                return Err(BindingError::type_error(format!(
                    "Failed to parse URL from {url}"
                )));
            }

            let init = options_object(&arg(args, 1), "Failed to construct 'Request'")?;
            if let Some(m) = realm.option(init.as_ref(), "method")? {
                method = normalize_method(&realm.to_string(&m)?)?;
            }
            if let Some(h) = realm.option(init.as_ref(), "headers")? {
                list = HeaderList::new();
                fill_headers(realm, &mut list, &h)?;
            }
            if let Some(b) = realm.option(init.as_ref(), "body")? {
                body = match extract_body(realm, &b)? {
                    Some((content, mime)) => {
                        if let Some(mime) = mime
                            && !list.has("content-type")
                        {
                            list.append("content-type", &mime)?;
                        }
                        Some(Rc::new(content))
                    }
                    None => None,
                };
            }
            if body.is_some() && (method == "GET" || method == "HEAD") {
                return Err(BindingError::type_error(
                    "Request with GET/HEAD method cannot have body.",
                ));
            }
            let headers = new_headers(realm, list)?;
            Ok(vec![
                slot(id, "url", SlotValue::Str(url)),
                slot(id, "method", SlotValue::Str(method)),
                slot(id, "headers", SlotValue::Value(headers)),
                slot(id, "body", SlotValue::Body(body)),
            ])
        },
    )?;
    realm.define_getter(request, "url", move |_realm, slots| {
        Ok(JsValue::from(slots.str(request, "url")?))
    });
    realm.define_getter(request, "method", move |_realm, slots| {
        Ok(JsValue::from(slots.str(request, "method")?))
    });
    realm.define_getter(request, "headers", move |_realm, slots| {
        slots.value(request, "headers")
    });
    realm.define_method(request, "text", 0, move |realm, this, slots, _args| {
        let text = body_text(&slots, request)?;
        Ok(realm.defer(vec![this.clone()], move |_realm| Ok(JsValue::from(text))))
    });
    realm.define_method(request, "formData", 0, move |realm, this, slots, _args| {
        let headers = header_list_of(realm, &slots.value(request, "headers")?)?;
        let content_type = headers.borrow().get("content-type").unwrap_or_default();
        let text = body_text(&slots, request)?;
        Ok(realm.defer(vec![this.clone()], move |realm| {
            let essence = content_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if essence != FORM_URLENCODED {
                return Err(BindingError::type_error(
                    "Can't decode form data from body because of incorrect MIME type/boundary",
                ));
            }
            let form = realm.new_object();
            let form: JsValue = form.into();
            for (k, v) in parse_urlencoded(&text) {
                realm.set(&form, &k, JsValue::from(v))?;
            }
            Ok(form)
        }))
    });
    Ok(())
}

fn install_response(realm: &mut Realm) -> Result<(), RegistryError> {
    let response = realm.define_native_class(
        ClassDescriptor::new("Response").slots(&["status", "statusText", "headers", "body"]),
        |realm, args| {
            let id = class(realm, "Response")?;
            let mut list = HeaderList::new();
            let body = match extract_body(realm, &arg(args, 0))? {
                Some((content, mime)) => {
                    if let Some(mime) = mime {
                        list.append("content-type", &mime)?;
                    }
                    Some(Rc::new(content))
                }
                None => None,
            };
            let init = options_object(&arg(args, 1), "Failed to construct 'Response'")?;
            let status = match realm.option(init.as_ref(), "status")? {
                Some(v) => number_ops::to_integer_or_infinity(realm.to_number(&v)?),
                None => 200.0,
            };
            if !(200.0..=599.0).contains(&status) {
                return Err(BindingError::Range(format!(
                    "The status provided ({}) must be in the range of 200 to 599, inclusive.",
                    Realm::number_repr(status)
                )));
            }
            let status_text = match realm.option(init.as_ref(), "statusText")? {
                Some(v) => realm.to_string(&v)?,
                None => String::new(),
            };
            if let Some(h) = realm.option(init.as_ref(), "headers")? {
                let mut explicit = HeaderList::new();
                fill_headers(realm, &mut explicit, &h)?;
                if !explicit.has("content-type")
                    && let Some(ct) = list.get("content-type")
                {
                    explicit.append("content-type", &ct)?;
                }
                list = explicit;
            }
            let headers = new_headers(realm, list)?;
            Ok(vec![
                slot(id, "status", SlotValue::Number(status)),
                slot(id, "statusText", SlotValue::Str(status_text)),
                slot(id, "headers", SlotValue::Value(headers)),
                slot(id, "body", SlotValue::Body(body)),
            ])
        },
    )?;
    realm.define_getter(response, "status", move |_realm, slots| {
        Ok(JsValue::Number(slots.number(response, "status")?))
    });
    realm.define_getter(response, "statusText", move |_realm, slots| {
        Ok(JsValue::from(slots.str(response, "statusText")?))
    });
    realm.define_getter(response, "ok", move |_realm, slots| {
        let status = slots.number(response, "status")?;
        Ok(JsValue::Boolean((200.0..=299.0).contains(&status)))
    });
    realm.define_getter(response, "headers", move |_realm, slots| {
        slots.value(response, "headers")
    });
    realm.define_method(response, "text", 0, move |realm, this, slots, _args| {
        let text = body_text(&slots, response)?;
        Ok(realm.defer(vec![this.clone()], move |_realm| Ok(JsValue::from(text))))
    });
    Ok(())
}
