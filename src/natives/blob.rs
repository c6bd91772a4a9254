use super::{arg, options_object, require_args, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::Realm;
use crate::registry::{ClassDescriptor, ClassId};
use crate::slots::SlotValue;
use crate::types::{JsValue, number_ops};
use regex::Regex;
use std::rc::Rc;
use std::sync::LazyLock;

static PRINTABLE_ASCII: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x20-\x7E]*$").expect("valid pattern"));

/// Immutable byte payload shared by a Blob and every slice or copy of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobContent {
    bytes: Vec<u8>,
}

impl BlobContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// `Blob.prototype.slice` bounds: negative offsets count from the end and
    /// everything clamps to the payload.
    pub fn slice(&self, start: Option<f64>, end: Option<f64>) -> Self {
        let len = self.bytes.len();
        let from = start.map_or(0, |s| relative_index(s, len));
        let to = end.map_or(len, |e| relative_index(e, len));
        // inverted ranges are empty, not an error
        if from >= to {
            return Self::default();
        }
        Self::new(self.bytes[from..to].to_vec())
    }
}

fn relative_index(pos: f64, len: usize) -> usize {
    let len = len as f64;
    let pos = number_ops::to_integer_or_infinity(pos);
    let idx = if pos < 0.0 {
        (len + pos).max(0.0)
    } else {
        pos.min(len)
    };
    idx as usize
}

/// A content type is kept only if every character is printable ASCII, and is
/// lowercased.
pub fn normalize_type(raw: &str) -> String {
    if PRINTABLE_ASCII.is_match(raw) {
        raw.to_ascii_lowercase()
    } else {
        String::new()
    }
}

/// Concatenates blob parts: strings as UTF-8, Blobs and Buffers by content,
/// anything else through string conversion.
fn collect_parts(realm: &mut Realm, parts: &JsValue, context: &str) -> Result<Vec<u8>, BindingError> {
    let Some(elements) = realm.array_elements(parts) else {
        return Err(BindingError::construction(format!(
            "{context}: The provided value cannot be converted to a sequence."
        )));
    };
    let blob = realm.class_id("Blob");
    let mut bytes = Vec::new();
    for part in &elements {
        if let Some(id) = blob
            && let Some(slots) = realm.slots_of(part, id)
        {
            bytes.extend_from_slice(slots.blob(id, "content")?.as_bytes());
        } else if let Some(data) = super::buffer::bytes_of(realm, part) {
            bytes.extend_from_slice(&data);
        } else {
            bytes.extend_from_slice(realm.to_string(part)?.as_bytes());
        }
    }
    Ok(bytes)
}

fn read_type(realm: &mut Realm, options: Option<&JsValue>) -> Result<String, BindingError> {
    match realm.option(options, "type")? {
        Some(v) => Ok(normalize_type(&realm.to_string(&v)?)),
        None => Ok(String::new()),
    }
}

pub(crate) fn new_blob(realm: &mut Realm, content: BlobContent, mime: &str) -> Result<JsValue, BindingError> {
    let Some(blob) = realm.class_id("Blob") else {
        return Err(BindingError::type_error("Blob is not available"));
    };
    realm.instantiate(
        blob,
        vec![
            slot(blob, "content", SlotValue::Blob(Rc::new(content))),
            slot(blob, "type", SlotValue::Str(mime.to_string())),
        ],
    )
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    let blob = realm.define_native_class(
        ClassDescriptor::new("Blob").slots(&["content", "type"]),
        |realm, args| {
            let parts = arg(args, 0);
            let bytes = if parts.is_undefined() {
                Vec::new()
            } else {
                collect_parts(realm, &parts, "Failed to construct 'Blob'")?
            };
            let options = options_object(&arg(args, 1), "Failed to construct 'Blob'")?;
            let mime = read_type(realm, options.as_ref())?;
            let blob = blob_id(realm)?;
            Ok(vec![
                slot(blob, "content", SlotValue::Blob(Rc::new(BlobContent::new(bytes)))),
                slot(blob, "type", SlotValue::Str(mime)),
            ])
        },
    )?;
    install_blob_surface(realm, blob);

    let file = realm.define_native_class(
        ClassDescriptor::new("File")
            .extends(blob)
            .slots(&["name", "lastModified"]),
        |realm, args| {
            require_args(args, 1, "File", "constructor")?;
            let parts = arg(args, 0);
            if realm.array_elements(&parts).is_none() {
                return Err(BindingError::construction(
                    "Failed to construct 'File': The provided value cannot be converted to a sequence.",
                ));
            }
            let bytes = collect_parts(realm, &parts, "Failed to construct 'File'")?;
            let name = realm.to_string(&arg(args, 1))?;
            let options = options_object(&arg(args, 2), "Failed to construct 'File'")?;
            let mime = read_type(realm, options.as_ref())?;
            let last_modified = match realm.option(options.as_ref(), "lastModified")? {
                Some(v) => number_ops::to_integer_or_infinity(realm.to_number(&v)?),
                None => chrono::Utc::now().timestamp_millis() as f64,
            };
            let blob = blob_id(realm)?;
            let file = file_id(realm)?;
            Ok(vec![
                slot(blob, "content", SlotValue::Blob(Rc::new(BlobContent::new(bytes)))),
                slot(blob, "type", SlotValue::Str(mime)),
                slot(file, "name", SlotValue::Str(name)),
                slot(file, "lastModified", SlotValue::Number(last_modified)),
            ])
        },
    )?;
    realm.define_getter(file, "name", move |_realm, slots| {
        Ok(JsValue::from(slots.str(file, "name")?))
    });
    realm.define_getter(file, "lastModified", move |_realm, slots| {
        Ok(JsValue::Number(slots.number(file, "lastModified")?))
    });
    Ok(())
}

fn blob_id(realm: &Realm) -> Result<ClassId, BindingError> {
    realm
        .class_id("Blob")
        .ok_or_else(|| BindingError::construction("Blob is not registered"))
}

fn file_id(realm: &Realm) -> Result<ClassId, BindingError> {
    realm
        .class_id("File")
        .ok_or_else(|| BindingError::construction("File is not registered"))
}

fn install_blob_surface(realm: &mut Realm, blob: ClassId) {
    realm.define_getter(blob, "size", move |_realm, slots| {
        Ok(JsValue::Number(slots.blob(blob, "content")?.size() as f64))
    });
    realm.define_getter(blob, "type", move |_realm, slots| {
        Ok(JsValue::from(slots.str(blob, "type")?))
    });
    realm.define_method(blob, "text", 0, move |realm, this, slots, _args| {
        let content = slots.blob(blob, "content")?;
        Ok(realm.defer(vec![this.clone()], move |_realm| {
            Ok(JsValue::from(content.text()))
        }))
    });
    realm.define_method(blob, "bytes", 0, move |realm, this, slots, _args| {
        let content = slots.blob(blob, "content")?;
        Ok(realm.defer(vec![this.clone()], move |realm| {
            super::buffer::new_buffer(realm, content.as_bytes().to_vec())
        }))
    });
    realm.define_method(blob, "slice", 0, move |realm, _this, slots, args| {
        let content = slots.blob(blob, "content")?;
        let bound = |i: usize| -> Result<Option<f64>, BindingError> {
            let v = arg(args, i);
            if v.is_undefined() {
                Ok(None)
            } else {
                realm.to_number(&v).map(Some)
            }
        };
        let start = bound(0)?;
        let end = bound(1)?;
        let mime = match arg(args, 2) {
            JsValue::Undefined => String::new(),
            v => normalize_type(&realm.to_string(&v)?),
        };
        new_blob(realm, content.slice(start, end), &mime)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmOptions;

    fn realm() -> Realm {
        Realm::new(RealmOptions::default()).unwrap()
    }

    fn ctor(r: &mut Realm, name: &str) -> JsValue {
        r.resolve_identifier(name).unwrap()
    }

    fn parts(r: &mut Realm, items: &[&str]) -> JsValue {
        r.create_array(items.iter().map(|s| JsValue::from(*s)).collect())
    }

    #[test]
    fn type_normalization() {
        assert_eq!(normalize_type("Text/Plain;Charset=UTF-8"), "text/plain;charset=utf-8");
        assert_eq!(normalize_type("text/\u{e9}"), "");
        assert_eq!(normalize_type("a\nb"), "");
        assert_eq!(normalize_type(""), "");
    }

    #[test]
    fn content_slicing() {
        let c = BlobContent::new(b"hello world".to_vec());
        assert_eq!(c.slice(None, None).text(), "hello world");
        assert_eq!(c.slice(Some(6.0), None).text(), "world");
        assert_eq!(c.slice(Some(-5.0), Some(-1.0)).text(), "worl");
        assert_eq!(c.slice(Some(8.0), Some(2.0)).size(), 0);
        assert_eq!(c.slice(Some(0.0), Some(1e9)).size(), 11);
    }

    #[test]
    fn blob_from_mixed_parts() {
        let mut r = realm();
        let blob_ctor = ctor(&mut r, "Blob");
        let inner_parts = parts(&mut r, &["ab"]);
        let inner = r.construct(&blob_ctor, &[inner_parts]).unwrap();
        let outer_parts = r.create_array(vec![inner, JsValue::from("-"), JsValue::Number(7.0)]);
        let opts = r.create_plain_object(vec![("type", JsValue::from("TEXT/PLAIN"))]);
        let outer = r.construct(&blob_ctor, &[outer_parts, opts]).unwrap();
        assert!(matches!(r.get(&outer, "size").unwrap(), JsValue::Number(n) if n == 4.0));
        assert_eq!(r.get(&outer, "type").unwrap().to_string(), "text/plain");
        let text = r.call_method(&outer, "text", &[]).unwrap();
        assert_eq!(r.await_promise(&text).unwrap().to_string(), "ab-7");
    }

    #[test]
    fn blob_argument_shapes() {
        let mut r = realm();
        let blob_ctor = ctor(&mut r, "Blob");
        let empty = r.construct(&blob_ctor, &[]).unwrap();
        assert!(matches!(r.get(&empty, "size").unwrap(), JsValue::Number(n) if n == 0.0));
        assert!(r.construct(&blob_ctor, &[JsValue::from("abc")]).unwrap_err().is_type_error());
        let sym = r.create_symbol(None);
        let bad = r.create_array(vec![sym]);
        assert!(r.construct(&blob_ctor, &[bad]).unwrap_err().is_type_error());
        let ok = parts(&mut r, &["x"]);
        assert!(r.construct(&blob_ctor, &[ok, JsValue::Number(1.0)]).is_err());
    }

    #[test]
    fn slice_produces_a_blob() {
        let mut r = realm();
        let blob_ctor = ctor(&mut r, "Blob");
        let p = parts(&mut r, &["hello world"]);
        let b = r.construct(&blob_ctor, &[p]).unwrap();
        let s = r
            .call_method(&b, "slice", &[JsValue::Number(-5.0), JsValue::Undefined, JsValue::from("X/Y")])
            .unwrap();
        assert!(r.instance_of(&s, &blob_ctor).unwrap());
        assert_eq!(r.get(&s, "type").unwrap().to_string(), "x/y");
        let text = r.call_method(&s, "text", &[]).unwrap();
        assert_eq!(r.await_promise(&text).unwrap().to_string(), "world");
    }

    #[test]
    fn file_last_modified() {
        let mut r = realm();
        let file_ctor = ctor(&mut r, "File");
        let p = parts(&mut r, &["foo"]);
        let opts = r.create_plain_object(vec![("lastModified", JsValue::Number(0.0))]);
        let f = r
            .construct(&file_ctor, &[p.clone(), JsValue::from("a.txt"), opts])
            .unwrap();
        assert!(matches!(r.get(&f, "lastModified").unwrap(), JsValue::Number(n) if n == 0.0));
        let g = r.construct(&file_ctor, &[p, JsValue::from("b.txt")]).unwrap();
        assert!(matches!(r.get(&g, "lastModified").unwrap(), JsValue::Number(n) if n > 0.0));
    }

    #[test]
    fn bytes_resolves_to_a_buffer() {
        let mut r = realm();
        let blob_ctor = ctor(&mut r, "Blob");
        let p = parts(&mut r, &["hi"]);
        let b = r.construct(&blob_ctor, &[p]).unwrap();
        let promise = r.call_method(&b, "bytes", &[]).unwrap();
        let buf = r.await_promise(&promise).unwrap();
        assert_eq!(super::super::buffer::bytes_of(&r, &buf).unwrap().as_slice(), b"hi");
    }
}
