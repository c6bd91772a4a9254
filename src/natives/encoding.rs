use super::{arg, options_object, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::{Realm, to_boolean};
use crate::registry::ClassDescriptor;
use crate::slots::SlotValue;
use crate::types::JsValue;

const UTF8_LABELS: &[&str] = &["utf-8", "utf8", "unicode-1-1-utf-8"];
const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Canonical encoding name for a decoder label, if supported.
pub fn resolve_label(label: &str) -> Option<&'static str> {
    let label = label.trim().to_ascii_lowercase();
    UTF8_LABELS.contains(&label.as_str()).then_some("utf-8")
}

pub fn decode_utf8(bytes: &[u8], fatal: bool, ignore_bom: bool) -> Result<String, BindingError> {
    let bytes = match bytes.strip_prefix(BOM) {
        Some(rest) if !ignore_bom => rest,
        _ => bytes,
    };
    if fatal {
        return std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| BindingError::type_error("The encoded data was not valid for encoding utf-8"));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    let encoder = realm.define_native_class(
        ClassDescriptor::new("TextEncoder").slots(&["encoding"]),
        |realm, _args| {
            let Some(id) = realm.class_id("TextEncoder") else {
                return Err(BindingError::construction("TextEncoder is not registered"));
            };
            Ok(vec![slot(id, "encoding", SlotValue::Str("utf-8".to_string()))])
        },
    )?;
    realm.define_getter(encoder, "encoding", move |_realm, slots| {
        Ok(JsValue::from(slots.str(encoder, "encoding")?))
    });
    realm.define_method(encoder, "encode", 0, move |realm, _this, _slots, args| {
        let input = match arg(args, 0) {
            JsValue::Undefined => String::new(),
            v => realm.to_string(&v)?,
        };
        super::buffer::new_buffer(realm, input.into_bytes())
    });

    let decoder = realm.define_native_class(
        ClassDescriptor::new("TextDecoder").slots(&["encoding", "fatal", "ignoreBOM"]),
        |realm, args| {
            let Some(id) = realm.class_id("TextDecoder") else {
                return Err(BindingError::construction("TextDecoder is not registered"));
            };
            let encoding = match arg(args, 0) {
                JsValue::Undefined => "utf-8",
                v => {
                    let label = realm.to_string(&v)?;
                    resolve_label(&label).ok_or_else(|| {
                        BindingError::Range(format!("The \"{label}\" encoding is not supported"))
                    })?
                }
            };
            let options = options_object(&arg(args, 1), "Failed to construct 'TextDecoder'")?;
            let fatal = realm.option(options.as_ref(), "fatal")?;
            let ignore_bom = realm.option(options.as_ref(), "ignoreBOM")?;
            Ok(vec![
                slot(id, "encoding", SlotValue::Str(encoding.to_string())),
                slot(id, "fatal", SlotValue::Bool(fatal.as_ref().is_some_and(to_boolean))),
                slot(id, "ignoreBOM", SlotValue::Bool(ignore_bom.as_ref().is_some_and(to_boolean))),
            ])
        },
    )?;
    realm.define_getter(decoder, "encoding", move |_realm, slots| {
        Ok(JsValue::from(slots.str(decoder, "encoding")?))
    });
    realm.define_getter(decoder, "fatal", move |_realm, slots| {
        Ok(JsValue::Boolean(slots.boolean(decoder, "fatal")?))
    });
    realm.define_getter(decoder, "ignoreBOM", move |_realm, slots| {
        Ok(JsValue::Boolean(slots.boolean(decoder, "ignoreBOM")?))
    });
    realm.define_method(decoder, "decode", 0, move |realm, _this, slots, args| {
        let input = arg(args, 0);
        let bytes = match &input {
            JsValue::Undefined => return Ok(JsValue::from("")),
            v => super::buffer::bytes_of(realm, v).ok_or_else(|| {
                BindingError::type_error(
                    "The \"input\" argument must be an instance of ArrayBuffer or ArrayBufferView",
                )
            })?,
        };
        let text = decode_utf8(
            &bytes,
            slots.boolean(decoder, "fatal")?,
            slots.boolean(decoder, "ignoreBOM")?,
        )?;
        Ok(JsValue::from(text))
    });
    Ok(())
}
