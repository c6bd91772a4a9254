use super::{arg, require_args, slot};
use crate::error::{BindingError, RegistryError};
use crate::realm::Realm;
use crate::registry::{ClassDescriptor, ClassId};
use crate::slots::SlotValue;
use crate::types::{JsValue, number_ops};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Hex,
    Latin1,
}

impl Encoding {
    fn parse(label: &str) -> Result<Self, BindingError> {
        match label.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "hex" => Ok(Encoding::Hex),
            "latin1" | "binary" | "ascii" => Ok(Encoding::Latin1),
            _ => Err(BindingError::type_error(format!("Unknown encoding: {label}"))),
        }
    }

    fn encode(self, s: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => s.as_bytes().to_vec(),
            Encoding::Latin1 => s.chars().map(|c| c as u32 as u8).collect(),
            Encoding::Hex => {
                // Stops at the first pair that is not valid hex.
                let digits: Vec<char> = s.chars().collect();
                let mut out = Vec::with_capacity(digits.len() / 2);
                for pair in digits.chunks_exact(2) {
                    match (pair[0].to_digit(16), pair[1].to_digit(16)) {
                        (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                        _ => break,
                    }
                }
                out
            }
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Hex => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

fn buffer_id(realm: &Realm) -> Result<ClassId, BindingError> {
    realm
        .class_id("Buffer")
        .ok_or_else(|| BindingError::construction("Buffer is not registered"))
}

pub(crate) fn new_buffer(realm: &mut Realm, bytes: Vec<u8>) -> Result<JsValue, BindingError> {
    let id = buffer_id(realm)?;
    realm.instantiate(id, vec![slot(id, "bytes", SlotValue::Bytes(Rc::new(bytes)))])
}

/// Bytes of `value` if it is a Buffer (or a subclass instance).
pub(crate) fn bytes_of(realm: &Realm, value: &JsValue) -> Option<Rc<Vec<u8>>> {
    let id = realm.class_id("Buffer")?;
    realm.slots_of(value, id)?.bytes(id, "bytes").ok()
}

/// Byte content for `Buffer.from` and the constructor.
fn bytes_from(realm: &mut Realm, value: &JsValue, encoding: &JsValue) -> Result<Vec<u8>, BindingError> {
    match value {
        JsValue::Undefined => Ok(Vec::new()),
        JsValue::Number(n) => {
            let len = number_ops::to_integer_or_infinity(*n);
            if !(0.0..=u32::MAX as f64).contains(&len) {
                return Err(BindingError::Range(format!(
                    "The value of \"size\" is out of range. Received {}",
                    Realm::number_repr(*n)
                )));
            }
            Ok(vec![0; len as usize])
        }
        JsValue::String(s) => {
            let enc = match encoding {
                JsValue::Undefined => Encoding::Utf8,
                other => Encoding::parse(&realm.to_string(other)?)?,
            };
            Ok(enc.encode(&s.to_rust_string()))
        }
        JsValue::Object(_) => {
            if let Some(bytes) = bytes_of(realm, value) {
                return Ok(bytes.as_ref().clone());
            }
            if let Some(blob) = realm.class_id("Blob")
                && let Some(slots) = realm.slots_of(value, blob)
            {
                return Ok(slots.blob(blob, "content")?.as_bytes().to_vec());
            }
            match realm.array_elements(value) {
                Some(elems) => elems
                    .iter()
                    .map(|e| realm.to_number(e).map(|n| (n as i64 & 0xff) as u8))
                    .collect(),
                None => Err(BindingError::type_error(
                    "The first argument must be of type string or an instance of Buffer, ArrayBuffer, or Array or an Array-like Object.",
                )),
            }
        }
        other => Err(BindingError::type_error(format!(
            "The first argument must be of type string or an instance of Buffer, ArrayBuffer, or Array or an Array-like Object. Received type {} ({other})",
            other.primitive_type_tag()
        ))),
    }
}

pub(crate) fn install(realm: &mut Realm) -> Result<(), RegistryError> {
    let buffer = realm.define_native_class(ClassDescriptor::new("Buffer").slots(&["bytes"]), |realm, args| {
        let bytes = bytes_from(realm, &arg(args, 0), &arg(args, 1))?;
        let id = buffer_id(realm)?;
        Ok(vec![slot(id, "bytes", SlotValue::Bytes(Rc::new(bytes)))])
    })?;

    realm.define_static(buffer, "from", 2, |realm, _this, args| {
        require_args(args, 1, "Buffer", "from")?;
        let bytes = bytes_from(realm, &arg(args, 0), &arg(args, 1))?;
        new_buffer(realm, bytes)
    });
    realm.define_getter(buffer, "length", move |_realm, slots| {
        Ok(JsValue::Number(slots.bytes(buffer, "bytes")?.len() as f64))
    });
    realm.define_method(buffer, "toString", 1, move |realm, _this, slots, args| {
        let enc = match arg(args, 0) {
            JsValue::Undefined => Encoding::Utf8,
            v => Encoding::parse(&realm.to_string(&v)?)?,
        };
        Ok(JsValue::from(enc.decode(&slots.bytes(buffer, "bytes")?)))
    });
    realm.define_method(buffer, "at", 1, move |realm, _this, slots, args| {
        let bytes = slots.bytes(buffer, "bytes")?;
        let idx = number_ops::to_integer_or_infinity(realm.to_number(&arg(args, 0))?);
        let idx = if idx < 0.0 { bytes.len() as f64 + idx } else { idx };
        if idx < 0.0 || idx >= bytes.len() as f64 {
            return Ok(JsValue::Undefined);
        }
        Ok(JsValue::Number(bytes[idx as usize] as f64))
    });
    realm.define_method(buffer, "equals", 1, move |realm, _this, slots, args| {
        require_args(args, 1, "Buffer", "equals")?;
        let Some(other) = bytes_of(realm, &args[0]) else {
            return Err(BindingError::type_error(
                "The \"otherBuffer\" argument must be an instance of Buffer",
            ));
        };
        Ok(JsValue::Boolean(*slots.bytes(buffer, "bytes")? == *other))
    });
    Ok(())
}
