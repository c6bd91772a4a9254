use crate::error::BindingError;
use crate::realm::Realm;
use crate::registry::ClassId;
use crate::slots::InternalSlots;
use crate::types::JsValue;
use std::rc::Rc;

/// Classification of a native method's `this`.
#[derive(Debug, Clone)]
pub enum Receiver {
    Missing,
    Null,
    /// An object lacking the expected slot schema, with the name of its
    /// nearest constructor.
    WrongType(String),
    Primitive {
        type_tag: &'static str,
        repr: String,
    },
    Valid(Rc<InternalSlots>),
}

impl Receiver {
    pub fn rejection_message(&self, expected: &str) -> Option<String> {
        let head = format!("Expected this to be instanceof {expected}");
        match self {
            Receiver::Valid(_) => None,
            Receiver::Missing => Some(head),
            Receiver::Null => Some(format!("{head}, but received null")),
            Receiver::WrongType(name) => {
                Some(format!("{head}, but received an instance of {name}"))
            }
            Receiver::Primitive { type_tag, repr } => {
                Some(format!("{head}, but received type {type_tag} ('{repr}')"))
            }
        }
    }
}

impl Realm {
    /// Read-only classification of `this` against `expected`. An object is
    /// valid only if it carries every internal slot `expected` declares,
    /// whatever its prototype chain says.
    pub fn classify_receiver(&self, this: &JsValue, expected: ClassId) -> Receiver {
        match this {
            JsValue::Undefined => Receiver::Missing,
            JsValue::Null => Receiver::Null,
            JsValue::Object(_) => {
                let Some(obj) = self.object_ref(this) else {
                    return Receiver::Missing;
                };
                let obj = obj.borrow();
                if let Some(slots) = &obj.slots
                    && slots.satisfies(self.registry.get(expected).slot_schema())
                {
                    return Receiver::Valid(slots.clone());
                }
                // constructor.name when it is a non-empty string, else the
                // object's own class tag
                let name = obj
                    .get_property_descriptor("constructor")
                    .and_then(|d| d.value)
                    .and_then(|ctor| self.object_ref(&ctor))
                    .and_then(|ctor| ctor.borrow().get_property_value("name"))
                    .map(|n| n.to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| obj.class_name.clone());
                Receiver::WrongType(name)
            }
            primitive => Receiver::Primitive {
                type_tag: primitive.primitive_type_tag(),
                repr: primitive.to_string(),
            },
        }
    }

    /// Guard run before any native method touches instance state.
    pub fn validate_receiver(
        &self,
        this: &JsValue,
        expected: ClassId,
    ) -> Result<Rc<InternalSlots>, BindingError> {
        let receiver = self.classify_receiver(this, expected);
        if let Receiver::Valid(slots) = receiver {
            return Ok(slots);
        }
        let class_name = self.registry.get(expected).name();
        let message = receiver
            .rejection_message(class_name)
            .unwrap_or_else(|| format!("Expected this to be instanceof {class_name}"));
        log::trace!("rejected receiver for {class_name}: {receiver:?}");
        Err(BindingError::InvalidThis(message))
    }
}
