//! Host binding layer for a JavaScript realm: native classes with internal
//! slots, receiver validation, script subclassing and the global binding
//! table.

pub mod config;
pub mod construct;
pub mod error;
pub mod gc_gate;
pub mod globals;
pub mod host;
pub mod natives;
pub mod realm;
pub mod receiver;
pub mod registry;
pub mod slots;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::RealmOptions;
pub use construct::{ScriptClass, ScriptClassRecord};
pub use error::{BindingError, ERR_INVALID_THIS, RegistryError};
pub use globals::{GlobalAttributes, GlobalBindingTable};
pub use host::{HostCollaborators, PassthroughHost};
pub use realm::{GcReport, HeapStats, JsFunction, MethodCall, PropertyDescriptor, Realm};
pub use receiver::Receiver;
pub use registry::{ClassDescriptor, ClassId, ClassRegistry};
pub use types::JsValue;
