use crate::globals::GlobalAttributes;
use crate::realm::{JsFunction, Realm};
use crate::types::JsValue;

pub const GC_GLOBAL: &str = "gc";

impl Realm {
    /// Installs the manual collection trigger as the `gc` global when the
    /// realm was started with `expose_gc`. Otherwise the name stays unbound.
    pub(crate) fn install_gc_trigger(&mut self) {
        if !self.options().expose_gc {
            return;
        }
        let trigger = self.create_function(JsFunction::native(GC_GLOBAL, 0, |realm, _this, _args| {
            let report = realm.collect_garbage();
            log::debug!("gc() reclaimed {} objects", report.reclaimed);
            Ok(JsValue::Undefined)
        }));
        self.globals
            .define(GC_GLOBAL, trigger, GlobalAttributes::BUILTIN);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RealmOptions;
    use crate::realm::Realm;
    use crate::types::JsValue;

    #[test]
    fn gc_is_unbound_without_the_flag() {
        let mut r = Realm::new(RealmOptions::default()).unwrap();
        assert_eq!(r.type_of_identifier("gc").unwrap(), "undefined");
        let root = r.global_object();
        assert!(!r.has_property(&root, "gc").unwrap());
        assert!(r.resolve_identifier("gc").unwrap_err().name() == "ReferenceError");
    }

    #[test]
    fn gc_collects_synchronously() {
        let mut r = Realm::new(RealmOptions::new().expose_gc(true)).unwrap();
        assert_eq!(r.type_of_identifier("gc").unwrap(), "function");
        let gc = r.resolve_identifier("gc").unwrap();
        r.call(&gc, &JsValue::Undefined, &[]).unwrap();
        let before = r.heap_stats();
        for _ in 0..20 {
            r.new_object();
        }
        assert!(r.call(&gc, &JsValue::Undefined, &[]).unwrap().is_undefined());
        assert_eq!(r.heap_stats(), before);
    }
}
