use crate::error::RegistryError;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Index of a class inside one realm's [`ClassRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An internal slot, qualified by the class that declares it. Two classes
/// that both declare an `encoding` slot never satisfy each other's schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub owner: ClassId,
    pub name: &'static str,
}

impl SlotKey {
    pub fn new(owner: ClassId, name: &'static str) -> Self {
        Self { owner, name }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    name: String,
    superclass: Option<ClassId>,
    own_slots: Vec<&'static str>,
    slot_schema: BTreeSet<SlotKey>,
    constructible: bool,
}

impl ClassDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            own_slots: Vec::new(),
            slot_schema: BTreeSet::new(),
            constructible: true,
        }
    }

    pub fn extends(mut self, superclass: ClassId) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub fn slots(mut self, names: &[&'static str]) -> Self {
        self.own_slots.extend_from_slice(names);
        self
    }

    pub fn constructible(mut self, constructible: bool) -> Self {
        self.constructible = constructible;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<ClassId> {
        self.superclass
    }

    pub fn is_constructible(&self) -> bool {
        self.constructible
    }

    /// Own slots plus every inherited slot. Only meaningful once registered.
    pub fn slot_schema(&self) -> &BTreeSet<SlotKey> {
        &self.slot_schema
    }
}

#[derive(Debug, Default)]
pub struct ClassRegistry {
    descriptors: Vec<ClassDescriptor>,
    by_name: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut descriptor: ClassDescriptor) -> Result<ClassId, RegistryError> {
        if !is_identifier(&descriptor.name) {
            return Err(RegistryError::InvalidName(descriptor.name));
        }
        if self.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        let id = ClassId(self.descriptors.len() as u32);
        let mut schema = match descriptor.superclass {
            Some(parent) => match self.descriptors.get(parent.index()) {
                Some(p) => p.slot_schema.clone(),
                None => return Err(RegistryError::UnknownSuperclass(descriptor.name)),
            },
            None => BTreeSet::new(),
        };
        // Own slots are keyed by this class, so a subclass slot never
        // shadows an inherited one with the same name.
        for &name in &descriptor.own_slots {
            schema.insert(SlotKey::new(id, name));
        }
        descriptor.slot_schema = schema;
        log::debug!(
            "registered class {} ({} slots)",
            descriptor.name,
            descriptor.slot_schema.len()
        );
        self.by_name.insert(descriptor.name.clone(), id);
        self.descriptors.push(descriptor);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<&ClassDescriptor> {
        self.lookup_id(name).map(|id| self.get(id))
    }

    pub fn lookup_id(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ClassId) -> &ClassDescriptor {
        &self.descriptors[id.index()]
    }

    /// The class itself followed by each superclass, nearest first.
    pub fn ancestry(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut current = self.get(id).superclass;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.get(parent).superclass;
        }
        chain
    }

    pub fn is_subclass_of(&self, id: ClassId, ancestor: ClassId) -> bool {
        self.ancestry(id).contains(&ancestor)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (ClassId(i as u32), d))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || unicode_ident::is_xid_start(c) => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || unicode_ident::is_xid_continue(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut reg = ClassRegistry::new();
        let blob = reg
            .register(ClassDescriptor::new("Blob").slots(&["content", "type"]))
            .unwrap();
        let file = reg
            .register(
                ClassDescriptor::new("File")
                    .extends(blob)
                    .slots(&["name", "lastModified"]),
            )
            .unwrap();

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup("File").unwrap().name(), "File");
        assert_eq!(reg.lookup_id("Blob"), Some(blob));
        assert!(reg.lookup("Nope").is_none());
        assert_eq!(reg.get(file).superclass(), Some(blob));
        assert_eq!(reg.ancestry(file), vec![file, blob]);
        assert!(reg.is_subclass_of(file, blob));
        assert!(!reg.is_subclass_of(blob, file));
    }

    #[test]
    fn schema_includes_inherited_slots() {
        let mut reg = ClassRegistry::new();
        let blob = reg
            .register(ClassDescriptor::new("Blob").slots(&["content", "type"]))
            .unwrap();
        let file = reg
            .register(ClassDescriptor::new("File").extends(blob).slots(&["name"]))
            .unwrap();
        let schema = reg.get(file).slot_schema();
        assert_eq!(schema.len(), 3);
        assert!(schema.contains(&SlotKey::new(blob, "type")));
        assert!(schema.contains(&SlotKey::new(file, "name")));
        assert!(reg.get(blob).slot_schema().is_subset(schema));
    }

    #[test]
    fn same_slot_name_on_unrelated_classes_differs() {
        let mut reg = ClassRegistry::new();
        let enc = reg
            .register(ClassDescriptor::new("TextEncoder").slots(&["encoding"]))
            .unwrap();
        let dec = reg
            .register(ClassDescriptor::new("TextDecoder").slots(&["encoding", "fatal"]))
            .unwrap();
        assert!(!reg.get(enc).slot_schema().is_subset(reg.get(dec).slot_schema()));
    }

    #[test]
    fn rejects_duplicates_and_bad_names() {
        let mut reg = ClassRegistry::new();
        reg.register(ClassDescriptor::new("Headers")).unwrap();
        assert_eq!(
            reg.register(ClassDescriptor::new("Headers")).unwrap_err(),
            RegistryError::Duplicate("Headers".into())
        );
        assert_eq!(
            reg.register(ClassDescriptor::new("9lives")).unwrap_err(),
            RegistryError::InvalidName("9lives".into())
        );
        assert!(reg.register(ClassDescriptor::new("$Private_1")).is_ok());
        assert!(!ClassDescriptor::new("Abstract").constructible(false).is_constructible());
    }
}
