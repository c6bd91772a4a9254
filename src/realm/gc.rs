use super::*;

/// Result of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub reclaimed: usize,
    pub live: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    /// Approximate bytes held by live objects, native payloads included.
    pub heap_used: usize,
}

// A handle packs the slot index into the low 32 bits and the slot's
// generation above them. Sweeping a slot bumps its generation, so handles
// that outlive their object stop resolving instead of aliasing the next
// occupant.
pub(super) fn slot_index(id: u64) -> usize {
    (id & 0xffff_ffff) as usize
}

pub(super) fn slot_generation(id: u64) -> u32 {
    (id >> 32) as u32
}

fn handle(index: usize, generation: u32) -> u64 {
    (u64::from(generation) << 32) | index as u64
}

impl Realm {
    pub(crate) fn allocate_object_slot(&mut self, obj: ObjectRef) -> u64 {
        let index = if let Some(idx) = self.free_list.pop() {
            self.objects[idx] = Some(obj.clone());
            idx
        } else {
            self.objects.push(Some(obj.clone()));
            self.generations.push(0);
            self.objects.len() - 1
        };
        let id = handle(index, self.generations[index]);
        obj.borrow_mut().id = Some(id);
        id
    }

    /// Mark-and-sweep over the realm's heap. Anything not reachable from the
    /// root object, the intrinsics, the class bindings, the global table,
    /// in-flight call arguments, pinned values or queued jobs is released.
    pub fn collect_garbage(&mut self) -> GcReport {
        let obj_count = self.objects.len();
        let mut marks = vec![false; obj_count];

        // Roots: globalThis, intrinsic prototypes, class bindings, globals,
        // temp and pinned values, queued microtasks.
        let mut worklist: Vec<u64> = vec![self.root.id];
        for proto in [
            &self.object_prototype,
            &self.function_prototype,
            &self.promise_prototype,
        ] {
            if let Some(p) = proto
                && let Some(id) = p.borrow().id
            {
                worklist.push(id);
            }
        }
        for binding in self.classes.values() {
            worklist.push(binding.constructor.id);
            worklist.push(binding.prototype.id);
        }
        self.globals.trace(&mut worklist);
        for val in self.gc_temp_roots.iter().chain(self.pinned.iter()) {
            collect_value_roots(val, &mut worklist);
        }
        for task in &self.microtasks {
            for val in &task.roots {
                collect_value_roots(val, &mut worklist);
            }
        }

        while let Some(id) = worklist.pop() {
            let idx = slot_index(id);
            // A stale handle names a slot that has since been reused.
            if idx >= obj_count || marks[idx] || self.generations[idx] != slot_generation(id) {
                continue;
            }
            marks[idx] = true;
            let obj_rc = match &self.objects[idx] {
                Some(rc) => rc.clone(),
                None => continue,
            };
            let obj = obj_rc.borrow();

            if let Some(ref proto) = obj.prototype
                && let Some(pid) = proto.borrow().id
            {
                worklist.push(pid);
            }
            for desc in obj.properties.values() {
                for v in [&desc.value, &desc.get, &desc.set].into_iter().flatten() {
                    collect_value_roots(v, &mut worklist);
                }
            }
            if let Some(ref elems) = obj.array_elements {
                for v in elems {
                    collect_value_roots(v, &mut worklist);
                }
            }
            match &obj.callable {
                Some(JsFunction::Method { home, .. }) => worklist.push(home.id),
                Some(JsFunction::Class(ClassKind::Script(rec))) => {
                    if let Some(parent) = &rec.parent {
                        collect_value_roots(parent, &mut worklist);
                    }
                }
                _ => {}
            }
            if let Some(ref slots) = obj.slots {
                slots.trace(&mut worklist);
            }
            if let Some(ref pd) = obj.promise {
                match &pd.state {
                    PromiseState::Fulfilled(v) | PromiseState::Rejected(v) => {
                        collect_value_roots(v, &mut worklist);
                    }
                    PromiseState::Pending => {}
                }
                for reaction in &pd.reactions {
                    collect_value_roots(&reaction.on_fulfilled, &mut worklist);
                    collect_value_roots(&reaction.on_rejected, &mut worklist);
                    worklist.push(reaction.derived.id);
                }
            }
        }

        let mut reclaimed = 0;
        for (i, marked) in marks.iter().enumerate() {
            if !marked && self.objects[i].is_some() {
                self.objects[i] = None;
                // invalidates every handle to the old occupant
                self.generations[i] = self.generations[i].wrapping_add(1);
                self.free_list.push(i);
                reclaimed += 1;
            }
        }
        self.gc_runs += 1;
        let live = self.objects.iter().filter(|o| o.is_some()).count();
        log::debug!(
            "gc #{}: reclaimed {reclaimed} objects, {live} live",
            self.gc_runs
        );
        GcReport { reclaimed, live }
    }

    pub fn heap_stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            live_objects: 0,
            heap_used: 0,
        };
        for obj in self.objects.iter().flatten() {
            stats.live_objects += 1;
            stats.heap_used += obj.borrow().estimated_size();
        }
        stats
    }
}

fn collect_value_roots(val: &JsValue, worklist: &mut Vec<u64>) {
    if let JsValue::Object(o) = val {
        worklist.push(o.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_objects_are_reclaimed() {
        let mut r = Realm::new(RealmOptions::default()).unwrap();
        r.collect_garbage();
        let baseline = r.heap_stats();
        for _ in 0..50 {
            r.new_object();
        }
        assert_eq!(r.heap_stats().live_objects, baseline.live_objects + 50);
        let report = r.collect_garbage();
        assert_eq!(report.reclaimed, 50);
        assert_eq!(r.heap_stats(), baseline);
    }

    #[test]
    fn globals_and_pins_keep_objects_alive() {
        let mut r = Realm::new(RealmOptions::default()).unwrap();
        let kept: JsValue = r.new_object().into();
        let pinned: JsValue = r.new_object().into();
        let nested: JsValue = r.new_object().into();
        r.set(&kept, "child", nested.clone()).unwrap();
        r.assign_identifier("kept", kept.clone()).unwrap();
        r.pin(&pinned);
        r.collect_garbage();
        let nested_id = nested.as_object().unwrap().id;
        assert!(r.get_object(nested_id).is_some());
        assert!(r.get_object(pinned.as_object().unwrap().id).is_some());

        r.unpin(&pinned);
        let root = r.global_object();
        r.delete_property(&root, "kept").unwrap();
        r.collect_garbage();
        assert!(r.get_object(nested_id).is_none());
        assert!(r.get_object(pinned.as_object().unwrap().id).is_none());
    }

    #[test]
    fn reused_slots_do_not_revive_stale_handles() {
        let mut r = Realm::new(RealmOptions::default()).unwrap();
        r.collect_garbage();
        let first = r.new_object();
        r.collect_garbage();
        let second = r.new_object();
        assert_eq!(slot_index(first.id), slot_index(second.id));
        assert_ne!(first.id, second.id);
        assert!(r.get_object(first.id).is_none());
        assert!(r.get_object(second.id).is_some());

        let stale: JsValue = first.into();
        assert!(!stale.strict_equals(&second.into()));
        assert!(r.get(&stale, "x").unwrap_err().is_type_error());
        assert!(r.set(&stale, "x", JsValue::Null).unwrap_err().is_type_error());
    }
}
