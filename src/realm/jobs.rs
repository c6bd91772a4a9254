use super::*;

type Job = Box<dyn FnOnce(&mut Realm) -> Result<(), BindingError>>;

/// A queued job together with the values it captured, which stay rooted
/// until the job has run.
pub(crate) struct Microtask {
    pub(crate) roots: Vec<JsValue>,
    job: Job,
}

impl Realm {
    pub(super) fn setup_promise_prototype(&mut self) {
        let then = self.create_function(JsFunction::native("then", 2, |realm, this, args| {
            let on_fulfilled = args.first().cloned().unwrap_or(JsValue::Undefined);
            let on_rejected = args.get(1).cloned().unwrap_or(JsValue::Undefined);
            realm.promise_then(this, on_fulfilled, on_rejected)
        }));
        let catch = self.create_function(JsFunction::native("catch", 1, |realm, this, args| {
            let on_rejected = args.first().cloned().unwrap_or(JsValue::Undefined);
            realm.promise_then(this, JsValue::Undefined, on_rejected)
        }));
        if let Some(proto) = &self.promise_prototype {
            let mut p = proto.borrow_mut();
            p.insert_builtin("then".to_string(), then);
            p.insert_builtin("catch".to_string(), catch);
        }
    }

    pub fn create_promise(&mut self) -> JsValue {
        let mut data = ObjectData::new();
        data.prototype = self.promise_prototype.clone();
        data.class_name = "Promise".to_string();
        data.promise = Some(PromiseData {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        });
        self.allocate(data).into()
    }

    pub fn promise_state(&self, value: &JsValue) -> Option<PromiseState> {
        self.object_ref(value)
            .and_then(|o| o.borrow().promise.as_ref().map(|p| p.state.clone()))
    }

    pub fn resolve_promise(&mut self, promise: &JsValue, value: JsValue) {
        if self.promise_state(&value).is_some()
            && let Some(target) = promise.as_object()
        {
            // Adopt the state of the inner promise.
            self.add_reaction(
                &value,
                PromiseReaction {
                    on_fulfilled: JsValue::Undefined,
                    on_rejected: JsValue::Undefined,
                    derived: target,
                },
            );
            return;
        }
        self.settle(promise, PromiseState::Fulfilled(value));
    }

    pub fn reject_promise(&mut self, promise: &JsValue, reason: JsValue) {
        self.settle(promise, PromiseState::Rejected(reason));
    }

    fn settle(&mut self, promise: &JsValue, state: PromiseState) {
        let Some(obj) = self.object_ref(promise) else {
            return;
        };
        let reactions = {
            let mut b = obj.borrow_mut();
            let Some(pd) = b.promise.as_mut() else {
                return;
            };
            if !matches!(pd.state, PromiseState::Pending) {
                return;
            }
            pd.state = state.clone();
            std::mem::take(&mut pd.reactions)
        };
        for reaction in reactions {
            self.enqueue_reaction(reaction, state.clone());
        }
    }

    fn add_reaction(&mut self, promise: &JsValue, reaction: PromiseReaction) {
        let Some(obj) = self.object_ref(promise) else {
            return;
        };
        let settled = {
            let mut b = obj.borrow_mut();
            let Some(pd) = b.promise.as_mut() else {
                return;
            };
            match &pd.state {
                PromiseState::Pending => {
                    pd.reactions.push(reaction.clone());
                    None
                }
                other => Some(other.clone()),
            }
        };
        if let Some(state) = settled {
            self.enqueue_reaction(reaction, state);
        }
    }

    fn enqueue_reaction(&mut self, reaction: PromiseReaction, state: PromiseState) {
        let (handler, value, fulfilled) = match state {
            PromiseState::Fulfilled(v) => (reaction.on_fulfilled, v, true),
            PromiseState::Rejected(v) => (reaction.on_rejected, v, false),
            PromiseState::Pending => return,
        };
        let derived = JsValue::Object(reaction.derived);
        let roots = vec![handler.clone(), value.clone(), derived.clone()];
        self.enqueue(roots, move |realm| {
            if realm.is_callable(&handler) {
                match realm.call(&handler, &JsValue::Undefined, &[value]) {
                    Ok(v) => realm.resolve_promise(&derived, v),
                    Err(e) => {
                        let reason = realm.error_to_value(&e);
                        realm.reject_promise(&derived, reason);
                    }
                }
            } else if fulfilled {
                realm.resolve_promise(&derived, value);
            } else {
                realm.reject_promise(&derived, value);
            }
            Ok(())
        });
    }

    pub fn promise_then(
        &mut self,
        promise: &JsValue,
        on_fulfilled: JsValue,
        on_rejected: JsValue,
    ) -> Result<JsValue, BindingError> {
        if self.promise_state(promise).is_none() {
            return Err(BindingError::type_error(format!(
                "Method Promise.prototype.then called on incompatible receiver {}",
                self.describe(promise)
            )));
        }
        let derived = self.create_promise();
        let Some(target) = derived.as_object() else {
            return Ok(derived);
        };
        self.add_reaction(
            promise,
            PromiseReaction {
                on_fulfilled,
                on_rejected,
                derived: target,
            },
        );
        Ok(derived)
    }

    pub(crate) fn enqueue(
        &mut self,
        roots: Vec<JsValue>,
        job: impl FnOnce(&mut Realm) -> Result<(), BindingError> + 'static,
    ) {
        self.microtasks.push_back(Microtask {
            roots,
            job: Box::new(job),
        });
    }

    /// Runs `compute` on the next turn of the job queue and returns a promise
    /// for its result. Errors reject the promise with their script-visible
    /// error object.
    pub(crate) fn defer(
        &mut self,
        mut roots: Vec<JsValue>,
        compute: impl FnOnce(&mut Realm) -> Result<JsValue, BindingError> + 'static,
    ) -> JsValue {
        let promise = self.create_promise();
        roots.push(promise.clone());
        let target = promise.clone();
        self.enqueue(roots, move |realm| {
            match compute(realm) {
                Ok(v) => realm.resolve_promise(&target, v),
                Err(e) => {
                    let reason = realm.error_to_value(&e);
                    realm.reject_promise(&target, reason);
                }
            }
            Ok(())
        });
        promise
    }

    /// Drains the job queue, including jobs queued while draining. Returns the
    /// number of jobs run.
    pub fn run_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.microtasks.pop_front() {
            // captures stay rooted while the job runs, it may collect
            let mark = self.gc_temp_roots.len();
            self.gc_temp_roots.extend(task.roots);
            if let Err(e) = (task.job)(self) {
                log::warn!("microtask failed: {}: {}", e.name(), e.message());
            }
            self.gc_temp_roots.truncate(mark);
            ran += 1;
        }
        ran
    }

    /// Drains the job queue and unwraps `value` if it is a promise. A
    /// rejection comes back as [`BindingError::Thrown`] carrying the reason.
    pub fn await_promise(&mut self, value: &JsValue) -> Result<JsValue, BindingError> {
        self.run_microtasks();
        match self.promise_state(value) {
            None => Ok(value.clone()),
            Some(PromiseState::Fulfilled(v)) => Ok(v),
            Some(PromiseState::Rejected(reason)) => Err(BindingError::Thrown(reason)),
            Some(PromiseState::Pending) => Err(BindingError::type_error(
                "promise is still pending after the job queue drained",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realm() -> Realm {
        Realm::new(RealmOptions::default()).unwrap()
    }

    #[test]
    fn deferred_work_resolves_on_drain() {
        let mut r = realm();
        let p = r.defer(Vec::new(), |_realm| Ok(JsValue::from("done")));
        assert!(matches!(r.promise_state(&p), Some(PromiseState::Pending)));
        let v = r.await_promise(&p).unwrap();
        assert_eq!(v.to_string(), "done");
    }

    #[test]
    fn deferred_errors_reject_with_error_object() {
        let mut r = realm();
        let p = r.defer(Vec::new(), |_realm| Err(BindingError::Range("nope".into())));
        let err = r.await_promise(&p).unwrap_err();
        let BindingError::Thrown(reason) = err else {
            panic!("expected a thrown reason");
        };
        assert_eq!(r.get(&reason, "name").unwrap().to_string(), "RangeError");
        assert_eq!(r.get(&reason, "message").unwrap().to_string(), "nope");
    }

    #[test]
    fn then_chains_and_adopts_inner_promises() {
        let mut r = realm();
        let p = r.create_promise();
        let double = r.create_function(JsFunction::native("double", 1, |realm, _this, args| {
            let n = realm.to_number(&args[0])?;
            Ok(JsValue::Number(n * 2.0))
        }));
        let chained = r.call_method(&p, "then", &[double]).unwrap();
        r.resolve_promise(&p, JsValue::Number(21.0));
        assert!(matches!(r.await_promise(&chained).unwrap(), JsValue::Number(n) if n == 42.0));

        let outer = r.create_promise();
        let inner = r.create_promise();
        r.resolve_promise(&outer, inner.clone());
        r.run_microtasks();
        assert!(matches!(r.promise_state(&outer), Some(PromiseState::Pending)));
        r.reject_promise(&inner, JsValue::from("bad"));
        assert!(matches!(
            r.await_promise(&outer),
            Err(BindingError::Thrown(JsValue::String(s))) if s.to_rust_string() == "bad"
        ));
    }

    #[test]
    fn then_rejects_foreign_receivers() {
        let mut r = realm();
        let obj: JsValue = r.new_object().into();
        let err = r
            .promise_then(&obj, JsValue::Undefined, JsValue::Undefined)
            .unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn queued_values_survive_collection() {
        let mut r = realm();
        let captured: JsValue = r.new_object().into();
        let id = captured.as_object().unwrap().id;
        let keep = captured.clone();
        let p = r.defer(vec![captured], move |_realm| Ok(keep));
        r.collect_garbage();
        assert!(r.get_object(id).is_some());
        assert!(r.await_promise(&p).unwrap().is_object());
    }
}
