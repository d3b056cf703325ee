//! Mixin Composer
//!
//! `compose(Base, [M1, M2])` builds the chain `Base <- Base&M1 <- Base&M1&M2`.
//! Each application class copies its mixin's instance members, so the later
//! mixin wins for shared names and `super` calls from a mixin method reach
//! the previous link of the chain.

use std::rc::Rc;
use tracing::debug;

use crate::class::{ClassBuilder, ClassRef, Receiver};
use crate::defaults::MIXIN_SEPARATOR;
use crate::error::RtResult;
use crate::names::MemberName;
use crate::runtime::Runtime;
use crate::signature::ClassSignature;
use crate::value::Arguments;

impl Runtime {
    /// Compose `base` with `mixins` in order and return the most derived
    /// application class.
    ///
    /// Every application class forwards each constructor name reachable on
    /// `base`: it runs the unnamed constructor of every mixin applied so far,
    /// in listed order, then the base constructor with the caller's
    /// arguments. A class extending the result may declare its own
    /// constructors instead.
    pub fn compose(&self, base: &ClassRef, mixins: &[ClassRef]) -> RtResult<ClassRef> {
        debug!(
            base = base.name(),
            mixins = mixins.len(),
            "composing mixin application"
        );
        let ctor_names = base.constructor_names();
        let mut current = base.clone();
        for (index, mixin) in mixins.iter().enumerate() {
            let name = format!("{}{}{}", current.name(), MIXIN_SEPARATOR, mixin.name());
            let app = ClassBuilder::from_class(self, self.classes().allocate(base.library(), &name));
            app.extends(&current);
            let class = app.class().clone();
            class.set_mixin(mixin.clone());
            class.copy_members_from(mixin);

            let mut signature = ClassSignature::new();
            if let Some(inherited) = self.signatures().get(mixin.id()) {
                signature.merge_from(&inherited);
            }
            for ctor in &ctor_names {
                if let Some(ft) = self.signatures().constructor(base.id(), ctor) {
                    signature.constructors.insert(ctor.clone(), ft);
                }
            }
            app.signature(signature);

            let applied: Rc<[ClassRef]> = Rc::from(&mixins[..=index]);
            for ctor in &ctor_names {
                let applied = applied.clone();
                let base = base.clone();
                let target = ctor.clone();
                app.constructor(ctor.clone(), move |rt, recv, args| {
                    forward_constructor(rt, recv, &applied, &base, &target, args)
                });
            }
            current = app.finish();
        }
        Ok(current)
    }
}

fn forward_constructor(
    rt: &Runtime,
    recv: &Receiver,
    mixins: &[ClassRef],
    base: &ClassRef,
    ctor: &MemberName,
    args: Arguments,
) -> RtResult<()> {
    for mixin in mixins {
        if let Some(init) = mixin.local_constructor(&MemberName::unnamed()) {
            let mixin_recv = Receiver {
                this: recv.this.clone(),
                holder: mixin.clone(),
            };
            init(rt, &mixin_recv, Arguments::new())?;
        }
    }
    rt.run_constructor(base, &recv.this, ctor.clone(), args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::cell::RefCell;

    fn tagged(rt: &Runtime, name: &'static str) -> ClassRef {
        let builder = rt.class("test", name);
        builder.method("f", move |_, _, _| Ok(Value::str(name)));
        builder.build().unwrap()
    }

    #[test]
    fn test_later_mixin_wins() {
        let rt = Runtime::new();
        let base = tagged(&rt, "Base");
        let m1 = tagged(&rt, "M1");
        let m2 = tagged(&rt, "M2");

        let both = rt.compose(&base, &[m1.clone(), m2.clone()]).unwrap();
        let obj = Value::Object(rt.construct(&both, "", Arguments::new()).unwrap());
        assert_eq!(rt.invoke(&obj, "f", Arguments::new()).unwrap().as_str(), Some("M2"));
        assert_eq!(both.name(), "Base&M1&M2");

        let one = rt.compose(&base, &[m1.clone()]).unwrap();
        let obj = Value::Object(rt.construct(&one, "", Arguments::new()).unwrap());
        assert_eq!(rt.invoke(&obj, "f", Arguments::new()).unwrap().as_str(), Some("M1"));
    }

    #[test]
    fn test_composed_class_conforms_to_mixins() {
        let rt = Runtime::new();
        let base = tagged(&rt, "Base");
        let m1 = tagged(&rt, "M1");
        let composed = rt.compose(&base, &[m1.clone()]).unwrap();
        assert!(composed.conforms_to(&base));
        assert!(composed.conforms_to(&m1));
    }

    #[test]
    fn test_super_reaches_previous_link() {
        let rt = Runtime::new();
        let base = tagged(&rt, "Base");
        let builder = rt.class("test", "Wrap");
        builder.method("f", |rt, recv, _| {
            let inner = rt.invoke_super(recv, "f", Arguments::new())?;
            Ok(Value::from(format!("Wrap({})", inner.as_str().unwrap_or(""))))
        });
        let wrap = builder.build().unwrap();

        let composed = rt.compose(&base, &[wrap.clone(), wrap]).unwrap();
        let obj = Value::Object(rt.construct(&composed, "", Arguments::new()).unwrap());
        assert_eq!(
            rt.invoke(&obj, "f", Arguments::new()).unwrap().as_str(),
            Some("Wrap(Wrap(Base))")
        );
    }

    #[test]
    fn test_forwarding_constructor_order() {
        let rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::<String>::new()));

        let l = log.clone();
        let base = rt.class("test", "Base");
        base.constructor("named", move |_, _, args| {
            l.borrow_mut().push(format!("Base.named({:?})", args.arg(0)));
            Ok(())
        });
        let base = base.build().unwrap();

        let mut mixins = Vec::new();
        for name in ["M1", "M2"] {
            let l = log.clone();
            let m = rt.class("test", name);
            m.constructor("", move |_, _, _| {
                l.borrow_mut().push(name.to_string());
                Ok(())
            });
            mixins.push(m.build().unwrap());
        }

        let composed = rt.compose(&base, &mixins).unwrap();
        rt.construct(&composed, "named", vec![Value::Int(1)]).unwrap();
        assert_eq!(*log.borrow(), vec!["M1", "M2", "Base.named(1)"]);
    }

    #[test]
    fn test_mixin_fields_initialized_before_base_constructor() {
        let rt = Runtime::new();
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        let base = rt.class("test", "Base");
        base.constructor("", move |_, recv, _| {
            *s.borrow_mut() = recv.this.field("tag");
            Ok(())
        });
        let base = base.build().unwrap();

        let m = rt.class("test", "Tagged");
        m.field_with("tag", false, |_, _| Ok(Value::str("mixed")));
        let m = m.build().unwrap();

        let composed = rt.compose(&base, &[m]).unwrap();
        rt.construct(&composed, "", Arguments::new()).unwrap();
        assert_eq!(
            seen.borrow().as_ref().and_then(|v| v.as_str().map(String::from)),
            Some("mixed".to_string())
        );
    }

    #[test]
    fn test_explicit_constructor_overrides_forwarding() {
        let rt = Runtime::new();
        let base = rt.class("test", "Base");
        base.constructor("", |_, _, _| Err(crate::error::RuntimeError::thrown("not called")));
        let base = base.build().unwrap();
        let m1 = tagged(&rt, "M1");
        let app = rt.compose(&base, &[m1]).unwrap();

        let derived = rt.class("test", "Derived");
        derived.extends(&app).constructor("", |_, recv, _| {
            recv.this.set_field("ok", Value::Bool(true));
            Ok(())
        });
        let derived = derived.build().unwrap();
        let obj = rt.construct(&derived, "", Arguments::new()).unwrap();
        assert!(matches!(obj.field("ok"), Some(Value::Bool(true))));
    }
}
