//! Mixin application through the public dispatch surface

use std::cell::RefCell;
use std::rc::Rc;

use kiln_runtime::{
    ArityError, Arguments, ClassRef, ClassSignature, FunctionType, MissingReason, Runtime, Value,
};

/// `describe()` returns the class tag; `Base` also carries a `name` field
fn widget(rt: &Runtime) -> ClassRef {
    let builder = rt.class("ui", "Widget");
    builder
        .field("name")
        .constructor("", |_, recv, args| {
            recv.this.set_field("name", args.arg_or(0, Value::str("anonymous")));
            Ok(())
        })
        .method("describe", |rt, recv, _| rt.load(&recv.this_value(), "name"));
    builder.build().unwrap()
}

/// Wraps `describe()` of whatever it is applied on
fn decorating(rt: &Runtime, name: &'static str) -> ClassRef {
    let builder = rt.class("ui", name);
    builder.method("describe", move |rt, recv, _| {
        let inner = rt.invoke_super(recv, "describe", Arguments::new())?;
        Ok(Value::from(format!("{}[{}]", name, inner.as_str().unwrap_or("?"))))
    });
    builder.build().unwrap()
}

fn instance(rt: &Runtime, class: &ClassRef, args: Vec<Value>) -> Value {
    Value::Object(rt.construct(class, "", args).unwrap())
}

// ============================================================================
// Linearization
// ============================================================================

#[test]
fn test_super_chain_follows_application_order() {
    let rt = Runtime::new();
    let base = widget(&rt);
    let bordered = decorating(&rt, "Bordered");
    let shadowed = decorating(&rt, "Shadowed");

    let class = rt.compose(&base, &[bordered, shadowed]).unwrap();
    let obj = instance(&rt, &class, vec![Value::str("button")]);
    assert_eq!(
        rt.invoke(&obj, "describe", Arguments::new()).unwrap().as_str(),
        Some("Shadowed[Bordered[button]]")
    );
    assert_eq!(class.name(), "Widget&Bordered&Shadowed");
}

#[test]
fn test_subclass_of_application_reaches_mixins_through_super() {
    let rt = Runtime::new();
    let base = widget(&rt);
    let app = rt.compose(&base, &[decorating(&rt, "Bordered")]).unwrap();

    let builder = rt.class("ui", "Button");
    builder.extends(&app).method("describe", |rt, recv, _| {
        let inner = rt.invoke_super(recv, "describe", Arguments::new())?;
        Ok(Value::from(format!("Button({})", inner.as_str().unwrap_or("?"))))
    });
    let button = builder.build().unwrap();

    // No constructors of its own: forwards to the application class
    let obj = instance(&rt, &button, vec![Value::str("ok")]);
    assert_eq!(
        rt.invoke(&obj, "describe", Arguments::new()).unwrap().as_str(),
        Some("Button(Bordered[ok])")
    );
}

#[test]
fn test_empty_mixin_list_is_the_base() {
    let rt = Runtime::new();
    let base = widget(&rt);
    assert_eq!(rt.compose(&base, &[]).unwrap(), base);
}

// ============================================================================
// Types and signatures
// ============================================================================

#[test]
fn test_instances_conform_to_each_mixin_type() {
    let rt = Runtime::new();
    let base = widget(&rt);
    let bordered = decorating(&rt, "Bordered");
    let unrelated = decorating(&rt, "Unrelated");
    let class = rt.compose(&base, &[bordered.clone()]).unwrap();
    let obj = instance(&rt, &class, Vec::new());

    let t = rt.types();
    assert!(rt.is(&obj, &t.interface(&base)));
    assert!(rt.is(&obj, &t.interface(&bordered)));
    assert!(!rt.is(&obj, &t.interface(&unrelated)));
}

#[test]
fn test_mixin_signature_applies_to_composed_members() {
    let rt = Runtime::new();
    let t = rt.types();
    let base = widget(&rt);

    let builder = rt.class("ui", "Resizable");
    builder
        .method("resize", |_, _, args| {
            Ok(Value::Int(args.arg(0).as_int().unwrap_or(0) * args.arg(1).as_int().unwrap_or(0)))
        })
        .signature(
            ClassSignature::new().method(
                "resize",
                FunctionType::new(t.int()).required(t.int()).required(t.int()),
            ),
        );
    let resizable = builder.build().unwrap();

    let class = rt.compose(&base, &[resizable]).unwrap();
    let obj = instance(&rt, &class, Vec::new());

    assert_eq!(
        rt.invoke(&obj, "resize", vec![Value::Int(3), Value::Int(4)]).unwrap().as_int(),
        Some(12)
    );
    let err = rt.invoke(&obj, "resize", vec![Value::Int(3)]).unwrap_err();
    assert!(matches!(
        err.as_no_such_member().map(|nsm| &nsm.reason),
        Some(MissingReason::Arity(ArityError::TooFew { expected: 2, got: 1 }))
    ));
    assert!(rt.invoke(&obj, "resize", vec![Value::Int(3), Value::str("4")]).is_err());
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_mixin_state_is_ready_before_base_constructor() {
    let rt = Runtime::new();
    let events = Rc::new(RefCell::new(Vec::new()));

    let log = events.clone();
    let builder = rt.class("ui", "Panel");
    builder.constructor("", move |rt, recv, _| {
        let theme = rt.load(&recv.this_value(), "theme")?;
        log.borrow_mut().push(format!("Panel sees {}", theme.as_str().unwrap_or("none")));
        Ok(())
    });
    let panel = builder.build().unwrap();

    let log = events.clone();
    let builder = rt.class("ui", "Themed");
    builder
        .field_with("theme", false, |_, _| Ok(Value::str("dark")))
        .constructor("", move |_, _, _| {
            log.borrow_mut().push("Themed".to_string());
            Ok(())
        });
    let themed = builder.build().unwrap();

    let class = rt.compose(&panel, &[themed]).unwrap();
    rt.construct(&class, "", Arguments::new()).unwrap();
    assert_eq!(*events.borrow(), vec!["Themed", "Panel sees dark"]);
}

#[test]
fn test_unknown_constructor_on_application_class() {
    let rt = Runtime::new();
    let base = widget(&rt);
    let class = rt.compose(&base, &[decorating(&rt, "Bordered")]).unwrap();
    let err = rt.construct(&class, "fromJson", Arguments::new()).unwrap_err();
    assert!(err.as_no_such_member().is_some());
}
