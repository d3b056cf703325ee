//! Dynamic dispatch: arity, fallbacks, interceptors, privacy, statics

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use kiln_runtime::{
    ArityError, Arguments, ClassRef, ClassSignature, FunctionType, HostObject, InvocationKind,
    MissingReason, Runtime, RuntimeError, Value,
};

/// `f(a, b, [c = 0])` returning the number of positionals it received
fn arity_class(rt: &Runtime) -> ClassRef {
    let t = rt.types();
    let builder = rt.class("test", "Target");
    builder
        .method("f", |_, _, args| Ok(Value::Int(args.len() as i64)))
        .signature(
            ClassSignature::new().method(
                "f",
                FunctionType::new(t.int())
                    .required(t.dynamic())
                    .required(t.dynamic())
                    .optional(t.dynamic(), true),
            ),
        );
    builder.build().unwrap()
}

fn new_instance(rt: &Runtime, class: &ClassRef) -> Value {
    Value::Object(rt.construct(class, "", Arguments::new()).unwrap())
}

fn reason(err: &RuntimeError) -> Option<MissingReason> {
    err.as_no_such_member().map(|nsm| nsm.reason.clone())
}

// ============================================================================
// Arity
// ============================================================================

#[test]
fn test_two_required_one_optional() {
    let rt = Runtime::new();
    let class = arity_class(&rt);
    let obj = new_instance(&rt, &class);

    let call = |n: i64| rt.invoke(&obj, "f", (0..n).map(Value::Int).collect::<Vec<_>>());

    assert!(matches!(
        reason(&call(1).unwrap_err()),
        Some(MissingReason::Arity(ArityError::TooFew { expected: 2, got: 1 }))
    ));
    assert_eq!(call(2).unwrap().as_int(), Some(2));
    assert_eq!(call(3).unwrap().as_int(), Some(3));
    assert!(matches!(
        reason(&call(4).unwrap_err()),
        Some(MissingReason::Arity(ArityError::TooMany { expected: 3, got: 4 }))
    ));
}

#[test]
fn test_no_such_member_carries_the_attempt() {
    let rt = Runtime::new();
    let class = arity_class(&rt);
    let obj = new_instance(&rt, &class);

    let err = rt.invoke(&obj, "missing", vec![Value::Int(7)]).unwrap_err();
    let nsm = err.as_no_such_member().unwrap();
    assert!(nsm.receiver.identical(&obj));
    assert_eq!(nsm.invocation.member.as_str(), "missing");
    assert_eq!(nsm.invocation.kind, InvocationKind::Method);
    assert_eq!(nsm.invocation.args.arg(0).as_int(), Some(7));
    assert_eq!(nsm.reason, MissingReason::Missing);
}

#[test]
fn test_named_arguments() {
    let rt = Runtime::new();
    let t = rt.types();
    let builder = rt.class("test", "Greeter");
    builder
        .method("greet", |_, _, args| {
            let name = args.arg(0);
            let punct = args.named_or("punct", Value::str("!"));
            Ok(Value::from(format!(
                "hello {}{}",
                name.as_str().unwrap_or(""),
                punct.as_str().unwrap_or("")
            )))
        })
        .signature(
            ClassSignature::new().method(
                "greet",
                FunctionType::new(t.string())
                    .required(t.string())
                    .named("punct", t.string(), true)
                    .required_named("lang", t.string()),
            ),
        );
    let obj = new_instance(&rt, &builder.build().unwrap());

    let ok = rt
        .invoke(&obj, "greet", Arguments::positional(vec![Value::str("kiln")]).with_named("lang", "en"))
        .unwrap();
    assert_eq!(ok.as_str(), Some("hello kiln!"));

    let missing = rt
        .invoke(&obj, "greet", Arguments::positional(vec![Value::str("kiln")]))
        .unwrap_err();
    assert!(matches!(
        reason(&missing),
        Some(MissingReason::Arity(ArityError::MissingRequiredNamed(_)))
    ));

    let unknown = rt
        .invoke(
            &obj,
            "greet",
            Arguments::positional(vec![Value::str("kiln")])
                .with_named("lang", "en")
                .with_named("volume", 11i64),
        )
        .unwrap_err();
    assert!(matches!(
        reason(&unknown),
        Some(MissingReason::Arity(ArityError::UnknownNamed(_)))
    ));
}

#[test]
fn test_torn_off_method_keeps_signature() {
    let rt = Runtime::new();
    let class = arity_class(&rt);
    let obj = new_instance(&rt, &class);

    let f = rt.load(&obj, "f").unwrap();
    assert_eq!(rt.call(&f, vec![Value::Int(1), Value::Int(2)]).unwrap().as_int(), Some(2));
    assert!(rt.call(&f, vec![Value::Int(1)]).is_err());
}

// ============================================================================
// Fallback handler
// ============================================================================

#[test]
fn test_fallback_receives_invocation() {
    let rt = Runtime::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let builder = rt.class("test", "Proxy");
    builder.no_such_method(move |_, _, invocation| {
        log.borrow_mut().push((invocation.kind, invocation.member.as_str().to_string()));
        Ok(Value::str("handled"))
    });
    let obj = new_instance(&rt, &builder.build().unwrap());

    assert_eq!(rt.load(&obj, "anything").unwrap().as_str(), Some("handled"));
    assert_eq!(
        rt.invoke(&obj, "doIt", vec![Value::Int(1)]).unwrap().as_str(),
        Some("handled")
    );
    rt.store(&obj, "prop", Value::Int(1)).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            (InvocationKind::Getter, "anything".to_string()),
            (InvocationKind::Method, "doIt".to_string()),
            (InvocationKind::Setter, "prop".to_string()),
        ]
    );
}

#[test]
fn test_fallback_covers_arity_mismatch() {
    let rt = Runtime::new();
    let base = arity_class(&rt);
    let builder = rt.class("test", "Lenient");
    builder.extends(&base).no_such_method(|_, _, invocation| {
        Ok(Value::Int(-(invocation.args.len() as i64)))
    });
    let obj = new_instance(&rt, &builder.build().unwrap());
    assert_eq!(rt.invoke(&obj, "f", vec![Value::Int(1)]).unwrap().as_int(), Some(-1));
    assert_eq!(
        rt.invoke(&obj, "f", vec![Value::Int(1), Value::Int(2)]).unwrap().as_int(),
        Some(2)
    );
}

#[test]
fn test_fallback_is_reentrant() {
    let rt = Runtime::new();
    let builder = rt.class("test", "Forwarder");
    builder
        .method("real", |_, _, args| Ok(Value::Int(args.arg(0).as_int().unwrap_or(0) * 10)))
        .no_such_method(|rt, recv, invocation| {
            // Forward every unknown method to `real`, through dispatch again
            rt.invoke(&recv.this_value(), "real", invocation.args)
        });
    let obj = new_instance(&rt, &builder.build().unwrap());
    assert_eq!(rt.invoke(&obj, "fake", vec![Value::Int(4)]).unwrap().as_int(), Some(40));
}

#[test]
fn test_final_field_store_is_read_only() {
    let rt = Runtime::new();
    let builder = rt.class("test", "Frozen");
    builder.final_field("id").constructor("", |_, recv, args| {
        recv.this.set_field("id", args.arg(0));
        Ok(())
    });
    let class = builder.build().unwrap();
    let obj = Value::Object(rt.construct(&class, "", vec![Value::Int(5)]).unwrap());

    let err = rt.store(&obj, "id", Value::Int(6)).unwrap_err();
    assert_eq!(reason(&err), Some(MissingReason::ReadOnly));
    assert_eq!(rt.load(&obj, "id").unwrap().as_int(), Some(5));
}

// ============================================================================
// Host values and interceptors
// ============================================================================

#[test]
fn test_list_through_interceptor() {
    let rt = common::runtime();
    let list = common::int_list(&rt, &[1, 2, 3]);

    assert_eq!(rt.index(&list, Value::Int(1)).unwrap().as_int(), Some(2));
    rt.set_index(&list, Value::Int(1), Value::Int(20)).unwrap();
    rt.invoke(&list, "add", vec![Value::Int(4)]).unwrap();
    assert_eq!(rt.load(&list, "length").unwrap().as_int(), Some(4));
    assert_eq!(rt.index(&list, Value::Int(1)).unwrap().as_int(), Some(20));

    // Element type is enforced by the interceptor
    assert!(rt.invoke(&list, "add", vec![Value::str("x")]).unwrap_err().as_cast_failure().is_some());
}

#[test]
fn test_string_and_map_interceptors() {
    let rt = common::runtime();
    let text = Value::str("kiln");
    assert_eq!(rt.load(&text, "length").unwrap().as_int(), Some(4));
    assert_eq!(
        rt.invoke(&text, "toUpperCase", Arguments::new()).unwrap().as_str(),
        Some("KILN")
    );

    let map = Value::Map(Rc::new(kiln_runtime::MapObject::new(rt.types().string(), rt.types().int())));
    rt.set_index(&map, Value::str("a"), Value::Int(1)).unwrap();
    assert_eq!(rt.index(&map, Value::str("a")).unwrap().as_int(), Some(1));
    assert!(rt.index(&map, Value::str("b")).unwrap().is_null());
    assert_eq!(rt.load(&map, "length").unwrap().as_int(), Some(1));
}

#[test]
fn test_torn_off_interceptor_method() {
    let rt = common::runtime();
    let list = common::int_list(&rt, &[]);
    let add = rt.load(&list, "add").unwrap();
    rt.call(&add, vec![Value::Int(9)]).unwrap();
    assert_eq!(rt.index(&list, Value::Int(0)).unwrap().as_int(), Some(9));
}

#[test]
fn test_unregistered_host_value_is_no_such_member() {
    let rt = Runtime::new();
    let list = common::int_list(&rt, &[1]);
    let err = rt.index(&list, Value::Int(0)).unwrap_err();
    let nsm = err.as_no_such_member().unwrap();
    assert_eq!(nsm.invocation.kind, InvocationKind::Index);
}

#[test]
fn test_host_object_direct_properties() {
    let rt = Runtime::new();
    let host = Value::Host(Rc::new(HostObject::new("Element")));
    rt.store(&host, "id", Value::str("root")).unwrap();
    assert_eq!(rt.load(&host, "id").unwrap().as_str(), Some("root"));
    assert!(rt.load(&host, "missing").is_err());
}

// ============================================================================
// Privacy
// ============================================================================

#[test]
fn test_private_names_do_not_collide_across_libraries() {
    let rt = Runtime::new();
    let a_secret = rt.private_name("a", "_secret");
    let b_secret = rt.private_name("b", "_secret");
    assert_ne!(a_secret, b_secret);
    assert_eq!(a_secret, rt.private_name("a", "_secret"));

    let builder = rt.class("a", "Vault");
    builder
        .field_with(a_secret.clone(), false, |_, _| Ok(Value::Int(1)))
        .method("_secret", |_, _, _| Ok(Value::str("public")));
    let obj = new_instance(&rt, &builder.build().unwrap());

    assert_eq!(rt.load(&obj, &a_secret).unwrap().as_int(), Some(1));
    assert!(rt.load(&obj, &b_secret).is_err());
    assert_eq!(
        rt.invoke(&obj, "_secret", Arguments::new()).unwrap().as_str(),
        Some("public")
    );
}

// ============================================================================
// Statics and callable objects
// ============================================================================

#[test]
fn test_static_methods_and_lazy_statics() {
    let rt = Runtime::new();
    let t = rt.types();
    let runs = Rc::new(RefCell::new(0));
    let counter = runs.clone();
    let builder = rt.class("test", "Config");
    builder
        .static_method("twice", |_, args| Ok(Value::Int(args.arg(0).as_int().unwrap_or(0) * 2)))
        .static_signature("twice", FunctionType::new(t.int()).required(t.int()))
        .lazy_static("instance", move |_| {
            *counter.borrow_mut() += 1;
            Ok(Value::str("config"))
        });
    let class = Value::Class(builder.build().unwrap());

    assert_eq!(rt.invoke(&class, "twice", vec![Value::Int(4)]).unwrap().as_int(), Some(8));
    assert!(rt.invoke(&class, "twice", vec![Value::str("x")]).is_err());
    assert!(rt.invoke(&class, "twice", Arguments::new()).is_err());

    assert_eq!(*runs.borrow(), 0);
    rt.load(&class, "instance").unwrap();
    rt.load(&class, "instance").unwrap();
    assert_eq!(*runs.borrow(), 1);
    rt.store(&class, "instance", Value::str("replaced")).unwrap();
    assert_eq!(rt.load(&class, "instance").unwrap().as_str(), Some("replaced"));
    assert_eq!(*runs.borrow(), 1);
}

#[test]
fn test_callable_object() {
    let rt = Runtime::new();
    let builder = rt.class("test", "Adder");
    builder.method("call", |_, _, args| {
        Ok(Value::Int(args.positional.iter().filter_map(Value::as_int).sum()))
    });
    let obj = new_instance(&rt, &builder.build().unwrap());
    assert_eq!(
        rt.call(&obj, vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap().as_int(),
        Some(6)
    );
}

#[test]
fn test_getter_returning_function_is_invocable() {
    let rt = Runtime::new();
    let builder = rt.class("test", "Holder");
    builder.getter("action", |rt, _| {
        Ok(rt.function("action", None, |_, _| Ok(Value::str("ran"))))
    });
    let obj = new_instance(&rt, &builder.build().unwrap());
    assert_eq!(rt.invoke(&obj, "action", Arguments::new()).unwrap().as_str(), Some("ran"));
}

#[test]
fn test_named_constructors_and_super_constructor() {
    let rt = Runtime::new();
    let base = rt.class("test", "Point");
    base.field("x").field("y").constructor("", |_, recv, args| {
        recv.this.set_field("x", args.arg(0));
        recv.this.set_field("y", args.arg(1));
        Ok(())
    });
    base.constructor("origin", |rt, recv, _| {
        rt.run_constructor(&recv.holder, &recv.this, "", vec![Value::Int(0), Value::Int(0)])
    });
    let base = base.build().unwrap();

    let derived = rt.class("test", "Point3");
    derived.extends(&base).field("z").constructor("", |rt, recv, args| {
        rt.construct_super(recv, "", vec![args.arg(0), args.arg(1)])?;
        recv.this.set_field("z", args.arg(2));
        Ok(())
    });
    let derived = derived.build().unwrap();

    let origin = rt.construct(&base, "origin", Arguments::new()).unwrap();
    assert_eq!(origin.field("x").and_then(|v| v.as_int()), Some(0));

    let p = rt
        .construct(&derived, "", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        .unwrap();
    assert_eq!(p.field("y").and_then(|v| v.as_int()), Some(2));
    assert_eq!(p.field("z").and_then(|v| v.as_int()), Some(3));

    let err = rt.construct(&derived, "origin", Arguments::new()).unwrap_err();
    assert_eq!(err.as_no_such_member().unwrap().invocation.kind, InvocationKind::Constructor);
}
