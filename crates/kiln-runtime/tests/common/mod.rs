//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::rc::Rc;

use kiln_runtime::{Arguments, Interceptor, ListObject, MapObject, RtResult, Runtime, RuntimeError, Value};
use tracing_subscriber::EnvFilter;

/// Route runtime logs to the test writer when `KILN_LOG` is set
pub fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_env("KILN_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Runtime with the interceptors below installed
pub fn runtime() -> Runtime {
    init_tracing();
    let rt = Runtime::new();
    install_interceptors(&rt);
    rt
}

/// Minimal `List`, `Map`, and `String` members
pub fn install_interceptors(rt: &Runtime) {
    rt.register_interceptor(
        "List",
        Interceptor::new()
            .method("[]", |_, this, args| {
                let list = this.as_list().ok_or_else(|| RuntimeError::thrown("not a list"))?;
                let index = args.arg(0).as_int().unwrap_or(-1);
                usize::try_from(index)
                    .ok()
                    .and_then(|i| list.get(i))
                    .ok_or_else(|| RuntimeError::thrown(format!("RangeError: {}", index)))
            })
            .method("[]=", |rt, this, args| {
                let list = this.as_list().ok_or_else(|| RuntimeError::thrown("not a list"))?;
                let index = args.arg(0).as_int().unwrap_or(-1);
                let value = rt.check_value(list.element_type(), args.arg(1))?;
                match usize::try_from(index) {
                    Ok(i) if list.set(i, value) => Ok(Value::Null),
                    _ => Err(RuntimeError::thrown(format!("RangeError: {}", index))),
                }
            })
            .method("add", |rt, this, args| {
                let list = this.as_list().ok_or_else(|| RuntimeError::thrown("not a list"))?;
                list.push(rt.check_value(list.element_type(), args.arg(0))?);
                Ok(Value::Null)
            })
            .getter("length", |_, this| {
                Ok(Value::Int(this.as_list().map_or(0, |l| l.len()) as i64))
            }),
    );

    rt.register_interceptor(
        "Map",
        Interceptor::new()
            .method("[]", |_, this, args| Ok(map_of(this)?.get(&args.arg(0)).unwrap_or(Value::Null)))
            .method("[]=", |_, this, args| {
                map_of(this)?.insert(args.arg(0), args.arg(1));
                Ok(Value::Null)
            })
            .getter("length", |_, this| Ok(Value::Int(map_of(this)?.len() as i64))),
    );

    rt.register_interceptor(
        "String",
        Interceptor::new()
            .getter("length", |_, this| {
                Ok(Value::Int(this.as_str().map_or(0, |s| s.chars().count()) as i64))
            })
            .method("toUpperCase", |_, this, _| {
                Ok(Value::from(this.as_str().unwrap_or_default().to_uppercase()))
            }),
    );
}

fn map_of(value: &Value) -> RtResult<&Rc<MapObject>> {
    match value {
        Value::Map(map) => Ok(map),
        _ => Err(RuntimeError::thrown("not a map")),
    }
}

/// `List<int>` holding `items`
pub fn int_list(rt: &Runtime, items: &[i64]) -> Value {
    let values = items.iter().map(|&i| Value::Int(i)).collect();
    Value::List(Rc::new(ListObject::new(rt.types().int(), values)))
}

/// Shorthand for positional arguments
pub fn args(values: Vec<Value>) -> Arguments {
    Arguments::positional(values)
}
