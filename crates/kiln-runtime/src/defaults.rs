//! Default constants for runtime configuration and reserved member names.

/// Default microtask budget per `run_until_idle` call (unlimited).
pub const DEFAULT_MAX_MICROTASKS_PER_DRAIN: Option<usize> = None;

/// Record failed futures nobody listened to.
pub const DEFAULT_REPORT_UNCAUGHT: bool = true;

/// Type-check dynamic call arguments against declared parameter types.
pub const DEFAULT_CHECK_ARGUMENTS: bool = true;

/// Log every no-such-method fallback at debug level.
pub const DEFAULT_TRACE_DISPATCH_FALLBACKS: bool = false;

/// Name of the unnamed constructor.
pub const UNNAMED_CONSTRUCTOR: &str = "";

/// Member invoked when an object is called like a function.
pub const CALL_MEMBER: &str = "call";

/// Index read operator.
pub const INDEX_OPERATOR: &str = "[]";

/// Index write operator.
pub const INDEX_SET_OPERATOR: &str = "[]=";

/// Separator between the parts of a mixin application class name (`Base&M1`).
pub const MIXIN_SEPARATOR: &str = "&";

/// Runtime tag under which namespaces are reported.
pub const LIBRARY_TAG: &str = "Library";
