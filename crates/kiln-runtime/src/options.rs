//! Runtime configuration
//!
//! Options deserialize from TOML or JSON; absent keys take the values in
//! [`crate::defaults`].

use serde::Deserialize;

use crate::defaults;
use crate::error::{RtResult, RuntimeError};

/// Tunables for one [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Microtask budget for one `run_until_idle` call; `None` is unlimited
    pub max_microtasks_per_drain: Option<usize>,

    /// Record failed futures that never had a listener
    pub report_uncaught: bool,

    /// Check dynamic call arguments against declared parameter types
    pub check_arguments: bool,

    /// Log no-such-method fallbacks at debug level
    pub trace_dispatch_fallbacks: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_microtasks_per_drain: defaults::DEFAULT_MAX_MICROTASKS_PER_DRAIN,
            report_uncaught: defaults::DEFAULT_REPORT_UNCAUGHT,
            check_arguments: defaults::DEFAULT_CHECK_ARGUMENTS,
            trace_dispatch_fallbacks: defaults::DEFAULT_TRACE_DISPATCH_FALLBACKS,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from TOML text
    pub fn from_toml_str(text: &str) -> RtResult<Self> {
        toml::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Parse options from JSON text
    pub fn from_json_str(text: &str) -> RtResult<Self> {
        serde_json::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Set the microtask budget
    pub fn with_microtask_budget(mut self, budget: usize) -> Self {
        self.max_microtasks_per_drain = Some(budget);
        self
    }
}
