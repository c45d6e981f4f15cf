//! Setting controls: the capability interface between a setting and the
//! external resource it drives.
//!
//! A [`Control`] can probe the current external value, probe the legal value
//! set, and apply a requested value. Probes are advisory: `None` means "no
//! answer this time" and the caller keeps its cached state.

mod command;
mod file;

pub use command::CommandControl;
pub use file::FileControl;

use std::fmt;

use crate::value::Value;

// ── Error type ──

/// Apply failures.
///
/// String payloads follow the convention **"context: details"**, as with the
/// rest of the crate's errors.
#[derive(Debug)]
pub enum ApplyError {
    /// The target resource does not exist.
    NotFound(String),
    /// The resource refused the value.
    Rejected(String),
    /// An external command could not run or exited unsuccessfully.
    CommandFailed(String),
    /// I/O error while talking to the resource.
    Io(std::io::Error),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::NotFound(e) => write!(f, "Target not found: {e}"),
            ApplyError::Rejected(e) => write!(f, "Value rejected: {e}"),
            ApplyError::CommandFailed(e) => write!(f, "Command failed: {e}"),
            ApplyError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ApplyError {
    fn from(e: std::io::Error) -> Self {
        ApplyError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ApplyError>;

// ── Apply outcome ──

/// Result of a successful apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The resource confirmed this value (may differ from the request if the
    /// resource normalised it).
    Confirmed(Value),
    /// The write could not be confirmed (resource contended or absent).
    /// Carries the requested value; the setting keeps its prior active value.
    Unconfirmed(Value),
}

impl Applied {
    pub fn value(&self) -> &Value {
        match self {
            Applied::Confirmed(v) | Applied::Unconfirmed(v) => v,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Applied::Confirmed(_))
    }
}

// ── Trait ──

pub trait Control {
    /// Current confirmed external value, if the control can tell.
    fn current(&mut self) -> Option<Value> {
        None
    }

    /// Current legal value set, if the control computes it dynamically.
    fn legal_values(&mut self) -> Option<Vec<Value>> {
        None
    }

    /// Push `requested` to the external resource. Must be safe to call
    /// repeatedly with the same value.
    fn apply(&mut self, requested: &Value) -> Result<Applied>;
}

pub mod mock {
    use super::*;
    use std::cell::{Ref, RefCell};
    use std::rc::Rc;

    /// Recorded state of a [`MockControl`].
    #[derive(Debug, Default)]
    pub struct MockState {
        /// Every value passed to `apply`, in call order.
        pub applied: Vec<Value>,
        /// Answer for the `current` probe.
        pub current: Option<Value>,
        /// Answer for the `legal_values` probe.
        pub legal: Option<Vec<Value>>,
        /// Values for which `apply` returns an error.
        pub reject: Vec<Value>,
        /// If true, `apply` reports every write as unconfirmed.
        pub unconfirmed: bool,
        /// If set, `apply` confirms this value instead of the request.
        pub normalize: Option<Value>,
    }

    /// In-memory control for unit tests. Clones share state, so a test can
    /// keep one clone after moving another into a setting.
    #[derive(Debug, Clone, Default)]
    pub struct MockControl {
        state: Rc<RefCell<MockState>>,
    }

    impl MockControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn state(&self) -> Ref<'_, MockState> {
            self.state.borrow()
        }

        pub fn applied(&self) -> Vec<Value> {
            self.state.borrow().applied.clone()
        }

        pub fn set_current(&self, value: Option<Value>) {
            self.state.borrow_mut().current = value;
        }

        pub fn set_legal(&self, values: Option<Vec<Value>>) {
            self.state.borrow_mut().legal = values;
        }

        pub fn reject(&self, value: Value) {
            self.state.borrow_mut().reject.push(value);
        }

        pub fn set_unconfirmed(&self, unconfirmed: bool) {
            self.state.borrow_mut().unconfirmed = unconfirmed;
        }

        pub fn set_normalize(&self, value: Option<Value>) {
            self.state.borrow_mut().normalize = value;
        }
    }

    impl Control for MockControl {
        fn current(&mut self) -> Option<Value> {
            self.state.borrow().current.clone()
        }

        fn legal_values(&mut self) -> Option<Vec<Value>> {
            self.state.borrow().legal.clone()
        }

        fn apply(&mut self, requested: &Value) -> Result<Applied> {
            let mut st = self.state.borrow_mut();
            st.applied.push(requested.clone());
            if st.reject.contains(requested) {
                return Err(ApplyError::Rejected(format!("mock: {requested}")));
            }
            if st.unconfirmed {
                return Ok(Applied::Unconfirmed(requested.clone()));
            }
            let confirmed = st.normalize.clone().unwrap_or_else(|| requested.clone());
            st.current = Some(confirmed.clone());
            Ok(Applied::Confirmed(confirmed))
        }
    }
}
