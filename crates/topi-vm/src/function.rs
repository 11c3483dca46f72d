//! Host functions callable from scripts

use std::fmt;
use std::sync::Arc;

use topi_value::TaggedValue;

use crate::error::{TopiError, TopiResult};

type HostFn = dyn Fn(&[TaggedValue]) -> TaggedValue + Send + Sync + 'static;

/// A host function bound to an extern global
#[derive(Clone)]
pub struct ExternFunction {
    arity: usize,
    f: Arc<HostFn>,
}

impl ExternFunction {
    /// Wrap a function taking exactly `arity` arguments
    pub fn new(
        arity: usize,
        f: impl Fn(&[TaggedValue]) -> TaggedValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            arity,
            f: Arc::new(f),
        }
    }

    /// Declared argument count
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invoke with arity checking
    pub fn call(&self, name: &str, args: &[TaggedValue]) -> TopiResult<TaggedValue> {
        if args.len() != self.arity {
            return Err(TopiError::ArityMismatch {
                name: name.to_string(),
                expected: self.arity,
                actual: args.len(),
            });
        }
        Ok((self.f)(args))
    }
}

impl fmt::Debug for ExternFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternFunction")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}
