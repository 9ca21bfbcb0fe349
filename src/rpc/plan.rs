//! Invocation plans: the fixed call shape of one bound method.
//!
//! A [`Signature`] lists the parameter and return slots of a method. It is
//! normally produced from Rust types by [`Params`](super::Params) and
//! [`Returns`](super::Returns), but can be built by hand. [`Plan::build`]
//! validates it once at bind time; every later call reuses the plan.

use std::any::type_name;

use super::error::BindError;

/// One parameter or return position of a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The cancellation context. Only valid as the first parameter.
    Context,
    /// A serializable value. `streaming` marks a subscription stream.
    Value {
        type_name: &'static str,
        streaming: bool,
    },
    /// The error slot.
    Error,
}

impl Slot {
    pub fn value<T: ?Sized>() -> Self {
        Slot::Value {
            type_name: type_name::<T>(),
            streaming: false,
        }
    }

    pub fn stream<T: ?Sized>() -> Self {
        Slot::Value {
            type_name: type_name::<T>(),
            streaming: true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Slot::Error)
    }
}

/// Parameter and return slots of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub inputs: Vec<Slot>,
    pub outputs: Vec<Slot>,
}

impl Signature {
    pub fn new(inputs: Vec<Slot>, outputs: Vec<Slot>) -> Self {
        Self { inputs, outputs }
    }
}

/// One member of a method set, as declared by the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    /// A callable slot with its signature.
    Method { name: String, signature: Signature },
    /// Anything that is not callable. Always rejected at bind time.
    Field {
        name: String,
        type_name: &'static str,
    },
}

impl Member {
    pub fn method<P: super::Params, R: super::Returns>(name: impl Into<String>) -> Self {
        Member::Method {
            name: name.into(),
            signature: Signature::new(P::inputs(), R::outputs()),
        }
    }

    pub fn field<T: ?Sized>(name: impl Into<String>) -> Self {
        Member::Field {
            name: name.into(),
            type_name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Method { name, .. } | Member::Field { name, .. } => name,
        }
    }
}

/// Validated call shape of one method. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    name: String,
    signature: Signature,
    has_context: bool,
    value_out: Option<usize>,
    error_out: Option<usize>,
    arity: usize,
    streaming: bool,
}

impl Plan {
    /// Validate `signature` and derive the plan for the member `name`.
    pub fn build(name: impl Into<String>, signature: Signature) -> Result<Self, BindError> {
        let name = name.into();

        if let Some(index) = signature
            .inputs
            .iter()
            .skip(1)
            .position(|slot| *slot == Slot::Context)
        {
            return Err(BindError::MisplacedContext {
                name,
                index: index + 1,
            });
        }
        let has_context = signature.inputs.first() == Some(&Slot::Context);

        let arity = signature.outputs.len();
        let (value_out, error_out) = match signature.outputs.as_slice() {
            [] => (None, None),
            [Slot::Error] => (None, Some(0)),
            [_] => (Some(0), None),
            [_, Slot::Error] => (Some(0), Some(1)),
            [_, _] => return Err(BindError::SecondOutputNotError { name }),
            _ => {
                return Err(BindError::TooManyOutputs { name, count: arity });
            }
        };

        let streaming = match value_out.map(|i| signature.outputs[i]) {
            Some(Slot::Value { streaming, .. }) => streaming,
            Some(_) => {
                return Err(BindError::InvalidOutput { name, index: 0 });
            }
            None => false,
        };

        Ok(Self {
            name,
            signature,
            has_context,
            value_out,
            error_out,
            arity,
            streaming,
        })
    }

    /// Member name as declared; sent on the wire after the namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn has_context(&self) -> bool {
        self.has_context
    }

    pub fn value_out(&self) -> Option<usize> {
        self.value_out
    }

    pub fn error_out(&self) -> Option<usize> {
        self.error_out
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of declared positional params, excluding the context.
    ///
    /// A dynamic `Vec<Value>` parameter list declares a single slot, so this
    /// is 1 for such a method however many values a call sends.
    pub fn wire_params(&self) -> usize {
        self.signature.inputs.len() - usize::from(self.has_context)
    }
}
