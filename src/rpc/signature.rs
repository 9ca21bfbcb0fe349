//! Type-level description of a method signature.
//!
//! A bound method is declared by two types: its parameter tuple and its
//! return type.
//!
//! ```ignore
//! // Add(ctx, a, b) -> (int, error)
//! Method<(Context, i64, i64), Result<i64, Error>>
//! // Watch(ctx) -> (stream of int, error)
//! Method<(Context,), Result<Subscription<i64>, Error>>
//! ```
//!
//! [`Params`] and [`Returns`] turn those types into the runtime
//! [`Signature`](super::Signature) that the plan builder validates, and carry
//! the encode/decode glue the dispatcher needs.

use std::any::TypeId;
use std::iter;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::Span;

use super::context::Context;
use super::error::Error;
use super::pending::SinkInstaller;
use super::plan::Slot;
use super::sink::{self, Subscription};

/// Positional parameters of a method, optionally led by a [`Context`].
///
/// Implemented for tuples of up to eight serializable values, with or without
/// a leading `Context`, and for `Vec<Value>` as a dynamic parameter list.
pub trait Params: Send + 'static {
    /// Parameter slots, including the context if present.
    fn inputs() -> Vec<Slot>;

    /// Separate the context from the wire params and encode the rest.
    fn split(self) -> Result<(Option<Context>, Vec<Value>), serde_json::Error>;
}

/// The whole list is one declared slot; its elements become the wire params.
impl Params for Vec<Value> {
    fn inputs() -> Vec<Slot> {
        vec![Slot::value::<Vec<Value>>()]
    }

    fn split(self) -> Result<(Option<Context>, Vec<Value>), serde_json::Error> {
        Ok((None, self))
    }
}

macro_rules! impl_params {
    ($($arg:ident),*) => {
        impl<$($arg: Serialize + Send + 'static),*> Params for ($($arg,)*) {
            fn inputs() -> Vec<Slot> {
                vec![$(Slot::value::<$arg>()),*]
            }

            #[allow(non_snake_case)]
            fn split(self) -> Result<(Option<Context>, Vec<Value>), serde_json::Error> {
                let ($($arg,)*) = self;
                Ok((None, vec![$(serde_json::to_value($arg)?),*]))
            }
        }

        impl<$($arg: Serialize + Send + 'static),*> Params for (Context, $($arg,)*) {
            fn inputs() -> Vec<Slot> {
                vec![Slot::Context, $(Slot::value::<$arg>()),*]
            }

            #[allow(non_snake_case)]
            fn split(self) -> Result<(Option<Context>, Vec<Value>), serde_json::Error> {
                let (ctx, $($arg,)*) = self;
                Ok((Some(ctx), vec![$(serde_json::to_value($arg)?),*]))
            }
        }
    };
}

impl_params!();
impl_params!(A1);
impl_params!(A1, A2);
impl_params!(A1, A2, A3);
impl_params!(A1, A2, A3, A4);
impl_params!(A1, A2, A3, A4, A5);
impl_params!(A1, A2, A3, A4, A5, A6);
impl_params!(A1, A2, A3, A4, A5, A6, A7);
impl_params!(A1, A2, A3, A4, A5, A6, A7, A8);

/// A type that can occupy the value slot of a method.
///
/// Every `DeserializeOwned + Default` type is a scalar value; `()` means "no
/// value slot". [`Subscription<T>`] is a streaming value.
pub trait ValueType: Sized + Send + 'static {
    /// The value slot, or `None` when the type declares no value.
    fn slot() -> Option<Slot>;

    /// Zero value used when the call fails locally.
    fn zero() -> Self;

    /// Decode a scalar result.
    fn decode(raw: Value) -> Result<Self, serde_json::Error>;

    /// Build the stream and its sink installer for a streaming call.
    fn open(ctx: Option<Context>, span: Span) -> Option<(Self, SinkInstaller)>;
}

impl<T> ValueType for T
where
    T: DeserializeOwned + Default + Send + 'static,
{
    fn slot() -> Option<Slot> {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            None
        } else {
            Some(Slot::value::<T>())
        }
    }

    fn zero() -> Self {
        T::default()
    }

    fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    fn open(_ctx: Option<Context>, _span: Span) -> Option<(Self, SinkInstaller)> {
        None
    }
}

impl<T> ValueType for Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn slot() -> Option<Slot> {
        Some(Slot::stream::<T>())
    }

    fn zero() -> Self {
        Subscription::closed()
    }

    fn decode(_raw: Value) -> Result<Self, serde_json::Error> {
        Err(serde::de::Error::custom(
            "subscription elements arrive as pushes, not as a result",
        ))
    }

    fn open(ctx: Option<Context>, span: Span) -> Option<(Self, SinkInstaller)> {
        Some(sink::open::<T>(ctx, span))
    }
}

/// Values produced for a call, positioned by its plan.
#[derive(Debug)]
pub struct Outputs<V> {
    /// `None` when the signature has no value slot.
    pub value: Option<V>,
    /// `None` when there is no error, or no error slot.
    pub error: Option<Error>,
}

/// Return type of a bound method.
///
/// | Rust type          | outputs           |
/// |--------------------|-------------------|
/// | `()`               | none              |
/// | `Result<(), Error>`| error             |
/// | `Result<V, Error>` | value, error      |
/// | `Unchecked<V>`     | value             |
pub trait Returns: Sized + Send + 'static {
    type Value: ValueType;

    fn outputs() -> Vec<Slot>;

    fn assemble(outputs: Outputs<Self::Value>) -> Self;
}

impl Returns for () {
    type Value = ();

    fn outputs() -> Vec<Slot> {
        Vec::new()
    }

    fn assemble(_outputs: Outputs<()>) -> Self {}
}

impl<V: ValueType> Returns for Result<V, Error> {
    type Value = V;

    fn outputs() -> Vec<Slot> {
        V::slot().into_iter().chain(iter::once(Slot::Error)).collect()
    }

    fn assemble(outputs: Outputs<V>) -> Self {
        match outputs.error {
            Some(err) => Err(err),
            None => Ok(outputs.value.unwrap_or_else(V::zero)),
        }
    }
}

/// Value-only return: local and remote failures are not reported and the
/// value falls back to its zero value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unchecked<V>(pub V);

impl<V> Unchecked<V> {
    pub fn into_inner(self) -> V {
        self.0
    }
}

impl<V: ValueType> Returns for Unchecked<V> {
    type Value = V;

    fn outputs() -> Vec<Slot> {
        V::slot().into_iter().collect()
    }

    fn assemble(outputs: Outputs<V>) -> Self {
        Unchecked(outputs.value.unwrap_or_else(V::zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::rpc::plan::{Plan, Signature};
    use serde_json::json;

    #[test]
    fn test_params_with_context() {
        assert_eq!(
            <(Context, i64, String)>::inputs(),
            vec![Slot::Context, Slot::value::<i64>(), Slot::value::<String>()]
        );

        let (ctx, wire) = (Context::new(), 2i64, "x".to_string()).split().unwrap();
        assert!(ctx.is_some());
        assert_eq!(wire, vec![json!(2), json!("x")]);
    }

    #[test]
    fn test_params_without_context() {
        assert_eq!(<()>::inputs(), Vec::<Slot>::new());
        let (ctx, wire) = (1u8, true).split().unwrap();
        assert!(ctx.is_none());
        assert_eq!(wire, vec![json!(1), json!(true)]);
    }

    #[test]
    fn test_dynamic_params_are_one_slot() {
        assert_eq!(<Vec<Value>>::inputs(), vec![Slot::value::<Vec<Value>>()]);

        let (ctx, wire) = vec![json!(1), json!("a"), json!(null)].split().unwrap();
        assert!(ctx.is_none());
        assert_eq!(wire.len(), 3);

        let plan = Plan::build("Call", Signature::new(<Vec<Value>>::inputs(), vec![])).unwrap();
        assert_eq!(plan.wire_params(), 1);
    }

    #[test]
    fn test_return_shapes() {
        assert_eq!(<()>::outputs(), Vec::<Slot>::new());
        assert_eq!(<Result<(), Error>>::outputs(), vec![Slot::Error]);
        assert_eq!(
            <Result<i64, Error>>::outputs(),
            vec![Slot::value::<i64>(), Slot::Error]
        );
        assert_eq!(
            <Result<Subscription<i64>, Error>>::outputs(),
            vec![Slot::stream::<i64>(), Slot::Error]
        );
        assert_eq!(<Unchecked<String>>::outputs(), vec![Slot::value::<String>()]);
    }

    #[test]
    fn test_assemble_zero_value_on_missing() {
        let out = <Unchecked<i64>>::assemble(Outputs {
            value: None,
            error: None,
        });
        assert_eq!(out, Unchecked(0));
    }
}
