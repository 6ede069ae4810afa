//! Positional argument decoding and result encoding.
//!
//! Requests carry a JSON array. [`FromArgs`] turns it into a typed tuple and
//! rejects wrong arity or out-of-range values with `InvalidArguments`.
//! [`IntoResults`] flattens a hardware call's return value into the values
//! appended after the echoed arguments.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::CommandError;
use crate::hardware::{LibVersion, PartIdSerial};

/// Typed view of a positional argument list.
pub trait FromArgs: Sized {
    /// Decodes `args`, which must have exactly the expected length.
    fn from_args(args: &[Value]) -> Result<Self, CommandError>;
}

fn expect_len(args: &[Value], expected: usize) -> Result<(), CommandError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CommandError::InvalidArguments(format!(
            "expected {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn decode<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, CommandError> {
    let value = args
        .get(index)
        .ok_or_else(|| CommandError::InvalidArguments(format!("argument {index} missing")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| CommandError::InvalidArguments(format!("argument {index} ({value}): {e}")))
}

macro_rules! impl_from_args {
    ($len:expr $(, $name:ident : $index:tt)*) => {
        impl<$($name: DeserializeOwned),*> FromArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn from_args(args: &[Value]) -> Result<Self, CommandError> {
                expect_len(args, $len)?;
                Ok(($(decode::<$name>(args, $index)?,)*))
            }
        }
    };
}

impl_from_args!(0);
impl_from_args!(1, A: 0);
impl_from_args!(2, A: 0, B: 1);
impl_from_args!(3, A: 0, B: 1, C: 2);
impl_from_args!(4, A: 0, B: 1, C: 2, D: 3);

/// Values a successful call appends to its response.
pub trait IntoResults {
    /// Flattens `self` into response values.
    fn into_results(self) -> Vec<Value>;
}

impl IntoResults for () {
    fn into_results(self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! impl_scalar_results {
    ($($ty:ty),*) => {
        $(
            impl IntoResults for $ty {
                fn into_results(self) -> Vec<Value> {
                    vec![json!(self)]
                }
            }
        )*
    };
}

impl_scalar_results!(bool, u8, u32, i32, u64, f32, String, Vec<u32>, Vec<u64>);

impl IntoResults for LibVersion {
    fn into_results(self) -> Vec<Value> {
        vec![json!(self.major), json!(self.minor), json!(self.revision)]
    }
}

impl IntoResults for PartIdSerial {
    fn into_results(self) -> Vec<Value> {
        vec![json!(self.part_id), json!(self.serial_no)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_typed_tuples() {
        let (serial, freq) = <(u64, u64)>::from_args(&[json!(1234), json!(145_000_000)]).unwrap();
        assert_eq!((serial, freq), (1234, 145_000_000));

        let (w,) = <(f32,)>::from_args(&[json!(1)]).unwrap();
        assert!((w - 1.0).abs() < f32::EPSILON);

        assert!(<()>::from_args(&[]).is_ok());
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = <(u64,)>::from_args(&[]).unwrap_err();
        assert_eq!(
            err,
            CommandError::InvalidArguments("expected 1 argument(s), got 0".into())
        );
        assert!(<()>::from_args(&[json!(1)]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = <(u8,)>::from_args(&[json!(300)]).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidArguments(msg) if msg.starts_with("argument 0 (300)")
        ));
        assert!(<(bool,)>::from_args(&[json!("yes")]).is_err());
    }

    #[test]
    fn encodes_results() {
        assert_eq!(7i32.into_results(), vec![json!(7)]);
        assert!(().into_results().is_empty());
        assert_eq!(
            PartIdSerial {
                part_id: 1,
                serial_no: [0, 0, 2, 3]
            }
            .into_results(),
            vec![json!(1), json!([0, 0, 2, 3])]
        );
    }
}
