//! The Bolt value model and typed accessors.

use std::collections::HashMap;

use crate::error::CoercionError;

/// Query parameters: named values sent with a RUN.
pub type Params = HashMap<String, Value>;

/// Largest integer magnitude a `f64` can represent exactly.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

/// A value as it travels over the wire.
///
/// Accessors are strict within type families: a string never silently turns
/// into a number. Conversions that exist but would change the value (e.g.
/// a large `Integer` into `f64`) fail with [`CoercionError::LossyCoercion`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value. Typed getters surface it as `None`.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Byte array.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(HashMap<String, Value>),
}

impl Value {
    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch(&self, expected: &'static str) -> CoercionError {
        CoercionError::TypeMismatch {
            expected,
            actual: self.type_name(),
        }
    }

    /// Boolean value. Only [`Value::Boolean`] coerces.
    pub fn as_bool(&self) -> Result<bool, CoercionError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Integer value. Only [`Value::Integer`] coerces.
    pub fn as_i64(&self) -> Result<i64, CoercionError> {
        match self {
            Value::Integer(i) => Ok(*i),
            other => Err(other.mismatch("i64")),
        }
    }

    /// Integer narrowed to `i32`, failing when it does not fit.
    pub fn as_i32(&self) -> Result<i32, CoercionError> {
        let wide = self.as_i64()?;
        i32::try_from(wide).map_err(|_| CoercionError::LossyCoercion {
            value: wide.to_string(),
            target: "i32",
        })
    }

    /// Integer narrowed to `i16`, failing when it does not fit.
    pub fn as_i16(&self) -> Result<i16, CoercionError> {
        let wide = self.as_i64()?;
        i16::try_from(wide).map_err(|_| CoercionError::LossyCoercion {
            value: wide.to_string(),
            target: "i16",
        })
    }

    /// Float value. [`Value::Float`] passes through; [`Value::Integer`]
    /// coerces only when exactly representable.
    pub fn as_f64(&self) -> Result<f64, CoercionError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) if i.unsigned_abs() <= MAX_EXACT_F64_INT => Ok(*i as f64),
            Value::Integer(i) => Err(CoercionError::LossyCoercion {
                value: i.to_string(),
                target: "f64",
            }),
            other => Err(other.mismatch("f64")),
        }
    }

    /// Float narrowed to `f32`, failing when the round-trip changes it.
    pub fn as_f32(&self) -> Result<f32, CoercionError> {
        let wide = self.as_f64()?;
        let narrow = wide as f32;
        if f64::from(narrow).to_bits() == wide.to_bits() || (wide.is_nan() && narrow.is_nan()) {
            Ok(narrow)
        } else {
            Err(CoercionError::LossyCoercion {
                value: wide.to_string(),
                target: "f32",
            })
        }
    }

    /// String rendering. Strings pass through; booleans and numbers are
    /// formatted; structured values do not stringify.
    pub fn as_string(&self) -> Result<String, CoercionError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Boolean(b) => Ok(b.to_string()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            other => Err(other.mismatch("String")),
        }
    }

    /// Byte array. Only [`Value::Bytes`] coerces.
    pub fn as_bytes(&self) -> Result<&[u8], CoercionError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch("bytes")),
        }
    }

    /// List of values. Only [`Value::List`] coerces.
    pub fn as_list(&self) -> Result<&[Value], CoercionError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("List")),
        }
    }

    /// Map of values. Only [`Value::Map`] coerces.
    pub fn as_map(&self) -> Result<&HashMap<String, Value>, CoercionError> {
        match self {
            Value::Map(entries) => Ok(entries),
            other => Err(other.mismatch("Map")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Integer(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_strict() {
        assert!(Value::Boolean(true).as_bool().unwrap());
        assert!(Value::String("true".into()).as_bool().is_err());
        assert!(Value::Integer(1).as_bool().is_err());
    }

    #[test]
    fn integer_narrowing() {
        assert_eq!(Value::Integer(42).as_i32().unwrap(), 42);
        assert!(matches!(
            Value::Integer(i64::from(i32::MAX) + 1).as_i32(),
            Err(CoercionError::LossyCoercion { .. })
        ));
        assert!(matches!(
            Value::Integer(40_000).as_i16(),
            Err(CoercionError::LossyCoercion { .. })
        ));
    }

    #[test]
    fn integer_to_float_exactness() {
        assert_eq!(
            Value::Integer(1i64 << 52).as_f64().unwrap(),
            (1u64 << 52) as f64
        );
        assert!(matches!(
            Value::Integer((1i64 << 53) + 1).as_f64(),
            Err(CoercionError::LossyCoercion { .. })
        ));
    }

    #[test]
    fn float_narrowing() {
        assert_eq!(Value::Float(0.5).as_f32().unwrap(), 0.5f32);
        assert!(matches!(
            Value::Float(0.1).as_f32(),
            Err(CoercionError::LossyCoercion { .. })
        ));
    }

    #[test]
    fn string_rendering() {
        assert_eq!(Value::String("abc".into()).as_string().unwrap(), "abc");
        assert_eq!(Value::Integer(7).as_string().unwrap(), "7");
        assert_eq!(Value::Boolean(false).as_string().unwrap(), "false");
        assert!(Value::List(vec![]).as_string().is_err());
    }

    #[test]
    fn string_never_parses_to_number() {
        assert!(matches!(
            Value::String("42".into()).as_i64(),
            Err(CoercionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn null_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Integer(0).is_null());
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }
}
