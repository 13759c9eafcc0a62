//! Value codec - marshalling between the host value model and Python
//!
//! Design: eager, depth-guarded conversion. Primitives and containers are
//! copied across the boundary; anything else stays behind an opaque
//! [`ForeignObject`] handle. Decoded composites are fully owned host
//! structures with no residual sharing with the interpreter.
//!
//! Numbers target IEEE-754 binary64. Python ints decode through `i64`
//! (integral values above 2^53 in magnitude lose precision, ints that do
//! not fit an `f64` at all fail with `UnrepresentableForeignValue`).
//! Encoding produces a Python `int` for finite integral numbers within
//! ±2^53 and a `float` otherwise.

use std::sync::Arc;

use indexmap::IndexMap;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};

use crate::errors::{BridgeError, Result};
use crate::object::ForeignObject;
use crate::session::SessionShared;

/// Maximum container nesting the codec will traverse. Doubles as cycle
/// protection: a self-referencing Python list fails decoding instead of
/// recursing forever.
pub const MAX_DEPTH: usize = 64;

/// Largest integer magnitude exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// A value crossing the interpreter boundary.
///
/// Maps preserve insertion order, matching CPython dict semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<HostValue>),
    Map(IndexMap<String, HostValue>),
    /// An opaque reference to a live Python object.
    Object(ForeignObject),
}

impl HostValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            HostValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ForeignObject> {
        match self {
            HostValue::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(s)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::List(items)
    }
}

impl From<ForeignObject> for HostValue {
    fn from(handle: ForeignObject) -> Self {
        HostValue::Object(handle)
    }
}

/// Encode a host value into a Python object. Caller holds the GIL.
pub(crate) fn encode(py: Python<'_>, value: &HostValue) -> Result<PyObject> {
    encode_at(py, value, 0)
}

/// Host-side precheck for everything `encode` can reject without the GIL
/// (currently the depth guard). Lets the async call path fail codec
/// errors on the calling thread, before a job is queued.
pub(crate) fn ensure_encodable(value: &HostValue) -> Result<()> {
    ensure_encodable_at(value, 0)
}

fn ensure_encodable_at(value: &HostValue, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::UnsupportedValue(format!(
            "nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }
    match value {
        HostValue::List(items) => items
            .iter()
            .try_for_each(|item| ensure_encodable_at(item, depth + 1)),
        HostValue::Map(entries) => entries
            .values()
            .try_for_each(|item| ensure_encodable_at(item, depth + 1)),
        _ => Ok(()),
    }
}

fn encode_at(py: Python<'_>, value: &HostValue, depth: usize) -> Result<PyObject> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::UnsupportedValue(format!(
            "nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }
    match value {
        HostValue::Null => Ok(py.None()),
        HostValue::Bool(b) => Ok((*b).into_py(py)),
        HostValue::Number(n) => {
            // Integral doubles within the safe range become Python ints,
            // mirroring the host-side number model.
            if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                Ok((*n as i64).into_py(py))
            } else {
                Ok((*n).into_py(py))
            }
        }
        HostValue::Str(s) => Ok(s.as_str().into_py(py)),
        HostValue::List(items) => {
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(encode_at(py, item, depth + 1)?);
            }
            Ok(PyList::new(py, encoded).into_py(py))
        }
        HostValue::Map(entries) => {
            let dict = PyDict::new(py);
            for (key, item) in entries {
                let encoded = encode_at(py, item, depth + 1)?;
                dict.set_item(key, encoded)
                    .map_err(|e| BridgeError::UnsupportedValue(e.to_string()))?;
            }
            Ok(dict.into_py(py))
        }
        // Pass the wrapped object by reference, no copy.
        HostValue::Object(handle) => Ok(handle.to_object(py)),
    }
}

/// Decode a Python value into a fully owned host value. Caller holds the
/// GIL. Values that are not None/bool/int/float/str/bytes/list/tuple/dict
/// become opaque handles owned by `session`.
pub(crate) fn decode(
    py: Python<'_>,
    session: &Arc<SessionShared>,
    value: &PyAny,
) -> Result<HostValue> {
    decode_at(py, session, value, 0)
}

fn decode_at(
    py: Python<'_>,
    session: &Arc<SessionShared>,
    value: &PyAny,
    depth: usize,
) -> Result<HostValue> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::UnrepresentableForeignValue(format!(
            "nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }

    if value.is_none() {
        return Ok(HostValue::Null);
    }
    // bool is a subclass of int, so it must be checked first.
    if let Ok(b) = value.downcast::<PyBool>() {
        return Ok(HostValue::Bool(b.is_true()));
    }
    if value.is_instance_of::<PyLong>() {
        return match value.extract::<i64>() {
            Ok(i) => Ok(HostValue::Number(i as f64)),
            // Outside i64: let CPython widen to float, erroring past f64 range.
            Err(_) => value.extract::<f64>().map(HostValue::Number).map_err(|_| {
                BridgeError::UnrepresentableForeignValue(
                    "integer magnitude exceeds f64 range".to_string(),
                )
            }),
        };
    }
    if let Ok(f) = value.downcast::<PyFloat>() {
        return Ok(HostValue::Number(f.value()));
    }
    if let Ok(s) = value.downcast::<PyString>() {
        let text = s
            .to_str()
            .map_err(|e| BridgeError::UnrepresentableForeignValue(e.to_string()))?;
        return Ok(HostValue::Str(text.to_string()));
    }
    if let Ok(bytes) = value.downcast::<PyBytes>() {
        return Ok(HostValue::Str(
            String::from_utf8_lossy(bytes.as_bytes()).into_owned(),
        ));
    }
    if let Ok(list) = value.downcast::<PyList>() {
        let mut items = Vec::with_capacity(list.len());
        for item in list {
            items.push(decode_at(py, session, item, depth + 1)?);
        }
        return Ok(HostValue::List(items));
    }
    // Tuples cross the boundary as ordinary sequences.
    if let Ok(tuple) = value.downcast::<PyTuple>() {
        let mut items = Vec::with_capacity(tuple.len());
        for item in tuple.iter() {
            items.push(decode_at(py, session, item, depth + 1)?);
        }
        return Ok(HostValue::List(items));
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        let mut entries = IndexMap::with_capacity(dict.len());
        for (key, item) in dict {
            // Keys are stringified, whatever their Python type.
            let key = key
                .str()
                .and_then(|s| s.to_str())
                .map_err(|e| BridgeError::UnrepresentableForeignValue(e.to_string()))?;
            entries.insert(key.to_string(), decode_at(py, session, item, depth + 1)?);
        }
        return Ok(HostValue::Map(entries));
    }

    // Everything else (objects, functions, modules, classes) stays opaque.
    ForeignObject::new(session, py, value).map(HostValue::Object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;
    use proptest::prelude::*;

    fn roundtrip(value: HostValue) -> HostValue {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            let encoded = encode(py, &value).unwrap();
            decode(py, &shared, encoded.as_ref(py)).unwrap()
        })
    }

    #[test]
    fn test_primitive_roundtrip() {
        assert_eq!(roundtrip(HostValue::Null), HostValue::Null);
        assert_eq!(roundtrip(HostValue::Bool(true)), HostValue::Bool(true));
        assert_eq!(roundtrip(HostValue::Number(42.0)), HostValue::Number(42.0));
        assert_eq!(roundtrip(HostValue::Number(2.5)), HostValue::Number(2.5));
        assert_eq!(
            roundtrip(HostValue::Number(-0.0)),
            HostValue::Number(-0.0)
        );
        assert_eq!(
            roundtrip(HostValue::Str("héllo".into())),
            HostValue::Str("héllo".into())
        );
    }

    #[test]
    fn test_composite_roundtrip() {
        let mut map = IndexMap::new();
        map.insert("label".to_string(), HostValue::Str("nested".into()));
        map.insert(
            "values".to_string(),
            HostValue::List(vec![
                HostValue::Number(1.0),
                HostValue::Null,
                HostValue::Bool(false),
            ]),
        );
        let value = HostValue::List(vec![HostValue::Map(map), HostValue::Str("tail".into())]);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_integral_double_encodes_as_python_int() {
        Python::with_gil(|py| {
            let encoded = encode(py, &HostValue::Number(7.0)).unwrap();
            assert!(encoded.as_ref(py).is_instance_of::<PyLong>());
            let encoded = encode(py, &HostValue::Number(7.5)).unwrap();
            assert!(encoded.as_ref(py).is_instance_of::<PyFloat>());
        });
    }

    #[test]
    fn test_tuple_and_bytes_decode() {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            let value = py.eval("(1, 'two', b'three')", None, None).unwrap();
            let decoded = decode(py, &shared, value).unwrap();
            assert_eq!(
                decoded,
                HostValue::List(vec![
                    HostValue::Number(1.0),
                    HostValue::Str("two".into()),
                    HostValue::Str("three".into()),
                ])
            );
        });
    }

    #[test]
    fn test_dict_keys_are_stringified() {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            let value = py.eval("{1: 'one', 'two': 2}", None, None).unwrap();
            let decoded = decode(py, &shared, value).unwrap();
            let map = decoded.as_map().unwrap();
            assert_eq!(map.get("1").unwrap(), &HostValue::Str("one".into()));
            assert_eq!(map.get("two").unwrap(), &HostValue::Number(2.0));
        });
    }

    #[test]
    fn test_oversized_integer_fails_decode() {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            // Fits f64 (loses precision), allowed.
            let big = py.eval("2**80", None, None).unwrap();
            assert!(matches!(
                decode(py, &shared, big),
                Ok(HostValue::Number(_))
            ));
            // Past f64 range entirely, rejected.
            let huge = py.eval("2**1100", None, None).unwrap();
            assert!(matches!(
                decode(py, &shared, huge),
                Err(BridgeError::UnrepresentableForeignValue(_))
            ));
        });
    }

    #[test]
    fn test_depth_guard_on_encode() {
        let mut value = HostValue::Null;
        for _ in 0..(MAX_DEPTH + 2) {
            value = HostValue::List(vec![value]);
        }
        Python::with_gil(|py| {
            assert!(matches!(
                encode(py, &value),
                Err(BridgeError::UnsupportedValue(_))
            ));
        });
    }

    #[test]
    fn test_cyclic_python_list_fails_decode() {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            let locals = pyo3::types::PyDict::new(py);
            py.run("cycle = []\ncycle.append(cycle)", None, Some(locals))
                .unwrap();
            let cycle = locals.get_item("cycle").unwrap().unwrap();
            assert!(matches!(
                decode(py, &shared, cycle),
                Err(BridgeError::UnrepresentableForeignValue(_))
            ));
        });
    }

    #[test]
    fn test_function_decodes_to_handle() {
        Python::with_gil(|py| {
            let shared = session::global_shared();
            let func = py.eval("len", None, None).unwrap();
            let decoded = decode(py, &shared, func).unwrap();
            let handle = decoded.as_object().unwrap();
            assert_eq!(handle.type_tag(), "builtin_function_or_method");
        });
    }

    proptest! {
        #[test]
        fn prop_primitive_roundtrip_identity(
            n in -9_007_199_254_740_992.0f64..9_007_199_254_740_992.0,
            s in ".*",
            b in proptest::bool::ANY,
        ) {
            prop_assert_eq!(roundtrip(HostValue::Number(n)), HostValue::Number(n));
            prop_assert_eq!(
                roundtrip(HostValue::Str(s.clone())),
                HostValue::Str(s)
            );
            prop_assert_eq!(roundtrip(HostValue::Bool(b)), HostValue::Bool(b));
        }
    }
}
