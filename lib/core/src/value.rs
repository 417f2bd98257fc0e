use serde_json::Value;

/// A value read from a document's metadata header.
///
/// `Missing` is returned for absent leaves, absent intermediate objects and
/// out-of-bounds indices. An explicit `null` in the header is `Present(Null)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Missing,
    Present(Value),
}

impl FieldValue {
    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    /// True when the field is missing or explicitly null
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Missing | FieldValue::Present(Value::Null))
    }

    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Present(v) => Some(v),
            FieldValue::Missing => None,
        }
    }

    /// Non-null present value, used by comparators
    #[inline]
    #[must_use]
    pub fn as_present(&self) -> Option<&Value> {
        match self {
            FieldValue::Present(Value::Null) | FieldValue::Missing => None,
            FieldValue::Present(v) => Some(v),
        }
    }

    /// Numeric view of the value.
    ///
    /// Numbers and strings holding a finite float are numeric; everything
    /// else (including booleans) is not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Present(Value::Number(n)) => n.as_f64().filter(|x| x.is_finite()),
            FieldValue::Present(Value::String(s)) => {
                s.trim().parse::<f64>().ok().filter(|x| x.is_finite())
            }
            _ => None,
        }
    }

    /// JSON form; `Missing` becomes `null`
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Present(v) => v.clone(),
            FieldValue::Missing => Value::Null,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Present(v)
    }
}

impl From<Option<&Value>> for FieldValue {
    fn from(v: Option<&Value>) -> Self {
        match v {
            Some(v) => FieldValue::Present(v.clone()),
            None => FieldValue::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(FieldValue::from(json!(8)).as_f64(), Some(8.0));
        assert_eq!(FieldValue::from(json!(" 2.5 ")).as_f64(), Some(2.5));
        assert_eq!(FieldValue::from(json!("eight")).as_f64(), None);
        assert_eq!(FieldValue::from(json!(true)).as_f64(), None);
        assert_eq!(FieldValue::Present(Value::Null).as_f64(), None);
        assert_eq!(FieldValue::Missing.as_f64(), None);
    }

    #[test]
    fn test_absent_includes_null() {
        assert!(FieldValue::Missing.is_absent());
        assert!(FieldValue::Present(Value::Null).is_absent());
        assert!(!FieldValue::Present(Value::Null).is_missing());
        assert!(FieldValue::Present(Value::Null).as_present().is_none());
    }
}
