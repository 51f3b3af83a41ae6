use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// A dynamic application value, the unit of encode and decode.
///
/// Composites are handle-based (`Rc`); two values that share a handle are the
/// same instance, and that identity is what the cycle table tracks on the
/// wire. `Value` is deliberately not `Send`: a value graph belongs to one
/// thread, only the registry and program cache are shared.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Object(Rc<RefCell<ObjectValue>>),
    Enum(EnumValue),
}

/// A registered object instance: concrete type id plus field slots in
/// declared order.
#[derive(Debug, Clone)]
pub struct ObjectValue {
    pub type_id: u32,
    pub fields: Vec<Value>,
}

/// A registered enum constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    pub type_id: u32,
    pub ordinal: u32,
}

impl Value {
    /// A string value.
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// A fresh list handle.
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// A fresh array handle.
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// A fresh map handle over insertion-ordered pairs.
    pub fn map(pairs: Vec<(Value, Value)>) -> Value {
        Value::Map(Rc::new(RefCell::new(pairs)))
    }

    /// A fresh instance of a registered object type.
    pub fn object(type_id: u32, fields: Vec<Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectValue { type_id, fields })))
    }

    /// True for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Pointer identity of a composite handle; `None` for non-composites.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(rc) | Value::Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Map(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Object(rc) => Some(Rc::as_ptr(rc) as usize),
            _ => None,
        }
    }

    /// Cycle-safe structural equality.
    ///
    /// Composite pairs already on the comparison stack are assumed equal,
    /// which makes two graphs compare equal exactly when they have the same
    /// shape, contents, and shared-reference topology. Floats compare by
    /// bits, so NaN round-trips count as equal.
    pub fn deep_eq(&self, other: &Value) -> bool {
        let mut visited = HashSet::new();
        deep_eq_inner(self, other, &mut visited)
    }
}

fn deep_eq_inner(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(ia), Some(ib)) = (a.identity(), b.identity()) {
        if !visited.insert((ia, ib)) {
            return true;
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Byte(x), Value::Byte(y)) => x == y,
        (Value::Short(x), Value::Short(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Array(x), Value::Array(y)) => {
            let xs = x.borrow();
            let ys = y.borrow();
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(xv, yv)| deep_eq_inner(xv, yv, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            let xs = x.borrow();
            let ys = y.borrow();
            xs.len() == ys.len()
                && xs.iter().zip(ys.iter()).all(|((xk, xv), (yk, yv))| {
                    deep_eq_inner(xk, yk, visited) && deep_eq_inner(xv, yv, visited)
                })
        }
        (Value::Object(x), Value::Object(y)) => {
            let xo = x.borrow();
            let yo = y.borrow();
            xo.type_id == yo.type_id
                && xo.fields.len() == yo.fields.len()
                && xo
                    .fields
                    .iter()
                    .zip(yo.fields.iter())
                    .all(|(xv, yv)| deep_eq_inner(xv, yv, visited))
        }
        (Value::Enum(x), Value::Enum(y)) => x == y,
        _ => false,
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Value {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Value {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(Rc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_compare_by_value() {
        assert!(Value::Long(42).deep_eq(&Value::Long(42)));
        assert!(!Value::Long(42).deep_eq(&Value::Long(43)));
        assert!(!Value::Long(42).deep_eq(&Value::Int(42)));
        assert!(Value::from("x").deep_eq(&Value::from("x")));
    }

    #[test]
    fn nan_is_deep_equal_to_itself() {
        assert!(Value::Double(f64::NAN).deep_eq(&Value::Double(f64::NAN)));
        assert!(!Value::Double(0.0).deep_eq(&Value::Double(-0.0)));
    }

    #[test]
    fn composites_compare_structurally() {
        let a = Value::list(vec![Value::Int(1), Value::from("x")]);
        let b = Value::list(vec![Value::Int(1), Value::from("x")]);
        let c = Value::list(vec![Value::Int(2), Value::from("x")]);

        assert!(a.deep_eq(&b));
        assert!(!a.deep_eq(&c));
        // A list is never equal to an array of the same contents.
        assert!(!a.deep_eq(&Value::array(vec![Value::Int(1), Value::from("x")])));
    }

    #[test]
    fn cyclic_graphs_compare_without_diverging() {
        let a = Value::list(vec![]);
        if let Value::List(cell) = &a {
            cell.borrow_mut().push(a.clone());
        }
        let b = Value::list(vec![]);
        if let Value::List(cell) = &b {
            cell.borrow_mut().push(b.clone());
        }

        assert!(a.deep_eq(&b));
    }

    #[test]
    fn identity_distinguishes_handles() {
        let shared = Value::list(vec![Value::Int(1)]);
        let other = Value::list(vec![Value::Int(1)]);

        assert_eq!(shared.identity(), shared.clone().identity());
        assert_ne!(shared.identity(), other.identity());
        assert_eq!(Value::Null.identity(), None);
        assert_eq!(Value::Long(5).identity(), None);
    }
}
