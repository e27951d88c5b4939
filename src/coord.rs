//! Lenient coordinate coercion.
//!
//! Query coordinates often arrive straight from spreadsheets or JSON bodies,
//! so anything that reads as a number is accepted. Values that don't parse
//! yield `None` rather than an error.

/// A value that may be read as a coordinate in degrees.
pub trait CoordValue {
    fn as_degrees(&self) -> Option<f64>;
}

impl CoordValue for f64 {
    fn as_degrees(&self) -> Option<f64> {
        Some(*self)
    }
}

impl CoordValue for f32 {
    fn as_degrees(&self) -> Option<f64> {
        Some(f64::from(*self))
    }
}

impl CoordValue for i32 {
    fn as_degrees(&self) -> Option<f64> {
        Some(f64::from(*self))
    }
}

impl CoordValue for i64 {
    fn as_degrees(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

impl CoordValue for str {
    fn as_degrees(&self) -> Option<f64> {
        self.trim().parse::<f64>().ok()
    }
}

impl<T: CoordValue + ?Sized> CoordValue for &T {
    fn as_degrees(&self) -> Option<f64> {
        (**self).as_degrees()
    }
}

impl CoordValue for String {
    fn as_degrees(&self) -> Option<f64> {
        self.as_str().as_degrees()
    }
}

impl<T: CoordValue> CoordValue for Option<T> {
    fn as_degrees(&self) -> Option<f64> {
        self.as_ref().and_then(CoordValue::as_degrees)
    }
}

impl<T: CoordValue + ?Sized> CoordValue for Box<T> {
    fn as_degrees(&self) -> Option<f64> {
        (**self).as_degrees()
    }
}

impl CoordValue for serde_json::Value {
    fn as_degrees(&self) -> Option<f64> {
        match self {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.as_degrees(),
            _ => None,
        }
    }
}
