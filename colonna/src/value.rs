//! Typed query parameter values.
//!
//! A named placeholder (`{name:Type}`) in the query text is bound through
//! [`Request::param`][crate::request::Request::param] with any type
//! implementing [`IntoParam`], and travels as a `param_{name}` query string
//! parameter.

/// A rendered parameter value.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    value: String,
}

impl Param {
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// A type that can be bound as a query parameter.
pub trait IntoParam {
    /// Render self into the wire representation.
    fn into_param(self) -> Param;
}

impl IntoParam for Param {
    fn into_param(self) -> Param {
        self
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Param {
        Param { value: self.into() }
    }
}

impl IntoParam for String {
    fn into_param(self) -> Param {
        Param { value: self }
    }
}

impl IntoParam for bool {
    fn into_param(self) -> Param {
        Param { value: String::from(if self { "1" } else { "0" }) }
    }
}

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Param {
        match self {
            Some(value) => value.into_param(),
            None => Param { value: String::from("\\N") },
        }
    }
}

macro_rules! int_param {
    ($($ty:ty),*) => {
        $(
            impl IntoParam for $ty {
                fn into_param(self) -> Param {
                    let mut buf = itoa::Buffer::new();
                    Param { value: String::from(buf.format(self)) }
                }
            }
        )*
    };
}

int_param!(i8, i16, i32, i64, u8, u16, u32, u64);

impl IntoParam for f32 {
    fn into_param(self) -> Param {
        Param { value: self.to_string() }
    }
}

impl IntoParam for f64 {
    fn into_param(self) -> Param {
        Param { value: self.to_string() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn render() {
        assert_eq!(42i32.into_param().as_str(), "42");
        assert_eq!(true.into_param().as_str(), "1");
        assert_eq!("foo".into_param().as_str(), "foo");
        assert_eq!(None::<i32>.into_param().as_str(), "\\N");
        assert_eq!(Some(7u8).into_param().as_str(), "7");
    }
}
