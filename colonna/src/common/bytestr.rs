use bytes::Bytes;
use std::{borrow::Borrow, fmt, hash::Hash, ops::Deref, str::Utf8Error};

/// An immutable string backed by [`Bytes`].
///
/// Cloning and slicing are cheap, no reallocation involved.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteStr {
    bytes: Bytes,
}

impl ByteStr {
    /// Create empty `ByteStr`.
    pub const fn new() -> ByteStr {
        ByteStr { bytes: Bytes::new() }
    }

    /// Create `ByteStr` from a static string.
    pub const fn from_static(string: &'static str) -> ByteStr {
        ByteStr { bytes: Bytes::from_static(string.as_bytes()) }
    }

    /// Copy a string into an owned `ByteStr`.
    pub fn copy_from_str(string: &str) -> ByteStr {
        ByteStr { bytes: Bytes::copy_from_slice(string.as_bytes()) }
    }

    /// Try to convert [`Bytes`] into `ByteStr`, checking for valid utf8.
    pub fn from_utf8(bytes: Bytes) -> Result<ByteStr, Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(ByteStr { bytes })
    }

    /// Returns a `ByteStr` of `subset` without copying.
    ///
    /// # Panics
    ///
    /// Panics if `subset` is not contained by `self`,
    /// see [`Bytes::slice_ref`].
    pub fn slice_ref(&self, subset: &str) -> ByteStr {
        ByteStr { bytes: self.bytes.slice_ref(subset.as_bytes()) }
    }

    /// Extract string slice.
    pub fn as_str(&self) -> &str {
        // SAFETY: utf8 is checked on construction and immutable afterwards
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    /// Consume self into the underlying [`Bytes`].
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for ByteStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for ByteStr {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ByteStr {
    fn from(value: &str) -> Self {
        ByteStr::copy_from_str(value)
    }
}

impl From<String> for ByteStr {
    fn from(value: String) -> Self {
        ByteStr { bytes: Bytes::from(value.into_bytes()) }
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ByteStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
