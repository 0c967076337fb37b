//! External tables streamed alongside a query.
use bytes::Bytes;
use std::{fmt, sync::Mutex};

use crate::{
    compress::Method,
    error::ConfigError,
    format::Format,
    transport::BoxBodyStream,
};

/// A byte producing content source.
///
/// Content streams towards the server, it is never materialized as a whole
/// by this crate.
pub enum Body {
    Bytes(Bytes),
    Stream(BoxBodyStream),
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value.into())
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(Bytes::from(value.into_bytes()))
    }
}

impl From<BoxBodyStream> for Body {
    fn from(value: BoxBodyStream) -> Self {
        Body::Stream(value)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A client supplied, named, schema typed dataset streamed alongside a
/// query for server side use, without prior loading.
///
/// ```no_run
/// use colonna::{ExternalTable, Format, compress::Method};
///
/// # fn app() -> colonna::Result<()> {
/// let table = ExternalTable::builder()
///     .name("x")
///     .columns("i Int32, s String")
///     .format(Format::Csv)
///     .compression(Method::Lz4)
///     .content("1,23\n4,56")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExternalTable {
    pub(crate) name: String,
    pub(crate) structure: String,
    pub(crate) format: Format,
    pub(crate) compression: Option<Method>,
    /// Taken exactly once when the request body is encoded.
    pub(crate) content: Mutex<Option<Body>>,
}

impl ExternalTable {
    pub fn builder() -> Builder {
        Builder {
            name: None,
            structure: None,
            columns: Vec::new(),
            format: Format::Tsv,
            compression: None,
            content: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column schema as `name Type` pairs.
    pub fn structure(&self) -> &str {
        &self.structure
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// The compression the content source is already encoded with.
    pub fn compression(&self) -> Option<Method> {
        self.compression
    }

    pub(crate) fn take_content(&self) -> Result<Body, ConfigError> {
        self.content
            .lock()
            .expect("content lock poisoned")
            .take()
            .ok_or_else(|| ConfigError {
                reason: format!("external table `{}` content already consumed", self.name).into(),
            })
    }
}

/// Builder for [`ExternalTable`].
#[derive(Debug)]
pub struct Builder {
    name: Option<String>,
    structure: Option<String>,
    columns: Vec<String>,
    format: Format,
    compression: Option<Method>,
    content: Option<Body>,
}

impl Builder {
    pub fn name(mut self, name: impl Into<String>) -> Builder {
        self.name = Some(name.into());
        self
    }

    /// Whole column schema at once, e.g. `"i Int32, s String"`.
    pub fn columns(mut self, structure: impl Into<String>) -> Builder {
        self.structure = Some(structure.into());
        self
    }

    /// Append a single `name Type` column.
    pub fn column(mut self, name: &str, ty: &str) -> Builder {
        self.columns.push(format!("{name} {ty}"));
        self
    }

    pub fn format(mut self, format: Format) -> Builder {
        self.format = format;
        self
    }

    /// Declare the content source as already compressed with `method`.
    pub fn compression(mut self, method: Method) -> Builder {
        self.compression = Some(method);
        self
    }

    pub fn content(mut self, content: impl Into<Body>) -> Builder {
        self.content = Some(content.into());
        self
    }

    pub fn build(self) -> Result<ExternalTable, ConfigError> {
        let Some(name) = self.name else {
            return Err(ConfigError { reason: "external table requires a name".into() });
        };
        let structure = match self.structure {
            Some(structure) => structure,
            None if !self.columns.is_empty() => self.columns.join(", "),
            None => {
                return Err(ConfigError {
                    reason: format!("external table `{name}` requires a column schema").into(),
                });
            },
        };
        let Some(content) = self.content else {
            return Err(ConfigError {
                reason: format!("external table `{name}` requires content").into(),
            });
        };
        if let Some(method) = self.compression {
            if !method.supports_request() {
                return Err(ConfigError {
                    reason: format!("{method} cannot compress an uploaded table").into(),
                });
            }
        }

        Ok(ExternalTable {
            name,
            structure,
            format: self.format,
            compression: self.compression,
            content: Mutex::new(Some(content)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_with_columns() {
        let table = ExternalTable::builder()
            .name("y")
            .column("s", "String")
            .column("i", "Int32")
            .content("32\t1")
            .build()
            .unwrap();
        assert_eq!(table.structure(), "s String, i Int32");
        assert_eq!(table.format(), Format::Tsv);
    }

    #[test]
    fn build_validation() {
        assert!(ExternalTable::builder().columns("i Int32").content("1").build().is_err());
        assert!(ExternalTable::builder().name("x").content("1").build().is_err());
        assert!(ExternalTable::builder().name("x").columns("i Int32").build().is_err());

        // response only codec cannot ride an upload
        let err = ExternalTable::builder()
            .name("x")
            .columns("i Int32")
            .compression(Method::Gzip)
            .content("1")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn content_taken_once() {
        let table = ExternalTable::builder()
            .name("x")
            .columns("i Int32")
            .content("1\n2")
            .build()
            .unwrap();
        assert!(table.take_content().is_ok());
        assert!(table.take_content().is_err());
    }
}
