//! Minimal reader for row binary and delimited text payloads.
//!
//! Only the slicing the response needs lives here, the formats themselves
//! are external collaborators. Bytes are pushed as they arrive off the
//! wire; a record is produced only once all of its bytes are buffered, so
//! chunk boundaries can fall anywhere, including inside a value.
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;

use crate::{
    Error, Result,
    common::ByteStr,
    format::Format,
    record::{Column, ColumnType, Record, Schema, Value},
};

pub(crate) struct RowReader {
    format: Format,
    buf: BytesMut,
    schema: Option<Arc<Schema>>,
}

impl RowReader {
    pub(crate) fn new(format: Format) -> RowReader {
        RowReader { format, buf: BytesMut::new(), schema: None }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes that did not parse into records yet.
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.buf
    }

    /// Try to produce the next record.
    ///
    /// `Ok(None)` means the buffered bytes do not hold a complete record,
    /// which at end of input is either a clean end (empty buffer) or a
    /// truncated stream (the caller checks [`remaining`][RowReader::remaining]).
    pub(crate) fn try_next(&mut self) -> Result<Option<Record>> {
        match self.format {
            Format::RowBinaryWithNamesAndTypes => self.next_binary(),
            Format::RowBinary => Err(Error::stream(
                "schema-less binary format is not readable, use RowBinaryWithNamesAndTypes",
            )),
            _ => self.next_text(),
        }
    }

    fn next_binary(&mut self) -> Result<Option<Record>> {
        if self.schema.is_none() {
            let Some((schema, consumed)) = parse_schema(&self.buf)? else {
                return Ok(None);
            };
            self.buf.advance(consumed);
            self.schema = Some(Arc::new(schema));
        }

        let schema = self.schema.as_ref().expect("parsed above").clone();
        if schema.is_empty() {
            return Ok(None);
        }

        let mut cur = Cursor::new(&self.buf);
        let mut values = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            match read_value(&mut cur, &column.ty)? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }

        let consumed = cur.pos;
        self.buf.advance(consumed);
        Ok(Some(Record::new(schema, values)))
    }

    fn next_text(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(end) = self.buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(end + 1);
            let line = trim_line(&line);

            if line.is_empty() {
                continue;
            }

            if self.schema.is_none() && self.format.has_header() {
                let names = split_fields(line, self.format.delimiter());
                self.schema = Some(Arc::new(Schema {
                    columns: names
                        .into_iter()
                        .map(|name| {
                            Ok(Column {
                                name: ByteStr::from_utf8(name)?,
                                ty: ColumnType::String,
                            })
                        })
                        .collect::<Result<_>>()?,
                }));
                continue;
            }

            let fields = split_fields(line, self.format.delimiter());

            let schema = match &self.schema {
                Some(schema) => schema.clone(),
                None => {
                    // headerless text: positional columns, all text
                    let schema = Arc::new(Schema {
                        columns: (0..fields.len())
                            .map(|i| Column {
                                name: format!("c{i}").into(),
                                ty: ColumnType::String,
                            })
                            .collect(),
                    });
                    self.schema = Some(schema.clone());
                    schema
                },
            };

            let values = fields
                .into_iter()
                .map(|field| match &field[..] {
                    b"\\N" => Ok(Value::Null),
                    _ => Ok(Value::String(ByteStr::from_utf8(field)?)),
                })
                .collect::<Result<Vec<_>>>()?;

            return Ok(Some(Record::new(schema, values)));
        }
    }
}

impl std::fmt::Debug for RowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReader")
            .field("format", &self.format)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

fn trim_line(line: &BytesMut) -> Bytes {
    let mut line = &line[..];
    if let [rest @ .., b'\n'] = line {
        line = rest;
    }
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    Bytes::copy_from_slice(line)
}

fn split_fields(line: Bytes, delimiter: u8) -> Vec<Bytes> {
    if line.is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, &b) in line.iter().enumerate() {
        match b {
            b'"' if delimiter == b',' => in_quotes = !in_quotes,
            b if b == delimiter && !in_quotes => {
                fields.push(unquote(line.slice(start..i), delimiter));
                start = i + 1;
            },
            _ => {},
        }
    }
    fields.push(unquote(line.slice(start..), delimiter));
    fields
}

/// Strip surrounding double quotes of a csv field.
fn unquote(field: Bytes, delimiter: u8) -> Bytes {
    if delimiter != b',' || field.len() < 2 {
        return field;
    }
    match (field.first(), field.last()) {
        (Some(b'"'), Some(b'"')) => field.slice(1..field.len() - 1),
        _ => field,
    }
}

/// Byte cursor that never consumes: the caller commits `pos` only after a
/// complete row parsed.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.buf.get(self.pos..self.pos + N)?;
        self.pos += N;
        Some(bytes.try_into().expect("slice length checked"))
    }

    fn slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(bytes)
    }

    /// Unsigned LEB128.
    fn varuint(&mut self) -> Result<Option<u64>> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Ok(None);
            };
            self.pos += 1;
            if shift > 63 || (shift == 63 && byte > 1) {
                return Err(Error::stream("varuint overflow"));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(Some(value));
            }
            shift += 7;
        }
    }

    fn string(&mut self) -> Result<Option<Bytes>> {
        let start = self.pos;
        let Some(len) = self.varuint()? else {
            return Ok(None);
        };
        match self.slice(len as usize) {
            Some(bytes) => Ok(Some(Bytes::copy_from_slice(bytes))),
            None => {
                self.pos = start;
                Ok(None)
            },
        }
    }
}

fn parse_schema(buf: &[u8]) -> Result<Option<(Schema, usize)>> {
    let mut cur = Cursor::new(buf);
    let Some(len) = cur.varuint()? else {
        return Ok(None);
    };
    if len > 0x1_0000 {
        return Err(Error::stream("implausible column count"));
    }
    let len = len as usize;

    let mut names = Vec::with_capacity(len);
    for _ in 0..len {
        match cur.string()? {
            Some(name) => names.push(ByteStr::from_utf8(name)?),
            None => return Ok(None),
        }
    }

    let mut columns = Vec::with_capacity(len);
    for name in names {
        match cur.string()? {
            Some(ty) => {
                let ty = std::str::from_utf8(&ty)?;
                columns.push(Column { name, ty: ColumnType::parse(ty)? });
            },
            None => return Ok(None),
        }
    }

    Ok(Some((Schema { columns }, cur.pos)))
}

fn read_value(cur: &mut Cursor, ty: &ColumnType) -> Result<Option<Value>> {
    let value = match ty {
        ColumnType::Nullable(inner) => {
            let Some([flag]) = cur.array::<1>() else { return Ok(None) };
            match flag {
                0 => return read_value(cur, inner),
                _ => Value::Null,
            }
        },
        ColumnType::Int8 => match cur.array::<1>() {
            Some(b) => Value::Int8(i8::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::Int16 => match cur.array::<2>() {
            Some(b) => Value::Int16(i16::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::Int32 => match cur.array::<4>() {
            Some(b) => Value::Int32(i32::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::Int64 => match cur.array::<8>() {
            Some(b) => Value::Int64(i64::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::UInt8 => match cur.array::<1>() {
            Some(b) => Value::UInt8(b[0]),
            None => return Ok(None),
        },
        ColumnType::UInt16 => match cur.array::<2>() {
            Some(b) => Value::UInt16(u16::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::UInt32 => match cur.array::<4>() {
            Some(b) => Value::UInt32(u32::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::UInt64 => match cur.array::<8>() {
            Some(b) => Value::UInt64(u64::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::Float32 => match cur.array::<4>() {
            Some(b) => Value::Float32(f32::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::Float64 => match cur.array::<8>() {
            Some(b) => Value::Float64(f64::from_le_bytes(b)),
            None => return Ok(None),
        },
        ColumnType::String => match cur.string()? {
            Some(bytes) => Value::String(ByteStr::from_utf8(bytes)?),
            None => return Ok(None),
        },
    };
    Ok(Some(value))
}


#[cfg(test)]
mod test {
    use super::*;
    use bytes::BufMut;

    fn payload() -> BytesMut {
        let mut buf = BytesMut::new();
        encode::header(&mut buf, &[("a", "Int32"), ("b", "String"), ("n", "Nullable(UInt16)")]);
        // row 1
        buf.put_i32_le(1);
        encode::string(&mut buf, "one");
        buf.put_u8(0);
        buf.put_u16_le(23);
        // row 2
        buf.put_i32_le(4);
        encode::string(&mut buf, "two");
        buf.put_u8(1);
        buf
    }

    #[test]
    fn read_binary_rows() {
        let mut reader = RowReader::new(Format::RowBinaryWithNamesAndTypes);
        reader.push(&payload());

        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, i32>("a").unwrap(), 1);
        assert_eq!(row.try_get::<_, String>("b").unwrap(), "one");
        assert_eq!(row.try_get::<_, Option<u16>>("n").unwrap(), Some(23));

        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 4);
        assert_eq!(row.try_get::<_, Option<u16>>(2).unwrap(), None);

        assert!(reader.try_next().unwrap().is_none());
        assert!(reader.remaining().is_empty());
    }

    #[test]
    fn chunk_boundary_inside_value() {
        let payload = payload();
        let mut reader = RowReader::new(Format::RowBinaryWithNamesAndTypes);

        let mut produced = 0;
        for chunk in payload.chunks(3) {
            reader.push(chunk);
            while let Some(_row) = reader.try_next().unwrap() {
                produced += 1;
            }
        }
        assert_eq!(produced, 2);
    }

    #[test]
    fn read_text_rows() {
        let mut reader = RowReader::new(Format::TsvWithNames);
        reader.push(b"s\ti\none\t1\ntwo\t2\n");

        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, String>("s").unwrap(), "one");
        assert_eq!(row.try_get::<_, i32>("i").unwrap(), 1);

        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, i32>(1).unwrap(), 2);

        assert!(reader.try_next().unwrap().is_none());
    }

    #[test]
    fn incomplete_line_waits() {
        let mut reader = RowReader::new(Format::Tsv);
        reader.push(b"1\t2");
        assert!(reader.try_next().unwrap().is_none());
        reader.push(b"3\n");
        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, i32>(1).unwrap(), 23);
    }

    #[test]
    fn csv_quoting_and_null() {
        let mut reader = RowReader::new(Format::Csv);
        reader.push(b"\"a,b\",\\N\n");
        let row = reader.try_next().unwrap().unwrap();
        assert_eq!(row.try_get::<_, String>(0).unwrap(), "a,b");
        assert!(row.value(1).unwrap().is_null());
    }
}
