//! Streaming compression codecs for request and response bodies.
//!
//! Codecs are pure and stateless at the registry level: a [`Method`] names
//! the algorithm, [`Compressor`] and [`Decompressor`] carry the per stream
//! state. Both sides work chunk in, chunk out, so arbitrarily large payloads
//! never materialize in memory.
use bytes::Bytes;
use std::{
    io::Write,
    mem,
    sync::{Arc, Mutex},
};

use crate::error::{ConfigError, StreamError};

mod lz4;
mod snappy;

/// Compression algorithm identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    None,
    /// LZ4 frame format. Levels 0..=18 accepted.
    Lz4,
    /// Zstandard frame format. Levels 0..=22, 0 meaning the library default.
    Zstd,
    /// Snappy raw blocks with 4 byte length framing. The "level" is the
    /// chunk size in bytes, 1024..=32768.
    Snappy,
    /// Gzip, response direction only. Levels 0..=9.
    Gzip,
    /// Zlib deflate, response direction only. Levels 0..=9.
    Deflate,
}

impl Method {
    /// Wire name used in `Content-Encoding`/`Accept-Encoding` headers.
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Lz4 => "lz4",
            Method::Zstd => "zstd",
            Method::Snappy => "snappy",
            Method::Gzip => "gzip",
            Method::Deflate => "deflate",
        }
    }

    /// Parse a `Content-Encoding` header value.
    pub fn parse(name: &str) -> Option<Method> {
        Some(match name {
            "" | "none" | "identity" => Method::None,
            "lz4" => Method::Lz4,
            "zstd" => Method::Zstd,
            "snappy" => Method::Snappy,
            "gzip" => Method::Gzip,
            "deflate" => Method::Deflate,
            _ => return None,
        })
    }

    /// Returns `true` if the method may compress an uploaded request body.
    pub const fn supports_request(self) -> bool {
        matches!(self, Method::None | Method::Lz4 | Method::Zstd | Method::Snappy)
    }

    /// Returns `true` if the method may compress a downloaded response body.
    pub const fn supports_response(self) -> bool {
        matches!(
            self,
            Method::None | Method::Lz4 | Method::Zstd | Method::Gzip | Method::Deflate
        )
    }

    /// Level used when the caller passes a negative level.
    pub const fn default_level(self) -> i32 {
        match self {
            Method::None => 0,
            Method::Lz4 => 0,
            Method::Zstd => 3,
            Method::Snappy => 32 * 1024,
            Method::Gzip | Method::Deflate => 6,
        }
    }

    /// Validate and normalize a compression level.
    ///
    /// Negative levels select [`default_level`][Method::default_level].
    pub fn normalize_level(self, level: i32) -> Result<i32, ConfigError> {
        if level < 0 {
            return Ok(self.default_level());
        }
        let range = match self {
            Method::None => return Ok(0),
            Method::Lz4 => 0..=18,
            Method::Zstd => 0..=22,
            Method::Snappy => 1024..=32 * 1024,
            Method::Gzip | Method::Deflate => 0..=9,
        };
        if !range.contains(&level) {
            return Err(ConfigError {
                reason: format!(
                    "{} level {level} out of range {}..={}",
                    self.as_str(),
                    range.start(),
                    range.end(),
                )
                .into(),
            });
        }
        Ok(level)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output sink shared between a [`Write`] based coder and the caller
/// draining produced bytes chunk by chunk.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    pub(crate) fn take(&self) -> Bytes {
        Bytes::from(mem::take(&mut *self.buf.lock().expect("buffer lock poisoned")))
    }
}

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().expect("buffer lock poisoned").extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn stream_err(op: &str, err: impl std::fmt::Display) -> StreamError {
    StreamError { reason: format!("{op}: {err}").into() }
}

/// Streaming encoder for one request body.
pub struct Compressor {
    out: SharedBuf,
    inner: Enc,
}

enum Enc {
    None,
    Lz4(lz4_flex::frame::FrameEncoder<SharedBuf>),
    Zstd(zstd::stream::write::Encoder<'static, SharedBuf>),
    Snappy(snappy::Encoder),
    Gzip(flate2::write::GzEncoder<SharedBuf>),
    Deflate(flate2::write::ZlibEncoder<SharedBuf>),
}

impl Compressor {
    /// Create an encoder for `method` at `level`.
    ///
    /// Unknown level for the method is a configuration error, raised here,
    /// before any io happens.
    pub fn new(method: Method, level: i32) -> Result<Compressor, ConfigError> {
        let level = method.normalize_level(level)?;
        let out = SharedBuf::default();
        let inner = match method {
            Method::None => Enc::None,
            Method::Lz4 => Enc::Lz4(lz4::encoder(out.clone())),
            Method::Zstd => Enc::Zstd(
                zstd::stream::write::Encoder::new(out.clone(), level)
                    .map_err(|e| ConfigError { reason: format!("zstd encoder: {e}").into() })?,
            ),
            Method::Snappy => Enc::Snappy(snappy::Encoder::new(level as usize, out.clone())),
            Method::Gzip => Enc::Gzip(flate2::write::GzEncoder::new(
                out.clone(),
                flate2::Compression::new(level as u32),
            )),
            Method::Deflate => Enc::Deflate(flate2::write::ZlibEncoder::new(
                out.clone(),
                flate2::Compression::new(level as u32),
            )),
        };
        Ok(Compressor { out, inner })
    }

    /// Feed one chunk, returns whatever compressed output is ready.
    pub fn write(&mut self, chunk: &[u8]) -> Result<Bytes, StreamError> {
        match &mut self.inner {
            Enc::None => return Ok(Bytes::copy_from_slice(chunk)),
            Enc::Lz4(enc) => enc.write_all(chunk).map_err(|e| stream_err("lz4 encode", e))?,
            Enc::Zstd(enc) => enc.write_all(chunk).map_err(|e| stream_err("zstd encode", e))?,
            Enc::Snappy(enc) => enc.write(chunk)?,
            Enc::Gzip(enc) => enc.write_all(chunk).map_err(|e| stream_err("gzip encode", e))?,
            Enc::Deflate(enc) => {
                enc.write_all(chunk).map_err(|e| stream_err("deflate encode", e))?
            },
        }
        Ok(self.out.take())
    }

    /// Flush the trailer and return the remaining output.
    pub fn finish(self) -> Result<Bytes, StreamError> {
        match self.inner {
            Enc::None => return Ok(Bytes::new()),
            Enc::Lz4(enc) => drop(enc.finish().map_err(|e| stream_err("lz4 finish", e))?),
            Enc::Zstd(enc) => drop(enc.finish().map_err(|e| stream_err("zstd finish", e))?),
            Enc::Snappy(mut enc) => enc.finish()?,
            Enc::Gzip(enc) => drop(enc.finish().map_err(|e| stream_err("gzip finish", e))?),
            Enc::Deflate(enc) => drop(enc.finish().map_err(|e| stream_err("deflate finish", e))?),
        }
        Ok(self.out.take())
    }
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let method = match self.inner {
            Enc::None => Method::None,
            Enc::Lz4(_) => Method::Lz4,
            Enc::Zstd(_) => Method::Zstd,
            Enc::Snappy(_) => Method::Snappy,
            Enc::Gzip(_) => Method::Gzip,
            Enc::Deflate(_) => Method::Deflate,
        };
        f.debug_tuple("Compressor").field(&method).finish()
    }
}

/// Streaming decoder for one response body.
pub struct Decompressor {
    out: SharedBuf,
    inner: Dec,
}

enum Dec {
    None,
    Lz4(lz4::FrameReader),
    Zstd(zstd::stream::write::Decoder<'static, SharedBuf>),
    Snappy(snappy::Decoder),
    Gzip(flate2::write::GzDecoder<SharedBuf>),
    Deflate(flate2::write::ZlibDecoder<SharedBuf>),
}

impl Decompressor {
    pub fn new(method: Method) -> Result<Decompressor, ConfigError> {
        let out = SharedBuf::default();
        let inner = match method {
            Method::None => Dec::None,
            Method::Lz4 => Dec::Lz4(lz4::FrameReader::new()),
            Method::Zstd => Dec::Zstd(
                zstd::stream::write::Decoder::new(out.clone())
                    .map_err(|e| ConfigError { reason: format!("zstd decoder: {e}").into() })?,
            ),
            Method::Snappy => Dec::Snappy(snappy::Decoder::new()),
            Method::Gzip => Dec::Gzip(flate2::write::GzDecoder::new(out.clone())),
            Method::Deflate => Dec::Deflate(flate2::write::ZlibDecoder::new(out.clone())),
        };
        Ok(Decompressor { out, inner })
    }

    /// Feed one compressed chunk, returns whatever decoded output is ready.
    ///
    /// Corrupt input is a terminal [`StreamError`], the decoder must not be
    /// fed again afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Bytes, StreamError> {
        match &mut self.inner {
            Dec::None => return Ok(Bytes::copy_from_slice(chunk)),
            Dec::Lz4(dec) => return dec.feed(chunk),
            Dec::Zstd(dec) => {
                dec.write_all(chunk).map_err(|e| stream_err("zstd decode", e))?;
                dec.flush().map_err(|e| stream_err("zstd decode", e))?;
            },
            Dec::Snappy(dec) => return dec.feed(chunk),
            Dec::Gzip(dec) => dec.write_all(chunk).map_err(|e| stream_err("gzip decode", e))?,
            Dec::Deflate(dec) => {
                dec.write_all(chunk).map_err(|e| stream_err("deflate decode", e))?
            },
        }
        Ok(self.out.take())
    }

    /// Signal end of input and return the remaining decoded output.
    ///
    /// A stream truncated mid frame is a [`StreamError`].
    pub fn finish(self) -> Result<Bytes, StreamError> {
        match self.inner {
            Dec::None => return Ok(Bytes::new()),
            Dec::Lz4(dec) => return dec.finish(),
            Dec::Zstd(mut dec) => dec.flush().map_err(|e| stream_err("zstd finish", e))?,
            Dec::Snappy(dec) => return dec.finish(),
            Dec::Gzip(dec) => drop(dec.finish().map_err(|e| stream_err("gzip finish", e))?),
            Dec::Deflate(dec) => drop(dec.finish().map_err(|e| stream_err("deflate finish", e))?),
        }
        Ok(self.out.take())
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Decompressor")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Vec<u8> {
        // compressible, larger than one snappy chunk and one lz4 block
        let mut data = Vec::with_capacity(300 * 1024);
        for i in 0u32..25_000 {
            data.extend_from_slice(format!("row-{i},payload-{}\n", i % 97).as_bytes());
        }
        data
    }

    fn roundtrip(method: Method, level: i32) {
        let data = sample();
        let mut comp = Compressor::new(method, level).unwrap();
        let mut wire = Vec::new();
        // uneven chunking on both sides
        for chunk in data.chunks(1000) {
            wire.extend_from_slice(&comp.write(chunk).unwrap());
        }
        wire.extend_from_slice(&comp.finish().unwrap());

        if method != Method::None {
            assert!(wire.len() < data.len(), "{method} did not compress");
        }

        let mut dec = Decompressor::new(method).unwrap();
        let mut back = Vec::new();
        for chunk in wire.chunks(777) {
            back.extend_from_slice(&dec.feed(chunk).unwrap());
        }
        back.extend_from_slice(&dec.finish().unwrap());
        assert_eq!(back, data, "{method} level {level} roundtrip");
    }

    #[test]
    fn roundtrip_all_methods() {
        roundtrip(Method::None, -1);
        for level in [-1, 0, 9, 18] {
            roundtrip(Method::Lz4, level);
        }
        for level in [-1, 0, 3, 22] {
            roundtrip(Method::Zstd, level);
        }
        for block in [-1, 1024, 16 * 1024, 32 * 1024] {
            roundtrip(Method::Snappy, block);
        }
        // level 0 is a stored stream for the flate family, size may grow
        for level in [-1, 1, 6, 9] {
            roundtrip(Method::Gzip, level);
            roundtrip(Method::Deflate, level);
        }
    }

    #[test]
    fn level_validation() {
        assert!(Method::Zstd.normalize_level(23).is_err());
        assert!(Method::Lz4.normalize_level(19).is_err());
        assert!(Method::Snappy.normalize_level(512).is_err());
        assert!(Method::Gzip.normalize_level(10).is_err());
        assert_eq!(Method::Zstd.normalize_level(-2).unwrap(), 3);
        assert_eq!(Method::Snappy.normalize_level(-1).unwrap(), 32 * 1024);
    }

    #[test]
    fn direction_support() {
        assert!(Method::Snappy.supports_request());
        assert!(!Method::Snappy.supports_response());
        assert!(Method::Gzip.supports_response());
        assert!(!Method::Gzip.supports_request());
        assert!(Method::Lz4.supports_request() && Method::Lz4.supports_response());
    }

    #[test]
    fn corrupt_input_is_terminal() {
        let mut dec = Decompressor::new(Method::Lz4).unwrap();
        assert!(dec.feed(b"definitely not an lz4 frame").is_err());

        let mut dec = Decompressor::new(Method::Zstd).unwrap();
        let mut failed = dec.feed(b"garbage garbage garbage").is_err();
        failed |= dec.finish().is_err();
        assert!(failed);
    }

    #[test]
    fn truncated_stream_fails_on_finish() {
        let data = sample();
        let mut comp = Compressor::new(Method::Lz4, 0).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&comp.write(&data).unwrap());
        wire.extend_from_slice(&comp.finish().unwrap());
        wire.truncate(wire.len() / 2);

        let mut dec = Decompressor::new(Method::Lz4).unwrap();
        let mut out = Vec::new();
        let mut failed = false;
        for chunk in wire.chunks(512) {
            match dec.feed(chunk) {
                Ok(b) => out.extend_from_slice(&b),
                Err(_) => {
                    failed = true;
                    break;
                },
            }
        }
        assert!(failed || dec.finish().is_err());
    }
}
