//! Snappy with hadoop style length framing.
//!
//! Each chunk travels as `[raw len u32 BE][compressed len u32 BE][data]`.
//! The chunk size is the codec knob: callers tune bytes per chunk, not an
//! effort level.
use bytes::{Buf, BytesMut};
use std::io::Write;

use super::SharedBuf;
use crate::error::StreamError;

fn err(reason: &'static str) -> StreamError {
    StreamError { reason: reason.into() }
}

fn encode_err(e: snap::Error) -> StreamError {
    StreamError { reason: format!("snappy encode: {e}").into() }
}

pub(super) struct Encoder {
    raw: snap::raw::Encoder,
    pending: BytesMut,
    block: usize,
    out: SharedBuf,
}

impl Encoder {
    pub(super) fn new(block: usize, out: SharedBuf) -> Encoder {
        Encoder {
            raw: snap::raw::Encoder::new(),
            pending: BytesMut::new(),
            block,
            out,
        }
    }

    pub(super) fn write(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        self.pending.extend_from_slice(chunk);
        while self.pending.len() >= self.block {
            let raw = self.pending.split_to(self.block);
            self.emit(&raw)?;
        }
        Ok(())
    }

    pub(super) fn finish(&mut self) -> Result<(), StreamError> {
        if !self.pending.is_empty() {
            let raw = self.pending.split();
            self.emit(&raw)?;
        }
        Ok(())
    }

    fn emit(&mut self, raw: &[u8]) -> Result<(), StreamError> {
        let compressed = self.raw.compress_vec(raw).map_err(encode_err)?;
        self.out
            .write_all(&(raw.len() as u32).to_be_bytes())
            .and_then(|()| self.out.write_all(&(compressed.len() as u32).to_be_bytes()))
            .and_then(|()| self.out.write_all(&compressed))
            .map_err(|e| StreamError { reason: format!("snappy write: {e}").into() })
    }
}

pub(super) struct Decoder {
    raw: snap::raw::Decoder,
    buf: BytesMut,
}

impl Decoder {
    pub(super) fn new() -> Decoder {
        Decoder { raw: snap::raw::Decoder::new(), buf: BytesMut::new() }
    }

    pub(super) fn feed(&mut self, chunk: &[u8]) -> Result<bytes::Bytes, StreamError> {
        self.buf.extend_from_slice(chunk);
        let mut out = BytesMut::new();

        loop {
            if self.buf.len() < 8 {
                break;
            }
            let raw_len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            let comp_len = u32::from_be_bytes(self.buf[4..8].try_into().unwrap()) as usize;
            if self.buf.len() < 8 + comp_len {
                break;
            }
            self.buf.advance(8);
            let compressed = self.buf.split_to(comp_len);
            let raw = self
                .raw
                .decompress_vec(&compressed)
                .map_err(|e| StreamError { reason: format!("snappy decode: {e}").into() })?;
            if raw.len() != raw_len {
                return Err(err("snappy chunk length mismatch"));
            }
            out.extend_from_slice(&raw);
        }

        Ok(out.freeze())
    }

    pub(super) fn finish(self) -> Result<bytes::Bytes, StreamError> {
        if self.buf.is_empty() {
            Ok(bytes::Bytes::new())
        } else {
            Err(err("truncated snappy stream"))
        }
    }
}
