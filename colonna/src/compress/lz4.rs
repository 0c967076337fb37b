//! LZ4 frame walking decoder.
//!
//! `lz4_flex` only decodes frames from a blocking [`Read`][std::io::Read]
//! source, which cannot suspend on a partially received network body. The
//! frame format is block structured, so this reader walks the frame layout
//! itself and hands each complete data block to the block decompressor.
use bytes::{Buf, BytesMut};
use lz4_flex::frame::{BlockMode, BlockSize, FrameEncoder, FrameInfo};

use super::SharedBuf;
use crate::error::StreamError;

const MAGIC: u32 = 0x184D2204;

/// FLG bit: blocks are independent.
const FLG_BLOCK_INDEP: u8 = 0b0010_0000;
/// FLG bit: every block is followed by a 4 byte checksum.
const FLG_BLOCK_CHECKSUM: u8 = 0b0001_0000;
/// FLG bit: descriptor carries an 8 byte content size.
const FLG_CONTENT_SIZE: u8 = 0b0000_1000;
/// FLG bit: frame ends with a 4 byte content checksum.
const FLG_CONTENT_CHECKSUM: u8 = 0b0000_0100;
/// FLG bit: descriptor carries a 4 byte dictionary id.
const FLG_DICT_ID: u8 = 0b0000_0001;

pub(super) fn encoder(out: SharedBuf) -> FrameEncoder<SharedBuf> {
    let info = FrameInfo::new()
        .block_size(BlockSize::Max64KB)
        .block_mode(BlockMode::Independent);
    FrameEncoder::with_frame_info(info, out)
}

fn err(reason: &'static str) -> StreamError {
    StreamError { reason: reason.into() }
}

#[derive(Debug)]
enum State {
    Magic,
    Descriptor,
    BlockLen,
    BlockData { len: usize, compressed: bool },
    BlockChecksum,
    ContentChecksum,
    Done,
}

/// Incremental LZ4 frame decoder, fed from the network chunk by chunk.
#[derive(Debug)]
pub(super) struct FrameReader {
    buf: BytesMut,
    state: State,
    flags: u8,
    max_block: usize,
}

impl FrameReader {
    pub(super) fn new() -> FrameReader {
        FrameReader {
            buf: BytesMut::new(),
            state: State::Magic,
            flags: 0,
            max_block: 0,
        }
    }

    pub(super) fn feed(&mut self, chunk: &[u8]) -> Result<bytes::Bytes, StreamError> {
        self.buf.extend_from_slice(chunk);
        let mut out = BytesMut::new();

        loop {
            match self.state {
                State::Magic => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    if self.buf.get_u32_le() != MAGIC {
                        return Err(err("bad lz4 frame magic"));
                    }
                    self.state = State::Descriptor;
                },
                State::Descriptor => {
                    if self.buf.len() < 2 {
                        break;
                    }
                    let flg = self.buf[0];
                    if flg >> 6 != 0b01 {
                        return Err(err("unsupported lz4 frame version"));
                    }
                    if flg & FLG_BLOCK_INDEP == 0 {
                        return Err(err("linked lz4 blocks unsupported"));
                    }

                    // flg + bd + header checksum, plus optional fields
                    let mut len = 3;
                    if flg & FLG_CONTENT_SIZE != 0 {
                        len += 8;
                    }
                    if flg & FLG_DICT_ID != 0 {
                        len += 4;
                    }
                    if self.buf.len() < len {
                        break;
                    }

                    self.max_block = match (self.buf[1] >> 4) & 0x7 {
                        4 => 64 << 10,
                        5 => 256 << 10,
                        6 => 1 << 20,
                        7 => 4 << 20,
                        _ => return Err(err("bad lz4 block size descriptor")),
                    };
                    self.flags = flg;
                    self.buf.advance(len);
                    self.state = State::BlockLen;
                },
                State::BlockLen => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let n = self.buf.get_u32_le();
                    if n == 0 {
                        // EndMark
                        self.state = match self.flags & FLG_CONTENT_CHECKSUM {
                            0 => State::Done,
                            _ => State::ContentChecksum,
                        };
                        continue;
                    }
                    let len = (n & 0x7FFF_FFFF) as usize;
                    if len > self.max_block {
                        return Err(err("lz4 block exceeds declared block size"));
                    }
                    self.state = State::BlockData { len, compressed: n & 0x8000_0000 == 0 };
                },
                State::BlockData { len, compressed } => {
                    if self.buf.len() < len {
                        break;
                    }
                    let block = self.buf.split_to(len);
                    if compressed {
                        let mut dst = vec![0u8; self.max_block];
                        let n = lz4_flex::block::decompress_into(&block, &mut dst)
                            .map_err(|_| err("lz4 block decode failed"))?;
                        out.extend_from_slice(&dst[..n]);
                    } else {
                        out.extend_from_slice(&block);
                    }
                    self.state = match self.flags & FLG_BLOCK_CHECKSUM {
                        0 => State::BlockLen,
                        _ => State::BlockChecksum,
                    };
                },
                State::BlockChecksum => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    // present when the encoder asked for it, not verified
                    self.buf.advance(4);
                    self.state = State::BlockLen;
                },
                State::ContentChecksum => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    self.buf.advance(4);
                    self.state = State::Done;
                },
                State::Done => {
                    if self.buf.is_empty() {
                        break;
                    }
                    // frames may be concatenated
                    self.state = State::Magic;
                },
            }
        }

        Ok(out.freeze())
    }

    pub(super) fn finish(self) -> Result<bytes::Bytes, StreamError> {
        match self.state {
            State::Done => Ok(bytes::Bytes::new()),
            State::Magic if self.buf.is_empty() => Ok(bytes::Bytes::new()),
            _ => Err(err("truncated lz4 frame")),
        }
    }
}
