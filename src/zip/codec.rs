//! Chunked raw-DEFLATE compression and decompression.
//!
//! The engine streams entry data in fixed-size chunks so memory use stays
//! constant regardless of entry size. Both directions wrap flate2's
//! low-level state machines (raw DEFLATE, no zlib framing, per APPNOTE)
//! behind a push interface: feed one input chunk, receive zero or more
//! output chunks through a sink closure.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, ZipError};

/// Working buffer handed to the flate2 state machines.
const SCRATCH_SIZE: usize = 32 * 1024;

/// Streaming DEFLATE encoder.
pub(crate) struct Deflater {
    raw: Compress,
    scratch: Vec<u8>,
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            raw: Compress::new(Compression::default(), false),
            scratch: vec![0u8; SCRATCH_SIZE],
        }
    }

    /// Compress one input chunk, forwarding produced bytes to `sink`.
    pub fn push(
        &mut self,
        input: &[u8],
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut offset = 0;
        while offset < input.len() {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            self.raw
                .compress(&input[offset..], &mut self.scratch, FlushCompress::None)
                .map_err(|e| ZipError::CorruptedData(e.to_string()))?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            offset += consumed;
            if produced > 0 {
                sink(&self.scratch[..produced])?;
            }
            if consumed == 0 && produced == 0 {
                return Err(ZipError::CorruptedData("compressor stalled".into()));
            }
        }
        Ok(())
    }

    /// Flush the stream terminator, forwarding the final bytes to `sink`.
    pub fn finish(&mut self, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        loop {
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .compress(&[], &mut self.scratch, FlushCompress::Finish)
                .map_err(|e| ZipError::CorruptedData(e.to_string()))?;
            let produced = (self.raw.total_out() - before_out) as usize;
            if produced > 0 {
                sink(&self.scratch[..produced])?;
            }
            if status == Status::StreamEnd {
                return Ok(());
            }
        }
    }
}

/// Streaming DEFLATE decoder.
pub(crate) struct Inflater {
    raw: Decompress,
    scratch: Vec<u8>,
    finished: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            raw: Decompress::new(false),
            scratch: vec![0u8; SCRATCH_SIZE],
            finished: false,
        }
    }

    /// Decompress one input chunk, forwarding decoded bytes to `sink`.
    /// Input past the DEFLATE stream terminator is ignored.
    pub fn push(
        &mut self,
        input: &[u8],
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut offset = 0;
        while offset < input.len() && !self.finished {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(&input[offset..], &mut self.scratch, FlushDecompress::None)
                .map_err(|e| ZipError::CorruptedData(e.to_string()))?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            offset += consumed;
            if produced > 0 {
                sink(&self.scratch[..produced])?;
            }
            match status {
                Status::StreamEnd => self.finished = true,
                Status::Ok => {}
                Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        // Needs more input than this chunk holds.
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// The stream terminator has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total decoded bytes produced so far.
    pub fn bytes_out(&self) -> u64 {
        self.raw.total_out()
    }
}
