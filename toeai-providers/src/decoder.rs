//! Incremental UTF-8 decoding of streamed bodies

use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Decodes a byte stream into text chunk by chunk.
///
/// Bytes of a character split across chunks are held back until the rest
/// arrives, so no character is ever torn or dropped at a chunk boundary.
/// Malformed input becomes U+FFFD. A leading byte order mark is removed.
pub struct Utf8StreamDecoder {
    inner: Decoder,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self {
            inner: UTF_8.new_decoder_with_bom_removal(),
        }
    }

    /// Decode the next chunk, returning whatever text is complete so far
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    /// Flush held-back bytes at end of stream.
    ///
    /// An incomplete trailing character is returned as U+FFFD.
    pub fn finish(&mut self) -> String {
        self.run(&[], true)
    }

    fn run(&mut self, mut input: &[u8], last: bool) -> String {
        let mut out = String::with_capacity(self.capacity_for(input.len()));
        loop {
            let (result, read, _had_errors) = self.inner.decode_to_string(input, &mut out, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => {
                    let extra = self.capacity_for(input.len());
                    out.reserve(extra);
                }
            }
        }
    }

    fn capacity_for(&self, len: usize) -> usize {
        self.inner
            .max_utf8_buffer_length(len)
            .unwrap_or_else(|| len.saturating_mul(3).saturating_add(4))
    }
}

impl Default for Utf8StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
