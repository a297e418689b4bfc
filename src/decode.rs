//! Incremental UTF-8 [`Utf8Decoder`] for text arriving in arbitrary byte
//! blocks.

/// Decodes a sequence of byte blocks as UTF-8, carrying an incomplete trailing
/// sequence over to the next block. A character split across blocks is emitted
/// once, whole, with the block that completes it.
///
/// Bytes that can never form a valid sequence are replaced with U+FFFD, the
/// way a non-fatal text decoder does.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    // At most 3 bytes: the longest incomplete prefix of a 4 byte sequence.
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Decode `block`, prefixed with any pending bytes from the previous call.
    /// Returns an empty string if `block` only extends a pending sequence.
    pub fn decode(&mut self, block: &[u8]) -> String {
        let joined;
        let mut bytes = if self.pending.is_empty() {
            block
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(block);
            joined = buf;
            joined.as_slice()
        };

        let mut out = String::with_capacity(bytes.len());
        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, rest) = bytes.split_at(error.valid_up_to());
                    // `valid_up_to` guarantees this.
                    out.push_str(
                        std::str::from_utf8(valid).unwrap_or_default(),
                    );

                    match error.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            // Incomplete sequence at the end. Wait for more.
                            self.pending.extend_from_slice(rest);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of input. A sequence left incomplete becomes a single
    /// U+FFFD. Returns [`None`] if nothing was pending.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        #[cfg(feature = "log")]
        log::warn!(
            "Input ended inside a UTF-8 sequence ({} bytes pending).",
            self.pending.len()
        );

        self.pending.clear();
        Some(char::REPLACEMENT_CHARACTER.to_string())
    }
}
