//! Codepage transcoding between the worker's Windows codepages and UTF-8.

use encoding_rs::{CoderResult, Decoder, Encoding};
use serde::{Deserialize, Serialize};

/// ANSI and OEM codepages used by a worker.
///
/// The ANSI codepage carries the main stream in both directions; the OEM
/// codepage is only used for the local worker's diagnostic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Codepages {
    pub ansi: u16,
    pub oem: u16,
}

impl Default for Codepages {
    fn default() -> Self {
        Self {
            ansi: 1251,
            oem: 866,
        }
    }
}

/// Map a Windows codepage number to an encoding.
///
/// Returns `None` for codepages without a WHATWG encoding (e.g. 437, 850).
pub fn encoding_for(codepage: u16) -> Option<&'static Encoding> {
    let encoding = match codepage {
        866 => encoding_rs::IBM866,
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GBK,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1252 | 20127 | 28591 => encoding_rs::WINDOWS_1252,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        10000 => encoding_rs::MACINTOSH,
        20866 => encoding_rs::KOI8_R,
        21866 => encoding_rs::KOI8_U,
        28592 => encoding_rs::ISO_8859_2,
        28593 => encoding_rs::ISO_8859_3,
        28594 => encoding_rs::ISO_8859_4,
        28595 => encoding_rs::ISO_8859_5,
        28596 => encoding_rs::ISO_8859_6,
        28597 => encoding_rs::ISO_8859_7,
        28598 => encoding_rs::ISO_8859_8,
        28603 => encoding_rs::ISO_8859_13,
        28605 => encoding_rs::ISO_8859_15,
        50220 => encoding_rs::ISO_2022_JP,
        51932 => encoding_rs::EUC_JP,
        54936 => encoding_rs::GB18030,
        65001 => encoding_rs::UTF_8,
        _ => return None,
    };
    Some(encoding)
}

fn resolve(codepage: u16) -> &'static Encoding {
    encoding_for(codepage).unwrap_or_else(|| {
        tracing::warn!(codepage, "unsupported codepage, falling back to windows-1252");
        encoding_rs::WINDOWS_1252
    })
}

/// Encode text for the worker.
pub fn encode(text: &str, codepage: u16) -> Vec<u8> {
    let (bytes, _, had_errors) = resolve(codepage).encode(text);
    if had_errors {
        tracing::debug!(codepage, "unmappable characters replaced while encoding");
    }
    bytes.into_owned()
}

/// Decode a complete buffer from the worker.
pub fn decode(bytes: &[u8], codepage: u16) -> String {
    let mut decoder = TextDecoder::new(codepage);
    let mut text = decoder.decode(bytes);
    text.push_str(&decoder.finish());
    text
}

/// Streaming decoder that keeps partial multi-byte sequences between chunks.
pub struct TextDecoder {
    codepage: u16,
    decoder: Decoder,
}

impl TextDecoder {
    pub fn new(codepage: u16) -> Self {
        Self {
            codepage,
            decoder: resolve(codepage).new_decoder_without_bom_handling(),
        }
    }

    pub fn codepage(&self) -> u16 {
        self.codepage
    }

    /// Switch to another codepage. Pending partial input is discarded.
    pub fn switch(&mut self, codepage: u16) {
        if codepage != self.codepage {
            *self = Self::new(codepage);
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    /// Flush any buffered partial sequence.
    pub fn finish(&mut self) -> String {
        let tail = self.run(&[], true);
        *self = Self::new(self.codepage);
        tail
    }

    fn run(&mut self, mut input: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() * 3 + 16);
            out.reserve(needed.max(16));
            let (result, read, _) = self.decoder.decode_to_string(input, &mut out, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }
}
