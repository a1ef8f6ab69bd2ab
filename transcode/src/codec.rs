use thiserror::Error;

use crate::encoding::EncodingName;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bytes are not valid {encoding}")]
    Malformed { encoding: EncodingName },
    #[error("{encoding} cannot represent {ch:?}")]
    Unmappable { encoding: EncodingName, ch: char },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Drop a leading byte order mark before decoding.
    pub strip_bom: bool,
    /// Substitute U+FFFD for malformed sequences instead of failing.
    pub lossy: bool,
}

impl DecodeOptions {
    pub const STRICT: DecodeOptions = DecodeOptions {
        strip_bom: false,
        lossy: false,
    };
    pub const LOSSY: DecodeOptions = DecodeOptions {
        strip_bom: false,
        lossy: true,
    };
    pub const STRIP_BOM: DecodeOptions = DecodeOptions {
        strip_bom: true,
        lossy: false,
    };
}

/// Byte transcoding used by detection and conversion.
pub trait Codec: Send + Sync {
    fn decode(
        &self,
        bytes: &[u8],
        encoding: EncodingName,
        options: DecodeOptions,
    ) -> Result<String, CodecError>;

    fn encode(&self, text: &str, encoding: EncodingName) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EncodingRsCodec;

impl Codec for EncodingRsCodec {
    fn decode(
        &self,
        bytes: &[u8],
        encoding: EncodingName,
        options: DecodeOptions,
    ) -> Result<String, CodecError> {
        let bytes = if options.strip_bom {
            strip_bom(bytes, encoding)
        } else {
            bytes
        };

        match encoding {
            EncodingName::Ascii => decode_ascii(bytes, options.lossy),
            EncodingName::Iso8859_1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            other => {
                let Some(codec) = other.encoding_rs() else {
                    return Err(CodecError::Malformed { encoding: other });
                };
                if options.lossy {
                    let (text, _) = codec.decode_without_bom_handling(bytes);
                    Ok(text.into_owned())
                } else {
                    codec
                        .decode_without_bom_handling_and_without_replacement(bytes)
                        .map(|text| text.into_owned())
                        .ok_or(CodecError::Malformed { encoding: other })
                }
            }
        }
    }

    fn encode(&self, text: &str, encoding: EncodingName) -> Result<Vec<u8>, CodecError> {
        match encoding {
            EncodingName::Utf8 => Ok(text.as_bytes().to_vec()),
            EncodingName::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            EncodingName::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            EncodingName::Ascii => encode_single_byte(text, encoding, 0x7F),
            EncodingName::Iso8859_1 => encode_single_byte(text, encoding, 0xFF),
            other => {
                let Some(codec) = other.encoding_rs() else {
                    return Err(first_unmappable(text, other));
                };
                let (bytes, _, had_errors) = codec.encode(text);
                if had_errors {
                    return Err(first_unmappable(text, other));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

/// Removes a leading UTF-8 signature, or the matching UTF-16 one when
/// decoding UTF-16.
pub fn strip_bom(bytes: &[u8], encoding: EncodingName) -> &[u8] {
    let bom = match encoding {
        EncodingName::Utf16Le => UTF16LE_BOM,
        EncodingName::Utf16Be => UTF16BE_BOM,
        _ => UTF8_BOM,
    };
    bytes.strip_prefix(bom).unwrap_or(bytes)
}

/// Encoding announced by a byte order mark, if any.
pub fn detect_bom(bytes: &[u8]) -> Option<EncodingName> {
    if bytes.starts_with(UTF8_BOM) {
        return Some(EncodingName::Utf8);
    }
    if bytes.starts_with(UTF16LE_BOM) {
        return Some(EncodingName::Utf16Le);
    }
    if bytes.starts_with(UTF16BE_BOM) {
        return Some(EncodingName::Utf16Be);
    }

    None
}

pub fn count_replacements(text: &str) -> usize {
    text.chars().filter(|ch| *ch == char::REPLACEMENT_CHARACTER).count()
}

fn decode_ascii(bytes: &[u8], lossy: bool) -> Result<String, CodecError> {
    if lossy {
        return Ok(bytes
            .iter()
            .map(|&b| {
                if b.is_ascii() {
                    char::from(b)
                } else {
                    char::REPLACEMENT_CHARACTER
                }
            })
            .collect());
    }
    if !bytes.is_ascii() {
        return Err(CodecError::Malformed {
            encoding: EncodingName::Ascii,
        });
    }
    Ok(bytes.iter().map(|&b| char::from(b)).collect())
}

fn encode_single_byte(text: &str, encoding: EncodingName, max: u32) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|ch| {
            u8::try_from(ch as u32)
                .ok()
                .filter(|b| u32::from(*b) <= max)
                .ok_or(CodecError::Unmappable { encoding, ch })
        })
        .collect()
}

fn first_unmappable(text: &str, encoding: EncodingName) -> CodecError {
    let mut buf = [0u8; 4];
    let ch = text
        .chars()
        .find(|ch| match encoding.encoding_rs() {
            Some(codec) => codec.encode(ch.encode_utf8(&mut buf)).2,
            None => true,
        })
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    CodecError::Unmappable { encoding, ch }
}
