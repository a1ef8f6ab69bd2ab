use std::fmt;
use std::str::FromStr;

use encoding_rs::Encoding;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unknown encoding '{0}'")]
    Unknown(String),
}

/// Every encoding the converter can read or write.
///
/// Parsing accepts the canonical name or any alias, ignoring case and
/// treating `_`, `-` and spaces alike, so `UTF8`, `cp1252` and `Shift-JIS`
/// all resolve to a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EncodingName {
    Utf8,
    Utf16Le,
    Utf16Be,
    Ascii,
    Big5,
    Gbk,
    Gb2312,
    Gb18030,
    ShiftJis,
    EucJp,
    Iso2022Jp,
    EucKr,
    Iso8859_1,
    Iso8859_2,
    Iso8859_5,
    Iso8859_7,
    Iso8859_15,
    Windows1250,
    Windows1251,
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1256,
    Koi8R,
}

impl EncodingName {
    pub const ALL: [EncodingName; 24] = [
        EncodingName::Utf8,
        EncodingName::Utf16Le,
        EncodingName::Utf16Be,
        EncodingName::Ascii,
        EncodingName::Big5,
        EncodingName::Gbk,
        EncodingName::Gb2312,
        EncodingName::Gb18030,
        EncodingName::ShiftJis,
        EncodingName::EucJp,
        EncodingName::Iso2022Jp,
        EncodingName::EucKr,
        EncodingName::Iso8859_1,
        EncodingName::Iso8859_2,
        EncodingName::Iso8859_5,
        EncodingName::Iso8859_7,
        EncodingName::Iso8859_15,
        EncodingName::Windows1250,
        EncodingName::Windows1251,
        EncodingName::Windows1252,
        EncodingName::Windows1253,
        EncodingName::Windows1254,
        EncodingName::Windows1256,
        EncodingName::Koi8R,
    ];

    pub fn canonical(self) -> &'static str {
        match self {
            EncodingName::Utf8 => "utf-8",
            EncodingName::Utf16Le => "utf-16le",
            EncodingName::Utf16Be => "utf-16be",
            EncodingName::Ascii => "ascii",
            EncodingName::Big5 => "big5",
            EncodingName::Gbk => "gbk",
            EncodingName::Gb2312 => "gb2312",
            EncodingName::Gb18030 => "gb18030",
            EncodingName::ShiftJis => "shift_jis",
            EncodingName::EucJp => "euc-jp",
            EncodingName::Iso2022Jp => "iso-2022-jp",
            EncodingName::EucKr => "euc-kr",
            EncodingName::Iso8859_1 => "iso-8859-1",
            EncodingName::Iso8859_2 => "iso-8859-2",
            EncodingName::Iso8859_5 => "iso-8859-5",
            EncodingName::Iso8859_7 => "iso-8859-7",
            EncodingName::Iso8859_15 => "iso-8859-15",
            EncodingName::Windows1250 => "windows-1250",
            EncodingName::Windows1251 => "windows-1251",
            EncodingName::Windows1252 => "windows-1252",
            EncodingName::Windows1253 => "windows-1253",
            EncodingName::Windows1254 => "windows-1254",
            EncodingName::Windows1256 => "windows-1256",
            EncodingName::Koi8R => "koi8-r",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            EncodingName::Utf8 => &["utf8", "unicode-1-1-utf-8"],
            EncodingName::Utf16Le => &["utf16le", "utf-16", "ucs-2", "unicode"],
            EncodingName::Utf16Be => &["utf16be", "unicodefffe"],
            EncodingName::Ascii => &["us-ascii", "ansi_x3.4-1968", "iso646-us"],
            EncodingName::Big5 => &["big-5", "cn-big5", "x-x-big5", "cp950", "big5-hkscs"],
            EncodingName::Gbk => &["cp936", "x-gbk", "windows-936"],
            EncodingName::Gb2312 => &["gb_2312-80", "csgb2312", "euc-cn", "chinese"],
            EncodingName::Gb18030 => &["gb-18030"],
            EncodingName::ShiftJis => &["sjis", "shiftjis", "ms_kanji", "cp932", "windows-31j"],
            EncodingName::EucJp => &["eucjp", "x-euc-jp"],
            EncodingName::Iso2022Jp => &["csiso2022jp"],
            EncodingName::EucKr => &["euckr", "cp949", "ks_c_5601-1987", "windows-949"],
            EncodingName::Iso8859_1 => &["latin1", "iso8859-1", "iso_8859-1", "l1", "cp819"],
            EncodingName::Iso8859_2 => &["latin2", "iso8859-2", "l2"],
            EncodingName::Iso8859_5 => &["cyrillic", "iso8859-5"],
            EncodingName::Iso8859_7 => &["greek", "iso8859-7"],
            EncodingName::Iso8859_15 => &["latin9", "latin-9", "iso8859-15", "l9"],
            EncodingName::Windows1250 => &["cp1250", "x-cp1250"],
            EncodingName::Windows1251 => &["cp1251", "x-cp1251"],
            EncodingName::Windows1252 => &["cp1252", "x-cp1252"],
            EncodingName::Windows1253 => &["cp1253", "x-cp1253"],
            EncodingName::Windows1254 => &["cp1254", "x-cp1254", "latin5"],
            EncodingName::Windows1256 => &["cp1256", "x-cp1256"],
            EncodingName::Koi8R => &["koi8", "koi8r", "cskoi8r"],
        }
    }

    /// The `encoding_rs` codec backing this name. `ascii` and
    /// `iso-8859-1` have none: WHATWG maps latin1 onto windows-1252, so both
    /// are transcoded by hand.
    pub fn encoding_rs(self) -> Option<&'static Encoding> {
        let encoding = match self {
            EncodingName::Ascii | EncodingName::Iso8859_1 => return None,
            EncodingName::Utf8 => encoding_rs::UTF_8,
            EncodingName::Utf16Le => encoding_rs::UTF_16LE,
            EncodingName::Utf16Be => encoding_rs::UTF_16BE,
            EncodingName::Big5 => encoding_rs::BIG5,
            EncodingName::Gbk | EncodingName::Gb2312 => encoding_rs::GBK,
            EncodingName::Gb18030 => encoding_rs::GB18030,
            EncodingName::ShiftJis => encoding_rs::SHIFT_JIS,
            EncodingName::EucJp => encoding_rs::EUC_JP,
            EncodingName::Iso2022Jp => encoding_rs::ISO_2022_JP,
            EncodingName::EucKr => encoding_rs::EUC_KR,
            EncodingName::Iso8859_2 => encoding_rs::ISO_8859_2,
            EncodingName::Iso8859_5 => encoding_rs::ISO_8859_5,
            EncodingName::Iso8859_7 => encoding_rs::ISO_8859_7,
            EncodingName::Iso8859_15 => encoding_rs::ISO_8859_15,
            EncodingName::Windows1250 => encoding_rs::WINDOWS_1250,
            EncodingName::Windows1251 => encoding_rs::WINDOWS_1251,
            EncodingName::Windows1252 => encoding_rs::WINDOWS_1252,
            EncodingName::Windows1253 => encoding_rs::WINDOWS_1253,
            EncodingName::Windows1254 => encoding_rs::WINDOWS_1254,
            EncodingName::Windows1256 => encoding_rs::WINDOWS_1256,
            EncodingName::Koi8R => encoding_rs::KOI8_R,
        };
        Some(encoding)
    }

    /// Maps a detector verdict back onto the supported set.
    pub fn from_encoding_rs(encoding: &'static Encoding) -> Option<Self> {
        encoding.name().parse().ok()
    }

    /// Encodings that can represent every Unicode scalar value.
    pub fn is_unicode(self) -> bool {
        matches!(
            self,
            EncodingName::Utf8
                | EncodingName::Utf16Le
                | EncodingName::Utf16Be
                | EncodingName::Gb18030
        )
    }

    /// Whether 7-bit ASCII bytes mean the same characters in this encoding.
    pub fn is_ascii_compatible(self) -> bool {
        !matches!(self, EncodingName::Utf16Le | EncodingName::Utf16Be)
    }
}

fn fold(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|ch| match ch {
            '_' | ' ' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

impl FromStr for EncodingName {
    type Err = EncodingError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let wanted = fold(label);
        EncodingName::ALL
            .into_iter()
            .find(|name| {
                fold(name.canonical()) == wanted
                    || name.aliases().iter().any(|alias| fold(alias) == wanted)
            })
            .ok_or_else(|| EncodingError::Unknown(label.trim().to_string()))
    }
}

impl fmt::Display for EncodingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl Serialize for EncodingName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.canonical())
    }
}

impl<'de> Deserialize<'de> for EncodingName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}
