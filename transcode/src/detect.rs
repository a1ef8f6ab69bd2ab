use std::fmt;
use std::path::Path;

use anyhow::Result;
use chardetng::EncodingDetector as Chardet;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{Codec, DecodeOptions, count_replacements, detect_bom};
use crate::encoding::EncodingName;
use crate::host::DocumentHost;

/// Below this many bytes statistical detection is not attempted.
const TINY_FILE_LIMIT: usize = 4;
const EDITOR_HINT_CONFIDENCE: f32 = 0.95;
const STATISTICAL_THRESHOLD: f32 = 0.7;
/// Non-ASCII bytes needed before a statistical guess reaches full weight.
const STATISTICAL_FULL_SAMPLE: f32 = 24.0;
const AUXILIARY_CONFIDENCE: f32 = 0.8;
const AUXILIARY_MIN_NON_ASCII: usize = 8;
const HEURISTIC_CONFIDENCE: f32 = 0.6;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const FALLBACK_CONFIDENCE: f32 = 0.1;

/// Tried in order; the first that decodes cleanly enough wins.
pub const HEURISTIC_CANDIDATES: [EncodingName; 7] = [
    EncodingName::Big5,
    EncodingName::Gbk,
    EncodingName::Gb2312,
    EncodingName::ShiftJis,
    EncodingName::EucKr,
    EncodingName::Iso8859_1,
    EncodingName::Windows1252,
];

/// Regional domains fed to chardetng as a language signal.
const REGIONAL_HINTS: [&[u8]; 10] = [
    b"tw", b"hk", b"cn", b"jp", b"kr", b"ru", b"gr", b"tr", b"pl", b"cz",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    EmptyFile,
    SmallAscii,
    SmallFile,
    EditorHint,
    StatisticalDetector,
    AuxiliaryDetector,
    HeuristicRoundtrip,
    Default,
    Fallback,
    Manual,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectionMethod::EmptyFile => "empty-file",
            DetectionMethod::SmallAscii => "small-ascii",
            DetectionMethod::SmallFile => "small-file",
            DetectionMethod::EditorHint => "editor-hint",
            DetectionMethod::StatisticalDetector => "statistical-detector",
            DetectionMethod::AuxiliaryDetector => "auxiliary-detector",
            DetectionMethod::HeuristicRoundtrip => "heuristic-roundtrip",
            DetectionMethod::Default => "default",
            DetectionMethod::Fallback => "fallback",
            DetectionMethod::Manual => "manual",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionResult {
    pub encoding: EncodingName,
    pub confidence: f32,
    pub method: DetectionMethod,
}

impl DetectionResult {
    pub fn new(encoding: EncodingName, confidence: f32, method: DetectionMethod) -> Self {
        Self {
            encoding,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    /// A source encoding supplied by the caller is trusted outright.
    pub fn manual(encoding: EncodingName) -> Self {
        Self::new(encoding, 1.0, DetectionMethod::Manual)
    }
}

/// Layered encoding guesser. Each layer either answers or defers to the
/// next; detection itself never fails.
pub struct EncodingDetector<'a> {
    codec: &'a dyn Codec,
    host: &'a dyn DocumentHost,
}

impl<'a> EncodingDetector<'a> {
    pub fn new(codec: &'a dyn Codec, host: &'a dyn DocumentHost) -> Self {
        Self { codec, host }
    }

    pub fn detect(&self, bytes: &[u8], path: Option<&Path>) -> DetectionResult {
        match self.try_detect(bytes, path) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "encoding detection failed; assuming utf-8");
                DetectionResult::new(
                    EncodingName::Utf8,
                    FALLBACK_CONFIDENCE,
                    DetectionMethod::Fallback,
                )
            }
        }
    }

    fn try_detect(&self, bytes: &[u8], path: Option<&Path>) -> Result<DetectionResult> {
        if bytes.is_empty() {
            return Ok(DetectionResult::new(
                EncodingName::Utf8,
                1.0,
                DetectionMethod::EmptyFile,
            ));
        }

        if bytes.len() < TINY_FILE_LIMIT {
            if bytes.iter().all(|b| (1..=127).contains(b)) {
                return Ok(DetectionResult::new(
                    EncodingName::Ascii,
                    0.9,
                    DetectionMethod::SmallAscii,
                ));
            }
            if std::str::from_utf8(bytes).is_ok() {
                return Ok(DetectionResult::new(
                    EncodingName::Utf8,
                    0.7,
                    DetectionMethod::SmallFile,
                ));
            }
            debug!(len = bytes.len(), "tiny buffer is not utf-8; trying legacy encodings");
        }

        if let Some(path) = path {
            if let Some(hint) = self.host.encoding_hint(path)? {
                if hint != EncodingName::Utf8 {
                    return Ok(DetectionResult::new(
                        hint,
                        EDITOR_HINT_CONFIDENCE,
                        DetectionMethod::EditorHint,
                    ));
                }
            }
        }

        if let Some(guess) = self.statistical_guess(bytes) {
            if guess.confidence > STATISTICAL_THRESHOLD {
                return Ok(guess);
            }
            debug!(
                encoding = %guess.encoding,
                confidence = guess.confidence,
                "statistical guess below threshold"
            );
        }

        if let Some(encoding) = self.auxiliary_guess(bytes) {
            return Ok(DetectionResult::new(
                encoding,
                AUXILIARY_CONFIDENCE,
                DetectionMethod::AuxiliaryDetector,
            ));
        }

        if let Some(encoding) = self.heuristic_roundtrip(bytes) {
            return Ok(DetectionResult::new(
                encoding,
                HEURISTIC_CONFIDENCE,
                DetectionMethod::HeuristicRoundtrip,
            ));
        }

        Ok(DetectionResult::new(
            EncodingName::Utf8,
            DEFAULT_CONFIDENCE,
            DetectionMethod::Default,
        ))
    }

    /// BOM, then ASCII and UTF-8 validity, then chardetng. The chardetng
    /// verdict is weighted by how cleanly it decodes and by how many
    /// non-ASCII bytes it had to go on.
    fn statistical_guess(&self, bytes: &[u8]) -> Option<DetectionResult> {
        let statistical = |encoding, confidence| {
            DetectionResult::new(encoding, confidence, DetectionMethod::StatisticalDetector)
        };

        if let Some(encoding) = detect_bom(bytes) {
            return Some(statistical(encoding, 1.0));
        }
        if bytes.is_ascii() && !bytes.contains(&0) {
            return Some(statistical(EncodingName::Ascii, 1.0));
        }
        if std::str::from_utf8(bytes).is_ok() {
            return Some(statistical(EncodingName::Utf8, 0.99));
        }

        let mut detector = Chardet::new();
        detector.feed(bytes, true);
        let guessed = detector.guess(None, true);
        let Some(encoding) = EncodingName::from_encoding_rs(guessed) else {
            debug!(guess = guessed.name(), "statistical guess is not a supported encoding");
            return None;
        };

        let text = self.codec.decode(bytes, encoding, DecodeOptions::LOSSY).ok()?;
        let replacements = count_replacements(&text);
        let non_ascii = bytes.iter().filter(|b| !b.is_ascii()).count();
        let sample = (non_ascii as f32 / STATISTICAL_FULL_SAMPLE).min(1.0);
        let base = if replacements == 0 { 0.9 } else { 0.3 };
        Some(statistical(encoding, base * (0.5 + 0.5 * sample)))
    }

    /// chardetng's unsteered verdict when it decodes cleanly, otherwise the
    /// encoding most regional hints agree on. Ties go to the earliest hint.
    fn auxiliary_guess(&self, bytes: &[u8]) -> Option<EncodingName> {
        let non_ascii = bytes.iter().filter(|b| !b.is_ascii()).count();
        if non_ascii < AUXILIARY_MIN_NON_ASCII {
            return None;
        }

        let mut detector = Chardet::new();
        detector.feed(bytes, true);
        let clean = |guess: &'static encoding_rs::Encoding| {
            let encoding = EncodingName::from_encoding_rs(guess)?;
            if encoding == EncodingName::Utf8 {
                return None;
            }
            self.codec.decode(bytes, encoding, DecodeOptions::STRICT).ok()?;
            Some(encoding)
        };

        if let Some(encoding) = clean(detector.guess(None, false)) {
            debug!(%encoding, "auxiliary detector match without hint");
            return Some(encoding);
        }

        let mut votes: Vec<(EncodingName, usize)> = Vec::new();
        for tld in REGIONAL_HINTS {
            let Some(encoding) = clean(detector.guess(Some(tld), false)) else {
                continue;
            };
            match votes.iter_mut().find(|(seen, _)| *seen == encoding) {
                Some((_, count)) => *count += 1,
                None => votes.push((encoding, 1)),
            }
        }
        let mut winner: Option<(EncodingName, usize)> = None;
        for (encoding, count) in votes {
            if winner.is_none_or(|(_, best)| count > best) {
                winner = Some((encoding, count));
            }
        }
        if let Some((encoding, count)) = winner {
            debug!(%encoding, votes = count, "auxiliary detector match by regional vote");
        }
        winner.map(|(encoding, _)| encoding)
    }

    fn heuristic_roundtrip(&self, bytes: &[u8]) -> Option<EncodingName> {
        let threshold = replacement_threshold(bytes.len());
        HEURISTIC_CANDIDATES.into_iter().find(|&candidate| {
            match self.codec.decode(bytes, candidate, DecodeOptions::LOSSY) {
                Ok(text) => {
                    let replacements = count_replacements(&text);
                    debug!(%candidate, replacements, threshold, "heuristic round-trip");
                    replacements < threshold
                }
                Err(_) => false,
            }
        })
    }
}

/// Replacement characters tolerated before a candidate is rejected.
pub fn replacement_threshold(len: usize) -> usize {
    if len < 100 {
        (len / 10).max(1)
    } else {
        len / 20
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::codec::EncodingRsCodec;

    struct NoHost;
    impl DocumentHost for NoHost {}

    struct HintHost(EncodingName);
    impl DocumentHost for HintHost {
        fn encoding_hint(&self, _path: &Path) -> Result<Option<EncodingName>> {
            Ok(Some(self.0))
        }
    }

    struct BrokenHost;
    impl DocumentHost for BrokenHost {
        fn encoding_hint(&self, _path: &Path) -> Result<Option<EncodingName>> {
            Err(anyhow!("host went away"))
        }
    }

    fn detect(bytes: &[u8]) -> DetectionResult {
        EncodingDetector::new(&EncodingRsCodec, &NoHost).detect(bytes, None)
    }

    #[test]
    fn empty_input_is_utf8_with_full_confidence() {
        assert_eq!(
            detect(b""),
            DetectionResult::new(EncodingName::Utf8, 1.0, DetectionMethod::EmptyFile)
        );
    }

    #[test]
    fn tiny_inputs() {
        assert_eq!(
            detect(b"ok"),
            DetectionResult::new(EncodingName::Ascii, 0.9, DetectionMethod::SmallAscii)
        );
        assert_eq!(
            detect("é".as_bytes()),
            DetectionResult::new(EncodingName::Utf8, 0.7, DetectionMethod::SmallFile)
        );
    }

    #[test]
    fn two_big5_bytes_fall_through_to_the_heuristic() {
        let result = detect(&[0xA4, 0xA4]);
        assert_eq!(result.encoding, EncodingName::Big5);
        assert_eq!(result.method, DetectionMethod::HeuristicRoundtrip);
    }

    #[test]
    fn ascii_text_never_reaches_legacy_candidates() {
        for sample in [&b"abcd"[..], b"fn main() {}\n", b"The quick brown fox\tjumps\r\n"] {
            let result = detect(sample);
            assert_eq!(result.encoding, EncodingName::Ascii);
            assert_eq!(result.method, DetectionMethod::StatisticalDetector);
        }
    }

    #[test]
    fn utf8_text_is_recognised() {
        let result = detect("naïve café, 中文字幕".as_bytes());
        assert_eq!(result.encoding, EncodingName::Utf8);
        assert!(result.confidence > 0.9);
    }

    #[test]
    fn bom_wins_inside_the_statistical_layer() {
        let result = detect(&[0xFF, 0xFE, b'h', 0, b'i', 0]);
        assert_eq!(result.encoding, EncodingName::Utf16Le);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn long_legacy_text_is_detected_with_confidence() {
        let text = "這是一個用繁體中文寫成的段落，用來測試編碼偵測是否能夠正確地辨識大五碼。\
                    我們需要足夠多的文字，統計偵測器才會有信心。";
        let (bytes, _, _) = encoding_rs::BIG5.encode(text);
        let result = detect(&bytes);
        assert_ne!(result.encoding, EncodingName::Utf8, "{result:?}");
        assert!(result.confidence > STATISTICAL_THRESHOLD, "{result:?}");
        assert!(matches!(
            result.method,
            DetectionMethod::StatisticalDetector | DetectionMethod::AuxiliaryDetector
        ));
    }

    #[test]
    fn short_shift_jis_is_claimed_by_the_auxiliary_layer() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("日本語です");
        let result = detect(&bytes);
        assert_eq!(
            result,
            DetectionResult::new(EncodingName::ShiftJis, 0.8, DetectionMethod::AuxiliaryDetector)
        );
        let text = EncodingRsCodec
            .decode(&bytes, result.encoding, DecodeOptions::STRICT)
            .expect("decodes");
        assert_eq!(text, "日本語です");
    }

    #[test]
    fn editor_hint_is_trusted_for_non_utf8() {
        let detector = EncodingDetector::new(&EncodingRsCodec, &HintHost(EncodingName::ShiftJis));
        let result = detector.detect(b"plain ascii text", Some(Path::new("a.txt")));
        assert_eq!(
            result,
            DetectionResult::new(EncodingName::ShiftJis, 0.95, DetectionMethod::EditorHint)
        );
    }

    #[test]
    fn utf8_editor_hint_is_ignored() {
        let detector = EncodingDetector::new(&EncodingRsCodec, &HintHost(EncodingName::Utf8));
        let result = detector.detect(b"plain ascii text", Some(Path::new("a.txt")));
        assert_eq!(result.method, DetectionMethod::StatisticalDetector);
    }

    #[test]
    fn internal_failures_become_low_confidence_fallback() {
        let detector = EncodingDetector::new(&EncodingRsCodec, &BrokenHost);
        let result = detector.detect(b"some text", Some(Path::new("a.txt")));
        assert_eq!(
            result,
            DetectionResult::new(EncodingName::Utf8, 0.1, DetectionMethod::Fallback)
        );
    }

    #[test]
    fn thresholds_scale_with_size() {
        assert_eq!(replacement_threshold(2), 1);
        assert_eq!(replacement_threshold(50), 5);
        assert_eq!(replacement_threshold(99), 9);
        assert_eq!(replacement_threshold(100), 5);
        assert_eq!(replacement_threshold(1000), 50);
    }

    #[test]
    fn method_labels_are_kebab_case() {
        assert_eq!(DetectionMethod::HeuristicRoundtrip.to_string(), "heuristic-roundtrip");
        assert_eq!(
            serde_json::to_value(DetectionMethod::EmptyFile).expect("json"),
            serde_json::json!("empty-file")
        );
    }
}
