// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Language code handling for OCR and correction.
//
// Clients send language hints in whatever notation they have (`en`, `ara`,
// `arabic`); OCRmyPDF wants Tesseract codes joined with `+`.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::capability::LanguageDetector;
use crate::error::CapabilityError;

/// Common ISO codes and English names mapped to Tesseract codes.
const LANGUAGE_MAPPING: &[(&str, &str)] = &[
    ("en", "eng"),
    ("ar", "ara"),
    ("fr", "fra"),
    ("de", "deu"),
    ("es", "spa"),
    ("it", "ita"),
    ("pt", "por"),
    ("ru", "rus"),
    ("zh", "chi_sim"),
    ("zh-cn", "chi_sim"),
    ("zh-tw", "chi_tra"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("hi", "hin"),
    ("th", "tha"),
    ("vi", "vie"),
    ("tr", "tur"),
    ("pl", "pol"),
    ("nl", "nld"),
    ("sv", "swe"),
    ("da", "dan"),
    ("no", "nor"),
    ("fi", "fin"),
    ("cs", "ces"),
    ("hu", "hun"),
    ("ro", "ron"),
    ("bg", "bul"),
    ("hr", "hrv"),
    ("sk", "slk"),
    ("sl", "slv"),
    ("et", "est"),
    ("lv", "lav"),
    ("lt", "lit"),
    ("uk", "ukr"),
    ("el", "ell"),
    ("he", "heb"),
    ("fa", "fas"),
    ("ur", "urd"),
    ("bn", "ben"),
    ("ta", "tam"),
    ("te", "tel"),
    ("ml", "mal"),
    ("kn", "kan"),
    ("gu", "guj"),
    ("pa", "pan"),
    ("or", "ori"),
    ("as", "asm"),
    ("ne", "nep"),
    ("si", "sin"),
    ("my", "mya"),
    ("km", "khm"),
    ("lo", "lao"),
    ("ka", "kat"),
    ("am", "amh"),
    ("is", "isl"),
    ("mt", "mlt"),
    ("cy", "cym"),
    ("ga", "gle"),
    ("gd", "gla"),
    ("br", "bre"),
    ("eu", "eus"),
    ("ca", "cat"),
    ("gl", "glg"),
    ("oc", "oci"),
    ("la", "lat"),
    ("eo", "epo"),
    ("chinese", "chi_sim"),
    ("chinese-simplified", "chi_sim"),
    ("chinese-traditional", "chi_tra"),
    ("english", "eng"),
    ("arabic", "ara"),
    ("french", "fra"),
    ("german", "deu"),
    ("spanish", "spa"),
    ("italian", "ita"),
    ("portuguese", "por"),
    ("russian", "rus"),
    ("japanese", "jpn"),
    ("korean", "kor"),
    ("hindi", "hin"),
];

/// Tesseract language packs accepted as-is.
pub const TESSERACT_CODES: &[&str] = &[
    "afr", "amh", "ara", "asm", "aze", "aze_cyrl", "bel", "ben", "bod", "bos", "bre", "bul",
    "cat", "ceb", "ces", "chi_sim", "chi_tra", "chr", "cym", "dan", "deu", "div", "dzo", "ell",
    "eng", "enm", "epo", "est", "eus", "fao", "fas", "fin", "fra", "frk", "frm", "fry", "gla",
    "gle", "glg", "grc", "guj", "hat", "heb", "hin", "hrv", "hun", "hye", "iku", "ind", "isl",
    "ita", "ita_old", "jav", "jpn", "kan", "kat", "kat_old", "kaz", "khm", "kir", "kor", "kur",
    "lao", "lat", "lav", "lit", "ltz", "mal", "mar", "mkd", "mlt", "mon", "mri", "msa", "mya",
    "nep", "nld", "nor", "oci", "ori", "pan", "pol", "por", "pus", "que", "ron", "rus", "san",
    "sin", "slk", "slv", "snd", "spa", "spa_old", "sqi", "srp", "srp_latn", "sun", "swa", "swe",
    "syr", "tam", "tat", "tel", "tgk", "tgl", "tha", "tir", "ton", "tur", "uig", "ukr", "urd",
    "uzb", "uzb_cyrl", "vie", "yid", "yor",
];

/// Map a single hint to its Tesseract code.
pub fn to_tesseract_code(hint: &str) -> Option<&'static str> {
    let hint = hint.trim().to_ascii_lowercase();
    if hint.is_empty() {
        return None;
    }
    if let Some(code) = TESSERACT_CODES.iter().find(|c| **c == hint) {
        return Some(code);
    }
    LANGUAGE_MAPPING
        .iter()
        .find(|(from, _)| *from == hint)
        .map(|(_, to)| *to)
}

/// Convert language hints to Tesseract codes.
///
/// Unknown hints are dropped with a warning. Duplicates are removed, keeping
/// first-seen order.
pub fn to_tesseract_codes<S: AsRef<str>>(hints: &[S]) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for hint in hints {
        let hint = hint.as_ref();
        match to_tesseract_code(hint) {
            Some(code) => {
                if !codes.iter().any(|c| c == code) {
                    codes.push(code.to_string());
                }
            }
            None if hint.trim().is_empty() => {}
            None => warn!(hint, "unknown language code, skipping"),
        }
    }
    debug!(?codes, "resolved tesseract languages");
    codes
}

/// Join Tesseract codes the way OCRmyPDF's `-l` option expects.
pub fn format_for_ocrmypdf<S: AsRef<str>>(codes: &[S]) -> String {
    codes
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("+")
}

/// Number of leading words examined when guessing a language.
pub const DETECTION_WORD_LIMIT: usize = 100;

/// Guess the ISO 639-1 language of `text` from the dominant Unicode script.
///
/// Only the first [`DETECTION_WORD_LIMIT`] words are examined. Latin script
/// is reported as English since script alone cannot separate Latin-alphabet
/// languages. Returns `None` when no letters are present.
pub fn detect_script_language(text: &str) -> Option<&'static str> {
    let mut counts = [0usize; SCRIPTS.len()];
    for word in text.split_whitespace().take(DETECTION_WORD_LIMIT) {
        for ch in word.chars().filter(|c| c.is_alphabetic()) {
            if let Some(idx) = SCRIPTS.iter().position(|s| (s.matches)(ch)) {
                counts[idx] += 1;
            }
        }
    }
    let (idx, count) = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)?;
    if *count == 0 {
        return None;
    }
    Some(SCRIPTS[idx].language)
}

struct Script {
    language: &'static str,
    matches: fn(char) -> bool,
}

const SCRIPTS: &[Script] = &[
    Script {
        language: "ar",
        matches: |c| matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}' | '\u{FB50}'..='\u{FDFF}' | '\u{FE70}'..='\u{FEFF}'),
    },
    Script {
        language: "he",
        matches: |c| matches!(c, '\u{0590}'..='\u{05FF}'),
    },
    Script {
        language: "ru",
        matches: |c| matches!(c, '\u{0400}'..='\u{04FF}'),
    },
    Script {
        language: "el",
        matches: |c| matches!(c, '\u{0370}'..='\u{03FF}'),
    },
    Script {
        language: "hi",
        matches: |c| matches!(c, '\u{0900}'..='\u{097F}'),
    },
    Script {
        language: "th",
        matches: |c| matches!(c, '\u{0E00}'..='\u{0E7F}'),
    },
    Script {
        language: "ja",
        matches: |c| matches!(c, '\u{3040}'..='\u{30FF}'),
    },
    Script {
        language: "ko",
        matches: |c| matches!(c, '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}'),
    },
    Script {
        language: "zh",
        matches: |c| matches!(c, '\u{4E00}'..='\u{9FFF}'),
    },
    Script {
        language: "en",
        matches: |c| c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}'),
    },
];

/// Script-based language detector usable without any external service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptDetector;

#[async_trait]
impl LanguageDetector for ScriptDetector {
    async fn detect(&self, text: &str) -> Result<Option<String>, CapabilityError> {
        Ok(detect_script_language(text).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_mixed_notations() {
        let codes = to_tesseract_codes(&["en", "ARA", " arabic ", "zh-TW"]);
        assert_eq!(codes, vec!["eng", "ara", "chi_tra"]);
    }

    #[test]
    fn unknown_and_empty_hints_are_dropped() {
        let codes = to_tesseract_codes(&["", "klingonese", "fr"]);
        assert_eq!(codes, vec!["fra"]);
    }

    #[test]
    fn formats_plus_joined() {
        assert_eq!(format_for_ocrmypdf(&["eng", "ara"]), "eng+ara");
        assert_eq!(format_for_ocrmypdf::<&str>(&[]), "");
    }

    #[test]
    fn detects_arabic_script() {
        assert_eq!(detect_script_language("هذا نص عربي للاختبار"), Some("ar"));
    }

    #[test]
    fn latin_reports_english() {
        assert_eq!(detect_script_language("The quick brown fox"), Some("en"));
    }

    #[test]
    fn digits_only_detects_nothing() {
        assert_eq!(detect_script_language("123 456 --"), None);
    }

    #[test]
    fn only_leading_words_count() {
        let mut text = "word ".repeat(DETECTION_WORD_LIMIT);
        text.push_str(&"كلمة ".repeat(500));
        assert_eq!(detect_script_language(&text), Some("en"));
    }
}
