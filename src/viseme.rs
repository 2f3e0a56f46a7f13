//! Viseme derivation: phonemes to mouth shapes.
//!
//! Mouth-shape codes are the single-digit codes used by Mycroft-style
//! enclosures:
//!
//! | Code | Shape                          | Phonemes                              |
//! |------|--------------------------------|---------------------------------------|
//! | `0`  | open, relaxed                  | AA AE AH AX AY EH EY HH IH IY Y       |
//! | `1`  | wide open                      | AW                                    |
//! | `2`  | rounded                        | ER OW R UH UW W                       |
//! | `3`  | teeth / tongue                 | CH D DH G JH K L N NG S SH T TH Z ZH  |
//! | `4`  | closed (neutral)               | B M P, silence, anything unknown      |
//! | `5`  | lip on teeth                   | F V                                   |
//! | `6`  | rounded open                   | AO OY                                 |

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::g2p::{G2pError, G2pProvider};

/// Mouth code for phonemes missing from the table.
pub const NEUTRAL_CODE: &str = "4";

/// Duration given to phonemes without an explicit `:<seconds>` suffix.
pub const DEFAULT_DURATION: f32 = 0.2;

static VISEMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let groups: [(&str, &[&str]); 7] = [
        ("0", &["aa", "ae", "ah", "ax", "ay", "eh", "ey", "hh", "ih", "iy", "y"]),
        ("1", &["aw"]),
        ("2", &["er", "ow", "r", "uh", "uw", "w"]),
        ("3", &["ch", "d", "dh", "g", "jh", "k", "l", "n", "ng", "s", "sh", "t", "th", "z", "zh"]),
        ("4", &["b", "m", "p", "sil"]),
        ("5", &["f", "v"]),
        ("6", &["ao", "oy"]),
    ];
    groups
        .iter()
        .flat_map(|(code, phones)| phones.iter().map(move |p| (*p, *code)))
        .collect()
});

/// One mouth shape held for `duration` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viseme {
    pub code: String,
    pub duration: f32,
}

impl Viseme {
    pub fn new(code: impl Into<String>, duration: f32) -> Self {
        Self { code: code.into(), duration }
    }
}

/// Mouth code for an ARPAbet phoneme; case and stress digits are ignored.
pub fn phoneme_to_code(phoneme: &str) -> &'static str {
    let key = phoneme
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_lowercase();
    VISEMES.get(key.as_str()).copied().unwrap_or(NEUTRAL_CODE)
}

/// Parse `"PH:dur PH PH:dur …"` into visemes.
///
/// Bare phonemes get [`DEFAULT_DURATION`]. Tokens with more than one `:` or
/// an unparsable duration are skipped.
pub fn parse_phonemes(phonemes: &str) -> Vec<Viseme> {
    let mut visemes = Vec::new();
    for token in phonemes.split_whitespace() {
        match token.split_once(':') {
            None => visemes.push(Viseme::new(phoneme_to_code(token), DEFAULT_DURATION)),
            Some((pho, dur)) => {
                if dur.contains(':') {
                    continue;
                }
                match dur.parse::<f32>() {
                    Ok(d) => visemes.push(Viseme::new(phoneme_to_code(pho), d)),
                    Err(_) => debug!(target: "tts", token, "skipping phoneme with bad duration"),
                }
            }
        }
    }
    visemes
}

/// Like [`parse_phonemes`], but an empty track becomes `None`.
pub fn visemes_from_phonemes(phonemes: &str) -> Option<Vec<Viseme>> {
    non_empty(parse_phonemes(phonemes))
}

fn non_empty(visemes: Vec<Viseme>) -> Option<Vec<Viseme>> {
    (!visemes.is_empty()).then_some(visemes)
}

/// Mouth-movement track for one synthesised chunk.
///
/// Uses the backend's `phonemes` when present, otherwise asks the G2P
/// provider. Out-of-vocabulary text yields `None` silently; any other G2P
/// failure is logged and also yields `None`.
pub fn derive_visemes(
    phonemes: Option<&str>,
    text: &str,
    lang: &str,
    g2p: Option<&dyn G2pProvider>,
) -> Option<Vec<Viseme>> {
    let visemes = match (phonemes.filter(|p| !p.trim().is_empty()), g2p) {
        (Some(p), _) => visemes_from_phonemes(p),
        (None, Some(g2p)) => match g2p.utterance_to_visemes(text, lang) {
            Ok(v) => non_empty(v),
            Err(G2pError::OutOfVocabulary(_)) => None,
            Err(e) => {
                error!(target: "tts", text, lang, "unexpected failure in G2P provider: {e:#}");
                None
            }
        },
        (None, None) => None,
    };
    if visemes.is_none() {
        debug!(target: "tts", text, "no mouth movements available");
    }
    visemes
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedG2p(fn() -> Result<Vec<Viseme>, G2pError>);

    impl G2pProvider for FixedG2p {
        fn utterance_to_phonemes(&self, _: &str, _: &str) -> Result<String, G2pError> {
            unreachable!("visemes are overridden")
        }
        fn utterance_to_visemes(&self, _: &str, _: &str) -> Result<Vec<Viseme>, G2pError> {
            (self.0)()
        }
    }

    #[test]
    fn test_explicit_durations() {
        let v = parse_phonemes("HH:0.1 AH:0.2");
        assert_eq!(v, vec![Viseme::new("0", 0.1), Viseme::new("0", 0.2)]);
    }

    #[test]
    fn test_default_durations() {
        let v = parse_phonemes("HH AH");
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|x| x.duration == DEFAULT_DURATION));
    }

    #[test]
    fn test_codes_and_unknowns() {
        assert_eq!(phoneme_to_code("OW1"), "2");
        assert_eq!(phoneme_to_code("f"), "5");
        assert_eq!(phoneme_to_code("xyz"), NEUTRAL_CODE);
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        let v = parse_phonemes("a:b:c M:x P:0.3");
        assert_eq!(v, vec![Viseme::new("4", 0.3)]);
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(visemes_from_phonemes("   "), None);
        assert_eq!(derive_visemes(Some(""), "hi", "en-us", None), None);
    }

    #[test]
    fn test_g2p_fallback_paths() {
        let ok = FixedG2p(|| Ok(vec![Viseme::new("1", 0.5)]));
        assert_eq!(
            derive_visemes(None, "how", "en-us", Some(&ok)),
            Some(vec![Viseme::new("1", 0.5)])
        );

        let oov = FixedG2p(|| Err(G2pError::OutOfVocabulary("zzz".into())));
        assert_eq!(derive_visemes(None, "zzz", "en-us", Some(&oov)), None);

        let broken = FixedG2p(|| Err(G2pError::Other(anyhow!("model crashed"))));
        assert_eq!(derive_visemes(None, "hi", "en-us", Some(&broken)), None);

        let empty = FixedG2p(|| Ok(Vec::new()));
        assert_eq!(derive_visemes(None, "hi", "en-us", Some(&empty)), None);
    }

    #[test]
    fn test_backend_phonemes_win_over_g2p() {
        let g2p = FixedG2p(|| Ok(vec![Viseme::new("1", 9.0)]));
        let v = derive_visemes(Some("F:0.1"), "hi", "en-us", Some(&g2p));
        assert_eq!(v, Some(vec![Viseme::new("5", 0.1)]));
    }
}
