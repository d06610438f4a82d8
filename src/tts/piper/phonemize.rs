//! English text → IPA phonemes for Piper voices.
//!
//! `misaki-rs` does the grapheme-to-phoneme work. Its output uses a few
//! single-letter shorthands for diphthongs and affricates; Piper's phoneme
//! maps are plain IPA, so those are expanded before id lookup.

use crate::error::{GatewayError, Result};

/// Misaki shorthand → IPA.
const SYMBOL_EXPANSIONS: [(char, &str); 10] = [
    ('A', "eɪ"),
    ('I', "aɪ"),
    ('W', "aʊ"),
    ('Y', "ɔɪ"),
    ('O', "oʊ"),
    ('Q', "əʊ"),
    ('ʤ', "dʒ"),
    ('ʧ', "tʃ"),
    ('ᵊ', "ə"),
    ('ᵻ', "ɨ"),
];

/// Grapheme-to-phoneme converter for one English variant.
pub struct Phonemizer {
    g2p: misaki_rs::G2P,
}

impl Phonemizer {
    /// `british` selects British English pronunciation, otherwise American.
    pub fn new(british: bool) -> Self {
        let lang = if british {
            misaki_rs::Language::EnglishGB
        } else {
            misaki_rs::Language::EnglishUS
        };
        Self {
            g2p: misaki_rs::G2P::new(lang),
        }
    }

    /// Phonemize one sentence into IPA.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Backend`] if G2P fails.
    pub fn phonemize(&self, text: &str) -> Result<String> {
        let normalized = normalize_text(text);
        let (phonemes, _tokens) = self
            .g2p
            .g2p(&normalized)
            .map_err(|e| GatewayError::backend("PhonemizeError", e.to_string()))?;
        Ok(expand_symbols(&phonemes))
    }
}

/// Replace misaki shorthand symbols with their IPA spelling.
pub fn expand_symbols(phonemes: &str) -> String {
    let mut out = String::with_capacity(phonemes.len() + 8);
    for ch in phonemes.chars() {
        match SYMBOL_EXPANSIONS.iter().find(|(short, _)| *short == ch) {
            Some((_, ipa)) => out.push_str(ipa),
            None => out.push(ch),
        }
    }
    out
}

/// Split text into sentences at `.`, `!`, `?` and line breaks, keeping the
/// punctuation. Blank pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == '\n' || ch == '\r' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_owned());
    }
    current.clear();
}

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Make text friendlier to G2P: ASCII quotes and dashes, no markdown
/// emphasis or heading markers, spoken currency and abbreviations.
pub fn normalize_text(text: &str) -> String {
    let text = text
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2014}', '\u{2013}'], " - ");
    let text = strip_markdown(&text);
    let text = expand_currency(&text);
    expand_abbreviations(&text)
}

fn strip_markdown(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let body = if trimmed.starts_with('#') {
                trimmed.trim_start_matches('#').trim_start()
            } else {
                line
            };
            body.replace('*', "")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `$5` → `5 dollars`; the symbol is kept when no digits follow.
fn expand_currency(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let word = match ch {
            '$' => "dollars",
            '£' => "pounds",
            '€' => "euros",
            _ => {
                out.push(ch);
                continue;
            }
        };
        let mut digits = String::new();
        while let Some(d) = chars.next_if(char::is_ascii_digit) {
            digits.push(d);
        }
        if digits.is_empty() {
            out.push(ch);
        } else {
            out.push_str(&digits);
            out.push(' ');
            out.push_str(word);
        }
    }
    out
}

fn expand_abbreviations(text: &str) -> String {
    const ABBREVIATIONS: [(&str, &str); 9] = [
        ("Mrs.", "Missus"),
        ("Mr.", "Mister"),
        ("Ms.", "Miz"),
        ("Dr.", "Doctor"),
        ("St.", "Saint"),
        ("vs.", "versus"),
        ("etc.", "etcetera"),
        ("e.g.", "for example"),
        ("i.e.", "that is"),
    ];
    text.split(' ')
        .map(|word| {
            ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == word)
                .map_or(word, |(_, spoken)| spoken)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn expands_misaki_shorthands() {
        assert_eq!(expand_symbols("hˈA"), "hˈeɪ");
        assert_eq!(expand_symbols("ʤˈOk"), "dʒˈoʊk");
        assert_eq!(expand_symbols("plain"), "plain");
    }

    #[test]
    fn splits_on_terminal_punctuation_and_newlines() {
        assert_eq!(
            split_sentences("Hello there. How are you?\nFine!  "),
            vec!["Hello there.", "How are you?", "Fine!"]
        );
        assert!(split_sentences("   \n ").is_empty());
        assert_eq!(split_sentences("no stop"), vec!["no stop"]);
    }

    #[test]
    fn normalizes_quotes_and_dashes() {
        assert_eq!(normalize_text("it\u{2019}s \u{201C}ok\u{201D}\u{2014}fine"), "it's \"ok\" - fine");
    }

    #[test]
    fn strips_markdown_markers() {
        assert_eq!(normalize_text("## Title\n**bold** text"), "Title\nbold text");
    }

    #[test]
    fn expands_currency_amounts_only() {
        assert_eq!(normalize_text("costs $5 or £12"), "costs 5 dollars or 12 pounds");
        assert_eq!(normalize_text("the $ sign"), "the $ sign");
    }

    #[test]
    fn expands_whole_word_abbreviations() {
        assert_eq!(normalize_text("Dr. Smith vs. Mrs. Jones"), "Doctor Smith versus Missus Jones");
        assert_eq!(normalize_text("ADr. stays"), "ADr. stays");
    }
}
