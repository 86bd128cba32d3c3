//! Bilingual threat and profanity lexicons
//!
//! Terms are matched case-insensitively against the token stream of a
//! transcript. Single-word terms must equal a whole token; multi-word terms
//! must appear as a contiguous token run, so "kill" never matches "skills".

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::config::LexiconConfig;

/// Language a lexicon term belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Language {
    #[serde(rename = "EN")]
    En,
    #[serde(rename = "SI")]
    Si,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::En => write!(f, "EN"),
            Language::Si => write!(f, "SI"),
        }
    }
}

/// Keyword severity; `Threat` outranks `Profanity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Profanity,
    Threat,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Profanity => write!(f, "PROFANITY"),
            Severity::Threat => write!(f, "THREAT"),
        }
    }
}

/// Terms of one (language, severity) group found in one transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatKeywordMatch {
    pub matched_terms: BTreeSet<String>,
    pub language: Language,
    pub severity: Severity,
    pub chunk_id: u64,
}

/// Lowercased token view of a transcript
#[derive(Debug, Clone)]
pub struct NormalizedText {
    tokens: Vec<String>,
    token_set: HashSet<String>,
    /// Tokens joined by single spaces, padded with a space on both ends
    padded: String,
}

impl NormalizedText {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let token_set = tokens.iter().cloned().collect();
        let padded = format!(" {} ", tokens.join(" "));
        Self {
            tokens,
            token_set,
            padded,
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Split on whitespace and ASCII punctuation, keeping apostrophes inside
/// words ("i'll") and normalizing the typographic apostrophe.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One lexicon entry's matching rule
pub trait TermMatcher: Send + Sync {
    /// The term as configured
    fn term(&self) -> &str;

    fn matches(&self, text: &NormalizedText) -> bool;
}

/// Contiguous multi-token phrase
pub struct PhraseMatcher {
    term: String,
    padded: String,
}

impl PhraseMatcher {
    pub fn new(term: &str, tokens: &[String]) -> Self {
        Self {
            term: term.to_string(),
            padded: format!(" {} ", tokens.join(" ")),
        }
    }
}

impl TermMatcher for PhraseMatcher {
    fn term(&self) -> &str {
        &self.term
    }

    fn matches(&self, text: &NormalizedText) -> bool {
        text.padded.contains(&self.padded)
    }
}

/// Single token membership
pub struct TokenSetMatcher {
    term: String,
    token: String,
}

impl TokenSetMatcher {
    pub fn new(term: &str, token: &str) -> Self {
        Self {
            term: term.to_string(),
            token: token.to_string(),
        }
    }
}

impl TermMatcher for TokenSetMatcher {
    fn term(&self) -> &str {
        &self.term
    }

    fn matches(&self, text: &NormalizedText) -> bool {
        text.token_set.contains(&self.token)
    }
}

struct Entry {
    matcher: Box<dyn TermMatcher>,
    language: Language,
    severity: Severity,
}

/// Union of all configured term lists
pub struct Lexicon {
    entries: Vec<Entry>,
}

impl Lexicon {
    pub fn from_config(config: &LexiconConfig) -> Self {
        let mut lexicon = Self {
            entries: Vec::new(),
        };
        lexicon.extend(&config.english_threats, Language::En, Severity::Threat);
        lexicon.extend(&config.sinhala_threats, Language::Si, Severity::Threat);
        lexicon.extend(&config.english_profanity, Language::En, Severity::Profanity);
        lexicon.extend(&config.sinhala_profanity, Language::Si, Severity::Profanity);
        lexicon
    }

    /// Add terms; blank terms are skipped
    pub fn extend(&mut self, terms: &[String], language: Language, severity: Severity) {
        for term in terms {
            let tokens = tokenize(term);
            let matcher: Box<dyn TermMatcher> = match tokens.as_slice() {
                [] => continue,
                [single] => Box::new(TokenSetMatcher::new(term, single)),
                _ => Box::new(PhraseMatcher::new(term, &tokens)),
            };
            self.entries.push(Entry {
                matcher,
                language,
                severity,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Matches grouped by (language, severity), threat groups first
    pub fn scan(&self, chunk_id: u64, text: &str) -> Vec<ThreatKeywordMatch> {
        let normalized = NormalizedText::new(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut groups: BTreeMap<(Reverse<Severity>, Language), BTreeSet<String>> = BTreeMap::new();
        for entry in &self.entries {
            if entry.matcher.matches(&normalized) {
                groups
                    .entry((Reverse(entry.severity), entry.language))
                    .or_default()
                    .insert(entry.matcher.term().to_string());
            }
        }

        groups
            .into_iter()
            .map(|((Reverse(severity), language), matched_terms)| ThreatKeywordMatch {
                matched_terms,
                language,
                severity,
                chunk_id,
            })
            .collect()
    }
}
