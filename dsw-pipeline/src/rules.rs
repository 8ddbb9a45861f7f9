//! Keyword rule table
//!
//! One versioned table holds every keyword list the pipeline consults: the
//! fallback disaster classifier, the severity heuristic, the storm-forecast
//! check, language routing, fallback location extraction and the
//! confirmation-feed filter. A TOML file may replace the built-in table.
//!
//! Matching is token based. Hazard keywords match as token prefixes
//! ("flood" matches "flooding"); lexicon and gazetteer entries match whole
//! tokens only.

use dsw_common::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Base severity for keyword-scored reports
pub const HEURISTIC_BASE_SEVERITY: f32 = 0.3;
pub const HIGH_KEYWORD_BONUS: f32 = 0.4;
pub const MEDIUM_KEYWORD_BONUS: f32 = 0.2;
pub const LOW_KEYWORD_BONUS: f32 = 0.1;

/// Confidence assigned by the keyword fallback classifier
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

static DEFAULT_RULES: Lazy<Arc<RuleTable>> = Lazy::new(|| Arc::new(RuleTable::builtin()));

/// Known place with alternative spellings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Bilingual routing lexicon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lexicon {
    pub primary_language: String,
    pub secondary_language: String,
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: u32,
    pub high_severity: Vec<String>,
    pub medium_severity: Vec<String>,
    pub low_severity: Vec<String>,
    /// Disaster indicators that carry no severity bonus on their own
    #[serde(default)]
    pub disaster_terms: Vec<String>,
    pub storm_intensity: Vec<String>,
    pub verification_keywords: Vec<String>,
    pub gazetteer: Vec<GazetteerEntry>,
    pub lexicon: Lexicon,
}

/// Lowercased alphanumeric tokens of `text`
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn phrase_tokens(phrase: &str) -> Vec<String> {
    tokenize(phrase)
}

/// True when `phrase` appears as consecutive tokens. With `prefix`, the
/// text token only has to start with the phrase token.
fn contains_phrase(tokens: &[String], phrase: &str, prefix: bool) -> bool {
    let wanted = phrase_tokens(phrase);
    if wanted.is_empty() || wanted.len() > tokens.len() {
        return false;
    }
    tokens.windows(wanted.len()).any(|window| {
        window.iter().zip(&wanted).all(|(have, want)| {
            if prefix {
                have.starts_with(want.as_str())
            } else {
                have == want
            }
        })
    })
}

fn any_phrase(tokens: &[String], phrases: &[String], prefix: bool) -> bool {
    phrases.iter().any(|p| contains_phrase(tokens, p, prefix))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RuleTable {
    /// Shared built-in table
    pub fn default_shared() -> Arc<RuleTable> {
        Arc::clone(&DEFAULT_RULES)
    }

    /// Load a table from TOML, or fall back to the built-in table
    pub fn load(path: Option<&Path>) -> Result<Arc<RuleTable>> {
        let Some(path) = path else {
            return Ok(Self::default_shared());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read rules {} failed: {}", path.display(), e)))?;
        let table: RuleTable = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse rules {} failed: {}", path.display(), e)))?;
        table.validate()?;
        tracing::info!(version = table.version, path = %path.display(), "Rule table loaded");
        Ok(Arc::new(table))
    }

    pub fn validate(&self) -> Result<()> {
        if self.high_severity.is_empty() && self.medium_severity.is_empty() && self.low_severity.is_empty() {
            return Err(Error::Config("rule table has no hazard keywords".to_string()));
        }
        if self.verification_keywords.is_empty() {
            return Err(Error::Config("rule table has no verification keywords".to_string()));
        }
        Ok(())
    }

    /// Keyword-membership disaster classification
    pub fn is_disaster_related(&self, text: &str) -> bool {
        let tokens = tokenize(text);
        any_phrase(&tokens, &self.high_severity, true)
            || any_phrase(&tokens, &self.medium_severity, true)
            || any_phrase(&tokens, &self.low_severity, true)
            || any_phrase(&tokens, &self.disaster_terms, true)
    }

    /// Keyword severity: base 0.3, +0.4 high, +0.2 medium, +0.1 low, clamped
    pub fn heuristic_severity(&self, text: &str) -> f32 {
        let tokens = tokenize(text);
        let mut severity = HEURISTIC_BASE_SEVERITY;
        if any_phrase(&tokens, &self.high_severity, true) {
            severity += HIGH_KEYWORD_BONUS;
        }
        if any_phrase(&tokens, &self.medium_severity, true) {
            severity += MEDIUM_KEYWORD_BONUS;
        }
        if any_phrase(&tokens, &self.low_severity, true) {
            severity += LOW_KEYWORD_BONUS;
        }
        severity.min(1.0)
    }

    /// Hazard keywords found in `text`, used as key phrases by the fallback
    pub fn matched_keywords(&self, text: &str) -> Vec<String> {
        let tokens = tokenize(text);
        self.high_severity
            .iter()
            .chain(&self.medium_severity)
            .chain(&self.low_severity)
            .chain(&self.disaster_terms)
            .filter(|k| contains_phrase(&tokens, k, true))
            .cloned()
            .collect()
    }

    pub fn has_storm_intensity(&self, forecast: &str) -> bool {
        any_phrase(&tokenize(forecast), &self.storm_intensity, true)
    }

    /// Confirmation-feed keyword containment filter
    pub fn matches_verification(&self, text: &str) -> bool {
        any_phrase(&tokenize(text), &self.verification_keywords, true)
    }

    /// Canonical gazetteer name of the longest place mention in `text`
    pub fn find_location(&self, text: &str) -> Option<String> {
        let tokens = tokenize(text);
        let mut best: Option<(usize, &str)> = None;
        for entry in &self.gazetteer {
            for candidate in std::iter::once(&entry.name).chain(&entry.aliases) {
                let len = phrase_tokens(candidate).len();
                if contains_phrase(&tokens, candidate, false)
                    && best.map_or(true, |(best_len, _)| len > best_len)
                {
                    best = Some((len, entry.name.as_str()));
                }
            }
        }
        best.map(|(_, name)| name.to_string())
    }

    /// Dominant language by lexicon hits; ties go to the primary language
    pub fn dominant_language(&self, text: &str) -> &str {
        let tokens = tokenize(text);
        let count = |words: &[String]| tokens.iter().filter(|t| words.contains(t)).count();
        let primary = count(&self.lexicon.primary);
        let secondary = count(&self.lexicon.secondary);
        if secondary > primary {
            &self.lexicon.secondary_language
        } else {
            &self.lexicon.primary_language
        }
    }

    pub fn primary_language(&self) -> &str {
        &self.lexicon.primary_language
    }

    fn builtin() -> Self {
        Self {
            version: 1,
            high_severity: strings(&[
                "earthquake", "tsunami", "collapse", "landslide", "explosion", "eruption",
                "gempa", "runtuh", "tanah runtuh", "letupan",
            ]),
            medium_severity: strings(&[
                "flood", "storm", "fire", "cyclone", "typhoon", "tornado", "mudslide",
                "banjir", "ribut", "kebakaran", "puting beliung",
            ]),
            low_severity: strings(&["rain", "downpour", "hujan", "drizzle"]),
            disaster_terms: strings(&[
                "evacuate", "evacuation", "emergency", "rescue", "trapped", "casualties",
                "kecemasan", "pemindahan", "terperangkap", "mangsa",
            ]),
            storm_intensity: strings(&[
                "severe", "thunderstorm", "storm", "gale", "cyclone", "typhoon", "heavy rain",
                "ribut", "lebat",
            ]),
            verification_keywords: strings(&[
                "flood", "earthquake", "tsunami", "landslide", "fire", "storm", "warning",
                "evacuat", "banjir", "gempa", "amaran", "kebakaran",
            ]),
            gazetteer: vec![
                place("Kuala Lumpur", &["KL"]),
                place("Penang", &["Pulau Pinang", "George Town", "Georgetown"]),
                place("Langkawi", &[]),
                place("Johor Bahru", &["JB"]),
                place("Kota Kinabalu", &[]),
                place("Kota Bharu", &[]),
                place("Kuching", &[]),
                place("Ipoh", &[]),
                place("Melaka", &["Malacca"]),
                place("Shah Alam", &[]),
                place("Kuantan", &[]),
                place("Selangor", &[]),
                place("Kelantan", &[]),
                place("Terengganu", &[]),
                place("Sabah", &[]),
                place("Sarawak", &[]),
            ],
            lexicon: Lexicon {
                primary_language: "en".to_string(),
                secondary_language: "ms".to_string(),
                primary: strings(&[
                    "the", "and", "in", "is", "at", "of", "to", "are", "on", "with", "near",
                    "people", "water", "road", "roads", "today", "heavy", "help",
                ]),
                secondary: strings(&[
                    "di", "dan", "yang", "ini", "itu", "ke", "dari", "banjir", "gempa", "ribut",
                    "kebakaran", "hujan", "jalan", "orang", "tanah", "runtuh", "air", "lebat",
                    "sangat", "kami", "tolong", "bantuan", "berlaku", "teruk",
                ]),
            },
        }
    }
}

fn place(name: &str, aliases: &[&str]) -> GazetteerEntry {
    GazetteerEntry {
        name: name.to_string(),
        aliases: strings(aliases),
    }
}
