//! Language routing
//!
//! The rule-table lexicon decides which language a report is written in.
//! Non-primary text goes through the analyzer's translator; on any failure
//! the original text is used.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::Analyzer;
use crate::error::with_timeout;
use crate::rules::RuleTable;

/// Text ready for analysis
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedText {
    /// Text to analyze (translated when translation succeeded)
    pub text: String,
    /// Detected language of the original report
    pub language: String,
    pub translated: bool,
    pub translation_failed: bool,
}

pub struct LanguageRouter {
    rules: Arc<RuleTable>,
}

impl LanguageRouter {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn detect<'a>(&'a self, text: &str) -> &'a str {
        self.rules.dominant_language(text)
    }

    /// Detect the language and translate to the primary language when needed
    pub async fn route(&self, text: &str, analyzer: Option<&dyn Analyzer>, timeout: Duration) -> RoutedText {
        let language = self.detect(text).to_string();
        let untranslated = |translation_failed| RoutedText {
            text: text.to_string(),
            language: language.clone(),
            translated: false,
            translation_failed,
        };

        if language == self.rules.primary_language() {
            return untranslated(false);
        }

        let Some(analyzer) = analyzer else {
            debug!(language = %language, "No translator configured, analyzing original text");
            return untranslated(true);
        };

        match with_timeout(timeout, analyzer.translate(text, &language)).await {
            Ok(translated) if !translated.trim().is_empty() => RoutedText {
                text: translated,
                language: language.clone(),
                translated: true,
                translation_failed: false,
            },
            Ok(_) => {
                warn!(language = %language, "Translator returned empty text, using original");
                untranslated(true)
            }
            Err(e) => {
                warn!(language = %language, error = %e, "Translation failed, using original text");
                untranslated(true)
            }
        }
    }
}
