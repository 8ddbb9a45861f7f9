//! Deterministic fallback classifier
//!
//! Used whenever the analyzer is missing, failing or slow. Everything here
//! comes from the rule table, so the same text always classifies the same way.

use std::sync::Arc;

use crate::adapters::Analysis;
use crate::rules::{RuleTable, FALLBACK_CONFIDENCE};

pub struct KeywordClassifier {
    rules: Arc<RuleTable>,
}

impl KeywordClassifier {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    /// Classify `text` by keyword membership, confidence fixed at 0.5
    pub fn classify(&self, text: &str) -> Analysis {
        Analysis {
            entities: Vec::new(),
            sentiment: Default::default(),
            key_phrases: self.rules.matched_keywords(text),
            location_guess: self.rules.find_location(text),
            confidence: FALLBACK_CONFIDENCE,
            is_disaster_related: Some(self.rules.is_disaster_related(text)),
            severity: Some(self.rules.heuristic_severity(text)),
        }
    }

    /// Fill the classification fields an analyzer left open
    pub fn complete(&self, text: &str, mut analysis: Analysis) -> Analysis {
        if analysis.is_disaster_related.is_none() {
            analysis.is_disaster_related = Some(self.rules.is_disaster_related(text));
        }
        if analysis.severity.is_none() {
            analysis.severity = Some(self.rules.heuristic_severity(text));
        }
        analysis
    }
}
