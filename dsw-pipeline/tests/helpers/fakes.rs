//! Fake external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use dsw_common::models::{Channel, LedgerEntry, NotificationKind};
use dsw_pipeline::adapters::{
    Analysis, Analyzer, ChannelSender, ConfirmationFeed, DispatchMessage, FeedItem, SignalSource, Signals,
};
use dsw_pipeline::{AdapterError, LedgerAvailability, NotificationLedger};

/// Analyzer that replays scripted results, then repeats the fallback
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Result<Analysis, AdapterError>>>,
    fallback: Result<Analysis, AdapterError>,
    translation: Result<String, AdapterError>,
    image_location: Option<String>,
    pub analyze_calls: AtomicUsize,
    pub translate_calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    /// Always returns `analysis`
    pub fn answering(analysis: Analysis) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(analysis),
            translation: Err(AdapterError::Unavailable("no translator".to_string())),
            image_location: None,
            analyze_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with `error`
    pub fn failing(error: AdapterError) -> Self {
        Self {
            fallback: Err(error),
            ..Self::answering(Analysis::default())
        }
    }

    /// Returns `first` in order before falling back
    pub fn with_script(self, first: Vec<Result<Analysis, AdapterError>>) -> Self {
        *self.script.lock().unwrap() = first.into();
        self
    }

    pub fn with_translation(mut self, translated: &str) -> Self {
        self.translation = Ok(translated.to_string());
        self
    }

    pub fn with_image_location(mut self, location: &str) -> Self {
        self.image_location = Some(location.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn analyze(&self, _text: &str) -> Result<Analysis, AdapterError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn translate(&self, _text: &str, _from_lang: &str) -> Result<String, AdapterError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.translation.clone()
    }

    async fn locate_image(&self, _image_url: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.image_location.clone())
    }
}

pub struct StaticSignals {
    pub signals: Signals,
}

#[async_trait]
impl SignalSource for StaticSignals {
    async fn get_signals(&self, _location: &str) -> Result<Signals, AdapterError> {
        Ok(self.signals.clone())
    }
}

pub struct FailingSignals;

#[async_trait]
impl SignalSource for FailingSignals {
    async fn get_signals(&self, _location: &str) -> Result<Signals, AdapterError> {
        Err(AdapterError::Unavailable("signal provider down".to_string()))
    }
}

/// Feed returning the same items on every poll
pub struct ScriptedFeed {
    name: String,
    items: Mutex<Vec<FeedItem>>,
    fail: bool,
}

impl ScriptedFeed {
    pub fn new(name: &str, items: Vec<FeedItem>) -> Self {
        Self {
            name: name.to_string(),
            items: Mutex::new(items),
            fail: false,
        }
    }

    pub fn broken(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Vec::new())
        }
    }

    pub fn push(&self, item: FeedItem) {
        self.items.lock().unwrap().push(item);
    }
}

#[async_trait]
impl ConfirmationFeed for ScriptedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>, AdapterError> {
        if self.fail {
            return Err(AdapterError::Api(500, "feed broken".to_string()));
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(|mut item| {
                item.source = self.name.clone();
                item
            })
            .collect())
    }
}

/// Records every send; addresses in `failing` return an error
pub struct RecordingSender {
    channel: Channel,
    failing: HashSet<String>,
    pub sent: Mutex<Vec<(String, DispatchMessage)>>,
}

impl RecordingSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            failing: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.subject.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, address: &str, message: &DispatchMessage) -> Result<(), AdapterError> {
        if self.failing.contains(address) {
            return Err(AdapterError::Api(502, format!("gateway rejected {}", address)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), message.clone()));
        Ok(())
    }
}

/// Ledger whose store is unreachable
#[derive(Default)]
pub struct UnavailableLedger {
    pub record_attempts: AtomicUsize,
}

#[async_trait]
impl NotificationLedger for UnavailableLedger {
    async fn availability(&self) -> LedgerAvailability {
        LedgerAvailability::Unavailable("ledger table not found".to_string())
    }

    async fn claim(&self, _subject_id: Uuid, _kind: NotificationKind, _at: DateTime<Utc>) -> dsw_common::Result<bool> {
        panic!("claim must not be attempted while the ledger is unavailable");
    }

    async fn record(&self, _entry: &LedgerEntry) -> dsw_common::Result<()> {
        self.record_attempts.fetch_add(1, Ordering::SeqCst);
        Err(dsw_common::Error::Internal("ledger unavailable".to_string()))
    }

    async fn find(&self, _subject_id: Uuid, _kind: NotificationKind) -> dsw_common::Result<Option<LedgerEntry>> {
        Ok(None)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> dsw_common::Result<u64> {
        Ok(0)
    }
}
