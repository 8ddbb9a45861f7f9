//! Pipeline services

pub mod enrichment;
pub mod keyword_classifier;
pub mod language;
pub mod message_format;
pub mod notification_dispatcher;
pub mod orchestrator;
pub mod post_queue;
pub mod severity;
pub mod spike_detector;
pub mod verification_matcher;

pub use enrichment::{EnrichmentOutcome, EnrichmentPipeline, OutcomeType};
pub use keyword_classifier::KeywordClassifier;
pub use language::{LanguageRouter, RoutedText};
pub use message_format::{format_message, NotificationPayload, StatusSummary};
pub use notification_dispatcher::{
    kind_for_alert, DeliveryOutcome, DispatchReport, DispatchStatus, NotificationDispatcher,
};
pub use orchestrator::health::{HealthReport, HealthStatus};
pub use orchestrator::statistics::{PipelineStatistics, StatisticsTracker};
pub use orchestrator::{CycleReport, OrchestratorSettings, PipelineOrchestrator};
pub use post_queue::{PostQueue, PostSubmitter};
pub use spike_detector::SpikeDetector;
pub use verification_matcher::{MatchReport, VerificationMatcher};
