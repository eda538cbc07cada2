use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PipelineConfig, RetryPolicy};
use crate::domain::classification::ClassificationResult;
use crate::domain::task::Category;
use crate::errors::PipelineError;
use crate::extractor::{count_phrase, tokenize};

/// Raw answer of a text-classification capability, before calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub category: Category,
    pub score: f64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("classifier returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(
        &self,
        text: &str,
        categories: &[Category],
    ) -> Result<Verdict, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedAttempt {
    pub attempt: u32,
    pub error: CapabilityError,
}

/// Outcome of one classification stage including every attempt that failed on
/// the way, so callers can audit retries even when a later attempt succeeded.
#[derive(Clone, Debug)]
pub struct ClassificationRun {
    pub outcome: Result<ClassificationResult, PipelineError>,
    pub failed_attempts: Vec<FailedAttempt>,
}

#[derive(Clone)]
pub struct ClassifierAgent {
    classifier: Arc<dyn TextClassifier>,
    attempts: u32,
    timeout: Duration,
    confidence_floor: f64,
    retry_policy: RetryPolicy,
}

impl ClassifierAgent {
    pub fn new(classifier: Arc<dyn TextClassifier>, config: &PipelineConfig) -> Self {
        Self {
            classifier,
            attempts: config.classifier_attempts.max(1),
            timeout: config.classifier_timeout(),
            confidence_floor: config.confidence_floor,
            retry_policy: config.retry_policy(),
        }
    }

    pub fn capability_name(&self) -> &str {
        self.classifier.name()
    }

    pub async fn classify(&self, text: &str) -> ClassificationRun {
        let categories = Category::ROUTABLE;
        let mut failed_attempts = Vec::new();

        for attempt in 1..=self.attempts {
            let call = self.classifier.classify(text, &categories);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    Err(CapabilityError::Timeout { after_ms: self.timeout.as_millis() as u64 })
                }
            };

            match result {
                Ok(verdict) => {
                    return ClassificationRun {
                        outcome: Ok(self.calibrate(verdict, &categories, attempt)),
                        failed_attempts,
                    };
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "classifier.attempt_failed",
                        capability = self.classifier.name(),
                        attempt,
                        max_attempts = self.attempts,
                        error = %error,
                        "classification attempt failed"
                    );
                    failed_attempts.push(FailedAttempt { attempt, error });

                    if attempt < self.attempts {
                        let delay = self.retry_policy.delay(attempt);
                        tracing::debug!(delay = ?delay, "retrying classification after delay");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let last_error = failed_attempts
            .last()
            .map(|failed| failed.error.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        ClassificationRun {
            outcome: Err(PipelineError::ClassificationUnavailable {
                attempts: self.attempts,
                last_error,
            }),
            failed_attempts,
        }
    }

    fn calibrate(&self, verdict: Verdict, categories: &[Category], attempts: u32) -> ClassificationResult {
        let confidence = if verdict.score.is_nan() { 0.0 } else { verdict.score.clamp(0.0, 1.0) };
        let raw_category = verdict.category;
        let mut rationale =
            format!("{} labelled {} with score {:.2}", self.classifier.name(), raw_category, confidence);

        let category = if raw_category != Category::Unknown && !categories.contains(&raw_category) {
            rationale.push_str("; label outside requested categories");
            Category::Unknown
        } else if raw_category != Category::Unknown && confidence < self.confidence_floor {
            rationale.push_str(&format!("; below confidence floor {:.2}", self.confidence_floor));
            Category::Unknown
        } else {
            raw_category
        };

        ClassificationResult { category, confidence, rationale, raw_category, attempts }
    }
}

const IT_KEYWORDS: &[&str] = &[
    "server", "network", "database", "application", "software", "hardware", "bug", "error",
    "crash", "security", "backup", "deploy", "infrastructure", "system", "api", "website",
    "email", "vpn", "firewall", "patch", "install", "configure", "outage", "down", "login",
    "password", "disk", "memory", "cpu", "internet", "wifi", "browser", "laptop", "printer",
    "cloud", "linux", "windows", "sql", "monitoring", "access", "account locked",
];

const HR_KEYWORDS: &[&str] = &[
    "employee", "staff", "hire", "recruit", "interview", "onboard", "onboarding", "training",
    "payroll", "benefits", "leave", "vacation", "sick", "performance review", "promotion",
    "termination", "resignation", "harassment", "compensation", "salary", "bonus", "hr",
    "human resources", "personnel", "candidate", "applicant", "insurance", "retirement",
    "pto", "time off", "holiday", "overtime", "new hire", "offer letter",
];

const OPERATIONS_KEYWORDS: &[&str] = &[
    "process", "workflow", "procedure", "budget", "vendor", "procurement", "purchase order",
    "supplier", "delivery", "shipment", "inventory", "stock", "warehouse", "logistics",
    "supply chain", "invoice", "facilities", "office", "desk", "furniture", "building",
    "maintenance", "cleaning", "parking", "badge", "meeting room", "catering", "travel",
];

/// Offline rule-based capability: scores each category by keyword hits.
///
/// The score grows with the number of hits for the leading category and is
/// scaled by how much that category dominates the others, so mixed requests
/// land below the review threshold.
#[derive(Clone, Debug)]
pub struct KeywordClassifier {
    lexicon: Vec<(Category, Vec<Vec<String>>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new([
            (Category::It, IT_KEYWORDS),
            (Category::Hr, HR_KEYWORDS),
            (Category::Operations, OPERATIONS_KEYWORDS),
        ])
    }
}

impl KeywordClassifier {
    pub fn new<'a>(lexicon: impl IntoIterator<Item = (Category, &'a [&'a str])>) -> Self {
        let lexicon = lexicon
            .into_iter()
            .map(|(category, keywords)| {
                let phrases = keywords
                    .iter()
                    .map(|keyword| tokenize(keyword))
                    .filter(|tokens| !tokens.is_empty())
                    .collect();
                (category, phrases)
            })
            .collect();
        Self { lexicon }
    }

    fn hits(&self, tokens: &[String], category: Category) -> f64 {
        self.lexicon
            .iter()
            .filter(|(candidate, _)| *candidate == category)
            .flat_map(|(_, phrases)| phrases.iter())
            .map(|phrase| {
                let weight = if phrase.len() > 1 { 1.5 } else { 1.0 };
                count_phrase(tokens, phrase) as f64 * weight
            })
            .sum()
    }
}

#[async_trait]
impl TextClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(
        &self,
        text: &str,
        categories: &[Category],
    ) -> Result<Verdict, CapabilityError> {
        let tokens = tokenize(text);
        let scored: Vec<(Category, f64)> =
            categories.iter().map(|category| (*category, self.hits(&tokens, *category))).collect();

        let total: f64 = scored.iter().map(|(_, hits)| hits).sum();
        let best = scored.iter().copied().fold(None::<(Category, f64)>, |best, candidate| {
            match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            }
        });

        match best {
            Some((category, hits)) if hits > 0.0 => {
                let dominance = hits / total;
                let strength = 1.0 - 0.5_f64.powf(hits);
                Ok(Verdict { category, score: dominance * (0.5 + 0.5 * strength) })
            }
            _ => Ok(Verdict { category: Category::Unknown, score: 0.0 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{
        CapabilityError, ClassifierAgent, KeywordClassifier, TextClassifier, Verdict,
    };
    use crate::config::PipelineConfig;
    use crate::domain::task::Category;
    use crate::errors::PipelineError;

    enum Step {
        Answer(Verdict),
        Fail(CapabilityError),
        Hang,
    }

    struct ScriptedClassifier {
        steps: Mutex<VecDeque<Step>>,
    }

    impl ScriptedClassifier {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self { steps: Mutex::new(steps.into()) })
        }
    }

    #[async_trait]
    impl TextClassifier for ScriptedClassifier {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn classify(
            &self,
            _text: &str,
            _categories: &[Category],
        ) -> Result<Verdict, CapabilityError> {
            let step = self.steps.lock().expect("script lock").pop_front();
            match step {
                Some(Step::Answer(verdict)) => Ok(verdict),
                Some(Step::Fail(error)) => Err(error),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(CapabilityError::Unavailable("unreachable".to_string()))
                }
                None => Err(CapabilityError::Unavailable("script exhausted".to_string())),
            }
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            classifier_timeout_ms: 20,
            retry_base_delay_ms: 1,
            max_retry_delay_ms: 4,
            ..PipelineConfig::default()
        }
    }

    fn verdict(category: Category, score: f64) -> Verdict {
        Verdict { category, score }
    }

    #[tokio::test]
    async fn confident_verdict_is_returned_unchanged() {
        let agent = ClassifierAgent::new(
            ScriptedClassifier::new(vec![Step::Answer(verdict(Category::It, 0.97))]),
            &fast_config(),
        );

        let run = agent.classify("Server is down, urgent!").await;
        let result = run.outcome.expect("classification succeeds");
        assert_eq!(result.category, Category::It);
        assert!((result.confidence - 0.97).abs() < 1e-9);
        assert_eq!(result.attempts, 1);
        assert!(run.failed_attempts.is_empty());
    }

    #[tokio::test]
    async fn score_below_floor_forces_unknown() {
        let agent = ClassifierAgent::new(
            ScriptedClassifier::new(vec![Step::Answer(verdict(Category::Hr, 0.4))]),
            &fast_config(),
        );

        let result = agent.classify("something vague").await.outcome.expect("succeeds");
        assert_eq!(result.category, Category::Unknown);
        assert_eq!(result.raw_category, Category::Hr);
        assert!(result.was_calibrated_down());
        assert!(result.rationale.contains("confidence floor"));
    }

    #[tokio::test]
    async fn out_of_range_and_nan_scores_are_clamped() {
        let agent = ClassifierAgent::new(
            ScriptedClassifier::new(vec![
                Step::Answer(verdict(Category::Operations, 1.7)),
                Step::Answer(verdict(Category::It, f64::NAN)),
            ]),
            &fast_config(),
        );

        let high = agent.classify("order chairs").await.outcome.expect("succeeds");
        assert_eq!(high.confidence, 1.0);
        assert_eq!(high.category, Category::Operations);

        let nan = agent.classify("order chairs").await.outcome.expect("succeeds");
        assert_eq!(nan.confidence, 0.0);
        assert_eq!(nan.category, Category::Unknown);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_reported() {
        let agent = ClassifierAgent::new(
            ScriptedClassifier::new(vec![
                Step::Fail(CapabilityError::Unavailable("503".to_string())),
                Step::Answer(verdict(Category::Hr, 0.8)),
            ]),
            &fast_config(),
        );

        let run = agent.classify("new hire paperwork").await;
        let result = run.outcome.expect("second attempt succeeds");
        assert_eq!(result.attempts, 2);
        assert_eq!(run.failed_attempts.len(), 1);
        assert_eq!(run.failed_attempts[0].attempt, 1);
    }

    #[tokio::test]
    async fn repeated_timeouts_exhaust_attempts() {
        let agent = ClassifierAgent::new(
            ScriptedClassifier::new(vec![Step::Hang, Step::Hang, Step::Hang]),
            &fast_config(),
        );

        let run = agent.classify("laptop will not boot").await;
        assert_eq!(run.failed_attempts.len(), 3);
        assert!(run
            .failed_attempts
            .iter()
            .all(|failed| matches!(failed.error, CapabilityError::Timeout { after_ms: 20 })));
        match run.outcome {
            Err(PipelineError::ClassificationUnavailable { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keyword_classifier_prefers_dominant_category() {
        let classifier = KeywordClassifier::default();

        let it = classifier
            .classify("Server is down, urgent!", &Category::ROUTABLE)
            .await
            .expect("keyword classifier never fails");
        assert_eq!(it.category, Category::It);
        assert!(it.score >= 0.6);

        let hr = classifier
            .classify("Please start onboarding for the new hire", &Category::ROUTABLE)
            .await
            .expect("keyword classifier never fails");
        assert_eq!(hr.category, Category::Hr);
    }

    #[tokio::test]
    async fn keyword_classifier_is_unsure_without_hits_or_with_mixed_hits() {
        let classifier = KeywordClassifier::default();

        let none = classifier
            .classify("hello there", &Category::ROUTABLE)
            .await
            .expect("keyword classifier never fails");
        assert_eq!(none.category, Category::Unknown);
        assert_eq!(none.score, 0.0);

        let mixed = classifier
            .classify("payroll server", &Category::ROUTABLE)
            .await
            .expect("keyword classifier never fails");
        assert!(mixed.score < 0.5);
    }
}
