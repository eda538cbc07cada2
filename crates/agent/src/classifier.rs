use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use routedesk_core::classifier::{CapabilityError, TextClassifier, Verdict};
use routedesk_core::domain::task::Category;

use crate::llm::{LlmClient, LlmRequest};

const SYSTEM_PROMPT: &str = "You classify enterprise workflow requests.

Categories:
- IT: software, hardware, infrastructure, security, accounts, networks and technical support
- HR: recruitment, employee relations, payroll, benefits, training and personnel matters
- Operations: processes, budgets, vendors, procurement, facilities and logistics

Answer with a single JSON object and nothing else:
{\"category\": \"<one of the allowed categories>\", \"confidence\": <number between 0 and 1>, \"reasoning\": \"<one sentence>\"}";

/// Model answer after JSON decoding, before it becomes a [`Verdict`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ParsedVerdict {
    pub category: String,
    #[serde(alias = "score")]
    pub confidence: f64,
    #[serde(default, alias = "rationale")]
    pub reasoning: Option<String>,
}

pub struct LlmTextClassifier {
    client: Arc<dyn LlmClient>,
    name: String,
    max_tokens: u32,
}

impl LlmTextClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        let name = format!("llm:{}", client.model());
        Self { client, name, max_tokens: 256 }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request(&self, text: &str, categories: &[Category]) -> LlmRequest {
        let allowed =
            categories.iter().map(|category| category.as_str()).collect::<Vec<_>>().join(", ");
        LlmRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: format!("Allowed categories: {allowed}\n\nRequest:\n{text}"),
            temperature: 0.0,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl TextClassifier for LlmTextClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(
        &self,
        text: &str,
        categories: &[Category],
    ) -> Result<Verdict, CapabilityError> {
        let request = self.request(text, categories);
        let reply = self
            .client
            .complete(&request)
            .await
            .map_err(|error| CapabilityError::Unavailable(format!("{error:#}")))?;

        let parsed = parse_reply(&reply)?;
        let category = Category::parse(&parsed.category).ok_or_else(|| {
            CapabilityError::InvalidResponse(format!("unrecognized category `{}`", parsed.category))
        })?;
        if !parsed.confidence.is_finite() || !(0.0..=1.0).contains(&parsed.confidence) {
            return Err(CapabilityError::InvalidResponse(format!(
                "confidence out of range: {}",
                parsed.confidence
            )));
        }

        tracing::debug!(
            event_name = "agent.llm_classified",
            model = self.client.model(),
            category = category.as_str(),
            confidence = parsed.confidence,
            reasoning = parsed.reasoning.as_deref().unwrap_or(""),
            "model classified request"
        );
        Ok(Verdict { category, score: parsed.confidence })
    }
}

/// Decodes a model reply, tolerating markdown fences and prose around the
/// JSON object.
pub fn parse_reply(reply: &str) -> Result<ParsedVerdict, CapabilityError> {
    let cleaned = reply.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(parsed) = serde_json::from_str::<ParsedVerdict>(cleaned) {
        return Ok(parsed);
    }

    let object = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(CapabilityError::InvalidResponse(
                "reply does not contain a JSON object".to_string(),
            ))
        }
    };
    serde_json::from_str::<ParsedVerdict>(object).map_err(|error| {
        CapabilityError::InvalidResponse(format!("failed to parse reply as JSON: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use routedesk_core::classifier::{CapabilityError, ClassifierAgent, TextClassifier};
    use routedesk_core::config::PipelineConfig;
    use routedesk_core::domain::task::Category;

    use super::{parse_reply, LlmTextClassifier};
    use crate::llm::{LlmClient, LlmRequest};

    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies), requests: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<String> {
            self.requests.lock().expect("requests lock").push(request.clone());
            let mut replies = self.replies.lock().expect("replies lock");
            if replies.is_empty() {
                return Err(anyhow!("no scripted reply left"));
            }
            replies.remove(0)
        }
    }

    #[test]
    fn parses_plain_fenced_and_wrapped_replies() {
        let plain = parse_reply(r#"{"category": "IT", "confidence": 0.9}"#).expect("plain");
        assert_eq!(plain.category, "IT");

        let fenced = parse_reply("```json\n{\"category\": \"HR\", \"score\": 0.7}\n```")
            .expect("fenced");
        assert_eq!(fenced.confidence, 0.7);

        let wrapped = parse_reply(
            "Sure! Here it is: {\"category\": \"Operations\", \"confidence\": 0.8, \"reasoning\": \"vendor\"} hope that helps",
        )
        .expect("wrapped");
        assert_eq!(wrapped.reasoning.as_deref(), Some("vendor"));

        assert!(matches!(
            parse_reply("not json at all"),
            Err(CapabilityError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn prompt_lists_only_offered_categories() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"category":"hr","confidence":0.82}"#.to_string())]);
        let classifier = LlmTextClassifier::new(llm.clone());

        let verdict = classifier
            .classify("Question about my payroll deduction", &[Category::Hr, Category::Operations])
            .await
            .expect("verdict");
        assert_eq!(verdict.category, Category::Hr);
        assert_eq!(classifier.name(), "llm:scripted");

        let requests = llm.requests.lock().expect("requests lock");
        assert!(requests[0].user.starts_with("Allowed categories: HR, Operations"));
        assert!(requests[0].user.contains("payroll deduction"));
    }

    #[tokio::test]
    async fn rejects_unknown_labels_and_out_of_range_scores() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"category":"Finance","confidence":0.9}"#.to_string()),
            Ok(r#"{"category":"IT","confidence":1.7}"#.to_string()),
        ]);
        let classifier = LlmTextClassifier::new(llm);

        assert!(matches!(
            classifier.classify("text", &Category::ROUTABLE).await,
            Err(CapabilityError::InvalidResponse(message)) if message.contains("Finance")
        ));
        assert!(matches!(
            classifier.classify("text", &Category::ROUTABLE).await,
            Err(CapabilityError::InvalidResponse(message)) if message.contains("1.7")
        ));
    }

    #[tokio::test]
    async fn client_failures_are_retried_by_the_agent() {
        let llm = ScriptedLlm::new(vec![
            Err(anyhow!("connection reset")),
            Ok("```json\n{\"category\":\"IT\",\"confidence\":0.91}\n```".to_string()),
        ]);
        let config = PipelineConfig { retry_base_delay_ms: 1, ..PipelineConfig::default() };
        let agent = ClassifierAgent::new(Arc::new(LlmTextClassifier::new(llm)), &config);

        let run = agent.classify("VPN keeps dropping").await;
        assert_eq!(run.failed_attempts.len(), 1);
        assert!(matches!(run.failed_attempts[0].error, CapabilityError::Unavailable(_)));
        let result = run.outcome.expect("classification");
        assert_eq!(result.category, Category::It);
        assert_eq!(result.attempts, 2);
    }
}
