use std::collections::BTreeSet;

use crate::config::PipelineConfig;
use crate::domain::intent::RequestIntent;
use crate::errors::PipelineError;

pub const SUMMARY_MAX_CHARS: usize = 120;

/// Lowercased alphanumeric tokens, in order.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Number of times `phrase` occurs as a contiguous run in `tokens`.
pub(crate) fn count_phrase(tokens: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return 0;
    }
    tokens.windows(phrase.len()).filter(|window| *window == phrase).count()
}

#[derive(Clone, Debug)]
struct LexiconEntry {
    normalized: String,
    tokens: Vec<String>,
}

impl LexiconEntry {
    fn new(raw: &str) -> Option<Self> {
        let tokens = tokenize(raw);
        if tokens.is_empty() {
            return None;
        }
        Some(Self { normalized: tokens.join(" "), tokens })
    }
}

fn lexicon(entries: &[String]) -> Vec<LexiconEntry> {
    entries.iter().filter_map(|entry| LexiconEntry::new(entry)).collect()
}

/// Turns raw request text into a [`RequestIntent`]. Pure: the same input always
/// yields the same intent.
#[derive(Clone, Debug)]
pub struct IntentExtractor {
    max_input_chars: usize,
    urgency: Vec<LexiconEntry>,
    systems: Vec<LexiconEntry>,
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl IntentExtractor {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_input_chars: config.max_input_chars,
            urgency: lexicon(&config.urgency_keywords),
            systems: lexicon(&config.entity_systems),
        }
    }

    pub fn extract(&self, text: &str) -> Result<RequestIntent, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let original_chars = text.chars().count();
        let truncated = original_chars > self.max_input_chars;
        let raw_text: String = if truncated {
            text.chars().take(self.max_input_chars).collect()
        } else {
            text.to_string()
        };

        let tokens = tokenize(&raw_text);
        let urgency_keywords = self
            .urgency
            .iter()
            .filter(|entry| count_phrase(&tokens, &entry.tokens) > 0)
            .map(|entry| entry.normalized.clone())
            .collect();

        let mut entities: BTreeSet<String> = self
            .systems
            .iter()
            .filter(|entry| count_phrase(&tokens, &entry.tokens) > 0)
            .map(|entry| entry.normalized.clone())
            .collect();
        entities.extend(mentions_and_hosts(&raw_text));

        Ok(RequestIntent {
            summary: summarize(&raw_text),
            raw_text,
            urgency_keywords,
            entities,
            truncated,
            original_chars,
        })
    }
}

fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|ch: char| !(ch.is_alphanumeric() || ch == '@' || ch == '-' || ch == '_'))
        .trim_end_matches('-')
}

fn mentions_and_hosts(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for word in text.split_whitespace() {
        let word = trim_punctuation(word);

        if let Some(handle) = word.strip_prefix('@') {
            let valid = !handle.is_empty()
                && handle.chars().all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.');
            if valid {
                found.push(format!("@{}", handle.to_lowercase()));
            }
            continue;
        }

        if is_host_like(word) {
            found.push(word.to_lowercase());
        }
    }
    found
}

/// `db-01`, `web-eu-2`: dash-joined, alphanumeric, with both letters and digits.
fn is_host_like(word: &str) -> bool {
    word.contains('-')
        && !word.starts_with('-')
        && word.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        && word.chars().any(|ch| ch.is_ascii_alphabetic())
        && word.chars().any(|ch| ch.is_ascii_digit())
}

fn summarize(text: &str) -> String {
    let first_sentence = first_sentence(text);
    let collapsed = first_sentence.split_whitespace().collect::<Vec<_>>().join(" ");
    let collapsed = if collapsed.is_empty() {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        collapsed
    };

    if collapsed.chars().count() <= SUMMARY_MAX_CHARS {
        return collapsed;
    }

    let head: String = collapsed.chars().take(SUMMARY_MAX_CHARS).collect();
    let cut = match head.rfind(' ') {
        Some(index) if index > 0 => &head[..index],
        _ => head.as_str(),
    };
    format!("{}...", cut.trim_end_matches([',', ';', ':']))
}

fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim_start();
    let mut chars = trimmed.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        let boundary = match ch {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = if ch == '\n' { index } else { index + ch.len_utf8() };
            let sentence = &trimmed[..end];
            if !sentence.trim().is_empty() {
                return sentence;
            }
        }
    }
    trimmed
}
