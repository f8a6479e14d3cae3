//! Input guardrails evaluated before the active agent runs.
//!
//! Each guardrail kind has its own verdict shape and its own violation predicate.
//! Relevance and jailbreak trip when their positive flag is false, data privacy and
//! authority limitation trip when their flag is true, and language support never
//! trips. [`GuardrailVerdict::tripwire_triggered`] is the single place that encodes
//! this.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::task::JoinSet;

use haven_core::config::GuardrailEvaluation;
use haven_core::domain::agent::GuardrailKind;
use haven_core::domain::conversation::HistoryItem;
use haven_core::domain::events::GuardrailResult;

use crate::runtime::CapabilityError;

pub const DATA_PRIVACY_REFUSAL: &str = "For your security and privacy, please do not share social security numbers, bank account numbers, credit card information, or other sensitive personal identification through this chat system.\n\nFor sharing sensitive documents or personal identification, please contact your Housing Choice Voucher Program (HPS) specialist or caseworker directly:\n\nEmail: customerservice@smchousing.org\n\nHousing Authority Office Hours:\nMonday through Friday, 8:00 AM to 5:00 PM\nClosed weekends and holidays";

pub const SCOPE_REFUSAL: &str = "Sorry, I can only answer questions related to housing authority services.\n\nFor other inquiries, please send a detailed email to customerservice@smchousing.org and an HPS or housing authority specialist will be in contact with you.\n\nHousing Authority Office Hours:\nMonday through Friday, 8:00 AM to 5:00 PM\nClosed weekends and holidays";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Relevance { is_relevant: bool },
    Jailbreak { is_safe: bool },
    DataPrivacy { contains_sensitive_data: bool },
    AuthorityLimitation { exceeds_authority: bool },
    LanguageSupport { supported_language: bool, detected_language: String },
}

impl GuardrailVerdict {
    pub fn kind(&self) -> GuardrailKind {
        match self {
            Self::Relevance { .. } => GuardrailKind::Relevance,
            Self::Jailbreak { .. } => GuardrailKind::Jailbreak,
            Self::DataPrivacy { .. } => GuardrailKind::DataPrivacy,
            Self::AuthorityLimitation { .. } => GuardrailKind::AuthorityLimitation,
            Self::LanguageSupport { .. } => GuardrailKind::LanguageSupport,
        }
    }

    pub fn tripwire_triggered(&self) -> bool {
        match self {
            Self::Relevance { is_relevant } => !is_relevant,
            Self::Jailbreak { is_safe } => !is_safe,
            Self::DataPrivacy { contains_sensitive_data } => *contains_sensitive_data,
            Self::AuthorityLimitation { exceeds_authority } => *exceeds_authority,
            // Informational only.
            Self::LanguageSupport { .. } => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailCheck {
    pub reasoning: String,
    pub verdict: GuardrailVerdict,
}

type ClassifierAnswer = Result<GuardrailCheck, CapabilityError>;

/// Classification capability behind every guardrail. Model-backed classifiers and
/// the rule-based [`HeuristicClassifier`] both plug in here.
#[async_trait]
pub trait GuardrailClassifier: Send + Sync {
    async fn classify(
        &self,
        kind: GuardrailKind,
        input: &str,
        history: &[HistoryItem],
    ) -> Result<GuardrailCheck, CapabilityError>;
}

/// Deterministic keyword and pattern classifier.
pub struct HeuristicClassifier {
    sensitive_data: Vec<(Regex, &'static str)>,
    jailbreak: Regex,
    off_topic: Regex,
    housing_topic: Regex,
    authority: Regex,
    spanish: Regex,
    mandarin: Regex,
}

impl HeuristicClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            sensitive_data: vec![
                (Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")?, "a full social security number"),
                (Regex::new(r"\b\d{9}\b")?, "a 9-digit identifier such as an SSN"),
                (
                    Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b")?,
                    "a credit card number",
                ),
                (
                    Regex::new(r"(?i)\b(routing|bank account)\s*(number|no\.?|#)?\s*(is|:)?\s*\d{4,}")?,
                    "a bank account or routing number",
                ),
            ],
            jailbreak: Regex::new(
                r"(?i)(system prompt|ignore (all |any )?(the )?(previous|prior|above) instructions|developer mode|jailbreak|drop\s+table|<script|reveal (your|the) (instructions|prompt))",
            )?,
            off_topic: Regex::new(
                r"(?i)\b(weather|forecast|sports?|football|basketball|baseball|movies?|recipes?|stock market|stocks|crypto|bitcoin|lottery|horoscope|celebrit(y|ies))\b",
            )?,
            housing_topic: Regex::new(
                r"(?i)\b(housing|inspections?|rent|rental|landlords?|tenants?|section 8|vouchers?|hps|lease|unit|apartment|repairs?|applications?|income|door codes?|deposit|hqs|hud|waitlist)\b",
            )?,
            authority: Regex::new(
                r"(?i)(guarantee (my |the )?(approval|application)|approve my application|override (the )?(hud|regulations?|decision)|represent me|be my lawyer|legal representation|process (a |my )?payment|transfer (the )?money|show me (my|the) tenant records?)",
            )?,
            spanish: Regex::new(
                r"(?i)(¿|¡|\b(hola|gracias|necesito|quiero|ayuda|vivienda|inspecci[oó]n|por favor|cita|buenos d[ií]as)\b)",
            )?,
            mandarin: Regex::new(r"\p{Han}")?,
        })
    }

    fn relevance(&self, input: &str) -> GuardrailCheck {
        let off_topic = self.off_topic.is_match(input) && !self.housing_topic.is_match(input);
        GuardrailCheck {
            reasoning: if off_topic {
                "The message asks about a topic unrelated to housing authority services.".to_string()
            } else {
                "The message is conversational or related to housing authority services.".to_string()
            },
            verdict: GuardrailVerdict::Relevance { is_relevant: !off_topic },
        }
    }

    fn jailbreak(&self, input: &str) -> GuardrailCheck {
        let attempt = self.jailbreak.is_match(input);
        GuardrailCheck {
            reasoning: if attempt {
                "The message attempts to bypass or reveal system instructions.".to_string()
            } else {
                "No attempt to bypass instructions was found.".to_string()
            },
            verdict: GuardrailVerdict::Jailbreak { is_safe: !attempt },
        }
    }

    fn data_privacy(&self, input: &str) -> GuardrailCheck {
        let found = self
            .sensitive_data
            .iter()
            .find(|(pattern, _)| pattern.is_match(input))
            .map(|(_, label)| *label);
        GuardrailCheck {
            reasoning: match found {
                Some(label) => format!("The message contains {label}."),
                None => "No sensitive personal data was found.".to_string(),
            },
            verdict: GuardrailVerdict::DataPrivacy { contains_sensitive_data: found.is_some() },
        }
    }

    fn authority(&self, input: &str) -> GuardrailCheck {
        let exceeds = self.authority.is_match(input);
        GuardrailCheck {
            reasoning: if exceeds {
                "The request needs a binding decision or transaction the assistant cannot make."
                    .to_string()
            } else {
                "The request is within what the assistant can help with.".to_string()
            },
            verdict: GuardrailVerdict::AuthorityLimitation { exceeds_authority: exceeds },
        }
    }

    fn language(&self, input: &str) -> GuardrailCheck {
        let detected = if self.mandarin.is_match(input) {
            "mandarin"
        } else if self.spanish.is_match(input) {
            "spanish"
        } else {
            "english"
        };
        GuardrailCheck {
            reasoning: format!("The message is primarily written in {detected}."),
            verdict: GuardrailVerdict::LanguageSupport {
                supported_language: true,
                detected_language: detected.to_string(),
            },
        }
    }
}

#[async_trait]
impl GuardrailClassifier for HeuristicClassifier {
    async fn classify(
        &self,
        kind: GuardrailKind,
        input: &str,
        _history: &[HistoryItem],
    ) -> Result<GuardrailCheck, CapabilityError> {
        Ok(match kind {
            GuardrailKind::Relevance => self.relevance(input),
            GuardrailKind::Jailbreak => self.jailbreak(input),
            GuardrailKind::DataPrivacy => self.data_privacy(input),
            GuardrailKind::AuthorityLimitation => self.authority(input),
            GuardrailKind::LanguageSupport => self.language(input),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Continue { detected_language: Option<String> },
    Aborted { guardrail: GuardrailKind, reasoning: String },
}

pub struct GuardrailEvaluator {
    classifier: Arc<dyn GuardrailClassifier>,
    mode: GuardrailEvaluation,
}

impl GuardrailEvaluator {
    pub fn new(classifier: Arc<dyn GuardrailClassifier>, mode: GuardrailEvaluation) -> Self {
        Self { classifier, mode }
    }

    pub fn mode(&self) -> GuardrailEvaluation {
        self.mode
    }

    /// Runs the guardrails in attachment order and reports the first one that trips.
    /// A classifier failure only surfaces when no earlier guardrail tripped, so both
    /// modes reach the same decision for the same classifier answers.
    pub async fn evaluate(
        &self,
        guardrails: &[GuardrailKind],
        input: &str,
        history: &[HistoryItem],
    ) -> Result<GuardrailDecision, CapabilityError> {
        let checks = match self.mode {
            GuardrailEvaluation::ShortCircuit => {
                let mut checks = Vec::with_capacity(guardrails.len());
                for kind in guardrails {
                    let check = self.classifier.classify(*kind, input, history).await;
                    let stop = match &check {
                        Ok(check) => check.verdict.tripwire_triggered(),
                        Err(_) => true,
                    };
                    checks.push((*kind, check));
                    if stop {
                        break;
                    }
                }
                checks
            }
            GuardrailEvaluation::Exhaustive => self.classify_all(guardrails, input, history).await?,
        };

        let mut detected_language = None;
        for (kind, check) in checks {
            let check = check?;
            if check.verdict.tripwire_triggered() {
                tracing::info!(
                    event_name = "guardrail.tripwire.triggered",
                    guardrail = kind.display_name(),
                    "guardrail tripwire triggered"
                );
                return Ok(GuardrailDecision::Aborted { guardrail: kind, reasoning: check.reasoning });
            }
            if let GuardrailVerdict::LanguageSupport { detected_language: language, .. } =
                check.verdict
            {
                detected_language = Some(language);
            }
        }

        Ok(GuardrailDecision::Continue { detected_language })
    }

    /// Classifies every guardrail concurrently. Answers come back in attachment order;
    /// only a task that could not be joined fails the whole batch.
    async fn classify_all(
        &self,
        guardrails: &[GuardrailKind],
        input: &str,
        history: &[HistoryItem],
    ) -> Result<Vec<(GuardrailKind, ClassifierAnswer)>, CapabilityError> {
        let mut tasks = JoinSet::new();
        for (position, kind) in guardrails.iter().copied().enumerate() {
            let classifier = Arc::clone(&self.classifier);
            let input = input.to_string();
            let history = history.to_vec();
            tasks.spawn(async move {
                let check = classifier.classify(kind, &input, &history).await;
                (position, kind, check)
            });
        }

        let mut checks = Vec::with_capacity(guardrails.len());
        while let Some(joined) = tasks.join_next().await {
            let answer = joined
                .map_err(|error| CapabilityError::Classifier(format!("classifier task: {error}")))?;
            checks.push(answer);
        }
        checks.sort_by_key(|(position, _, _)| *position);

        Ok(checks.into_iter().map(|(_, kind, check)| (kind, check)).collect())
    }
}

/// One result per attached guardrail for an aborted turn: the triggering guardrail
/// fails with its reasoning, every other one passes with empty reasoning, and all
/// entries share one timestamp.
pub fn tripped_results(
    guardrails: &[GuardrailKind],
    input: &str,
    failed: GuardrailKind,
    reasoning: &str,
) -> Vec<GuardrailResult> {
    let timestamp = Utc::now();
    guardrails
        .iter()
        .map(|kind| {
            let result = if *kind == failed {
                GuardrailResult::failed(*kind, input, reasoning)
            } else {
                GuardrailResult::passed(*kind, input)
            };
            result.at(timestamp)
        })
        .collect()
}

/// Status list for the agent that owns the turn's outcome. Failures recorded earlier
/// in the turn are reused by name; everything else is a fresh pass.
pub fn final_results(
    guardrails: &[GuardrailKind],
    input: &str,
    recorded: &[GuardrailResult],
) -> Vec<GuardrailResult> {
    guardrails
        .iter()
        .map(|kind| {
            recorded
                .iter()
                .find(|result| !result.passed && result.name == kind.display_name())
                .cloned()
                .unwrap_or_else(|| GuardrailResult::passed(*kind, input))
        })
        .collect()
}

pub fn refusal_message(guardrail: GuardrailKind) -> &'static str {
    match guardrail {
        GuardrailKind::DataPrivacy => DATA_PRIVACY_REFUSAL,
        _ => SCOPE_REFUSAL,
    }
}
