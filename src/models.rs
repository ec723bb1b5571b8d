use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Confidence at or above which a spam verdict may recommend deletion
pub const HIGH_CONFIDENCE: f32 = 0.85;

/// Confidence below which a verdict is considered uncertain
pub const LOW_CONFIDENCE: f32 = 0.5;

/// A message as handed over by a mailbox, before any validation
///
/// Every field is optional because mailbox tools disagree on naming and
/// spam frequently arrives with headers missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMessage {
    #[serde(alias = "message_id")]
    pub id: Option<String>,
    pub subject: Option<String>,
    #[serde(alias = "from_address", alias = "sender")]
    pub from: Option<String>,
    pub snippet: Option<String>,
    pub body: Option<String>,
    #[serde(alias = "labelIds", alias = "labels")]
    pub label_ids: Vec<String>,
}

/// Canonical, validated view of one fetched message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body_excerpt: String,
    pub labels: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamType {
    Phishing,
    Marketing,
    Scam,
    Malware,
    Legitimate,
    Other,
}

impl SpamType {
    pub const ALL: [SpamType; 6] = [
        SpamType::Phishing,
        SpamType::Marketing,
        SpamType::Scam,
        SpamType::Malware,
        SpamType::Legitimate,
        SpamType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpamType::Phishing => "phishing",
            SpamType::Marketing => "marketing",
            SpamType::Scam => "scam",
            SpamType::Malware => "malware",
            SpamType::Legitimate => "legitimate",
            SpamType::Other => "other",
        }
    }

    /// Parse a model-supplied category, tolerating case and surrounding noise
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase();
        let normalized = normalized.trim_matches(|c: char| !c.is_ascii_alphabetic());
        match normalized {
            "phishing" => Some(SpamType::Phishing),
            "marketing" | "promotional" | "promotion" => Some(SpamType::Marketing),
            "scam" | "fraud" => Some(SpamType::Scam),
            "malware" | "virus" => Some(SpamType::Malware),
            "legitimate" | "ham" | "not_spam" | "not spam" => Some(SpamType::Legitimate),
            "other" => Some(SpamType::Other),
            _ => None,
        }
    }

    /// Whether this type describes unwanted mail
    pub fn implies_spam(&self) -> bool {
        !matches!(self, SpamType::Legitimate)
    }
}

impl fmt::Display for SpamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Delete,
    MarkSpam,
    Keep,
    Review,
}

impl RecommendedAction {
    pub const ALL: [RecommendedAction; 4] = [
        RecommendedAction::Delete,
        RecommendedAction::MarkSpam,
        RecommendedAction::Keep,
        RecommendedAction::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Delete => "delete",
            RecommendedAction::MarkSpam => "mark_spam",
            RecommendedAction::Keep => "keep",
            RecommendedAction::Review => "review",
        }
    }

    /// Parse a model-supplied action ("mark_spam", "Mark Spam", "mark-spam" ...)
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "delete" | "remove" | "trash" => Some(RecommendedAction::Delete),
            "markspam" | "markasspam" | "spam" => Some(RecommendedAction::MarkSpam),
            "keep" | "none" | "inbox" => Some(RecommendedAction::Keep),
            "review" | "manualreview" => Some(RecommendedAction::Review),
            _ => None,
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOrigin {
    /// Judgment returned by the language model (after normalization)
    Model,
    /// Safe default substituted for an unparseable response
    Sentinel,
}

/// A correction applied to model output while building a verdict
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    MissingField(&'static str),
    UnknownSpamType(String),
    UnknownAction(String),
    ConfidenceClamped { from: f32, to: f32 },
    SpamTypeNormalized { from: SpamType, to: SpamType },
    ActionCoerced { from: RecommendedAction, to: RecommendedAction },
    ActionDefaulted(RecommendedAction),
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::MissingField(field) => write!(f, "missing field '{}'", field),
            Adjustment::UnknownSpamType(value) => {
                write!(f, "unknown spam_type '{}' mapped to other", value)
            }
            Adjustment::UnknownAction(value) => write!(f, "unknown recommended_action '{}'", value),
            Adjustment::ConfidenceClamped { from, to } => {
                write!(f, "confidence {} clamped to {}", from, to)
            }
            Adjustment::SpamTypeNormalized { from, to } => {
                write!(f, "spam_type {} inconsistent with is_spam, normalized to {}", from, to)
            }
            Adjustment::ActionCoerced { from, to } => {
                write!(f, "recommended_action {} not allowed by policy, coerced to {}", from, to)
            }
            Adjustment::ActionDefaulted(to) => write!(f, "recommended_action defaulted to {}", to),
        }
    }
}

/// The model's judgment on one record
///
/// Fields are private: the only ways to obtain a verdict are [`ClassificationVerdict::new`],
/// which enforces the taxonomy and action invariants, and
/// [`ClassificationVerdict::sentinel`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationVerdict {
    email_id: String,
    is_spam: bool,
    confidence: f32,
    spam_type: SpamType,
    reasoning: String,
    recommended_action: RecommendedAction,
    #[serde(skip)]
    origin: VerdictOrigin,
}

impl ClassificationVerdict {
    /// Build a verdict from (already field-parsed) model output
    ///
    /// `is_spam` is authoritative: the spam type is re-derived when it
    /// contradicts it, confidence is clamped into [0, 1] and the action is
    /// forced into the policy bounds. Every correction is returned.
    pub fn new(
        email_id: impl Into<String>,
        is_spam: bool,
        confidence: f32,
        spam_type: SpamType,
        reasoning: impl Into<String>,
        stated_action: Option<RecommendedAction>,
    ) -> (Self, Vec<Adjustment>) {
        let mut adjustments = Vec::new();

        let clamped = clamp_confidence(confidence);
        if clamped != confidence {
            adjustments.push(Adjustment::ConfidenceClamped {
                from: confidence,
                to: clamped,
            });
        }

        let consistent_type = consistent_spam_type(is_spam, spam_type);
        if consistent_type != spam_type {
            adjustments.push(Adjustment::SpamTypeNormalized {
                from: spam_type,
                to: consistent_type,
            });
        }

        let action = enforce_action_policy(is_spam, clamped, stated_action);
        match stated_action {
            Some(stated) if stated != action => adjustments.push(Adjustment::ActionCoerced {
                from: stated,
                to: action,
            }),
            None => adjustments.push(Adjustment::ActionDefaulted(action)),
            _ => {}
        }

        let mut reasoning = reasoning.into().trim().to_string();
        if reasoning.is_empty() {
            adjustments.push(Adjustment::MissingField("reasoning"));
            reasoning = "No reasoning provided by classifier".to_string();
        }

        let verdict = Self {
            email_id: email_id.into(),
            is_spam,
            confidence: clamped,
            spam_type: consistent_type,
            reasoning,
            recommended_action: action,
            origin: VerdictOrigin::Model,
        };

        (verdict, adjustments)
    }

    /// Safe default substituted when a record's classification failed
    pub fn sentinel(email_id: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let reasoning = if diagnostic.trim().is_empty() {
            "Classification failed; manual review required".to_string()
        } else {
            format!("Classification failed; manual review required: {}", diagnostic)
        };

        Self {
            email_id: email_id.into(),
            is_spam: false,
            confidence: 0.0,
            spam_type: SpamType::Other,
            reasoning,
            recommended_action: RecommendedAction::Review,
            origin: VerdictOrigin::Sentinel,
        }
    }

    pub fn email_id(&self) -> &str {
        &self.email_id
    }

    pub fn is_spam(&self) -> bool {
        self.is_spam
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn spam_type(&self) -> SpamType {
        self.spam_type
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        self.recommended_action
    }

    pub fn origin(&self) -> VerdictOrigin {
        self.origin
    }

    pub fn is_sentinel(&self) -> bool {
        self.origin == VerdictOrigin::Sentinel
    }
}

/// A record paired with its verdict, as it appears in a report
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEmail {
    pub record: EmailRecord,
    pub verdict: ClassificationVerdict,
}

/// Clamp a confidence into [0, 1]; NaN becomes 0
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Spam type consistent with `is_spam`, trusting `is_spam`
pub fn consistent_spam_type(is_spam: bool, spam_type: SpamType) -> SpamType {
    match (is_spam, spam_type) {
        (false, _) => SpamType::Legitimate,
        (true, SpamType::Legitimate) => SpamType::Other,
        (true, other) => other,
    }
}

/// Actions permitted for a given judgment, first entry is the default
pub fn allowed_actions(is_spam: bool, confidence: f32) -> &'static [RecommendedAction] {
    use RecommendedAction::*;

    match (is_spam, confidence) {
        (true, c) if c >= HIGH_CONFIDENCE => &[Delete, MarkSpam],
        (true, c) if c >= LOW_CONFIDENCE => &[Review, MarkSpam],
        (true, _) => &[Review],
        (false, c) if c >= LOW_CONFIDENCE => &[Keep],
        (false, _) => &[Review, Keep],
    }
}

/// Resolve the recommended action for a judgment
///
/// A stated action inside the allowed set is kept. Anything else is moved to
/// the nearest allowed action: towards `mark_spam` for confident spam, towards
/// `review` otherwise. A missing action takes the band's default.
pub fn enforce_action_policy(
    is_spam: bool,
    confidence: f32,
    stated: Option<RecommendedAction>,
) -> RecommendedAction {
    use RecommendedAction::*;

    let allowed = allowed_actions(is_spam, confidence);
    let stated = match stated {
        Some(action) if allowed.contains(&action) => return action,
        Some(action) => action,
        None => return allowed[0],
    };

    match stated {
        _ if allowed.contains(&MarkSpam) && !allowed.contains(&Review) => MarkSpam,
        Delete if allowed.contains(&MarkSpam) => MarkSpam,
        _ if allowed.contains(&Review) => Review,
        _ => allowed[0],
    }
}
