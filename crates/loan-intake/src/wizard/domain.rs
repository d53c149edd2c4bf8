use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::collaborators::UserProfile;
use super::registry::SubEntityRegistry;

/// One loan product flow. Each type owns its own application record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    MortgageCalculation,
    MortgageRefinance,
    CreditCalculation,
    CreditRefinance,
}

impl ApplicationType {
    pub const ALL: [ApplicationType; 4] = [
        ApplicationType::MortgageCalculation,
        ApplicationType::MortgageRefinance,
        ApplicationType::CreditCalculation,
        ApplicationType::CreditRefinance,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ApplicationType::MortgageCalculation => "mortgage_calculation",
            ApplicationType::MortgageRefinance => "mortgage_refinance",
            ApplicationType::CreditCalculation => "credit_calculation",
            ApplicationType::CreditRefinance => "credit_refinance",
        }
    }

    pub fn is_refinance(&self) -> bool {
        matches!(
            self,
            ApplicationType::MortgageRefinance | ApplicationType::CreditRefinance
        )
    }
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application type '{0}'")]
pub struct UnknownApplicationType(pub String);

impl FromStr for ApplicationType {
    type Err = UnknownApplicationType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ApplicationType::ALL
            .into_iter()
            .find(|candidate| candidate.label() == normalized)
            .ok_or_else(|| UnknownApplicationType(value.to_string()))
    }
}

/// A single answer. Untagged so the JSON shape matches what forms submit.
///
/// Dates are kept as ISO `YYYY-MM-DD` text so every JSON shape maps back to
/// exactly one variant; `as_date` parses on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerValue::Text(value.into())
    }

    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        AnswerValue::List(values.into_iter().map(Into::into).collect())
    }

    /// Numeric view. Text is accepted with thousands separators stripped.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(value) => Some(*value),
            AnswerValue::Text(raw) => {
                let cleaned: String = raw
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != ',')
                    .collect();
                cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            AnswerValue::Text(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AnswerValue::Flag(value) => Some(*value),
            AnswerValue::Number(value) if *value == 1.0 => Some(true),
            AnswerValue::Number(value) if *value == 0.0 => Some(false),
            AnswerValue::Text(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Some(true),
                "no" | "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AnswerValue::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// Blank text and empty lists count as "not answered".
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(value) => value.trim().is_empty(),
            AnswerValue::List(values) => values.iter().all(|value| value.trim().is_empty()),
            AnswerValue::Number(value) => value.is_nan(),
            AnswerValue::Flag(_) => false,
        }
    }

    /// Canonical string form used when matching against choice tables.
    pub fn as_token(&self) -> Option<String> {
        match self {
            AnswerValue::Text(value) => Some(value.trim().to_ascii_lowercase()),
            AnswerValue::Number(value) if value.fract() == 0.0 => {
                Some(format!("{}", *value as i64))
            }
            AnswerValue::Number(value) => Some(value.to_string()),
            AnswerValue::Flag(value) => Some(if *value { "yes" } else { "no" }.to_string()),
            AnswerValue::List(_) => None,
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Number(value as f64)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Flag(value)
    }
}

impl From<NaiveDate> for AnswerValue {
    fn from(value: NaiveDate) -> Self {
        AnswerValue::Text(value.format("%Y-%m-%d").to_string())
    }
}

/// Field name to value mapping shared by steps and sub-entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(BTreeMap<String, AnswerValue>);

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&AnswerValue> {
        self.0.get(field)
    }

    /// Present means set and not blank.
    pub fn present(&self, field: &str) -> Option<&AnswerValue> {
        self.0.get(field).filter(|value| !value.is_blank())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<AnswerValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<AnswerValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<AnswerValue> {
        self.0.remove(field)
    }

    /// Overlay `other` onto `self`; the incoming value wins per field.
    pub fn merge(&mut self, other: &Answers) {
        for (field, value) in &other.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn merged(&self, other: &Answers) -> Answers {
        let mut candidate = self.clone();
        candidate.merge(other);
        candidate
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.present(field).and_then(AnswerValue::as_number)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.present(field).and_then(AnswerValue::as_text)
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.present(field).and_then(AnswerValue::as_date)
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.present(field).and_then(AnswerValue::as_flag)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnswerValue)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the named fields.
    pub fn retain_fields<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Answers {
        let mut kept = Answers::new();
        for field in fields {
            if let Some(value) = self.0.get(field) {
                kept.0.insert(field.to_string(), value.clone());
            }
        }
        kept
    }
}

impl FromIterator<(String, AnswerValue)> for Answers {
    fn from_iter<T: IntoIterator<Item = (String, AnswerValue)>>(iter: T) -> Self {
        Answers(iter.into_iter().collect())
    }
}

/// Addresses one step's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub application_type: ApplicationType,
    pub step: u8,
}

impl StepKey {
    pub fn new(application_type: ApplicationType, step: u8) -> Self {
        Self {
            application_type,
            step,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/step-{}", self.application_type, self.step)
    }
}

/// Where an accepted submit leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    Step {
        step: u8,
    },
    Service {
        application_type: ApplicationType,
        step: u8,
    },
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WizardState {
    InProgress,
    AwaitingAuthentication { pending: Destination },
    Submitted,
}

impl WizardState {
    pub fn label(&self) -> &'static str {
        match self {
            WizardState::InProgress => "in_progress",
            WizardState::AwaitingAuthentication { .. } => "awaiting_authentication",
            WizardState::Submitted => "submitted",
        }
    }
}

/// The aggregate record for one wizard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub application_type: ApplicationType,
    pub current_step: u8,
    pub state: WizardState,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub sub_entities: SubEntityRegistry,
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub profile: Option<UserProfile>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(application_type: ApplicationType) -> Self {
        Self {
            application_type,
            current_step: 1,
            state: WizardState::InProgress,
            answers: Answers::new(),
            sub_entities: SubEntityRegistry::default(),
            is_logged_in: false,
            profile: None,
            updated_at: Utc::now(),
        }
    }

    pub fn step_key(&self) -> StepKey {
        StepKey::new(self.application_type, self.current_step)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
