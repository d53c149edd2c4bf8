//! Normalization of "none / not applicable" answer spellings.
//!
//! Option catalogs have emitted the same choice as numeric codes (`6`),
//! legacy option codes (`option_6`), canonical strings (`unemployed`) and
//! full content keys (`mortgage_step3_main_source_unemployed`). Every
//! spelling in the tables below is treated as live.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::domain::{AnswerValue, ApplicationType};

/// Canonical income source categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeSourceKind {
    Employee,
    SelfEmployed,
    Pension,
    Student,
    Unemployed,
    UnpaidLeave,
    Other,
}

/// Which "none" marker a field may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelKind {
    NoIncome,
    NoAdditionalIncome,
    NoObligations,
}

const INCOME_SOURCE_CODES: &[(&str, IncomeSourceKind)] = &[
    ("1", IncomeSourceKind::Employee),
    ("2", IncomeSourceKind::SelfEmployed),
    ("3", IncomeSourceKind::SelfEmployed),
    ("4", IncomeSourceKind::Pension),
    ("5", IncomeSourceKind::Student),
    ("6", IncomeSourceKind::Unemployed),
    ("7", IncomeSourceKind::Other),
    ("option_1", IncomeSourceKind::Employee),
    ("option_2", IncomeSourceKind::SelfEmployed),
    ("option_3", IncomeSourceKind::SelfEmployed),
    ("option_4", IncomeSourceKind::Pension),
    ("option_5", IncomeSourceKind::Student),
    ("option_6", IncomeSourceKind::Unemployed),
    ("option_7", IncomeSourceKind::Other),
    ("employee", IncomeSourceKind::Employee),
    ("hired", IncomeSourceKind::Employee),
    ("selfemployed", IncomeSourceKind::SelfEmployed),
    ("self_employed", IncomeSourceKind::SelfEmployed),
    ("business", IncomeSourceKind::SelfEmployed),
    ("pension", IncomeSourceKind::Pension),
    ("pensioner", IncomeSourceKind::Pension),
    ("student", IncomeSourceKind::Student),
    ("unemployed", IncomeSourceKind::Unemployed),
    ("unpaid_leave", IncomeSourceKind::UnpaidLeave),
    ("other", IncomeSourceKind::Other),
];

// Checked in order: "selfemployed" contains "employed", "unemployed" must win
// over "employee" style matches.
const INCOME_SOURCE_SUFFIXES: &[(&str, IncomeSourceKind)] = &[
    ("unemployed", IncomeSourceKind::Unemployed),
    ("selfemployed", IncomeSourceKind::SelfEmployed),
    ("self_employed", IncomeSourceKind::SelfEmployed),
    ("self-employed", IncomeSourceKind::SelfEmployed),
    ("employee", IncomeSourceKind::Employee),
    ("pension", IncomeSourceKind::Pension),
    ("student", IncomeSourceKind::Student),
    ("unpaid_leave", IncomeSourceKind::UnpaidLeave),
    ("unpaid", IncomeSourceKind::UnpaidLeave),
    ("leave", IncomeSourceKind::UnpaidLeave),
    ("other", IncomeSourceKind::Other),
];

const NO_ADDITIONAL_INCOME: &[&str] = &["option_1", "no_additional_income", "none"];
const NO_OBLIGATIONS: &[&str] = &["1", "option_1", "no_obligations", "none"];

/// Map any known spelling of an income source to its canonical kind.
pub fn normalize_income_source(raw: &AnswerValue) -> Option<IncomeSourceKind> {
    let token = match raw {
        AnswerValue::List(values) if values.len() == 1 => values[0].trim().to_ascii_lowercase(),
        other => other.as_token()?,
    };
    if token.is_empty() {
        return None;
    }

    if let Some((_, kind)) = INCOME_SOURCE_CODES
        .iter()
        .find(|(code, _)| *code == token.as_str())
    {
        return Some(*kind);
    }

    INCOME_SOURCE_SUFFIXES
        .iter()
        .find(|(needle, _)| token.contains(needle))
        .map(|(_, kind)| *kind)
}

/// True when `raw` is a "none" marker of the given kind.
///
/// A list only counts when its single entry is the marker.
pub fn is_none_sentinel(kind: SentinelKind, raw: &AnswerValue) -> bool {
    let token = match raw {
        AnswerValue::List(values) if values.len() == 1 => values[0].trim().to_ascii_lowercase(),
        AnswerValue::List(_) => return false,
        other => match other.as_token() {
            Some(token) => token,
            None => return false,
        },
    };

    match kind {
        SentinelKind::NoIncome => matches!(
            normalize_income_source(&AnswerValue::Text(token)),
            Some(IncomeSourceKind::Unemployed)
        ),
        SentinelKind::NoAdditionalIncome => {
            NO_ADDITIONAL_INCOME.contains(&token.as_str())
                || token.ends_with("no_additional_income")
        }
        SentinelKind::NoObligations => {
            NO_OBLIGATIONS.contains(&token.as_str()) || token.ends_with("no_obligations")
        }
    }
}

/// True when a list answer mixes a "none" marker with other selections.
pub fn mixes_sentinel(kind: SentinelKind, raw: &AnswerValue) -> bool {
    match raw {
        AnswerValue::List(values) if values.len() > 1 => values
            .iter()
            .any(|value| is_none_sentinel(kind, &AnswerValue::Text(value.clone()))),
        _ => false,
    }
}

/// Income source kinds that waive employment details for one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelPolicy {
    exempt: BTreeSet<IncomeSourceKind>,
}

impl SentinelPolicy {
    pub fn new(exempt: impl IntoIterator<Item = IncomeSourceKind>) -> Self {
        Self {
            exempt: exempt.into_iter().collect(),
        }
    }

    pub fn for_application(application_type: ApplicationType) -> Self {
        let mut exempt = vec![IncomeSourceKind::Unemployed, IncomeSourceKind::Student];
        if application_type.is_refinance() {
            exempt.push(IncomeSourceKind::UnpaidLeave);
            exempt.push(IncomeSourceKind::Other);
        }
        Self::new(exempt)
    }

    pub fn exempt_kinds(&self) -> impl Iterator<Item = IncomeSourceKind> + '_ {
        self.exempt.iter().copied()
    }

    pub fn is_exempt(&self, raw: &AnswerValue) -> bool {
        normalize_income_source(raw)
            .map(|kind| self.exempt.contains(&kind))
            .unwrap_or(false)
    }
}
