//! Invariants spanning several fields or a whole sub-entity collection.

use serde::{Deserialize, Serialize};

use super::domain::{Answers, Application, ApplicationType};
use super::registry::{LocalId, SubEntityKind};
use super::rules::{
    financing_ceiling, ERROR_BALANCE, ERROR_DATE_ORDER, ERROR_NONE_EXCLUSIVE, WARNING_HIGH_LTV,
};
use super::sentinel::{is_none_sentinel, mixes_sentinel, SentinelKind};

const SUM_TOLERANCE: f64 = 0.005;

/// A numeric operand read from the top-level answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    Field(&'static str),
    Difference {
        minuend: &'static str,
        subtrahend: &'static str,
    },
}

impl Quantity {
    fn resolve(&self, answers: &Answers) -> Option<f64> {
        match self {
            Quantity::Field(field) => answers.number(field),
            Quantity::Difference {
                minuend,
                subtrahend,
            } => Some(answers.number(minuend)? - answers.number(subtrahend).unwrap_or(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ceiling {
    Fixed(f64),
    /// Looked up from the financing ceiling table by the named choice.
    ByChoice { field: &'static str },
}

impl Ceiling {
    fn resolve(&self, answers: &Answers) -> f64 {
        match self {
            Ceiling::Fixed(value) => *value,
            Ceiling::ByChoice { field } => {
                let token = answers.present(field).and_then(|value| value.as_token());
                financing_ceiling(token.as_deref())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateScope {
    Answers,
    Collection(SubEntityKind),
}

/// Cross-entity invariant, tagged with the step that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum Invariant {
    SumConsistency {
        rule_id: &'static str,
        step: u8,
        parent_field: &'static str,
        collection: SubEntityKind,
        item_field: &'static str,
    },
    TemporalOrdering {
        rule_id: &'static str,
        step: u8,
        scope: DateScope,
        start: &'static str,
        end: &'static str,
    },
    /// Non-blocking: exceeding the ceiling yields a warning.
    RangeBound {
        rule_id: &'static str,
        step: u8,
        numerator: Quantity,
        denominator: &'static str,
        ceiling: Ceiling,
    },
    SentinelExclusivity {
        rule_id: &'static str,
        step: u8,
        field: &'static str,
        kind: SentinelKind,
        collection: Option<SubEntityKind>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub step: u8,
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub rule_id: String,
    pub step: u8,
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
}

impl ReconciliationResult {
    pub fn violations_for_step(&self, step: u8) -> Vec<Violation> {
        self.violations
            .iter()
            .filter(|violation| violation.step == step)
            .cloned()
            .collect()
    }

    pub fn has_rule(&self, rule_id: &str) -> bool {
        self.violations.iter().any(|violation| violation.rule_id == rule_id)
            || self.warnings.iter().any(|warning| warning.rule_id == rule_id)
    }
}

pub fn invariants_for(application_type: ApplicationType) -> Vec<Invariant> {
    let mut invariants = match application_type {
        ApplicationType::MortgageCalculation => vec![Invariant::RangeBound {
            rule_id: "loan_to_value",
            step: 1,
            numerator: Quantity::Difference {
                minuend: "price_of_estate",
                subtrahend: "initial_fee",
            },
            denominator: "price_of_estate",
            ceiling: Ceiling::ByChoice {
                field: "property_ownership",
            },
        }],
        ApplicationType::MortgageRefinance => vec![
            Invariant::SumConsistency {
                rule_id: "mortgage_balance_sum",
                step: 1,
                parent_field: "mortgage_balance",
                collection: SubEntityKind::ExistingMortgage,
                item_field: "balance",
            },
            Invariant::RangeBound {
                rule_id: "loan_to_value",
                step: 1,
                numerator: Quantity::Field("mortgage_balance"),
                denominator: "price_of_estate",
                ceiling: Ceiling::Fixed(0.75),
            },
        ],
        ApplicationType::CreditCalculation => vec![Invariant::RangeBound {
            rule_id: "loan_to_value",
            step: 1,
            numerator: Quantity::Field("loan_amount"),
            denominator: "price_of_estate",
            ceiling: Ceiling::Fixed(0.75),
        }],
        ApplicationType::CreditRefinance => vec![Invariant::TemporalOrdering {
            rule_id: "existing_credit_dates",
            step: 1,
            scope: DateScope::Collection(SubEntityKind::ExistingCredit),
            start: "start_date",
            end: "end_date",
        }],
    };

    invariants.extend([
        Invariant::TemporalOrdering {
            rule_id: "income_source_dates",
            step: 3,
            scope: DateScope::Collection(SubEntityKind::IncomeSource),
            start: "employment_start_date",
            end: "end_date",
        },
        Invariant::SentinelExclusivity {
            rule_id: "obligations_exclusive",
            step: 3,
            field: "obligation",
            kind: SentinelKind::NoObligations,
            collection: Some(SubEntityKind::Obligation),
        },
        Invariant::SentinelExclusivity {
            rule_id: "additional_income_exclusive",
            step: 3,
            field: "additional_income",
            kind: SentinelKind::NoAdditionalIncome,
            collection: Some(SubEntityKind::AdditionalIncome),
        },
    ]);
    invariants
}

pub fn reconcile(application: &Application) -> ReconciliationResult {
    reconcile_with(application, &invariants_for(application.application_type))
}

pub fn reconcile_with(application: &Application, invariants: &[Invariant]) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();
    for invariant in invariants {
        check(application, invariant, &mut result);
    }
    result.valid = result.violations.is_empty();
    result
}

fn check(application: &Application, invariant: &Invariant, result: &mut ReconciliationResult) {
    let answers = &application.answers;
    let registry = &application.sub_entities;

    match invariant {
        Invariant::SumConsistency {
            rule_id,
            step,
            parent_field,
            collection,
            item_field,
        } => {
            let Some(expected) = answers.number(parent_field) else {
                return;
            };
            let items = registry.list(*collection);
            if items.is_empty() {
                return;
            }
            let total: f64 = items
                .iter()
                .map(|entity| entity.fields.number(item_field).unwrap_or(0.0))
                .sum();
            if (total - expected).abs() > SUM_TOLERANCE {
                result.violations.push(Violation {
                    rule_id: rule_id.to_string(),
                    step: *step,
                    error_code: ERROR_BALANCE.to_string(),
                    message: format!(
                        "sum of {collection}.{item_field} ({total}) \
                         must equal {parent_field} ({expected})"
                    ),
                    local_id: None,
                });
            }
        }
        Invariant::TemporalOrdering {
            rule_id,
            step,
            scope,
            start,
            end,
        } => {
            let violation = |local_id: Option<LocalId>| Violation {
                rule_id: rule_id.to_string(),
                step: *step,
                error_code: ERROR_DATE_ORDER.to_string(),
                message: format!("{end} must be after {start}"),
                local_id,
            };
            match scope {
                DateScope::Answers => {
                    if out_of_order(answers, start, end) {
                        result.violations.push(violation(None));
                    }
                }
                DateScope::Collection(kind) => {
                    for entity in registry.list(*kind) {
                        if out_of_order(&entity.fields, start, end) {
                            result.violations.push(violation(Some(entity.local_id)));
                        }
                    }
                }
            }
        }
        Invariant::RangeBound {
            rule_id,
            step,
            numerator,
            denominator,
            ceiling,
        } => {
            let (Some(numerator), Some(denominator)) =
                (numerator.resolve(answers), answers.number(denominator))
            else {
                return;
            };
            if denominator <= 0.0 {
                return;
            }
            let ratio = numerator / denominator;
            let ceiling = ceiling.resolve(answers);
            if ratio > ceiling {
                result.warnings.push(Warning {
                    rule_id: rule_id.to_string(),
                    step: *step,
                    error_code: WARNING_HIGH_LTV.to_string(),
                    message: format!(
                        "financing ratio {:.0}% exceeds the {:.0}% ceiling",
                        ratio * 100.0,
                        ceiling * 100.0
                    ),
                });
            }
        }
        Invariant::SentinelExclusivity {
            rule_id,
            step,
            field,
            kind,
            collection,
        } => {
            let Some(value) = answers.present(field) else {
                return;
            };
            let conflicting_items = collection
                .map(|collection| is_none_sentinel(*kind, value) && !registry.is_empty(collection))
                .unwrap_or(false);
            if mixes_sentinel(*kind, value) || conflicting_items {
                result.violations.push(Violation {
                    rule_id: rule_id.to_string(),
                    step: *step,
                    error_code: ERROR_NONE_EXCLUSIVE.to_string(),
                    message: format!("{field} cannot combine \"none\" with other entries"),
                    local_id: None,
                });
            }
        }
    }
}

fn out_of_order(fields: &Answers, start: &str, end: &str) -> bool {
    match (fields.date(start), fields.date(end)) {
        (Some(start), Some(end)) => end <= start,
        _ => false,
    }
}
