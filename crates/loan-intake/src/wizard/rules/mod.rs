//! Dynamic validation rules.
//!
//! Each step declares a [`StepTable`]: static field declarations plus a list
//! of tagged [`ConditionalRule`]s. [`generate_ruleset`] interprets the table
//! against the current answers; nothing here performs I/O or mutates input.

mod tables;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::domain::{AnswerValue, Answers, ApplicationType, StepKey};
use super::registry::SubEntityKind;
use super::sentinel::{is_none_sentinel, SentinelKind, SentinelPolicy};

pub use tables::{financing_ceiling, step_count, FINANCING_CEILINGS, RENOVATION_PURPOSES};

#[cfg(test)]
pub(crate) use tables::all_tables;

pub const ERROR_FILL_FIELD: &str = "error_fill_field";
pub const ERROR_SELECT_ANSWER: &str = "error_select_answer";
pub const ERROR_MIN_VALUE: &str = "error_min_value";
pub const ERROR_MAX_VALUE: &str = "error_max_value";
pub const ERROR_INVALID_FORMAT: &str = "error_invalid_format";
pub const ERROR_BALANCE: &str = "error_balance";
pub const ERROR_DATE_ORDER: &str = "error_date_order";
pub const ERROR_NONE_EXCLUSIVE: &str = "error_none_exclusive";
pub const WARNING_HIGH_LTV: &str = "warning_high_ltv";

/// Shape a field's value must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    Text,
    Date,
    Choice,
    Flag,
    List,
}

/// A resolved rule for one field, ready for display and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub kind: ValueKind,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub depends_on: Vec<String>,
    pub error_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub rules: Vec<FieldRule>,
}

impl Ruleset {
    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|rule| rule.field == field)
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.rule(field).map(|rule| rule.required).unwrap_or(false)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|rule| rule.required)
            .map(|rule| rule.field.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A numeric limit, either literal or derived from another answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Fixed(f64),
    Scaled {
        field: &'static str,
        factor: f64,
    },
    /// `field * table[choice]`, falling back to `default` for unknown or
    /// missing choices.
    ScaledByChoice {
        field: &'static str,
        choice: &'static str,
        table: &'static [(&'static str, f64)],
        default: f64,
    },
}

impl Bound {
    fn resolve(&self, answers: &Answers) -> Option<f64> {
        match self {
            Bound::Fixed(value) => Some(*value),
            Bound::Scaled { field, factor } => answers.number(field).map(|base| base * factor),
            Bound::ScaledByChoice {
                field,
                choice,
                table,
                default,
            } => {
                let base = answers.number(field)?;
                let factor = answers
                    .present(choice)
                    .and_then(AnswerValue::as_token)
                    .and_then(|token| {
                        table
                            .iter()
                            .find(|(key, _)| *key == token.as_str())
                            .map(|(_, factor)| *factor)
                    })
                    .unwrap_or(*default);
                Some(base * factor)
            }
        }
    }

    fn sources(&self) -> Vec<&'static str> {
        match self {
            Bound::Fixed(_) => Vec::new(),
            Bound::Scaled { field, .. } => vec![*field],
            Bound::ScaledByChoice { field, choice, .. } => vec![*field, *choice],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub required: bool,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
}

impl Constraint {
    pub const fn required() -> Self {
        Self {
            required: true,
            min: None,
            max: None,
        }
    }

    pub const fn optional() -> Self {
        Self {
            required: false,
            min: None,
            max: None,
        }
    }

    pub const fn min(mut self, bound: Bound) -> Self {
        self.min = Some(bound);
        self
    }

    pub const fn max(mut self, bound: Bound) -> Self {
        self.max = Some(bound);
        self
    }

    pub const fn range(self, min: f64, max: f64) -> Self {
        self.min(Bound::Fixed(min)).max(Bound::Fixed(max))
    }

    fn resolve(&self, answers: &Answers) -> Resolved {
        Resolved {
            required: self.required,
            min: self.min.and_then(|bound| bound.resolve(answers)),
            max: self.max.and_then(|bound| bound.resolve(answers)),
        }
    }

    fn sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        if let Some(bound) = &self.min {
            sources.extend(bound.sources());
        }
        if let Some(bound) = &self.max {
            sources.extend(bound.sources());
        }
        sources
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolved {
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
}

impl Resolved {
    /// Bounds a branch leaves unset fall back to the static declaration.
    fn over(self, base: Resolved) -> Resolved {
        Resolved {
            required: self.required,
            min: self.min.or(base.min),
            max: self.max.or(base.max),
        }
    }

    /// The weaker of two constraints: required only if both are, and a
    /// bound only if both branches impose one.
    fn least_strict(self, other: Resolved) -> Resolved {
        Resolved {
            required: self.required && other.required,
            min: match (self.min, other.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            },
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }
}

/// Static declaration of a field within a step or sub-entity table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDecl {
    pub field: &'static str,
    pub kind: ValueKind,
    pub constraint: Constraint,
    pub error_code: &'static str,
}

impl FieldDecl {
    pub const fn new(field: &'static str, kind: ValueKind, constraint: Constraint) -> Self {
        let error_code = match kind {
            ValueKind::Choice | ValueKind::Flag | ValueKind::List => ERROR_SELECT_ANSWER,
            _ => ERROR_FILL_FIELD,
        };
        Self {
            field,
            kind,
            constraint,
            error_code,
        }
    }

    pub const fn with_error(mut self, error_code: &'static str) -> Self {
        self.error_code = error_code;
        self
    }
}

/// Predicate over sibling answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals {
        field: &'static str,
        value: &'static str,
    },
    OneOf {
        field: &'static str,
        values: &'static [&'static str],
    },
    IsTrue {
        field: &'static str,
    },
    Present {
        field: &'static str,
    },
    Sentinel {
        field: &'static str,
        kind: SentinelKind,
    },
    NotSentinel {
        field: &'static str,
        kind: SentinelKind,
    },
    /// The income source in `field` belongs to the flow's exemption set.
    Exempt {
        field: &'static str,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Three-valued evaluation; `None` means a source field is unanswered.
    pub fn evaluate(&self, answers: &Answers, policy: &SentinelPolicy) -> Option<bool> {
        match self {
            Condition::Equals { field, value } => {
                let token = answers.present(field)?.as_token()?;
                Some(token == value.to_ascii_lowercase())
            }
            Condition::OneOf { field, values } => {
                let token = answers.present(field)?.as_token()?;
                Some(values.iter().any(|value| token == value.to_ascii_lowercase()))
            }
            Condition::IsTrue { field } => {
                let value = answers.present(field)?;
                Some(value.as_flag().unwrap_or(false))
            }
            Condition::Present { field } => Some(answers.present(field).is_some()),
            Condition::Sentinel { field, kind } => {
                Some(is_none_sentinel(*kind, answers.present(field)?))
            }
            Condition::NotSentinel { field, kind } => {
                Some(!is_none_sentinel(*kind, answers.present(field)?))
            }
            Condition::Exempt { field } => Some(policy.is_exempt(answers.present(field)?)),
            Condition::All(conditions) => {
                let mut unknown = false;
                for condition in conditions {
                    match condition.evaluate(answers, policy) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Condition::Any(conditions) => {
                let mut unknown = false;
                for condition in conditions {
                    match condition.evaluate(answers, policy) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Condition::Not(inner) => inner.evaluate(answers, policy).map(|value| !value),
        }
    }

    pub fn sources(&self) -> Vec<&'static str> {
        match self {
            Condition::Equals { field, .. }
            | Condition::OneOf { field, .. }
            | Condition::IsTrue { field }
            | Condition::Present { field }
            | Condition::Sentinel { field, .. }
            | Condition::NotSentinel { field, .. }
            | Condition::Exempt { field } => vec![*field],
            Condition::All(conditions) | Condition::Any(conditions) => {
                conditions.iter().flat_map(Condition::sources).collect()
            }
            Condition::Not(inner) => inner.sources(),
        }
    }
}

/// "When `when` holds apply `then`, otherwise apply `otherwise`."
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalRule {
    pub field: &'static str,
    pub when: Condition,
    pub then: Constraint,
    pub otherwise: Constraint,
}

impl ConditionalRule {
    pub fn new(
        field: &'static str,
        when: Condition,
        then: Constraint,
        otherwise: Constraint,
    ) -> Self {
        Self {
            field,
            when,
            then,
            otherwise,
        }
    }

    /// Field becomes required when `when` holds and optional otherwise.
    pub fn require_when(field: &'static str, when: Condition) -> Self {
        Self::new(field, when, Constraint::required(), Constraint::optional())
    }

    fn resolve(&self, answers: &Answers, policy: &SentinelPolicy) -> Resolved {
        match self.when.evaluate(answers, policy) {
            Some(true) => self.then.resolve(answers),
            Some(false) => self.otherwise.resolve(answers),
            None => self
                .then
                .resolve(answers)
                .least_strict(self.otherwise.resolve(answers)),
        }
    }
}

/// Declared fields and conditional rules for one step or sub-entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTable {
    pub name: &'static str,
    pub fields: Vec<FieldDecl>,
    pub conditionals: Vec<ConditionalRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepTableError {
    #[error("table '{table}' has a conditional rule for undeclared field '{field}'")]
    UndeclaredTarget {
        table: &'static str,
        field: &'static str,
    },
    #[error("table '{table}' reads undeclared field '{field}'")]
    UndeclaredSource {
        table: &'static str,
        field: &'static str,
    },
    #[error("table '{table}' declares field '{field}' twice")]
    Duplicate {
        table: &'static str,
        field: &'static str,
    },
    #[error("table '{table}' has more than one conditional rule for field '{field}'")]
    ConflictingConditionals {
        table: &'static str,
        field: &'static str,
    },
}

impl StepTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            conditionals: Vec::new(),
        }
    }

    pub fn field(mut self, decl: FieldDecl) -> Self {
        self.fields.push(decl);
        self
    }

    pub fn when(mut self, rule: ConditionalRule) -> Self {
        self.conditionals.push(rule);
        self
    }

    pub fn declares(&self, field: &str) -> bool {
        self.fields.iter().any(|decl| decl.field == field)
    }

    /// Every field a rule targets or reads must be declared in this table,
    /// and a field takes at most one conditional rule.
    pub fn check_declared(&self) -> Result<(), StepTableError> {
        let mut seen = BTreeSet::new();
        for decl in &self.fields {
            if !seen.insert(decl.field) {
                return Err(StepTableError::Duplicate {
                    table: self.name,
                    field: decl.field,
                });
            }
            for source in decl.constraint.sources() {
                if !self.declares(source) {
                    return Err(StepTableError::UndeclaredSource {
                        table: self.name,
                        field: source,
                    });
                }
            }
        }
        let mut targeted = BTreeSet::new();
        for rule in &self.conditionals {
            if !self.declares(rule.field) {
                return Err(StepTableError::UndeclaredTarget {
                    table: self.name,
                    field: rule.field,
                });
            }
            if !targeted.insert(rule.field) {
                return Err(StepTableError::ConflictingConditionals {
                    table: self.name,
                    field: rule.field,
                });
            }
            let sources = rule
                .when
                .sources()
                .into_iter()
                .chain(rule.then.sources())
                .chain(rule.otherwise.sources());
            for source in sources {
                if !self.declares(source) {
                    return Err(StepTableError::UndeclaredSource {
                        table: self.name,
                        field: source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Interpret the table against `answers`.
    pub fn interpret(&self, answers: &Answers, policy: &SentinelPolicy) -> Ruleset {
        debug_assert!(
            self.check_declared().is_ok(),
            "{:?}",
            self.check_declared()
        );

        let rules = self
            .fields
            .iter()
            .map(|decl| {
                let declared = decl.constraint.resolve(answers);
                let mut resolved = declared;
                let mut depends_on: Vec<String> = decl
                    .constraint
                    .sources()
                    .into_iter()
                    .map(str::to_string)
                    .collect();

                for rule in self.conditionals.iter().filter(|rule| rule.field == decl.field) {
                    resolved = rule.resolve(answers, policy).over(declared);
                    depends_on.extend(
                        rule.when
                            .sources()
                            .into_iter()
                            .chain(rule.then.sources())
                            .chain(rule.otherwise.sources())
                            .map(str::to_string),
                    );
                }

                depends_on.sort();
                depends_on.dedup();

                FieldRule {
                    field: decl.field.to_string(),
                    kind: decl.kind,
                    required: resolved.required,
                    min: resolved.min,
                    max: resolved.max,
                    depends_on,
                    error_code: decl.error_code.to_string(),
                }
            })
            .collect();

        Ruleset { rules }
    }
}

/// Build the ruleset for one wizard step from the current answers.
pub fn generate_ruleset(key: StepKey, answers: &Answers) -> Ruleset {
    let policy = SentinelPolicy::for_application(key.application_type);
    match tables::step_table(key) {
        Some(table) => {
            let ruleset = table.interpret(answers, &policy);
            tracing::debug!(step = %key, fields = ruleset.rules.len(), "generated ruleset");
            ruleset
        }
        None => Ruleset::default(),
    }
}

/// Build the ruleset for one sub-entity's modal form.
pub fn generate_sub_entity_ruleset(
    application_type: ApplicationType,
    kind: SubEntityKind,
    fields: &Answers,
) -> Ruleset {
    let policy = SentinelPolicy::for_application(application_type);
    tables::sub_entity_table(kind).interpret(fields, &policy)
}

/// Fields declared by a step, used to seed rerouted flows.
pub fn declared_fields(key: StepKey) -> Vec<&'static str> {
    tables::step_table(key)
        .map(|table| table.fields.iter().map(|decl| decl.field).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Required,
    BelowMin,
    AboveMax,
    InvalidType,
}

/// A blocking, field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub kind: IssueKind,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
}

impl FieldIssue {
    fn new(rule: &FieldRule, kind: IssueKind, limit: Option<f64>) -> Self {
        let error_code = match kind {
            IssueKind::Required => rule.error_code.clone(),
            IssueKind::BelowMin => ERROR_MIN_VALUE.to_string(),
            IssueKind::AboveMax => ERROR_MAX_VALUE.to_string(),
            IssueKind::InvalidType => ERROR_INVALID_FORMAT.to_string(),
        };
        Self {
            field: rule.field.clone(),
            kind,
            error_code,
            limit,
        }
    }
}

/// Check `answers` against every rule, in rule order.
pub fn validate(ruleset: &Ruleset, answers: &Answers) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    for rule in &ruleset.rules {
        let value = match answers.present(&rule.field) {
            Some(value) => value,
            None => {
                if rule.required {
                    issues.push(FieldIssue::new(rule, IssueKind::Required, None));
                }
                continue;
            }
        };

        let measure = match measure(rule.kind, value) {
            Some(measure) => measure,
            None => {
                issues.push(FieldIssue::new(rule, IssueKind::InvalidType, None));
                continue;
            }
        };

        if let (Some(measure), Some(min)) = (measure, rule.min) {
            if measure < min {
                issues.push(FieldIssue::new(rule, IssueKind::BelowMin, Some(min)));
                continue;
            }
        }
        if let (Some(measure), Some(max)) = (measure, rule.max) {
            if measure > max {
                issues.push(FieldIssue::new(rule, IssueKind::AboveMax, Some(max)));
            }
        }
    }
    issues
}

/// `None` for a type mismatch; `Some(None)` when the kind has no measure.
fn measure(kind: ValueKind, value: &AnswerValue) -> Option<Option<f64>> {
    match kind {
        ValueKind::Number => value.as_number().map(Some),
        ValueKind::Text => match value {
            AnswerValue::Text(text) => Some(Some(text.trim().chars().count() as f64)),
            AnswerValue::Number(_) => Some(None),
            _ => None,
        },
        ValueKind::Date => value.as_date().map(|_| None),
        ValueKind::Choice => value.as_token().map(|_| None),
        ValueKind::Flag => value.as_flag().map(|_| None),
        ValueKind::List => match value {
            AnswerValue::List(values) => Some(Some(values.len() as f64)),
            AnswerValue::Text(_) => Some(Some(1.0)),
            _ => None,
        },
    }
}
