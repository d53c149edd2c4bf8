use super::{Bound, Condition, ConditionalRule, Constraint, FieldDecl, StepTable, ValueKind};
use crate::wizard::domain::{ApplicationType, StepKey};
use crate::wizard::registry::SubEntityKind;
use crate::wizard::sentinel::SentinelKind;

const STEP_COUNT: u8 = 4;

/// Maximum loan-to-value ratio per property ownership answer.
pub const FINANCING_CEILINGS: &[(&str, f64)] = &[
    ("no_property", 0.75),
    ("option_1", 0.75),
    ("has_property", 0.5),
    ("option_2", 0.5),
    ("selling_property", 0.7),
    ("option_3", 0.7),
];

pub const DEFAULT_FINANCING_CEILING: f64 = 0.75;

// Minimum own contribution, the complement of the ceiling above.
const DOWN_PAYMENT_SHARES: &[(&str, f64)] = &[
    ("no_property", 0.25),
    ("option_1", 0.25),
    ("has_property", 0.5),
    ("option_2", 0.5),
    ("selling_property", 0.3),
    ("option_3", 0.3),
];

pub const RENOVATION_PURPOSES: &[&str] = &["option_6", "house_renovation", "renovation"];
const PARTNERED_STATUSES: &[&str] = &["married", "commonlaw_partner", "option_2", "option_5"];

pub fn financing_ceiling(ownership: Option<&str>) -> f64 {
    ownership
        .and_then(|token| {
            FINANCING_CEILINGS
                .iter()
                .find(|(key, _)| *key == token)
                .map(|(_, ceiling)| *ceiling)
        })
        .unwrap_or(DEFAULT_FINANCING_CEILING)
}

pub fn step_count(_application_type: ApplicationType) -> u8 {
    STEP_COUNT
}

pub(crate) fn step_table(key: StepKey) -> Option<StepTable> {
    use ApplicationType::*;
    match (key.application_type, key.step) {
        (MortgageCalculation, 1) => Some(mortgage_calculation_parameters()),
        (MortgageRefinance, 1) => Some(mortgage_refinance_parameters()),
        (CreditCalculation, 1) => Some(credit_calculation_parameters()),
        (CreditRefinance, 1) => Some(credit_refinance_parameters()),
        (_, 2) => Some(personal_data()),
        (_, 3) => Some(income()),
        (_, 4) => Some(offers()),
        _ => None,
    }
}

pub(crate) fn sub_entity_table(kind: SubEntityKind) -> StepTable {
    match kind {
        SubEntityKind::IncomeSource => income_source(),
        SubEntityKind::AdditionalIncome => additional_income(),
        SubEntityKind::Obligation => obligation(),
        SubEntityKind::CoBorrower => co_borrower(),
        SubEntityKind::ExistingMortgage => existing_mortgage(),
        SubEntityKind::ExistingCredit => existing_credit(),
    }
}

fn required(field: &'static str, kind: ValueKind) -> FieldDecl {
    FieldDecl::new(field, kind, Constraint::required())
}

fn optional(field: &'static str, kind: ValueKind) -> FieldDecl {
    FieldDecl::new(field, kind, Constraint::optional())
}

fn mortgage_calculation_parameters() -> StepTable {
    StepTable::new("mortgage_calculation/parameters")
        .field(FieldDecl::new(
            "price_of_estate",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
        .field(required("city_where_you_buy", ValueKind::Choice))
        .field(required("when_do_you_need_money", ValueKind::Choice))
        .field(
            required("property_ownership", ValueKind::Choice)
                .with_error("error_property_ownership_required"),
        )
        .field(FieldDecl::new(
            "initial_fee",
            ValueKind::Number,
            Constraint::required()
                .min(Bound::ScaledByChoice {
                    field: "price_of_estate",
                    choice: "property_ownership",
                    table: DOWN_PAYMENT_SHARES,
                    default: 0.25,
                })
                .max(Bound::Scaled {
                    field: "price_of_estate",
                    factor: 1.0,
                }),
        ))
        .field(required("type_select", ValueKind::Choice))
        .field(required("will_be_your_first", ValueKind::Choice))
        .field(FieldDecl::new(
            "period",
            ValueKind::Number,
            Constraint::required().range(4.0, 30.0),
        ))
        .field(FieldDecl::new(
            "monthly_payment",
            ValueKind::Number,
            Constraint::optional().min(Bound::Fixed(0.0)),
        ))
}

fn mortgage_refinance_parameters() -> StepTable {
    StepTable::new("mortgage_refinance/parameters")
        .field(required("why_refinancing", ValueKind::Choice))
        .field(FieldDecl::new(
            "mortgage_balance",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
        .field(FieldDecl::new(
            "price_of_estate",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
        .field(required("type_select", ValueKind::Choice))
        .field(required("bank", ValueKind::Choice))
        .field(required("property_registered", ValueKind::Choice))
        .field(required("start_date", ValueKind::Date))
        .field(FieldDecl::new(
            "period",
            ValueKind::Number,
            Constraint::required().range(4.0, 30.0),
        ))
        .field(FieldDecl::new(
            "monthly_payment",
            ValueKind::Number,
            Constraint::optional().min(Bound::Fixed(0.0)),
        ))
}

fn credit_calculation_parameters() -> StepTable {
    let renovation = || Condition::OneOf {
        field: "purpose_of_loan",
        values: RENOVATION_PURPOSES,
    };

    StepTable::new("credit_calculation/parameters")
        .field(required("purpose_of_loan", ValueKind::Choice))
        .field(FieldDecl::new(
            "loan_amount",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
        .field(required("when_do_you_need_money", ValueKind::Choice))
        .field(required("loan_deferral", ValueKind::Choice))
        .field(optional("price_of_estate", ValueKind::Number))
        .field(optional("city_where_you_buy", ValueKind::Choice))
        .field(optional("have_mortgage", ValueKind::Flag))
        .field(FieldDecl::new(
            "period",
            ValueKind::Number,
            Constraint::required().range(1.0, 30.0),
        ))
        .field(FieldDecl::new(
            "monthly_payment",
            ValueKind::Number,
            Constraint::optional().min(Bound::Fixed(0.0)),
        ))
        .when(ConditionalRule::new(
            "price_of_estate",
            renovation(),
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::require_when(
            "city_where_you_buy",
            renovation(),
        ))
        .when(ConditionalRule::require_when("have_mortgage", renovation()))
}

fn credit_refinance_parameters() -> StepTable {
    StepTable::new("credit_refinance/parameters")
        .field(required("refinancing_credit_goal", ValueKind::Choice))
        .field(FieldDecl::new(
            "period",
            ValueKind::Number,
            Constraint::required().range(1.0, 30.0),
        ))
        .field(FieldDecl::new(
            "monthly_payment",
            ValueKind::Number,
            Constraint::optional().min(Bound::Fixed(0.0)),
        ))
}

fn personal_data() -> StepTable {
    StepTable::new("personal_data")
        .field(FieldDecl::new(
            "name_surname",
            ValueKind::Text,
            Constraint::required().range(2.0, 100.0),
        ))
        .field(required("birthday", ValueKind::Date))
        .field(required("education", ValueKind::Choice))
        .field(required("additional_citizenships", ValueKind::Flag))
        .field(optional("citizenships", ValueKind::List))
        .field(required("taxes", ValueKind::Flag))
        .field(optional("tax_countries", ValueKind::List))
        .field(required("children_under_18", ValueKind::Flag))
        .field(optional("children_count", ValueKind::Number))
        .field(required("medical_insurance", ValueKind::Flag))
        .field(required("is_foreigner", ValueKind::Flag))
        .field(required("public_person", ValueKind::Flag))
        .field(FieldDecl::new(
            "borrowers",
            ValueKind::Number,
            Constraint::required().range(1.0, 4.0),
        ))
        .field(required("family_status", ValueKind::Choice))
        .field(optional("partner_pays_mortgage", ValueKind::Flag))
        .when(ConditionalRule::new(
            "citizenships",
            Condition::IsTrue {
                field: "additional_citizenships",
            },
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::new(
            "tax_countries",
            Condition::IsTrue { field: "taxes" },
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::new(
            "children_count",
            Condition::IsTrue {
                field: "children_under_18",
            },
            Constraint::required().range(1.0, 20.0),
            Constraint::optional(),
        ))
        .when(ConditionalRule::require_when(
            "partner_pays_mortgage",
            Condition::OneOf {
                field: "family_status",
                values: PARTNERED_STATUSES,
            },
        ))
}

/// Employment detail fields waived for exempt income sources.
const EMPLOYMENT_FIELDS: &[(&str, ValueKind)] = &[
    ("monthly_income", ValueKind::Number),
    ("employment_start_date", ValueKind::Date),
    ("field_of_activity", ValueKind::Choice),
    ("profession", ValueKind::Text),
    ("company_name", ValueKind::Text),
];

fn with_employment_fields(mut table: StepTable, source_field: &'static str) -> StepTable {
    for &(field, kind) in EMPLOYMENT_FIELDS {
        let then = Constraint::optional();
        let otherwise = match kind {
            ValueKind::Number => Constraint::required().min(Bound::Fixed(1.0)),
            _ => Constraint::required(),
        };
        table = table
            .field(optional(field, kind))
            .when(ConditionalRule::new(
                field,
                Condition::Exempt {
                    field: source_field,
                },
                then,
                otherwise,
            ));
    }
    table
}

fn income() -> StepTable {
    let table =
        StepTable::new("income").field(required("main_source_of_income", ValueKind::Choice));
    let has_obligations = || Condition::NotSentinel {
        field: "obligation",
        kind: SentinelKind::NoObligations,
    };

    with_employment_fields(table, "main_source_of_income")
        .field(required("additional_income", ValueKind::Choice))
        .field(optional("additional_income_amount", ValueKind::Number))
        .field(required("obligation", ValueKind::Choice))
        .field(optional("obligation_bank", ValueKind::Choice))
        .field(optional("monthly_payment_for_another_bank", ValueKind::Number))
        .field(optional("obligation_end_date", ValueKind::Date))
        .when(ConditionalRule::new(
            "additional_income_amount",
            Condition::NotSentinel {
                field: "additional_income",
                kind: SentinelKind::NoAdditionalIncome,
            },
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::require_when(
            "obligation_bank",
            has_obligations(),
        ))
        .when(ConditionalRule::new(
            "monthly_payment_for_another_bank",
            has_obligations(),
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::require_when(
            "obligation_end_date",
            has_obligations(),
        ))
}

fn offers() -> StepTable {
    StepTable::new("offers")
        .field(required("selected_bank", ValueKind::Choice))
        .field(optional("selected_program", ValueKind::Choice))
}

fn income_source() -> StepTable {
    let table = StepTable::new("income_sources").field(required("source_type", ValueKind::Choice));
    with_employment_fields(table, "source_type").field(optional("end_date", ValueKind::Date))
}

fn additional_income() -> StepTable {
    StepTable::new("additional_incomes")
        .field(required("income_type", ValueKind::Choice))
        .field(optional("amount", ValueKind::Number))
        .when(ConditionalRule::new(
            "amount",
            Condition::NotSentinel {
                field: "income_type",
                kind: SentinelKind::NoAdditionalIncome,
            },
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
}

fn obligation() -> StepTable {
    let active = || Condition::NotSentinel {
        field: "obligation_type",
        kind: SentinelKind::NoObligations,
    };

    StepTable::new("obligations")
        .field(required("obligation_type", ValueKind::Choice))
        .field(optional("bank", ValueKind::Choice))
        .field(optional("monthly_payment", ValueKind::Number))
        .field(optional("end_date", ValueKind::Date))
        .when(ConditionalRule::require_when("bank", active()))
        .when(ConditionalRule::new(
            "monthly_payment",
            active(),
            Constraint::required().min(Bound::Fixed(1.0)),
            Constraint::optional(),
        ))
        .when(ConditionalRule::require_when("end_date", active()))
}

fn co_borrower() -> StepTable {
    StepTable::new("co_borrowers")
        .field(FieldDecl::new(
            "name_surname",
            ValueKind::Text,
            Constraint::required().range(2.0, 100.0),
        ))
        .field(required("birthday", ValueKind::Date))
        .field(required("relationship", ValueKind::Choice))
        .field(required("main_source_of_income", ValueKind::Choice))
        .field(optional("monthly_income", ValueKind::Number))
        .when(ConditionalRule::new(
            "monthly_income",
            Condition::Exempt {
                field: "main_source_of_income",
            },
            Constraint::optional(),
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
}

fn existing_mortgage() -> StepTable {
    StepTable::new("existing_mortgages")
        .field(required("program", ValueKind::Choice))
        .field(FieldDecl::new(
            "balance",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(0.0)),
        ))
        .field(required("end_date", ValueKind::Date))
}

fn existing_credit() -> StepTable {
    StepTable::new("existing_credits")
        .field(required("bank", ValueKind::Choice))
        .field(FieldDecl::new(
            "amount",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(1.0)),
        ))
        .field(FieldDecl::new(
            "monthly_payment",
            ValueKind::Number,
            Constraint::required().min(Bound::Fixed(0.0)),
        ))
        .field(required("start_date", ValueKind::Date))
        .field(required("end_date", ValueKind::Date))
        .field(optional("early_repayment", ValueKind::Flag))
}

#[cfg(test)]
pub(crate) fn all_tables() -> Vec<StepTable> {
    let mut tables: Vec<StepTable> = ApplicationType::ALL
        .into_iter()
        .flat_map(|application_type| {
            (1..=STEP_COUNT)
                .filter_map(move |step| step_table(StepKey::new(application_type, step)))
        })
        .collect();
    tables.extend(SubEntityKind::ALL.into_iter().map(sub_entity_table));
    tables
}
