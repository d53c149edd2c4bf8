use crate::wizard::domain::{AnswerValue, ApplicationType};
use crate::wizard::sentinel::{
    is_none_sentinel, mixes_sentinel, normalize_income_source, IncomeSourceKind, SentinelKind,
    SentinelPolicy,
};

#[test]
fn every_unemployed_spelling_normalizes_to_the_same_kind() {
    let spellings = [
        AnswerValue::Number(6.0),
        AnswerValue::text("6"),
        AnswerValue::text("option_6"),
        AnswerValue::text("unemployed"),
        AnswerValue::text("  Unemployed "),
        AnswerValue::text("mortgage_step3_main_source_unemployed"),
        AnswerValue::list(["option_6"]),
    ];

    for spelling in &spellings {
        assert_eq!(
            normalize_income_source(spelling),
            Some(IncomeSourceKind::Unemployed),
            "{spelling:?}"
        );
        assert!(is_none_sentinel(SentinelKind::NoIncome, spelling), "{spelling:?}");
    }
}

#[test]
fn employed_spellings_are_not_confused_with_unemployed() {
    assert_eq!(
        normalize_income_source(&AnswerValue::text("mortgage_step3_main_source_selfemployed")),
        Some(IncomeSourceKind::SelfEmployed)
    );
    assert_eq!(
        normalize_income_source(&AnswerValue::text("option_1")),
        Some(IncomeSourceKind::Employee)
    );
    assert_eq!(
        normalize_income_source(&AnswerValue::text("hired")),
        Some(IncomeSourceKind::Employee)
    );
    assert!(!is_none_sentinel(
        SentinelKind::NoIncome,
        &AnswerValue::text("employee")
    ));
    assert_eq!(normalize_income_source(&AnswerValue::text("   ")), None);
    assert_eq!(normalize_income_source(&AnswerValue::text("astronaut")), None);
}

#[test]
fn obligation_and_additional_income_markers_are_recognized() {
    for raw in ["1", "option_1", "no_obligations", "credit_step3_no_obligations"] {
        assert!(
            is_none_sentinel(SentinelKind::NoObligations, &AnswerValue::text(raw)),
            "{raw}"
        );
    }
    assert!(is_none_sentinel(
        SentinelKind::NoObligations,
        &AnswerValue::Number(1.0)
    ));
    assert!(!is_none_sentinel(
        SentinelKind::NoObligations,
        &AnswerValue::text("option_2")
    ));

    for raw in ["option_1", "none", "mortgage_step3_no_additional_income"] {
        assert!(
            is_none_sentinel(SentinelKind::NoAdditionalIncome, &AnswerValue::text(raw)),
            "{raw}"
        );
    }
    assert!(!is_none_sentinel(
        SentinelKind::NoAdditionalIncome,
        &AnswerValue::text("option_3")
    ));
}

#[test]
fn lists_only_count_as_sentinels_when_the_marker_stands_alone() {
    let alone = AnswerValue::list(["option_1"]);
    let mixed = AnswerValue::list(["option_1", "option_2"]);
    let without = AnswerValue::list(["option_2", "option_3"]);

    assert!(is_none_sentinel(SentinelKind::NoObligations, &alone));
    assert!(!is_none_sentinel(SentinelKind::NoObligations, &mixed));
    assert!(mixes_sentinel(SentinelKind::NoObligations, &mixed));
    assert!(!mixes_sentinel(SentinelKind::NoObligations, &alone));
    assert!(!mixes_sentinel(SentinelKind::NoObligations, &without));
}

#[test]
fn exemption_sets_differ_between_calculation_and_refinance_flows() {
    let calculation = SentinelPolicy::for_application(ApplicationType::MortgageCalculation);
    let refinance = SentinelPolicy::for_application(ApplicationType::CreditRefinance);

    assert!(calculation.is_exempt(&AnswerValue::text("student")));
    assert!(calculation.is_exempt(&AnswerValue::text("6")));
    assert!(!calculation.is_exempt(&AnswerValue::text("other")));
    assert!(!calculation.is_exempt(&AnswerValue::text("unpaid_leave")));

    assert!(refinance.is_exempt(&AnswerValue::text("other")));
    assert!(refinance.is_exempt(&AnswerValue::text("unpaid_leave")));
    assert!(!refinance.is_exempt(&AnswerValue::text("employee")));

    let leave = AnswerValue::text("refinance_mortgage_step3_main_source_leave");
    assert_eq!(
        normalize_income_source(&leave),
        Some(IncomeSourceKind::UnpaidLeave)
    );
    assert!(refinance.is_exempt(&leave));
    assert!(!calculation.is_exempt(&leave));

    let custom = SentinelPolicy::new([IncomeSourceKind::Pension]);
    assert_eq!(
        custom.exempt_kinds().collect::<Vec<_>>(),
        vec![IncomeSourceKind::Pension]
    );
    assert!(custom.is_exempt(&AnswerValue::text("pensioner")));
}
