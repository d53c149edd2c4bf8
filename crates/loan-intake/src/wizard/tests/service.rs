use std::sync::atomic::Ordering;

use serde_json::json;

use super::common::*;
use crate::wizard::controller::SubmitOutcome;
use crate::wizard::domain::{Answers, Application, ApplicationType, Destination, WizardState};
use crate::wizard::persistence::{storage_key, KeyValueStore, SaveStatus};
use crate::wizard::registry::{LocalId, RegistryError, SubEntityKind};
use crate::wizard::service::WizardServiceError;

fn co_borrower() -> Answers {
    Answers::new()
        .with("name_surname", "Noa Levi")
        .with("birthday", date(1991, 7, 12))
        .with("relationship", "option_1")
        .with("main_source_of_income", "employee")
        .with("monthly_income", 9_000.0)
}

#[test]
fn opening_a_flow_starts_at_step_one_and_saves_it() {
    let (service, store) = build_service();
    let view = service.open(ApplicationType::MortgageCalculation);

    assert_eq!(view.current_step, 1);
    assert_eq!(view.step_count, 4);
    assert_eq!(view.state, WizardState::InProgress);
    assert!(!view.ruleset.rules.is_empty());
    assert!(view.notice.is_none());
    assert!(store
        .inner
        .raw(&storage_key(ApplicationType::MortgageCalculation))
        .is_some());
}

#[test]
fn saved_progress_is_resumed() {
    let store = FlakyStore::default();
    let mut saved = Application::new(ApplicationType::MortgageCalculation);
    saved.current_step = 3;
    saved.is_logged_in = true;
    saved.answers = mortgage_parameters().merged(&personal_data());
    store
        .put(
            &storage_key(ApplicationType::MortgageCalculation),
            serde_json::to_string(&saved).expect("encode"),
        )
        .expect("put");

    let (service, _) = build_service_with(store);
    let view = service.open(ApplicationType::MortgageCalculation);
    assert_eq!(view.current_step, 3);
    assert!(view.is_logged_in);
    assert_eq!(view.answers.text("name_surname"), Some("Dana Levi"));
}

#[test]
fn full_flow_signs_in_and_prices_the_offer() {
    let (service, _) = build_service();
    let flow = ApplicationType::MortgageCalculation;

    let response = service.submit(flow, 1, &mortgage_parameters());
    assert_eq!(
        response.outcome,
        SubmitOutcome::AuthenticationRequired {
            pending: Destination::Step { step: 2 }
        }
    );
    assert_eq!(response.view.current_step, 1);

    let resumed = service.complete_authentication(flow, &auth_session());
    assert_eq!(resumed.outcome, SubmitOutcome::Advanced { step: 2 });
    assert!(resumed.view.is_logged_in);

    assert!(service.submit(flow, 2, &personal_data()).outcome.is_accepted());
    assert!(matches!(
        service.quote(flow),
        Err(WizardServiceError::NotFinalized(ApplicationType::MortgageCalculation))
    ));

    assert!(service.submit(flow, 3, &employed_income()).outcome.is_accepted());
    let quote = service.quote(flow).expect("quote");
    assert!((quote.monthly_payment - 1_000_000.0 / 240.0).abs() < 1e-9);

    let done = service.submit(flow, 4, &offer_selection());
    assert_eq!(done.outcome, SubmitOutcome::Submitted);
    assert_eq!(done.view.state, WizardState::Submitted);
}

#[test]
fn rejected_submit_reports_issues_without_moving() {
    let (service, _) = build_service();
    let answers = mortgage_parameters().with("initial_fee", 10.0);

    let response = service.submit(ApplicationType::MortgageCalculation, 1, &answers);
    match &response.outcome {
        SubmitOutcome::Rejected { issues, .. } => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].field, "initial_fee");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(response.view.current_step, 1);
    assert!(response.view.answers.is_empty());
}

#[test]
fn reroute_seeds_the_target_flow_and_keeps_the_sign_in() {
    let (service, _) = build_service();
    service.complete_authentication(ApplicationType::CreditCalculation, &auth_session());

    let response = service.submit(ApplicationType::CreditCalculation, 1, &renovation_credit());
    assert!(matches!(
        response.outcome,
        SubmitOutcome::Rerouted {
            application_type: ApplicationType::MortgageRefinance,
            step: 1,
            ..
        }
    ));
    assert_eq!(response.view.application_type, ApplicationType::MortgageRefinance);
    assert_eq!(response.view.current_step, 1);
    assert!(response.view.is_logged_in);
    assert_eq!(response.view.answers.number("price_of_estate"), Some(1_500_000.0));

    let source = service.open(ApplicationType::CreditCalculation);
    assert_eq!(source.current_step, 1);
    assert_eq!(source.answers.text("purpose_of_loan"), Some("option_6"));

    let target = service.open(ApplicationType::MortgageRefinance);
    assert_eq!(target.answers.number("period"), Some(10.0));
}

#[test]
fn sub_entities_are_validated_before_they_are_stored() {
    let (service, _) = build_service();
    let flow = ApplicationType::MortgageRefinance;
    let entry = Answers::new()
        .with("program", "prime")
        .with("balance", 500_000.0)
        .with("end_date", date(2039, 5, 1));

    let created = service
        .create_sub_entity(flow, SubEntityKind::ExistingMortgage, None, &entry)
        .expect("created");
    assert_eq!(created.local_id, LocalId(0));
    assert_eq!(created.view.sub_entities.list(SubEntityKind::ExistingMortgage).len(), 1);

    let err = service
        .create_sub_entity(
            flow,
            SubEntityKind::ExistingMortgage,
            None,
            &Answers::new().with("program", "prime"),
        )
        .expect_err("incomplete entry");
    match err {
        WizardServiceError::InvalidSubEntity { collection, issues } => {
            assert_eq!(collection, SubEntityKind::ExistingMortgage);
            assert!(issues.iter().any(|issue| issue.field == "balance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let updated = service
        .update_sub_entity(
            flow,
            SubEntityKind::ExistingMortgage,
            LocalId(0),
            &entry.clone().with("balance", 800_000.0),
        )
        .expect("updated");
    assert!(!updated.view.reconciliation.has_rule("mortgage_balance_sum"));

    let view = service.open(flow);
    assert_eq!(view.sub_entities.list(SubEntityKind::ExistingMortgage).len(), 1);
}

#[test]
fn collections_outside_the_flow_are_refused() {
    let (service, _) = build_service();
    let err = service
        .create_sub_entity(
            ApplicationType::MortgageCalculation,
            SubEntityKind::ExistingMortgage,
            None,
            &Answers::new(),
        )
        .expect_err("not allowed");
    assert!(matches!(err, WizardServiceError::CollectionNotAllowed { .. }));

    let err = service
        .delete_sub_entity(
            ApplicationType::MortgageCalculation,
            SubEntityKind::Obligation,
            LocalId(4),
        )
        .expect_err("missing entry");
    assert!(matches!(
        err,
        WizardServiceError::Registry(RegistryError::NotFound { .. })
    ));
}

#[test]
fn deleting_a_co_borrower_cascades_through_the_service() {
    let (service, _) = build_service();
    let flow = ApplicationType::CreditCalculation;

    let partner = service
        .create_sub_entity(flow, SubEntityKind::CoBorrower, None, &co_borrower())
        .expect("co-borrower")
        .local_id;
    service
        .create_sub_entity(
            flow,
            SubEntityKind::Obligation,
            Some(partner),
            &Answers::new().with("obligation_type", "option_1"),
        )
        .expect("owned obligation");

    let err = service
        .create_sub_entity(
            flow,
            SubEntityKind::Obligation,
            Some(LocalId(9)),
            &Answers::new().with("obligation_type", "option_1"),
        )
        .expect_err("unknown owner");
    assert!(matches!(
        err,
        WizardServiceError::Registry(RegistryError::UnknownOwner(LocalId(9)))
    ));

    let removed = service
        .delete_sub_entity(flow, SubEntityKind::CoBorrower, partner)
        .expect("deleted");
    assert!(removed.view.sub_entities.is_empty(SubEntityKind::CoBorrower));
    assert!(removed.view.sub_entities.is_empty(SubEntityKind::Obligation));
}

#[test]
fn restart_clears_answers_but_keeps_the_sign_in() {
    let (service, _) = build_service();
    let flow = ApplicationType::MortgageCalculation;
    service.complete_authentication(flow, &auth_session());
    service.submit(flow, 1, &mortgage_parameters());

    let view = service.restart(flow);
    assert_eq!(view.current_step, 1);
    assert!(view.answers.is_empty());
    assert!(view.is_logged_in);
}

#[test]
fn patches_clear_fields_with_null() {
    let (service, _) = build_service();
    let flow = ApplicationType::MortgageCalculation;

    let view = service.set_answers(
        flow,
        &patch(&[
            ("price_of_estate", Some(json!(1_200_000))),
            ("city_where_you_buy", Some(json!("haifa"))),
        ]),
    );
    assert_eq!(view.answers.number("price_of_estate"), Some(1_200_000.0));

    let view = service.set_answers(flow, &patch(&[("city_where_you_buy", None)]));
    assert!(view.answers.get("city_where_you_buy").is_none());
    assert!(view
        .issues
        .iter()
        .any(|issue| issue.field == "city_where_you_buy"));
}

#[test]
fn storage_failure_is_announced_once_and_can_be_retried() {
    let (service, store) = build_service_with(FlakyStore::failing(1));
    let flow = ApplicationType::MortgageCalculation;

    let first = service.open(flow);
    let notice = first.notice.expect("notice on first failure");
    assert_eq!(notice.application_type, flow);
    assert!(service.persistence().is_degraded());

    let view = service.set_answers(flow, &patch(&[("price_of_estate", Some(json!(900_000)))]));
    assert!(view.notice.is_none());
    assert_eq!(view.answers.number("price_of_estate"), Some(900_000.0));
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);

    assert_eq!(service.retry_persistence(), SaveStatus::Written);
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    let raw = store.inner.raw(&storage_key(flow)).expect("flushed");
    let saved: Application = serde_json::from_str(&raw).expect("decode");
    assert_eq!(saved.answers.number("price_of_estate"), Some(900_000.0));
}

#[test]
fn back_and_cancelled_authentication_never_validate() {
    let (service, _) = build_service();
    let flow = ApplicationType::MortgageCalculation;

    service.submit(flow, 1, &mortgage_parameters());
    let view = service.cancel_authentication(flow);
    assert_eq!(view.state, WizardState::InProgress);
    assert_eq!(view.current_step, 1);

    let view = service.back(flow);
    assert_eq!(view.current_step, 1);
}
