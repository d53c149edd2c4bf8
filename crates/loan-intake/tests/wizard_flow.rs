use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use loan_intake::wizard::{
    generate_ruleset, is_none_sentinel, reconcile, AnswerValue, Answers, Application,
    ApplicationType, CatalogError, Locale, MemoryStore, OptionCatalogClient, OptionItem,
    OptionSet, OptionSource, PersistencePort, SaveStatus, SentinelKind, StepController, StepKey,
    SubEntityKind, SubmitOutcome,
};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn income_answers(source: &str) -> Answers {
    Answers::new()
        .with("main_source_of_income", source)
        .with("additional_income", "option_1")
        .with("obligation", "option_1")
}

#[test]
fn ruleset_generation_is_pure() {
    let key = StepKey::new(ApplicationType::MortgageCalculation, 1);
    let answers = Answers::new()
        .with("price_of_estate", 1_250_000.0)
        .with("property_ownership", "option_3");

    let first = generate_ruleset(key, &answers);
    for _ in 0..10 {
        assert_eq!(generate_ruleset(key, &answers), first);
    }
}

#[test]
fn none_spellings_agree() {
    let spellings = [
        AnswerValue::text("option_1"),
        AnswerValue::text("1"),
        AnswerValue::Number(1.0),
        AnswerValue::list(["option_1"]),
    ];
    for spelling in &spellings {
        assert!(
            is_none_sentinel(SentinelKind::NoObligations, spelling),
            "{spelling:?}"
        );
    }
    assert!(!is_none_sentinel(
        SentinelKind::NoObligations,
        &AnswerValue::text("option_2")
    ));
}

#[test]
fn deleted_ids_are_reused_only_when_free() {
    let mut application = Application::new(ApplicationType::CreditRefinance);
    let registry = &mut application.sub_entities;
    let kind = SubEntityKind::ExistingCredit;

    let ids: Vec<_> = (0..3).map(|_| registry.create(kind)).collect();
    registry.delete(kind, ids[0]).expect("delete");

    let reused = registry.create(kind);
    assert_eq!(reused, ids[0]);
    let fresh = registry.create(kind);
    assert!(!ids.contains(&fresh));
}

#[test]
fn balances_must_add_up_to_the_total() {
    let mut application = Application::new(ApplicationType::MortgageRefinance);
    for balance in [500_000.0, 300_000.0] {
        application
            .sub_entities
            .create_with(
                SubEntityKind::ExistingMortgage,
                Answers::new().with("balance", balance),
                None,
            )
            .expect("created");
    }

    application.answers.insert("mortgage_balance", 800_000.0);
    assert!(reconcile(&application).valid);

    application.answers.insert("mortgage_balance", 900_000.0);
    let result = reconcile(&application);
    assert!(!result.valid);
    assert!(result.has_rule("mortgage_balance_sum"));
}

#[test]
fn reversed_dates_always_block() {
    let mut application = Application::new(ApplicationType::CreditRefinance);
    application
        .sub_entities
        .create_with(
            SubEntityKind::ExistingCredit,
            Answers::new()
                .with("start_date", date(2024, 1, 1))
                .with("end_date", date(2023, 1, 1)),
            None,
        )
        .expect("created");

    let result = reconcile(&application);
    assert!(!result.valid);
    assert!(result.has_rule("existing_credit_dates"));
}

fn controller_at_income_step() -> StepController {
    let mut application = Application::new(ApplicationType::MortgageCalculation);
    application.current_step = 3;
    application.is_logged_in = true;
    StepController::from_application(application)
}

#[test]
fn unemployed_answer_relaxes_employment_fields_immediately() {
    let key = StepKey::new(ApplicationType::MortgageCalculation, 3);
    let employed = generate_ruleset(key, &income_answers("employee"));
    assert!(employed.is_required("monthly_income"));
    assert!(employed.is_required("company_name"));

    let unemployed = generate_ruleset(key, &income_answers("unemployed"));
    assert!(!unemployed.is_required("monthly_income"));
    assert!(!unemployed.is_required("company_name"));

    let mut controller = controller_at_income_step();
    assert!(matches!(
        controller.submit(3, &income_answers("employee")),
        SubmitOutcome::Rejected { .. }
    ));
    assert_eq!(controller.application().current_step, 3);

    assert_eq!(
        controller.submit(3, &income_answers("option_6")),
        SubmitOutcome::Advanced { step: 4 }
    );
}

struct DelayedOptions {
    calls: AtomicUsize,
}

#[async_trait]
impl OptionSource for DelayedOptions {
    async fn fetch(
        &self,
        _context: &str,
        _field: &str,
        locale: &Locale,
    ) -> Result<OptionSet, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = if locale.as_str() == "en" { 300 } else { 20 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(OptionSet {
            options: vec![OptionItem {
                value: "option_1".to_string(),
                label: format!("{locale} label"),
            }],
            label: None,
            placeholder: None,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn only_the_latest_locale_survives_a_race() {
    let source = Arc::new(DelayedOptions {
        calls: AtomicUsize::new(0),
    });
    let client = OptionCatalogClient::new(
        Arc::clone(&source),
        Duration::from_secs(300),
        Locale::default(),
    );
    let (en, ru) = (Locale::new("en"), Locale::new("ru"));

    tokio::join!(
        client.get_options("mortgage_step1", "property_ownership", &en),
        client.get_options("mortgage_step1", "property_ownership", &ru),
    );

    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.len(), 1);
    assert!(client
        .cached("mortgage_step1", "property_ownership", &en)
        .is_none());
    let cached = client
        .cached("mortgage_step1", "property_ownership", &ru)
        .expect("ru cached");
    assert_eq!(cached.options[0].label, "ru label");
}

#[test]
fn saved_answers_and_entries_round_trip() {
    let mut application = Application::new(ApplicationType::CreditRefinance);
    application.answers = Answers::new()
        .with("refinancing_credit_goal", "option_2")
        .with("period", 7.0)
        .with("obligation", AnswerValue::list(["option_2", "option_3"]));
    application
        .sub_entities
        .create_with(
            SubEntityKind::ExistingCredit,
            Answers::new()
                .with("bank", "bank_discount")
                .with("amount", 42_000.0)
                .with("start_date", date(2021, 4, 1))
                .with("end_date", date(2026, 4, 1)),
            None,
        )
        .expect("created");

    let store = Arc::new(MemoryStore::default());
    let port = PersistencePort::new(Arc::clone(&store), Duration::ZERO);
    assert_eq!(port.save(&application), SaveStatus::Written);

    let restored = PersistencePort::new(store, Duration::ZERO)
        .load(ApplicationType::CreditRefinance)
        .expect("restored");
    assert_eq!(restored.answers, application.answers);
    assert_eq!(restored.sub_entities, application.sub_entities);
}
