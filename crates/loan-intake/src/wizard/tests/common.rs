use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::wizard::catalog::{
    CatalogError, Locale, MessageCatalogResolver, MessageSource, OptionCatalogClient, OptionItem,
    OptionSet, OptionSource,
};
use crate::wizard::collaborators::{
    AnswerSnapshot, AuthSession, PricingCollaborator, PricingError, PricingQuote, UserProfile,
};
use crate::wizard::domain::{AnswerValue, Answers, ApplicationType};
use crate::wizard::persistence::{KeyValueStore, MemoryStore, PersistencePort, StoreError};
use crate::wizard::router::WizardApi;
use crate::wizard::service::WizardService;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn mortgage_parameters() -> Answers {
    Answers::new()
        .with("price_of_estate", 1_000_000.0)
        .with("city_where_you_buy", "tel_aviv")
        .with("when_do_you_need_money", "option_1")
        .with("property_ownership", "option_1")
        .with("initial_fee", 300_000.0)
        .with("type_select", "option_1")
        .with("will_be_your_first", "option_1")
        .with("period", 20.0)
}

pub(super) fn refinance_parameters() -> Answers {
    Answers::new()
        .with("why_refinancing", "option_1")
        .with("mortgage_balance", 800_000.0)
        .with("price_of_estate", 2_000_000.0)
        .with("type_select", "option_1")
        .with("bank", "bank_leumi")
        .with("property_registered", "option_1")
        .with("start_date", date(2019, 3, 1))
        .with("period", 25.0)
}

pub(super) fn renovation_credit() -> Answers {
    Answers::new()
        .with("purpose_of_loan", "option_6")
        .with("loan_amount", 200_000.0)
        .with("when_do_you_need_money", "option_1")
        .with("loan_deferral", "option_1")
        .with("price_of_estate", 1_500_000.0)
        .with("city_where_you_buy", "haifa")
        .with("have_mortgage", true)
        .with("period", 10.0)
}

pub(super) fn personal_data() -> Answers {
    Answers::new()
        .with("name_surname", "Dana Levi")
        .with("birthday", date(1990, 5, 1))
        .with("education", "option_2")
        .with("additional_citizenships", false)
        .with("taxes", false)
        .with("children_under_18", false)
        .with("medical_insurance", true)
        .with("is_foreigner", false)
        .with("public_person", false)
        .with("borrowers", 1.0)
        .with("family_status", "single")
}

pub(super) fn employed_income() -> Answers {
    Answers::new()
        .with("main_source_of_income", "employee")
        .with("monthly_income", 18_500.0)
        .with("employment_start_date", date(2018, 1, 1))
        .with("field_of_activity", "option_3")
        .with("profession", "Engineer")
        .with("company_name", "Acme Ltd")
        .with("additional_income", "option_1")
        .with("obligation", "option_1")
}

pub(super) fn offer_selection() -> Answers {
    Answers::new().with("selected_bank", "bank_hapoalim")
}

pub(super) fn auth_session() -> AuthSession {
    AuthSession {
        token: "session-token".to_string(),
        profile: UserProfile {
            name: "Dana Levi".to_string(),
            phone: "+972500000000".to_string(),
        },
    }
}

pub(super) fn patch(entries: &[(&str, Option<Value>)]) -> BTreeMap<String, Option<AnswerValue>> {
    entries
        .iter()
        .map(|(field, value)| {
            let value = value
                .clone()
                .map(|value| serde_json::from_value(value).expect("answer value"));
            (field.to_string(), value)
        })
        .collect()
}

/// Store whose first `failures` writes fail.
#[derive(Debug, Default)]
pub(super) struct FlakyStore {
    pub inner: MemoryStore,
    pub failures: AtomicUsize,
    pub puts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("quota exceeded".to_string()));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

pub(super) struct FixedPricing;

impl PricingCollaborator for FixedPricing {
    fn quote(
        &self,
        _application_type: ApplicationType,
        snapshot: &AnswerSnapshot,
    ) -> Result<PricingQuote, PricingError> {
        let principal = snapshot
            .answers
            .number("price_of_estate")
            .ok_or(PricingError::MissingInput("price_of_estate"))?;
        Ok(PricingQuote {
            monthly_payment: principal / 240.0,
            total_repayment: principal,
            rate_percent: 4.5,
        })
    }
}

pub(super) struct UnavailablePricing;

impl PricingCollaborator for UnavailablePricing {
    fn quote(
        &self,
        _application_type: ApplicationType,
        _snapshot: &AnswerSnapshot,
    ) -> Result<PricingQuote, PricingError> {
        Err(PricingError::Unavailable("rate engine offline".to_string()))
    }
}

pub(super) type TestService = WizardService<Arc<FlakyStore>, FixedPricing>;

pub(super) fn build_service() -> (TestService, Arc<FlakyStore>) {
    build_service_with(FlakyStore::default())
}

pub(super) fn build_service_with(store: FlakyStore) -> (TestService, Arc<FlakyStore>) {
    let store = Arc::new(store);
    let persistence = PersistencePort::new(Arc::clone(&store), Duration::ZERO);
    (WizardService::new(persistence, Arc::new(FixedPricing)), store)
}

/// Option source answering per locale after a scripted delay.
#[derive(Debug, Default)]
pub(super) struct ScriptedOptions {
    pub delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl ScriptedOptions {
    pub fn with_delay(mut self, locale: &str, delay: Duration) -> Self {
        self.delays.insert(locale.to_string(), delay);
        self
    }
}

#[async_trait]
impl OptionSource for ScriptedOptions {
    async fn fetch(
        &self,
        context: &str,
        field: &str,
        locale: &Locale,
    ) -> Result<OptionSet, CatalogError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delays.get(locale.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".to_string()));
        }
        Ok(OptionSet {
            options: vec![
                OptionItem {
                    value: "option_1".to_string(),
                    label: format!("{locale} first"),
                },
                OptionItem {
                    value: "option_2".to_string(),
                    label: format!("{locale} second"),
                },
            ],
            label: Some(format!("{context}/{field} ({locale}) #{call}")),
            placeholder: None,
        })
    }
}

#[derive(Debug, Default)]
pub(super) struct ScriptedMessages {
    pub delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl ScriptedMessages {
    pub fn with_delay(mut self, locale: &str, delay: Duration) -> Self {
        self.delays.insert(locale.to_string(), delay);
        self
    }
}

#[async_trait]
impl MessageSource for ScriptedMessages {
    async fn fetch(&self, locale: &Locale) -> Result<BTreeMap<String, String>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(locale.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".to_string()));
        }
        Ok(BTreeMap::from([(
            "error_fill_field".to_string(),
            format!("[{locale}] required"),
        )]))
    }
}

pub(super) fn failing_messages() -> ScriptedMessages {
    let messages = ScriptedMessages::default();
    messages.fail.store(true, Ordering::SeqCst);
    messages
}

pub(super) fn wizard_api<P>(
    service: WizardService<Arc<FlakyStore>, P>,
) -> WizardApi<Arc<FlakyStore>, P> {
    let options: Arc<dyn OptionSource> = Arc::new(ScriptedOptions::default());
    let messages: Arc<dyn MessageSource> = Arc::new(failing_messages());
    WizardApi {
        service: Arc::new(service),
        options: OptionCatalogClient::new(options, Duration::from_secs(300), Locale::default()),
        messages: MessageCatalogResolver::new(messages, Locale::default()),
        default_locale: Locale::default(),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
