use async_trait::async_trait;
use loan_intake::wizard::catalog::{bundled_options, default_message};
use loan_intake::wizard::rules::{
    ERROR_BALANCE, ERROR_DATE_ORDER, ERROR_FILL_FIELD, ERROR_INVALID_FORMAT, ERROR_MAX_VALUE,
    ERROR_MIN_VALUE, ERROR_NONE_EXCLUSIVE, ERROR_SELECT_ANSWER, WARNING_HIGH_LTV,
};
use loan_intake::wizard::{
    AnswerSnapshot, ApplicationType, CatalogError, KeyValueStore, Locale, MessageSource,
    OptionSet, OptionSource, PricingCollaborator, PricingError, PricingQuote, StoreError,
    SubEntityKind,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// One JSON document per storage key inside a directory.
#[derive(Debug, Clone)]
pub(crate) struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub(crate) fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '.' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// Serves the option tables compiled into the binary.
#[derive(Debug, Default)]
pub(crate) struct BundledOptionSource;

#[async_trait]
impl OptionSource for BundledOptionSource {
    async fn fetch(
        &self,
        context: &str,
        field: &str,
        locale: &Locale,
    ) -> Result<OptionSet, CatalogError> {
        bundled_options(context, field, locale).ok_or_else(|| CatalogError::NotFound {
            context: context.to_string(),
            field: field.to_string(),
            locale: locale.clone(),
        })
    }
}

const MESSAGE_CODES: &[&str] = &[
    ERROR_FILL_FIELD,
    ERROR_SELECT_ANSWER,
    ERROR_MIN_VALUE,
    ERROR_MAX_VALUE,
    ERROR_INVALID_FORMAT,
    ERROR_BALANCE,
    ERROR_DATE_ORDER,
    ERROR_NONE_EXCLUSIVE,
    WARNING_HIGH_LTV,
];

/// English message catalog for every locale until a translated source is wired in.
#[derive(Debug, Default)]
pub(crate) struct BundledMessageSource;

#[async_trait]
impl MessageSource for BundledMessageSource {
    async fn fetch(&self, _locale: &Locale) -> Result<BTreeMap<String, String>, CatalogError> {
        Ok(MESSAGE_CODES
            .iter()
            .filter_map(|code| {
                default_message(code).map(|text| (code.to_string(), text.to_string()))
            })
            .collect())
    }
}

/// Standard annuity estimate with a flat indicative rate per product family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndicativePricing {
    pub(crate) mortgage_rate_percent: f64,
    pub(crate) credit_rate_percent: f64,
}

impl Default for IndicativePricing {
    fn default() -> Self {
        Self {
            mortgage_rate_percent: 4.2,
            credit_rate_percent: 7.5,
        }
    }
}

impl IndicativePricing {
    fn principal(
        application_type: ApplicationType,
        snapshot: &AnswerSnapshot,
    ) -> Result<f64, PricingError> {
        let answers = &snapshot.answers;
        match application_type {
            ApplicationType::MortgageCalculation => {
                let price = answers
                    .number("price_of_estate")
                    .ok_or(PricingError::MissingInput("price_of_estate"))?;
                let fee = answers
                    .number("initial_fee")
                    .ok_or(PricingError::MissingInput("initial_fee"))?;
                Ok(price - fee)
            }
            ApplicationType::MortgageRefinance => answers
                .number("mortgage_balance")
                .ok_or(PricingError::MissingInput("mortgage_balance")),
            ApplicationType::CreditCalculation => answers
                .number("loan_amount")
                .ok_or(PricingError::MissingInput("loan_amount")),
            ApplicationType::CreditRefinance => {
                let total: f64 = snapshot
                    .sub_entities
                    .list(SubEntityKind::ExistingCredit)
                    .iter()
                    .filter_map(|entry| entry.fields.number("amount"))
                    .sum();
                if total > 0.0 {
                    Ok(total)
                } else {
                    Err(PricingError::MissingInput("amount"))
                }
            }
        }
    }
}

impl PricingCollaborator for IndicativePricing {
    fn quote(
        &self,
        application_type: ApplicationType,
        snapshot: &AnswerSnapshot,
    ) -> Result<PricingQuote, PricingError> {
        let principal = Self::principal(application_type, snapshot)?;
        let years = snapshot
            .answers
            .number("period")
            .ok_or(PricingError::MissingInput("period"))?;
        let months = (years * 12.0).round();
        if principal <= 0.0 || months < 1.0 {
            return Err(PricingError::Unavailable(format!(
                "cannot price {principal:.0} over {months} months"
            )));
        }

        let rate_percent = match application_type {
            ApplicationType::MortgageCalculation | ApplicationType::MortgageRefinance => {
                self.mortgage_rate_percent
            }
            ApplicationType::CreditCalculation | ApplicationType::CreditRefinance => {
                self.credit_rate_percent
            }
        };
        let monthly_rate = rate_percent / 100.0 / 12.0;
        let monthly_payment = if monthly_rate == 0.0 {
            principal / months
        } else {
            principal * monthly_rate / (1.0 - (1.0 + monthly_rate).powf(-months))
        };

        Ok(PricingQuote {
            monthly_payment,
            total_repayment: monthly_payment * months,
            rate_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loan_intake::wizard::{Answers, SubEntityRegistry};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loan-intake-api-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn snapshot(answers: Answers) -> AnswerSnapshot {
        AnswerSnapshot {
            application_type: ApplicationType::MortgageCalculation,
            answers: Arc::new(answers),
            sub_entities: Arc::new(SubEntityRegistry::default()),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn file_store_round_trips_and_tolerates_missing_keys() {
        let dir = scratch_dir("store");
        let store = JsonFileStore::open(&dir).expect("store opens");
        let key = "loan-intake/mortgage_calculation";

        assert_eq!(store.get(key).expect("get"), None);
        store.put(key, "{\"a\":1}".to_string()).expect("put");
        assert_eq!(store.get(key).expect("get").as_deref(), Some("{\"a\":1}"));
        assert!(dir.join("loan-intake.mortgage_calculation.json").exists());

        store.remove(key).expect("remove");
        store.remove(key).expect("second remove is a no-op");
        assert_eq!(store.get(key).expect("get"), None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn indicative_pricing_uses_the_financed_amount() {
        let pricing = IndicativePricing {
            mortgage_rate_percent: 0.0,
            credit_rate_percent: 7.5,
        };
        let answers = Answers::new()
            .with("price_of_estate", 1_000_000.0)
            .with("initial_fee", 400_000.0)
            .with("period", 25.0);

        let quote = pricing
            .quote(ApplicationType::MortgageCalculation, &snapshot(answers))
            .expect("priced");
        assert!((quote.monthly_payment - 2_000.0).abs() < 1e-9);
        assert!((quote.total_repayment - 600_000.0).abs() < 1e-6);
    }

    #[test]
    fn indicative_pricing_reports_missing_inputs() {
        let err = IndicativePricing::default()
            .quote(
                ApplicationType::MortgageCalculation,
                &snapshot(Answers::new().with("price_of_estate", 1_000_000.0)),
            )
            .expect_err("missing fee");
        assert!(matches!(err, PricingError::MissingInput("initial_fee")));
    }

    #[tokio::test]
    async fn bundled_sources_cover_known_tables_and_codes() {
        let options = BundledOptionSource
            .fetch("mortgage_step1", "property_ownership", &Locale::default())
            .await
            .expect("bundled options");
        assert_eq!(options.options.len(), 3);
        assert!(BundledOptionSource
            .fetch("unknown", "field", &Locale::default())
            .await
            .is_err());

        let messages = BundledMessageSource
            .fetch(&Locale::new("he"))
            .await
            .expect("bundled messages");
        assert_eq!(messages.len(), MESSAGE_CODES.len());
    }
}
