use crate::cli::ServeArgs;
use crate::infra::{
    AppState, BundledMessageSource, BundledOptionSource, IndicativePricing, JsonFileStore,
};
use crate::routes::with_wizard_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use loan_intake::config::{AppConfig, WizardConfig};
use loan_intake::error::AppError;
use loan_intake::telemetry;
use loan_intake::wizard::{
    KeyValueStore, MemoryStore, MessageCatalogResolver, MessageSource, OptionCatalogClient,
    OptionSource, PersistencePort, WizardApi, WizardService,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) type DynStore = Arc<dyn KeyValueStore>;

pub(crate) fn open_store(config: &WizardConfig) -> Result<DynStore, AppError> {
    match &config.store_dir {
        Some(dir) => {
            let store = JsonFileStore::open(dir)?;
            info!(dir = %dir.display(), "persisting applications to disk");
            Ok(Arc::new(store))
        }
        None => {
            info!("WIZARD_STORE_DIR not set; applications are kept in memory");
            Ok(Arc::new(MemoryStore::default()))
        }
    }
}

pub(crate) fn build_api(
    config: &WizardConfig,
    store: DynStore,
) -> WizardApi<DynStore, IndicativePricing> {
    let persistence = PersistencePort::new(store, config.persist_debounce);
    let service = WizardService::new(persistence, Arc::new(IndicativePricing::default()));

    let options: Arc<dyn OptionSource> = Arc::new(BundledOptionSource);
    let messages: Arc<dyn MessageSource> = Arc::new(BundledMessageSource);
    WizardApi {
        service: Arc::new(service),
        options: OptionCatalogClient::new(
            options,
            config.catalog_ttl,
            config.default_locale.clone(),
        ),
        messages: MessageCatalogResolver::new(messages, config.default_locale.clone()),
        default_locale: config.default_locale.clone(),
    }
}

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = open_store(&config.wizard)?;
    let api = build_api(&config.wizard, store);

    let app = with_wizard_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        locale = %config.wizard.default_locale,
        "loan intake wizard ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
