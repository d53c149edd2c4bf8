use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::catalog::{
    Locale, MessageCatalogResolver, MessageSource, OptionCatalogClient, OptionSource,
};
use super::collaborators::{AuthSession, PricingCollaborator};
use super::controller::SubmitOutcome;
use super::domain::{AnswerValue, Answers, ApplicationType};
use super::persistence::KeyValueStore;
use super::reconcile::{Violation, Warning};
use super::registry::{LocalId, RegistryError, SubEntityKind};
use super::rules::FieldIssue;
use super::service::{SubEntityMutation, WizardService, WizardServiceError, WizardView};

/// Shared state for the wizard endpoints.
pub struct WizardApi<S, P> {
    pub service: Arc<WizardService<S, P>>,
    pub options: OptionCatalogClient<Arc<dyn OptionSource>>,
    pub messages: MessageCatalogResolver<Arc<dyn MessageSource>>,
    pub default_locale: Locale,
}

impl<S, P> Clone for WizardApi<S, P> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            options: self.options.clone(),
            messages: self.messages.clone(),
            default_locale: self.default_locale.clone(),
        }
    }
}

impl<S, P> WizardApi<S, P> {
    fn locale(&self, query: &LocaleQuery) -> Locale {
        query
            .locale
            .as_deref()
            .map(Locale::new)
            .unwrap_or_else(|| self.default_locale.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LocaleQuery {
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubEntityRequest {
    #[serde(default)]
    pub parent_owner_id: Option<LocalId>,
    #[serde(default)]
    pub fields: Answers,
}

/// Router builder exposing the wizard and option catalog endpoints.
pub fn wizard_router<S, P>(api: WizardApi<S, P>) -> Router
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    Router::new()
        .route(
            "/api/v1/wizard/:application_type",
            get(open_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/answers",
            patch(answers_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/steps/:step/submit",
            post(submit_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/back",
            post(back_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/authentication",
            post(authentication_handler::<S, P>).delete(cancel_authentication_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/restart",
            post(restart_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/collections/:collection",
            post(create_sub_entity_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/collections/:collection/:local_id",
            put(update_sub_entity_handler::<S, P>).delete(delete_sub_entity_handler::<S, P>),
        )
        .route(
            "/api/v1/wizard/:application_type/quote",
            get(quote_handler::<S, P>),
        )
        .route(
            "/api/v1/options/:context/:field",
            get(options_handler::<S, P>),
        )
        .with_state(api)
}

pub(crate) async fn open_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let view = api.service.open(application_type);
    view_response(&api, &query, StatusCode::OK, view)
}

pub(crate) async fn answers_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
    Json(patch): Json<BTreeMap<String, Option<AnswerValue>>>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let view = api.service.set_answers(application_type, &patch);
    view_response(&api, &query, StatusCode::OK, view)
}

pub(crate) async fn submit_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path((application_type, step)): Path<(String, u8)>,
    Query(query): Query<LocaleQuery>,
    Json(answers): Json<Answers>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let response = api.service.submit(application_type, step, &answers);
    let status = match &response.outcome {
        SubmitOutcome::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SubmitOutcome::StepMismatch { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };

    let locale = api.locale(&query);
    let mut codes = view_codes(&response.view);
    if let SubmitOutcome::Rejected { issues, violations } = &response.outcome {
        codes.extend(issue_codes(issues));
        codes.extend(violation_codes(violations, &[]));
    }
    let payload = json!({
        "outcome": response.outcome,
        "application": response.view,
        "messages": api.messages.messages_for(codes.iter().map(String::as_str), &locale),
    });
    (status, Json(payload)).into_response()
}

pub(crate) async fn back_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let view = api.service.back(application_type);
    view_response(&api, &query, StatusCode::OK, view)
}

pub(crate) async fn authentication_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
    Json(session): Json<AuthSession>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let response = api.service.complete_authentication(application_type, &session);
    let locale = api.locale(&query);
    let codes = view_codes(&response.view);
    let payload = json!({
        "outcome": response.outcome,
        "application": response.view,
        "messages": api.messages.messages_for(codes.iter().map(String::as_str), &locale),
    });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn cancel_authentication_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let view = api.service.cancel_authentication(application_type);
    view_response(&api, &query, StatusCode::OK, view)
}

pub(crate) async fn restart_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    let view = api.service.restart(application_type);
    view_response(&api, &query, StatusCode::OK, view)
}

pub(crate) async fn create_sub_entity_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path((application_type, collection)): Path<(String, String)>,
    Query(query): Query<LocaleQuery>,
    Json(request): Json<CreateSubEntityRequest>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let (application_type, collection) = match parse_collection(&application_type, &collection) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let result = api.service.create_sub_entity(
        application_type,
        collection,
        request.parent_owner_id,
        &request.fields,
    );
    mutation_response(&api, &query, StatusCode::CREATED, result)
}

pub(crate) async fn update_sub_entity_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path((application_type, collection, local_id)): Path<(String, String, u32)>,
    Query(query): Query<LocaleQuery>,
    Json(fields): Json<Answers>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let (application_type, collection) = match parse_collection(&application_type, &collection) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let result = api.service.update_sub_entity(
        application_type,
        collection,
        LocalId(local_id),
        &fields,
    );
    mutation_response(&api, &query, StatusCode::OK, result)
}

pub(crate) async fn delete_sub_entity_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path((application_type, collection, local_id)): Path<(String, String, u32)>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let (application_type, collection) = match parse_collection(&application_type, &collection) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let result = api
        .service
        .delete_sub_entity(application_type, collection, LocalId(local_id));
    mutation_response(&api, &query, StatusCode::OK, result)
}

pub(crate) async fn quote_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path(application_type): Path<String>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let application_type = match parse_type(&application_type) {
        Ok(application_type) => application_type,
        Err(response) => return response,
    };
    match api.service.quote(application_type) {
        Ok(quote) => (StatusCode::OK, Json(quote)).into_response(),
        Err(err) => error_response(&api, &query, err),
    }
}

pub(crate) async fn options_handler<S, P>(
    State(api): State<WizardApi<S, P>>,
    Path((context, field)): Path<(String, String)>,
    Query(query): Query<LocaleQuery>,
) -> Response
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    let locale = api.locale(&query);
    let view = api.options.get_options(&context, &field, &locale).await;
    (StatusCode::OK, Json(view)).into_response()
}

fn parse_type(raw: &str) -> Result<ApplicationType, Response> {
    raw.parse::<ApplicationType>().map_err(|err| {
        let payload = json!({ "error": err.to_string() });
        (StatusCode::BAD_REQUEST, Json(payload)).into_response()
    })
}

fn parse_collection(
    application_type: &str,
    collection: &str,
) -> Result<(ApplicationType, SubEntityKind), Response> {
    let application_type = parse_type(application_type)?;
    let collection = collection.parse::<SubEntityKind>().map_err(|err| {
        let payload = json!({ "error": err.to_string() });
        (StatusCode::BAD_REQUEST, Json(payload)).into_response()
    })?;
    Ok((application_type, collection))
}

fn view_response<S, P>(
    api: &WizardApi<S, P>,
    query: &LocaleQuery,
    status: StatusCode,
    view: WizardView,
) -> Response {
    let locale = api.locale(query);
    let codes = view_codes(&view);
    let payload = json!({
        "application": view,
        "messages": api.messages.messages_for(codes.iter().map(String::as_str), &locale),
    });
    (status, Json(payload)).into_response()
}

fn mutation_response<S, P>(
    api: &WizardApi<S, P>,
    query: &LocaleQuery,
    status: StatusCode,
    result: Result<SubEntityMutation, WizardServiceError>,
) -> Response {
    match result {
        Ok(mutation) => {
            let locale = api.locale(query);
            let codes = view_codes(&mutation.view);
            let payload = json!({
                "collection": mutation.collection,
                "local_id": mutation.local_id,
                "application": mutation.view,
                "messages": api.messages.messages_for(codes.iter().map(String::as_str), &locale),
            });
            (status, Json(payload)).into_response()
        }
        Err(err) => error_response(api, query, err),
    }
}

fn error_response<S, P>(
    api: &WizardApi<S, P>,
    query: &LocaleQuery,
    err: WizardServiceError,
) -> Response {
    let status = match &err {
        WizardServiceError::CollectionNotAllowed { .. } => StatusCode::BAD_REQUEST,
        WizardServiceError::Registry(RegistryError::NotFound { .. }) => StatusCode::NOT_FOUND,
        WizardServiceError::Registry(RegistryError::UnknownOwner(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        WizardServiceError::InvalidSubEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WizardServiceError::NotFinalized(_) => StatusCode::CONFLICT,
        WizardServiceError::Pricing(_) => StatusCode::BAD_GATEWAY,
    };

    let payload = match &err {
        WizardServiceError::InvalidSubEntity { issues, .. } => {
            let locale = api.locale(query);
            let codes = issue_codes(issues);
            json!({
                "error": err.to_string(),
                "issues": issues,
                "messages": api.messages.messages_for(codes.iter().map(String::as_str), &locale),
            })
        }
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(payload)).into_response()
}

fn view_codes(view: &WizardView) -> Vec<String> {
    let mut codes = issue_codes(&view.issues);
    codes.extend(violation_codes(
        &view.reconciliation.violations,
        &view.reconciliation.warnings,
    ));
    codes
}

fn issue_codes(issues: &[FieldIssue]) -> Vec<String> {
    issues.iter().map(|issue| issue.error_code.clone()).collect()
}

fn violation_codes(violations: &[Violation], warnings: &[Warning]) -> Vec<String> {
    violations
        .iter()
        .map(|violation| violation.error_code.clone())
        .chain(warnings.iter().map(|warning| warning.error_code.clone()))
        .collect()
}
