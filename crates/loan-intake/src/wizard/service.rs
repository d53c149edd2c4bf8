use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::collaborators::{AuthSession, PricingCollaborator, PricingError, PricingQuote};
use super::controller::{StepController, SubmitOutcome};
use super::domain::{AnswerValue, Answers, Application, ApplicationType, WizardState};
use super::persistence::{KeyValueStore, PersistenceNotice, PersistencePort, SaveStatus};
use super::reconcile::{reconcile, ReconciliationResult};
use super::registry::{
    CommitError, EditSession, LocalId, RegistryError, SubEntityKind, SubEntityRegistry,
};
use super::rules::{generate_sub_entity_ruleset, validate, FieldIssue, Ruleset};

/// Everything a form needs to render the current step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardView {
    pub application_type: ApplicationType,
    pub current_step: u8,
    pub step_count: u8,
    pub state: WizardState,
    pub is_logged_in: bool,
    pub answers: Answers,
    pub sub_entities: SubEntityRegistry,
    pub ruleset: Ruleset,
    pub issues: Vec<FieldIssue>,
    pub reconciliation: ReconciliationResult,
    pub notice: Option<PersistenceNotice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub outcome: SubmitOutcome,
    pub view: WizardView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubEntityMutation {
    pub collection: SubEntityKind,
    pub local_id: LocalId,
    pub view: WizardView,
}

#[derive(Debug, thiserror::Error)]
pub enum WizardServiceError {
    #[error("collection '{collection}' is not part of the {application_type} flow")]
    CollectionNotAllowed {
        application_type: ApplicationType,
        collection: SubEntityKind,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{collection} entry rejected with {} issue(s)", .issues.len())]
    InvalidSubEntity {
        collection: SubEntityKind,
        issues: Vec<FieldIssue>,
    },
    #[error("{0} has not reached the offer step")]
    NotFinalized(ApplicationType),
    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// Composes controllers, the registry, reconciliation, persistence and pricing.
///
/// Entry points are serialised by one mutex. Every mutation applies the
/// change, regenerates the ruleset, reconciles and then schedules a save.
pub struct WizardService<S, P> {
    persistence: PersistencePort<S>,
    pricing: Arc<P>,
    sessions: Mutex<HashMap<ApplicationType, StepController>>,
}

impl<S, P> WizardService<S, P>
where
    S: KeyValueStore + 'static,
    P: PricingCollaborator + 'static,
{
    pub fn new(persistence: PersistencePort<S>, pricing: Arc<P>) -> Self {
        Self {
            persistence,
            pricing,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn persistence(&self) -> &PersistencePort<S> {
        &self.persistence
    }

    /// Resume a saved application or start a fresh one at step 1.
    pub fn open(&self, application_type: ApplicationType) -> WizardView {
        let mut sessions = self.lock();
        let created = !sessions.contains_key(&application_type);
        let controller = self.session(&mut sessions, application_type);
        let mut view = self.view(controller);
        if created {
            self.persistence.schedule_save(controller.application());
        }
        view.notice = self.persistence.take_notice();
        view
    }

    /// Apply a field patch without validation; `None` clears a field.
    pub fn set_answers(
        &self,
        application_type: ApplicationType,
        patch: &BTreeMap<String, Option<AnswerValue>>,
    ) -> WizardView {
        self.mutate(application_type, |controller| controller.apply_patch(patch))
    }

    pub fn submit(
        &self,
        application_type: ApplicationType,
        step: u8,
        answers: &Answers,
    ) -> SubmitResponse {
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);
        let outcome = controller.submit(step, answers);
        self.settle(&mut sessions, application_type, outcome)
    }

    pub fn back(&self, application_type: ApplicationType) -> WizardView {
        self.mutate(application_type, |controller| {
            controller.back();
        })
    }

    /// Called by the authentication collaborator once sign-in succeeds.
    pub fn complete_authentication(
        &self,
        application_type: ApplicationType,
        session: &AuthSession,
    ) -> SubmitResponse {
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);
        let resumed = controller.complete_authentication(session);

        match resumed {
            Some(outcome) => self.settle(&mut sessions, application_type, outcome),
            None => {
                let step = controller.application().current_step;
                let view = self.finish(controller);
                let outcome = match view.state {
                    WizardState::Submitted => SubmitOutcome::Submitted,
                    _ => SubmitOutcome::Advanced { step },
                };
                SubmitResponse { outcome, view }
            }
        }
    }

    pub fn cancel_authentication(&self, application_type: ApplicationType) -> WizardView {
        self.mutate(application_type, StepController::cancel_authentication)
    }

    pub fn create_sub_entity(
        &self,
        application_type: ApplicationType,
        collection: SubEntityKind,
        parent_owner_id: Option<LocalId>,
        fields: &Answers,
    ) -> Result<SubEntityMutation, WizardServiceError> {
        Self::check_collection(application_type, collection)?;
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);

        let mut session = controller.registry().open_create(collection, parent_owner_id)?;
        session.apply(fields);
        let local_id = self.commit(controller, application_type, session)?;
        Ok(self.sub_entity_mutation(controller, collection, local_id))
    }

    pub fn update_sub_entity(
        &self,
        application_type: ApplicationType,
        collection: SubEntityKind,
        local_id: LocalId,
        fields: &Answers,
    ) -> Result<SubEntityMutation, WizardServiceError> {
        Self::check_collection(application_type, collection)?;
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);

        let mut session = controller.registry().open_edit(collection, local_id)?;
        session.draft = fields.clone();
        let local_id = self.commit(controller, application_type, session)?;
        Ok(self.sub_entity_mutation(controller, collection, local_id))
    }

    pub fn delete_sub_entity(
        &self,
        application_type: ApplicationType,
        collection: SubEntityKind,
        local_id: LocalId,
    ) -> Result<SubEntityMutation, WizardServiceError> {
        Self::check_collection(application_type, collection)?;
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);

        controller.registry_mut().delete(collection, local_id)?;
        Ok(self.sub_entity_mutation(controller, collection, local_id))
    }

    /// Replace the application with a fresh one, keeping the sign-in state.
    pub fn restart(&self, application_type: ApplicationType) -> WizardView {
        let mut sessions = self.lock();
        let previous = self.session(&mut sessions, application_type).application().clone();

        let mut fresh = Application::new(application_type);
        fresh.is_logged_in = previous.is_logged_in;
        fresh.profile = previous.profile;
        tracing::info!(flow = %application_type, "application restarted");

        let controller = self.session(&mut sessions, application_type);
        *controller = StepController::from_application(fresh);
        self.finish(controller)
    }

    /// Ask the pricing collaborator for an offer once the flow is finalized.
    pub fn quote(
        &self,
        application_type: ApplicationType,
    ) -> Result<PricingQuote, WizardServiceError> {
        let snapshot = {
            let mut sessions = self.lock();
            self.session(&mut sessions, application_type)
                .finalized_snapshot()
                .ok_or(WizardServiceError::NotFinalized(application_type))?
        };
        Ok(self.pricing.quote(application_type, &snapshot)?)
    }

    pub fn retry_persistence(&self) -> SaveStatus {
        self.persistence.retry()
    }

    fn mutate<F>(&self, application_type: ApplicationType, apply: F) -> WizardView
    where
        F: FnOnce(&mut StepController),
    {
        let mut sessions = self.lock();
        let controller = self.session(&mut sessions, application_type);
        apply(controller);
        self.finish(controller)
    }

    fn commit(
        &self,
        controller: &mut StepController,
        application_type: ApplicationType,
        session: EditSession,
    ) -> Result<LocalId, WizardServiceError> {
        let collection = session.kind;
        let ruleset = generate_sub_entity_ruleset(application_type, collection, &session.draft);
        match controller.registry_mut().commit(session, &ruleset) {
            Ok(local_id) => {
                tracing::debug!(
                    flow = %application_type,
                    %collection,
                    %local_id,
                    "sub-entity saved"
                );
                Ok(local_id)
            }
            Err(CommitError::Invalid { issues, .. }) => {
                Err(WizardServiceError::InvalidSubEntity { collection, issues })
            }
            Err(CommitError::Registry(err)) => Err(err.into()),
        }
    }

    fn sub_entity_mutation(
        &self,
        controller: &StepController,
        collection: SubEntityKind,
        local_id: LocalId,
    ) -> SubEntityMutation {
        let view = self.finish(controller);
        SubEntityMutation {
            collection,
            local_id,
            view,
        }
    }

    /// Follow a reroute into its target flow, seeding the shared answers.
    fn settle(
        &self,
        sessions: &mut HashMap<ApplicationType, StepController>,
        source: ApplicationType,
        outcome: SubmitOutcome,
    ) -> SubmitResponse {
        let SubmitOutcome::Rerouted {
            application_type: target,
            ref seed,
            ..
        } = outcome
        else {
            let controller = self.session(sessions, source);
            let view = if outcome.is_accepted() {
                self.finish(controller)
            } else {
                self.view(controller)
            };
            return SubmitResponse { outcome, view };
        };

        let source_controller = self.session(sessions, source);
        let logged_in = source_controller.application().is_logged_in;
        self.persistence.schedule_save(source_controller.application());

        let controller = self.session(sessions, target);
        controller.seed(seed);
        if logged_in {
            controller.set_logged_in(true);
        }
        let view = self.finish(controller);
        SubmitResponse { outcome, view }
    }

    fn session<'a>(
        &self,
        sessions: &'a mut HashMap<ApplicationType, StepController>,
        application_type: ApplicationType,
    ) -> &'a mut StepController {
        sessions.entry(application_type).or_insert_with(|| {
            let application = self
                .persistence
                .load(application_type)
                .unwrap_or_else(|| Application::new(application_type));
            StepController::from_application(application)
        })
    }

    /// Render the view, then schedule the save and pick up any notice it raised.
    fn finish(&self, controller: &StepController) -> WizardView {
        let mut view = self.view(controller);
        self.persistence.schedule_save(controller.application());
        view.notice = self.persistence.take_notice();
        view
    }

    fn view(&self, controller: &StepController) -> WizardView {
        let application = controller.application();
        let ruleset = controller.ruleset();
        let issues = validate(&ruleset, &application.answers);
        let reconciliation = reconcile(application);
        WizardView {
            application_type: application.application_type,
            current_step: application.current_step,
            step_count: controller.step_count(),
            state: application.state,
            is_logged_in: application.is_logged_in,
            answers: application.answers.clone(),
            sub_entities: application.sub_entities.clone(),
            ruleset,
            issues,
            reconciliation,
            notice: None,
        }
    }

    fn check_collection(
        application_type: ApplicationType,
        collection: SubEntityKind,
    ) -> Result<(), WizardServiceError> {
        if collection.allowed_for(application_type) {
            Ok(())
        } else {
            Err(WizardServiceError::CollectionNotAllowed {
                application_type,
                collection,
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ApplicationType, StepController>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
