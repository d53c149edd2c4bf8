//! Multi-step application wizard and its dynamic validation engine.
//!
//! Answers flow through the [`controller::StepController`], which merges
//! them into the aggregate [`domain::Application`], regenerates the step's
//! ruleset, reconciles cross-entity invariants and hands the record to the
//! [`persistence::PersistencePort`].

pub mod catalog;
pub mod collaborators;
pub mod controller;
pub mod domain;
pub mod persistence;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod rules;
pub mod sentinel;
pub mod service;

#[cfg(test)]
mod tests;

pub use catalog::{
    CatalogError, Locale, MessageCatalogResolver, MessageSource, OptionCatalogClient, OptionItem,
    OptionSet, OptionSource, OptionsView,
};
pub use collaborators::{
    AnswerSnapshot, AuthSession, PricingCollaborator, PricingError, PricingQuote, UserProfile,
};
pub use controller::{BranchRule, StepController, SubmitOutcome};
pub use domain::{
    AnswerValue, Answers, Application, ApplicationType, Destination, StepKey, WizardState,
};
pub use persistence::{
    storage_key, KeyValueStore, MemoryStore, PersistenceNotice, PersistencePort, SaveStatus,
    StoreError,
};
pub use reconcile::{reconcile, ReconciliationResult, Violation, Warning};
pub use registry::{
    CommitError, EditSession, LocalId, RegistryError, SubEntity, SubEntityKind, SubEntityRegistry,
};
pub use router::{wizard_router, WizardApi};
pub use rules::{
    generate_ruleset, generate_sub_entity_ruleset, validate, FieldIssue, FieldRule, Ruleset,
};
pub use sentinel::{
    is_none_sentinel, normalize_income_source, IncomeSourceKind, SentinelKind, SentinelPolicy,
};
pub use service::{
    SubEntityMutation, SubmitResponse, WizardService, WizardServiceError, WizardView,
};
