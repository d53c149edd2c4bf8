use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::collaborators::{AnswerSnapshot, AuthSession};
use super::domain::{
    AnswerValue, Answers, Application, ApplicationType, Destination, StepKey, WizardState,
};
use super::reconcile::{reconcile, Violation};
use super::registry::SubEntityRegistry;
use super::rules::{
    declared_fields, generate_ruleset, step_count, validate, Condition, FieldIssue, Ruleset,
    RENOVATION_PURPOSES,
};
use super::sentinel::SentinelPolicy;

/// Overrides the default `step + 1` destination when `when` holds.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRule {
    pub step: u8,
    pub when: Condition,
    pub destination: Destination,
}

pub fn branch_rules(application_type: ApplicationType) -> Vec<BranchRule> {
    match application_type {
        ApplicationType::CreditCalculation => vec![BranchRule {
            step: 1,
            when: Condition::All(vec![
                Condition::OneOf {
                    field: "purpose_of_loan",
                    values: RENOVATION_PURPOSES,
                },
                Condition::IsTrue {
                    field: "have_mortgage",
                },
            ]),
            destination: Destination::Service {
                application_type: ApplicationType::MortgageRefinance,
                step: 1,
            },
        }],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Advanced {
        step: u8,
    },
    /// Continue in another flow, carrying the answers its step declares.
    Rerouted {
        application_type: ApplicationType,
        step: u8,
        seed: Answers,
    },
    AuthenticationRequired {
        pending: Destination,
    },
    Submitted,
    Rejected {
        issues: Vec<FieldIssue>,
        violations: Vec<Violation>,
    },
    StepMismatch {
        expected: u8,
        received: u8,
    },
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(
            self,
            SubmitOutcome::Rejected { .. } | SubmitOutcome::StepMismatch { .. }
        )
    }
}

/// Owns one application's step position and state transitions.
#[derive(Debug, Clone)]
pub struct StepController {
    application: Application,
    branches: Vec<BranchRule>,
}

impl StepController {
    pub fn new(application_type: ApplicationType) -> Self {
        Self::from_application(Application::new(application_type))
    }

    pub fn from_application(application: Application) -> Self {
        let branches = branch_rules(application.application_type);
        Self {
            application,
            branches,
        }
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn into_application(self) -> Application {
        self.application
    }

    pub fn step_count(&self) -> u8 {
        step_count(self.application.application_type)
    }

    pub fn step_key(&self) -> StepKey {
        self.application.step_key()
    }

    pub fn ruleset(&self) -> Ruleset {
        generate_ruleset(self.step_key(), &self.application.answers)
    }

    pub fn registry(&self) -> &SubEntityRegistry {
        &self.application.sub_entities
    }

    pub fn registry_mut(&mut self) -> &mut SubEntityRegistry {
        self.application.touch();
        &mut self.application.sub_entities
    }

    pub fn set_logged_in(&mut self, logged_in: bool) {
        self.application.is_logged_in = logged_in;
    }

    pub fn set_answer(&mut self, field: impl Into<String>, value: impl Into<AnswerValue>) {
        self.application.answers.insert(field, value);
        self.application.touch();
    }

    /// Apply a field patch; `None` clears the field.
    pub fn apply_patch(&mut self, patch: &BTreeMap<String, Option<AnswerValue>>) {
        for (field, value) in patch {
            match value {
                Some(value) => self.application.answers.insert(field.clone(), value.clone()),
                None => {
                    self.application.answers.remove(field);
                }
            }
        }
        self.application.touch();
    }

    /// Merge answers seeded by a reroute from another flow.
    pub fn seed(&mut self, seed: &Answers) {
        self.application.answers.merge(seed);
        self.application.touch();
    }

    pub fn submit(&mut self, step: u8, answers: &Answers) -> SubmitOutcome {
        let expected = self.application.current_step;
        if step != expected || self.application.state != WizardState::InProgress {
            tracing::debug!(
                expected,
                received = step,
                state = self.application.state.label(),
                "submit ignored"
            );
            return SubmitOutcome::StepMismatch {
                expected,
                received: step,
            };
        }

        let candidate = self.application.answers.merged(answers);
        let key = self.step_key();
        let ruleset = generate_ruleset(key, &candidate);
        let issues = validate(&ruleset, &candidate);

        let mut probe = self.application.clone();
        probe.answers = candidate.clone();
        let violations = reconcile(&probe).violations_for_step(step);

        if !issues.is_empty() || !violations.is_empty() {
            tracing::debug!(
                step = %key,
                issues = issues.len(),
                violations = violations.len(),
                "submit rejected"
            );
            return SubmitOutcome::Rejected { issues, violations };
        }

        self.application.answers = candidate;
        self.application.touch();

        let destination = self.destination_after(step);
        if !self.application.is_logged_in && past_first_step(destination) {
            tracing::info!(step = %key, ?destination, "authentication required before advancing");
            self.application.state = WizardState::AwaitingAuthentication {
                pending: destination,
            };
            return SubmitOutcome::AuthenticationRequired {
                pending: destination,
            };
        }

        self.transition(destination)
    }

    /// Mark the user signed in and resume an interrupted transition.
    pub fn complete_authentication(&mut self, session: &AuthSession) -> Option<SubmitOutcome> {
        self.application.is_logged_in = true;
        self.application.profile = Some(session.profile.clone());
        self.application.touch();

        match self.application.state {
            WizardState::AwaitingAuthentication { pending } => {
                tracing::info!(
                    flow = %self.application.application_type,
                    ?pending,
                    "resuming after authentication"
                );
                self.application.state = WizardState::InProgress;
                Some(self.transition(pending))
            }
            _ => None,
        }
    }

    pub fn cancel_authentication(&mut self) {
        if matches!(
            self.application.state,
            WizardState::AwaitingAuthentication { .. }
        ) {
            self.application.state = WizardState::InProgress;
            self.application.touch();
        }
    }

    /// Step back without validation. Never goes below step 1.
    pub fn back(&mut self) -> u8 {
        match self.application.state {
            WizardState::Submitted | WizardState::AwaitingAuthentication { .. } => {
                self.application.state = WizardState::InProgress;
            }
            WizardState::InProgress => {
                self.application.current_step =
                    self.application.current_step.saturating_sub(1).max(1);
            }
        }
        self.application.touch();
        tracing::info!(
            flow = %self.application.application_type,
            step = self.application.current_step,
            "moved back"
        );
        self.application.current_step
    }

    /// Available once the offer step or the submitted state is reached.
    pub fn finalized_snapshot(&self) -> Option<AnswerSnapshot> {
        let at_terminal = self.application.current_step >= self.step_count();
        if !(at_terminal || self.application.state == WizardState::Submitted) {
            return None;
        }
        Some(AnswerSnapshot {
            application_type: self.application.application_type,
            answers: Arc::new(self.application.answers.clone()),
            sub_entities: Arc::new(self.application.sub_entities.clone()),
            taken_at: Utc::now(),
        })
    }

    pub fn policy(&self) -> SentinelPolicy {
        SentinelPolicy::for_application(self.application.application_type)
    }

    fn destination_after(&self, step: u8) -> Destination {
        let policy = self.policy();
        let branched = self
            .branches
            .iter()
            .filter(|rule| rule.step == step)
            .find(|rule| rule.when.evaluate(&self.application.answers, &policy) == Some(true))
            .map(|rule| rule.destination);

        branched.unwrap_or_else(|| {
            if step >= self.step_count() {
                Destination::Submitted
            } else {
                Destination::Step { step: step + 1 }
            }
        })
    }

    fn transition(&mut self, destination: Destination) -> SubmitOutcome {
        let flow = self.application.application_type;
        self.application.touch();
        match destination {
            Destination::Step { step } => {
                self.application.current_step = step;
                tracing::info!(flow = %flow, step, "advanced");
                SubmitOutcome::Advanced { step }
            }
            Destination::Submitted => {
                self.application.state = WizardState::Submitted;
                tracing::info!(flow = %flow, "application submitted");
                SubmitOutcome::Submitted
            }
            Destination::Service {
                application_type,
                step,
            } => {
                let target = StepKey::new(application_type, step);
                let seed = self
                    .application
                    .answers
                    .retain_fields(declared_fields(target));
                tracing::info!(from = %flow, to = %target, seeded = seed.len(), "rerouted");
                SubmitOutcome::Rerouted {
                    application_type,
                    step,
                    seed,
                }
            }
        }
    }
}

fn past_first_step(destination: Destination) -> bool {
    match destination {
        Destination::Step { step } | Destination::Service { step, .. } => step > 1,
        Destination::Submitted => true,
    }
}
