use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::domain::{AnswerValue, Answers, ApplicationType};
use super::rules::{validate, FieldIssue, Ruleset};

/// Repeatable child record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubEntityKind {
    #[serde(rename = "income_sources")]
    IncomeSource,
    #[serde(rename = "additional_incomes")]
    AdditionalIncome,
    #[serde(rename = "obligations")]
    Obligation,
    #[serde(rename = "co_borrowers")]
    CoBorrower,
    #[serde(rename = "existing_mortgages")]
    ExistingMortgage,
    #[serde(rename = "existing_credits")]
    ExistingCredit,
}

impl SubEntityKind {
    pub const ALL: [SubEntityKind; 6] = [
        SubEntityKind::IncomeSource,
        SubEntityKind::AdditionalIncome,
        SubEntityKind::Obligation,
        SubEntityKind::CoBorrower,
        SubEntityKind::ExistingMortgage,
        SubEntityKind::ExistingCredit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SubEntityKind::IncomeSource => "income_sources",
            SubEntityKind::AdditionalIncome => "additional_incomes",
            SubEntityKind::Obligation => "obligations",
            SubEntityKind::CoBorrower => "co_borrowers",
            SubEntityKind::ExistingMortgage => "existing_mortgages",
            SubEntityKind::ExistingCredit => "existing_credits",
        }
    }

    /// Refinance-only collections are hidden from the other flows.
    pub fn allowed_for(&self, application_type: ApplicationType) -> bool {
        match self {
            SubEntityKind::ExistingMortgage => {
                application_type == ApplicationType::MortgageRefinance
            }
            SubEntityKind::ExistingCredit => application_type == ApplicationType::CreditRefinance,
            _ => true,
        }
    }
}

impl fmt::Display for SubEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection '{0}'")]
pub struct UnknownCollection(pub String);

impl FromStr for SubEntityKind {
    type Err = UnknownCollection;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        SubEntityKind::ALL
            .into_iter()
            .find(|kind| kind.label() == normalized)
            .ok_or_else(|| UnknownCollection(value.to_string()))
    }
}

/// Identifier unique within one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEntity {
    pub local_id: LocalId,
    pub fields: Answers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_owner_id: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no {kind} entry with id {id}")]
    NotFound { kind: SubEntityKind, id: LocalId },
    #[error("co-borrower {0} does not exist")]
    UnknownOwner(LocalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Create,
    Edit,
}

/// A modal form's uncommitted draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditSession {
    pub kind: SubEntityKind,
    pub local_id: LocalId,
    pub mode: SessionMode,
    pub draft: Answers,
    pub parent_owner_id: Option<LocalId>,
}

impl EditSession {
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<AnswerValue>) {
        self.draft.insert(field, value);
    }

    pub fn apply(&mut self, fields: &Answers) {
        self.draft.merge(fields);
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitError {
    /// The draft failed validation; the session is handed back unchanged.
    #[error("draft for {} has {} validation issue(s)", .session.kind, .issues.len())]
    Invalid {
        session: Box<EditSession>,
        issues: Vec<FieldIssue>,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Arena of sub-entities, one ordered list per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubEntityRegistry(BTreeMap<SubEntityKind, Vec<SubEntity>>);

impl SubEntityRegistry {
    pub fn list(&self, kind: SubEntityKind) -> &[SubEntity] {
        self.0.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, kind: SubEntityKind, id: LocalId) -> Option<&SubEntity> {
        self.list(kind).iter().find(|entity| entity.local_id == id)
    }

    pub fn is_empty(&self, kind: SubEntityKind) -> bool {
        self.list(kind).is_empty()
    }

    /// Smallest id not held by any current entry of the collection.
    pub fn next_local_id(&self, kind: SubEntityKind) -> LocalId {
        let taken: BTreeSet<u32> = self.list(kind).iter().map(|entity| entity.local_id.0).collect();
        let mut candidate = 0;
        while taken.contains(&candidate) {
            candidate += 1;
        }
        LocalId(candidate)
    }

    pub fn create(&mut self, kind: SubEntityKind) -> LocalId {
        let id = self.next_local_id(kind);
        self.0.entry(kind).or_default().push(SubEntity {
            local_id: id,
            fields: Answers::new(),
            parent_owner_id: None,
        });
        id
    }

    pub fn create_with(
        &mut self,
        kind: SubEntityKind,
        fields: Answers,
        parent_owner_id: Option<LocalId>,
    ) -> Result<LocalId, RegistryError> {
        self.check_owner(parent_owner_id)?;
        let id = self.next_local_id(kind);
        self.0.entry(kind).or_default().push(SubEntity {
            local_id: id,
            fields,
            parent_owner_id,
        });
        Ok(id)
    }

    pub fn update(
        &mut self,
        kind: SubEntityKind,
        id: LocalId,
        fields: Answers,
    ) -> Result<(), RegistryError> {
        let entity = self
            .0
            .get_mut(&kind)
            .and_then(|entries| entries.iter_mut().find(|entity| entity.local_id == id))
            .ok_or(RegistryError::NotFound { kind, id })?;
        entity.fields = fields;
        Ok(())
    }

    /// Remove an entry. Deleting a co-borrower also removes every entry it owns.
    pub fn delete(&mut self, kind: SubEntityKind, id: LocalId) -> Result<SubEntity, RegistryError> {
        let entries = self
            .0
            .get_mut(&kind)
            .ok_or(RegistryError::NotFound { kind, id })?;
        let position = entries
            .iter()
            .position(|entity| entity.local_id == id)
            .ok_or(RegistryError::NotFound { kind, id })?;
        let removed = entries.remove(position);

        if kind == SubEntityKind::CoBorrower {
            let mut dependents = 0;
            for entries in self.0.values_mut() {
                let before = entries.len();
                entries.retain(|entity| entity.parent_owner_id != Some(id));
                dependents += before - entries.len();
            }
            if dependents > 0 {
                tracing::debug!(owner = %id, dependents, "removed co-borrower dependents");
            }
        }

        self.0.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }

    pub fn owned_by(&self, owner: LocalId) -> Vec<(SubEntityKind, &SubEntity)> {
        self.0
            .iter()
            .flat_map(|(kind, entries)| entries.iter().map(move |entity| (*kind, entity)))
            .filter(|(_, entity)| entity.parent_owner_id == Some(owner))
            .collect()
    }

    pub fn open_create(
        &self,
        kind: SubEntityKind,
        parent_owner_id: Option<LocalId>,
    ) -> Result<EditSession, RegistryError> {
        self.check_owner(parent_owner_id)?;
        Ok(EditSession {
            kind,
            local_id: self.next_local_id(kind),
            mode: SessionMode::Create,
            draft: Answers::new(),
            parent_owner_id,
        })
    }

    pub fn open_edit(
        &self,
        kind: SubEntityKind,
        id: LocalId,
    ) -> Result<EditSession, RegistryError> {
        let entity = self.get(kind, id).ok_or(RegistryError::NotFound { kind, id })?;
        Ok(EditSession {
            kind,
            local_id: id,
            mode: SessionMode::Edit,
            draft: entity.fields.clone(),
            parent_owner_id: entity.parent_owner_id,
        })
    }

    /// Validate the draft and write it into the collection.
    pub fn commit(
        &mut self,
        session: EditSession,
        ruleset: &Ruleset,
    ) -> Result<LocalId, CommitError> {
        let issues = validate(ruleset, &session.draft);
        if !issues.is_empty() {
            return Err(CommitError::Invalid {
                session: Box::new(session),
                issues,
            });
        }

        match session.mode {
            SessionMode::Create => {
                self.check_owner(session.parent_owner_id)?;
                // The provisional id may have been taken since the modal opened.
                let id = if self.get(session.kind, session.local_id).is_some() {
                    self.next_local_id(session.kind)
                } else {
                    session.local_id
                };
                self.0.entry(session.kind).or_default().push(SubEntity {
                    local_id: id,
                    fields: session.draft,
                    parent_owner_id: session.parent_owner_id,
                });
                Ok(id)
            }
            SessionMode::Edit => {
                self.update(session.kind, session.local_id, session.draft)?;
                Ok(session.local_id)
            }
        }
    }

    /// Discard a draft. The registry is left untouched.
    pub fn cancel(&self, session: EditSession) {
        tracing::debug!(kind = %session.kind, id = %session.local_id, "discarded draft");
    }

    fn check_owner(&self, owner: Option<LocalId>) -> Result<(), RegistryError> {
        match owner {
            Some(owner) if self.get(SubEntityKind::CoBorrower, owner).is_none() => {
                Err(RegistryError::UnknownOwner(owner))
            }
            _ => Ok(()),
        }
    }
}
