//! Roles, permissions and resource types
//!
//! The role table is static. A role's permissions never include an action on
//! a resource type the role is barred from.

use lexguard_common::{SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Resource Types
// =============================================================================

/// Resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    DossierClient,
    Acte,
    Minutier,
    Document,
    Facture,
    Cours,
    Quiz,
    Evaluation,
    AuditLog,
    Utilisateur,
    EncryptionKey,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DossierClient => "dossier_client",
            Self::Acte => "acte",
            Self::Minutier => "minutier",
            Self::Document => "document",
            Self::Facture => "facture",
            Self::Cours => "cours",
            Self::Quiz => "quiz",
            Self::Evaluation => "evaluation",
            Self::AuditLog => "audit_log",
            Self::Utilisateur => "utilisateur",
            Self::EncryptionKey => "encryption_key",
            Self::Other(name) => name,
        }
    }

    /// Known variant for a name-only value, so `Other("acte")` and `Acte`
    /// get the same decisions.
    pub fn canonical(&self) -> ResourceType {
        match self {
            Self::Other(name) => Self::from(name.as_str()),
            known => known.clone(),
        }
    }

    /// Default classification of data of this type
    pub fn classification(&self) -> DataClassification {
        match self.canonical() {
            Self::DossierClient | Self::Acte | Self::Minutier => DataClassification::Secret,
            Self::Document | Self::Facture | Self::EncryptionKey => DataClassification::Confidential,
            Self::Cours | Self::Quiz => DataClassification::Public,
            Self::Evaluation | Self::AuditLog | Self::Utilisateur | Self::Other(_) => {
                DataClassification::Internal
            }
        }
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "dossier_client" => Self::DossierClient,
            "acte" => Self::Acte,
            "minutier" => Self::Minutier,
            "document" => Self::Document,
            "facture" => Self::Facture,
            "cours" => Self::Cours,
            "quiz" => Self::Quiz,
            "evaluation" => Self::Evaluation,
            "audit_log" => Self::AuditLog,
            "utilisateur" => Self::Utilisateur,
            "encryption_key" => Self::EncryptionKey,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ResourceType> for String {
    fn from(r: ResourceType) -> Self {
        match r {
            ResourceType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Secret,
}

impl DataClassification {
    /// Confidential and secret data is stored encrypted
    pub fn requires_encryption(&self) -> bool {
        matches!(self, Self::Confidential | Self::Secret)
    }
}

// =============================================================================
// Permissions
// =============================================================================

/// Permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadDossier,
    WriteDossier,
    DeleteDossier,
    ExportDossier,
    ReadActe,
    WriteActe,
    SignActe,
    ReadMinutier,
    WriteMinutier,
    ReadDocument,
    WriteDocument,
    DeleteDocument,
    ReadFacture,
    WriteFacture,
    ReadCours,
    ManageCours,
    ReadQuiz,
    SubmitEvaluation,
    GradeEvaluation,
    ReadAuditLog,
    ManageUsers,
    ManageKeys,
}

/// Kind of action a permission authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction {
    Read,
    Write,
    Delete,
    Export,
}

impl Permission {
    pub const ALL: [Permission; 22] = [
        Self::ReadDossier,
        Self::WriteDossier,
        Self::DeleteDossier,
        Self::ExportDossier,
        Self::ReadActe,
        Self::WriteActe,
        Self::SignActe,
        Self::ReadMinutier,
        Self::WriteMinutier,
        Self::ReadDocument,
        Self::WriteDocument,
        Self::DeleteDocument,
        Self::ReadFacture,
        Self::WriteFacture,
        Self::ReadCours,
        Self::ManageCours,
        Self::ReadQuiz,
        Self::SubmitEvaluation,
        Self::GradeEvaluation,
        Self::ReadAuditLog,
        Self::ManageUsers,
        Self::ManageKeys,
    ];

    /// Resource type the permission applies to
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::ReadDossier | Self::WriteDossier | Self::DeleteDossier | Self::ExportDossier => {
                ResourceType::DossierClient
            }
            Self::ReadActe | Self::WriteActe | Self::SignActe => ResourceType::Acte,
            Self::ReadMinutier | Self::WriteMinutier => ResourceType::Minutier,
            Self::ReadDocument | Self::WriteDocument | Self::DeleteDocument => ResourceType::Document,
            Self::ReadFacture | Self::WriteFacture => ResourceType::Facture,
            Self::ReadCours | Self::ManageCours => ResourceType::Cours,
            Self::ReadQuiz => ResourceType::Quiz,
            Self::SubmitEvaluation | Self::GradeEvaluation => ResourceType::Evaluation,
            Self::ReadAuditLog => ResourceType::AuditLog,
            Self::ManageUsers => ResourceType::Utilisateur,
            Self::ManageKeys => ResourceType::EncryptionKey,
        }
    }

    pub fn action(&self) -> PermissionAction {
        match self {
            Self::ReadDossier
            | Self::ReadActe
            | Self::ReadMinutier
            | Self::ReadDocument
            | Self::ReadFacture
            | Self::ReadCours
            | Self::ReadQuiz
            | Self::ReadAuditLog => PermissionAction::Read,
            Self::DeleteDossier | Self::DeleteDocument => PermissionAction::Delete,
            Self::ExportDossier => PermissionAction::Export,
            _ => PermissionAction::Write,
        }
    }
}

// =============================================================================
// Roles
// =============================================================================

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrateur,
    Avocat,
    Notaire,
    Juriste,
    Assistant,
    Formateur,
    Etudiant,
}

use Permission::*;

const AVOCAT: &[Permission] = &[
    ReadDossier,
    WriteDossier,
    DeleteDossier,
    ExportDossier,
    ReadActe,
    ReadDocument,
    WriteDocument,
    DeleteDocument,
    ReadFacture,
    WriteFacture,
    ReadCours,
    ReadQuiz,
];

const NOTAIRE: &[Permission] = &[
    ReadActe,
    WriteActe,
    SignActe,
    ReadMinutier,
    WriteMinutier,
    ReadDossier,
    WriteDossier,
    ReadDocument,
    WriteDocument,
    DeleteDocument,
    ReadFacture,
    WriteFacture,
    ReadCours,
];

const JURISTE: &[Permission] = &[
    ReadDossier,
    WriteDossier,
    ReadActe,
    ReadDocument,
    WriteDocument,
    ReadCours,
    ReadQuiz,
];

const ASSISTANT: &[Permission] = &[ReadDossier, ReadDocument, WriteDocument, ReadFacture, WriteFacture];

const FORMATEUR: &[Permission] = &[ReadCours, ManageCours, ReadQuiz, GradeEvaluation, ReadDocument];

const ETUDIANT: &[Permission] = &[ReadCours, ReadQuiz, SubmitEvaluation];

impl Role {
    pub const ALL: [Role; 7] = [
        Self::Administrateur,
        Self::Avocat,
        Self::Notaire,
        Self::Juriste,
        Self::Assistant,
        Self::Formateur,
        Self::Etudiant,
    ];

    pub fn parse(name: &str) -> SecurityResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "administrateur" => Ok(Self::Administrateur),
            "avocat" => Ok(Self::Avocat),
            "notaire" => Ok(Self::Notaire),
            "juriste" => Ok(Self::Juriste),
            "assistant" => Ok(Self::Assistant),
            "formateur" => Ok(Self::Formateur),
            "etudiant" => Ok(Self::Etudiant),
            other => Err(SecurityError::InvalidContext(format!("unknown role '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrateur => "administrateur",
            Self::Avocat => "avocat",
            Self::Notaire => "notaire",
            Self::Juriste => "juriste",
            Self::Assistant => "assistant",
            Self::Formateur => "formateur",
            Self::Etudiant => "etudiant",
        }
    }

    /// Permissions granted by the role table
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::Administrateur => &Permission::ALL,
            Self::Avocat => AVOCAT,
            Self::Notaire => NOTAIRE,
            Self::Juriste => JURISTE,
            Self::Assistant => ASSISTANT,
            Self::Formateur => FORMATEUR,
            Self::Etudiant => ETUDIANT,
        }
    }

    /// Deny-list, checked after the permission itself
    pub fn is_barred_from(&self, resource: &ResourceType) -> bool {
        use ResourceType as R;
        let resource = &resource.canonical();
        match self {
            Self::Administrateur => false,
            Self::Avocat => matches!(resource, R::Minutier),
            Self::Notaire => false,
            Self::Juriste => matches!(resource, R::AuditLog | R::Utilisateur | R::EncryptionKey),
            Self::Assistant => matches!(
                resource,
                R::AuditLog | R::Minutier | R::Utilisateur | R::EncryptionKey
            ),
            Self::Formateur => matches!(
                resource,
                R::DossierClient | R::Acte | R::Minutier | R::Facture | R::EncryptionKey
            ),
            Self::Etudiant => matches!(
                resource,
                R::DossierClient
                    | R::Acte
                    | R::Minutier
                    | R::Facture
                    | R::AuditLog
                    | R::Utilisateur
                    | R::EncryptionKey
            ),
        }
    }

    /// Grants in the role table that the deny-list contradicts
    pub fn orphaned_permissions(&self) -> Vec<Permission> {
        self.permissions()
            .iter()
            .copied()
            .filter(|p| self.is_barred_from(&p.resource_type()))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
