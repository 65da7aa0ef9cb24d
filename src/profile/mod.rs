/// Role-specific profile stores
///
/// Every account has exactly one profile whose shape depends on the role.
/// Callers never branch on role themselves: they ask the [`ProfileRegistry`]
/// for the store that serves a role and go through the [`ProfileStore`] trait.

mod stores;

pub use stores::{AdminProfileStore, PsychologistProfileStore, StudentProfileStore};

use crate::{
    account::Role,
    error::{PortalError, PortalResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

/// Name, demographics and free-form bio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfo {
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Bio must be at most 2000 characters"))]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionalInfo {
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub qualifications: Vec<String>,
    #[serde(default)]
    #[validate(range(max = 80, message = "Years of experience is out of range"))]
    pub years_of_experience: Option<u32>,
    #[serde(default)]
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AcademicInfo {
    #[validate(length(min = 1, message = "Student number is required"))]
    pub student_number: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = 10, message = "Year of study must be between 1 and 10"))]
    pub year_of_study: Option<u8>,
}

/// Contact details; `email` always mirrors the account email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[validate(email(message = "Email is invalid"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub office_location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminProfile {
    pub id: String,
    pub account_id: String,
    pub personal_info: PersonalInfo,
    pub contact_info: ContactInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsychologistProfile {
    pub id: String,
    pub account_id: String,
    pub personal_info: PersonalInfo,
    pub professional_info: ProfessionalInfo,
    pub contact_info: ContactInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub account_id: String,
    pub personal_info: PersonalInfo,
    pub academic_info: AcademicInfo,
    pub contact_info: ContactInfo,
    /// Account id of the enrolling psychologist
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile of any role
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Profile {
    Admin(AdminProfile),
    Psychologist(PsychologistProfile),
    Student(StudentProfile),
}

impl Profile {
    pub fn account_id(&self) -> &str {
        match self {
            Profile::Admin(p) => &p.account_id,
            Profile::Psychologist(p) => &p.account_id,
            Profile::Student(p) => &p.account_id,
        }
    }

    pub fn personal_info(&self) -> &PersonalInfo {
        match self {
            Profile::Admin(p) => &p.personal_info,
            Profile::Psychologist(p) => &p.personal_info,
            Profile::Student(p) => &p.personal_info,
        }
    }

    pub fn display_name(&self) -> String {
        let personal = self.personal_info();
        format!("{} {}", personal.first_name, personal.last_name)
    }
}

/// Partial profile update; sections not owned by the role are rejected
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(nested)]
    pub personal_info: Option<PersonalInfo>,
    #[validate(nested)]
    pub contact_info: Option<ContactInfo>,
    #[validate(nested)]
    pub professional_info: Option<ProfessionalInfo>,
    #[validate(nested)]
    pub academic_info: Option<AcademicInfo>,
}

/// Storage for one role's profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Role this store serves
    fn role(&self) -> Role;

    async fn find_by_account(&self, account_id: &str) -> PortalResult<Option<Profile>>;

    async fn update(&self, account_id: &str, update: ProfileUpdate) -> PortalResult<Profile>;

    async fn get_by_account(&self, account_id: &str) -> PortalResult<Profile> {
        self.find_by_account(account_id).await?.ok_or_else(|| {
            PortalError::NotFound(format!(
                "No {} profile for account {}",
                self.role().as_str(),
                account_id
            ))
        })
    }
}

/// Role to store lookup table
#[derive(Clone)]
pub struct ProfileRegistry {
    stores: HashMap<Role, Arc<dyn ProfileStore>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
        }
    }

    /// Registry with the three built-in stores over one pool
    pub fn with_sqlite(db: SqlitePool) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AdminProfileStore::new(db.clone())));
        registry.register(Arc::new(PsychologistProfileStore::new(db.clone())));
        registry.register(Arc::new(StudentProfileStore::new(db)));
        registry
    }

    pub fn register(&mut self, store: Arc<dyn ProfileStore>) {
        self.stores.insert(store.role(), store);
    }

    pub fn for_role(&self, role: Role) -> PortalResult<Arc<dyn ProfileStore>> {
        self.stores.get(&role).cloned().ok_or_else(|| {
            PortalError::Internal(format!("No profile store registered for {}", role.as_str()))
        })
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> PortalResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PortalError::Internal(format!("Failed to encode profile: {}", e)))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> PortalResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| PortalError::Internal(format!("Stored profile is corrupt: {}", e)))
}

/// Reject a contact update that tries to diverge from the account email
pub(crate) fn check_contact_email(current: &ContactInfo, update: &ContactInfo) -> PortalResult<()> {
    if !current.email.eq_ignore_ascii_case(update.email.trim()) {
        return Err(PortalError::Validation(
            "Contact email must match the account email".to_string(),
        ));
    }
    Ok(())
}
