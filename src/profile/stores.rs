/// SQLite-backed profile stores, one per role
use super::{
    check_contact_email, from_json, to_json, AcademicInfo, AdminProfile, ContactInfo,
    PersonalInfo, ProfessionalInfo, Profile, ProfileStore, ProfileUpdate, PsychologistProfile,
    StudentProfile,
};
use crate::{
    account::Role,
    error::{PortalError, PortalResult},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

fn reject_section(present: bool, section: &str, role: Role) -> PortalResult<()> {
    if present {
        return Err(PortalError::Validation(format!(
            "{} does not apply to {} profiles",
            section,
            role.as_str()
        )));
    }
    Ok(())
}

fn merge_contact(current: &ContactInfo, update: Option<ContactInfo>) -> PortalResult<ContactInfo> {
    match update {
        Some(contact) => {
            check_contact_email(current, &contact)?;
            Ok(ContactInfo {
                email: current.email.clone(),
                ..contact
            })
        }
        None => Ok(current.clone()),
    }
}

/// Admin profiles
pub struct AdminProfileStore {
    db: SqlitePool,
}

impl AdminProfileStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: &str,
        personal_info: PersonalInfo,
        contact_info: ContactInfo,
    ) -> PortalResult<AdminProfile> {
        let now = Utc::now();
        let profile = AdminProfile {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            personal_info,
            contact_info,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO admin_profile (id, account_id, personal_info, contact_info, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.account_id)
        .bind(to_json(&profile.personal_info)?)
        .bind(to_json(&profile.contact_info)?)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(profile)
    }

    fn from_row(row: &SqliteRow) -> PortalResult<AdminProfile> {
        let personal: String = row.get("personal_info");
        let contact: String = row.get("contact_info");
        Ok(AdminProfile {
            id: row.get("id"),
            account_id: row.get("account_id"),
            personal_info: from_json(&personal)?,
            contact_info: from_json(&contact)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn find(&self, account_id: &str) -> PortalResult<Option<AdminProfile>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, personal_info, contact_info, created_at, updated_at
            FROM admin_profile WHERE account_id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }
}

#[async_trait]
impl ProfileStore for AdminProfileStore {
    fn role(&self) -> Role {
        Role::Admin
    }

    async fn find_by_account(&self, account_id: &str) -> PortalResult<Option<Profile>> {
        Ok(self.find(account_id).await?.map(Profile::Admin))
    }

    async fn update(&self, account_id: &str, update: ProfileUpdate) -> PortalResult<Profile> {
        reject_section(update.professional_info.is_some(), "professionalInfo", Role::Admin)?;
        reject_section(update.academic_info.is_some(), "academicInfo", Role::Admin)?;

        let current = self
            .find(account_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("No admin profile for {}", account_id)))?;

        let personal_info = update.personal_info.unwrap_or(current.personal_info);
        let contact_info = merge_contact(&current.contact_info, update.contact_info)?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE admin_profile SET personal_info = ?, contact_info = ?, updated_at = ? WHERE account_id = ?",
        )
        .bind(to_json(&personal_info)?)
        .bind(to_json(&contact_info)?)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(Profile::Admin(AdminProfile {
            personal_info,
            contact_info,
            updated_at: now,
            ..current
        }))
    }
}

/// Psychologist profiles
pub struct PsychologistProfileStore {
    db: SqlitePool,
}

const PSYCHOLOGIST_COLUMNS: &str =
    "id, account_id, personal_info, professional_info, contact_info, created_at, updated_at";

impl PsychologistProfileStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: &str,
        personal_info: PersonalInfo,
        professional_info: ProfessionalInfo,
        contact_info: ContactInfo,
    ) -> PortalResult<PsychologistProfile> {
        let now = Utc::now();
        let profile = PsychologistProfile {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            personal_info,
            professional_info,
            contact_info,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO psychologist_profile
                (id, account_id, personal_info, professional_info, contact_info, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.account_id)
        .bind(to_json(&profile.personal_info)?)
        .bind(to_json(&profile.professional_info)?)
        .bind(to_json(&profile.contact_info)?)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(profile)
    }

    fn from_row(row: &SqliteRow) -> PortalResult<PsychologistProfile> {
        let personal: String = row.get("personal_info");
        let professional: String = row.get("professional_info");
        let contact: String = row.get("contact_info");
        Ok(PsychologistProfile {
            id: row.get("id"),
            account_id: row.get("account_id"),
            personal_info: from_json(&personal)?,
            professional_info: from_json(&professional)?,
            contact_info: from_json(&contact)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn find(&self, account_id: &str) -> PortalResult<Option<PsychologistProfile>> {
        let query = format!(
            "SELECT {} FROM psychologist_profile WHERE account_id = ?",
            PSYCHOLOGIST_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    /// Profiles of every active psychologist
    pub async fn list_active(&self) -> PortalResult<Vec<PsychologistProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.account_id, p.personal_info, p.professional_info, p.contact_info,
                   p.created_at, p.updated_at
            FROM psychologist_profile p
            JOIN account a ON a.id = p.account_id
            WHERE a.status = 'active'
            ORDER BY p.created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}

#[async_trait]
impl ProfileStore for PsychologistProfileStore {
    fn role(&self) -> Role {
        Role::Psychologist
    }

    async fn find_by_account(&self, account_id: &str) -> PortalResult<Option<Profile>> {
        Ok(self.find(account_id).await?.map(Profile::Psychologist))
    }

    async fn update(&self, account_id: &str, update: ProfileUpdate) -> PortalResult<Profile> {
        reject_section(update.academic_info.is_some(), "academicInfo", Role::Psychologist)?;

        let current = self.find(account_id).await?.ok_or_else(|| {
            PortalError::NotFound(format!("No psychologist profile for {}", account_id))
        })?;

        let personal_info = update.personal_info.unwrap_or(current.personal_info);
        let professional_info = update.professional_info.unwrap_or(current.professional_info);
        let contact_info = merge_contact(&current.contact_info, update.contact_info)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE psychologist_profile
            SET personal_info = ?, professional_info = ?, contact_info = ?, updated_at = ?
            WHERE account_id = ?
            "#,
        )
        .bind(to_json(&personal_info)?)
        .bind(to_json(&professional_info)?)
        .bind(to_json(&contact_info)?)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(Profile::Psychologist(PsychologistProfile {
            personal_info,
            professional_info,
            contact_info,
            updated_at: now,
            ..current
        }))
    }
}

/// Student profiles
pub struct StudentProfileStore {
    db: SqlitePool,
}

const STUDENT_COLUMNS: &str =
    "id, account_id, personal_info, academic_info, contact_info, created_by, created_at, updated_at";

impl StudentProfileStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: &str,
        personal_info: PersonalInfo,
        academic_info: AcademicInfo,
        contact_info: ContactInfo,
        psychologist_account_id: &str,
    ) -> PortalResult<StudentProfile> {
        let now = Utc::now();
        let profile = StudentProfile {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            personal_info,
            academic_info,
            contact_info,
            created_by: psychologist_account_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO student_profile
                (id, account_id, personal_info, academic_info, contact_info, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.account_id)
        .bind(to_json(&profile.personal_info)?)
        .bind(to_json(&profile.academic_info)?)
        .bind(to_json(&profile.contact_info)?)
        .bind(&profile.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(profile)
    }

    fn from_row(row: &SqliteRow) -> PortalResult<StudentProfile> {
        let personal: String = row.get("personal_info");
        let academic: String = row.get("academic_info");
        let contact: String = row.get("contact_info");
        Ok(StudentProfile {
            id: row.get("id"),
            account_id: row.get("account_id"),
            personal_info: from_json(&personal)?,
            academic_info: from_json(&academic)?,
            contact_info: from_json(&contact)?,
            created_by: row.get("created_by"),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn find(&self, account_id: &str) -> PortalResult<Option<StudentProfile>> {
        let query = format!(
            "SELECT {} FROM student_profile WHERE account_id = ?",
            STUDENT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    /// Students enrolled by a psychologist (by Account id)
    pub async fn list_by_psychologist(
        &self,
        psychologist_account_id: &str,
    ) -> PortalResult<Vec<StudentProfile>> {
        let query = format!(
            "SELECT {} FROM student_profile WHERE created_by = ? ORDER BY created_at ASC",
            STUDENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(psychologist_account_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(Self::from_row).collect()
    }
}

#[async_trait]
impl ProfileStore for StudentProfileStore {
    fn role(&self) -> Role {
        Role::Student
    }

    async fn find_by_account(&self, account_id: &str) -> PortalResult<Option<Profile>> {
        Ok(self.find(account_id).await?.map(Profile::Student))
    }

    async fn update(&self, account_id: &str, update: ProfileUpdate) -> PortalResult<Profile> {
        reject_section(update.professional_info.is_some(), "professionalInfo", Role::Student)?;

        let current = self
            .find(account_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("No student profile for {}", account_id)))?;

        let personal_info = update.personal_info.unwrap_or(current.personal_info);
        let academic_info = update.academic_info.unwrap_or(current.academic_info);
        let contact_info = merge_contact(&current.contact_info, update.contact_info)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE student_profile
            SET personal_info = ?, academic_info = ?, contact_info = ?, updated_at = ?
            WHERE account_id = ?
            "#,
        )
        .bind(to_json(&personal_info)?)
        .bind(to_json(&academic_info)?)
        .bind(to_json(&contact_info)?)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(Profile::Student(StudentProfile {
            personal_info,
            academic_info,
            contact_info,
            updated_at: now,
            ..current
        }))
    }
}
