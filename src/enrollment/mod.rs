/// Enrollment workflow
///
/// Creates account and profile pairs along the enrollment hierarchy: admins
/// enroll psychologists, psychologists enroll students. Account and profile
/// are written in one transaction.

use crate::{
    account::{AccountManager, AccountStatus, Actor, NewAccount, Role},
    admin::{AdminPermission, AdminPermissionManager},
    config::{BootstrapAdminConfig, ServerConfig},
    db::account::Account,
    error::{PortalError, PortalResult},
    mailer::Mailer,
    metrics,
    profile::{
        AcademicInfo, AdminProfileStore, ContactInfo, PersonalInfo, ProfessionalInfo,
        PsychologistProfile, PsychologistProfileStore, StudentProfile, StudentProfileStore,
    },
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use validator::Validate;

/// Body of `POST /admin/psychologists`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PsychologistEnrollment {
    #[validate(nested)]
    pub contact_info: ContactInfo,
    #[validate(nested)]
    pub personal_info: PersonalInfo,
    #[validate(nested)]
    pub professional_info: ProfessionalInfo,
}

/// Body of `POST /psychologists/students/enroll`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StudentEnrollment {
    #[validate(nested)]
    pub contact_info: ContactInfo,
    #[validate(nested)]
    pub personal_info: PersonalInfo,
    #[validate(nested)]
    pub academic_info: AcademicInfo,
}

/// Result of an enrollment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrolled<P> {
    pub account: Account,
    pub profile: P,
}

/// Enrollment service
pub struct EnrollmentService {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    mailer: Arc<Mailer>,
    psychologists: PsychologistProfileStore,
    students: StudentProfileStore,
}

impl EnrollmentService {
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        mailer: Arc<Mailer>,
    ) -> Self {
        Self {
            psychologists: PsychologistProfileStore::new(db.clone()),
            students: StudentProfileStore::new(db.clone()),
            db,
            config,
            mailer,
        }
    }

    /// Admin enrolls a psychologist
    pub async fn enroll_psychologist(
        &self,
        admin: &Actor,
        request: PsychologistEnrollment,
    ) -> PortalResult<Enrolled<PsychologistProfile>> {
        if !admin.is(Role::Admin) {
            return Err(PortalError::Forbidden(
                "Only admins can enroll psychologists".to_string(),
            ));
        }
        request
            .validate()
            .map_err(|e| PortalError::Validation(e.to_string()))?;

        let contact_info = normalize_contact(request.contact_info);
        let mut tx = self.db.begin().await?;

        let account = AccountManager::insert_account(
            &mut *tx,
            NewAccount {
                email: contact_info.email.clone(),
                password: self.config.authentication.default_enrollment_password.clone(),
                role: Role::Psychologist,
                status: AccountStatus::Active,
                created_by: Some((admin.account_id.clone(), Role::Admin)),
            },
        )
        .await?;

        let profile = PsychologistProfileStore::insert(
            &mut *tx,
            &account.id,
            request.personal_info,
            request.professional_info,
            contact_info,
        )
        .await?;

        AdminPermissionManager::record_action(
            &mut *tx,
            &admin.account_id,
            "enroll_psychologist",
            Some(account.id.as_str()),
            Some(account.email.as_str()),
        )
        .await?;

        tx.commit().await?;
        metrics::record_enrollment(Role::Psychologist.as_str());
        tracing::info!(
            "Psychologist {} ({}) enrolled by {}",
            account.id,
            account.email,
            admin.account_id
        );

        self.notify(&account, &profile.personal_info).await;

        Ok(Enrolled { account, profile })
    }

    /// Psychologist enrolls a student
    pub async fn enroll_student(
        &self,
        psychologist: &Actor,
        request: StudentEnrollment,
    ) -> PortalResult<Enrolled<StudentProfile>> {
        if !psychologist.is(Role::Psychologist) {
            return Err(PortalError::Forbidden(
                "Only psychologists can enroll students".to_string(),
            ));
        }
        request
            .validate()
            .map_err(|e| PortalError::Validation(e.to_string()))?;

        let contact_info = normalize_contact(request.contact_info);
        let mut tx = self.db.begin().await?;

        let account = AccountManager::insert_account(
            &mut *tx,
            NewAccount {
                email: contact_info.email.clone(),
                password: self.config.authentication.default_enrollment_password.clone(),
                role: Role::Student,
                status: AccountStatus::Active,
                created_by: Some((psychologist.account_id.clone(), Role::Psychologist)),
            },
        )
        .await?;

        let profile = StudentProfileStore::insert(
            &mut *tx,
            &account.id,
            request.personal_info,
            request.academic_info,
            contact_info,
            &psychologist.account_id,
        )
        .await?;

        tx.commit().await?;

        metrics::record_enrollment(Role::Student.as_str());
        tracing::info!(
            "Student {} ({}) enrolled by {}",
            account.id,
            account.email,
            psychologist.account_id
        );

        self.notify(&account, &profile.personal_info).await;

        Ok(Enrolled { account, profile })
    }

    /// Create the configured first admin with every permission, once
    pub async fn bootstrap_admin(
        &self,
        bootstrap: &BootstrapAdminConfig,
    ) -> PortalResult<Option<Account>> {
        let email = bootstrap.email.trim().to_lowercase();

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ? AND role = 'admin'")
                .bind(&email)
                .fetch_one(&self.db)
                .await?;
        if existing > 0 {
            tracing::debug!("Bootstrap admin {} already exists", email);
            return Ok(None);
        }

        let mut tx = self.db.begin().await?;

        let account = AccountManager::insert_account(
            &mut *tx,
            NewAccount {
                email: email.clone(),
                password: bootstrap.password.clone(),
                role: Role::Admin,
                status: AccountStatus::Active,
                created_by: None,
            },
        )
        .await?;

        AdminProfileStore::insert(
            &mut *tx,
            &account.id,
            PersonalInfo {
                first_name: "System".to_string(),
                last_name: "Administrator".to_string(),
                gender: None,
                date_of_birth: None,
                bio: None,
            },
            ContactInfo {
                email: email.clone(),
                phone: None,
                office_location: None,
            },
        )
        .await?;

        for permission in AdminPermission::ALL {
            AdminPermissionManager::insert_grant(&mut *tx, &account.id, permission, None).await?;
        }

        tx.commit().await?;

        tracing::info!("Bootstrap admin {} created ({})", account.id, email);
        Ok(Some(account))
    }

    /// Students enrolled by a psychologist
    pub async fn list_students(&self, psychologist_id: &str) -> PortalResult<Vec<StudentProfile>> {
        self.students.list_by_psychologist(psychologist_id).await
    }

    /// A student's profile, visible to the enrolling psychologist and admins
    pub async fn get_student(&self, actor: &Actor, student_id: &str) -> PortalResult<StudentProfile> {
        let profile = self
            .students
            .find(student_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Student {} not found", student_id)))?;

        match actor.role {
            Role::Admin => Ok(profile),
            Role::Psychologist if profile.created_by == actor.account_id => Ok(profile),
            Role::Student if profile.account_id == actor.account_id => Ok(profile),
            _ => Err(PortalError::Forbidden(
                "Student is not enrolled with you".to_string(),
            )),
        }
    }

    /// The psychologist who enrolled a student
    pub async fn assigned_psychologist(&self, student_id: &str) -> PortalResult<PsychologistProfile> {
        let student = self
            .students
            .find(student_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Student {} not found", student_id)))?;

        self.psychologists
            .find(&student.created_by)
            .await?
            .ok_or_else(|| {
                PortalError::NotFound(format!(
                    "Psychologist {} not found",
                    student.created_by
                ))
            })
    }

    pub async fn list_psychologists(&self) -> PortalResult<Vec<PsychologistProfile>> {
        self.psychologists.list_active().await
    }

    /// Whether the student was enrolled by the psychologist
    pub async fn is_enrolled_with(
        &self,
        student_id: &str,
        psychologist_id: &str,
    ) -> PortalResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM student_profile WHERE account_id = ? AND created_by = ?",
        )
        .bind(student_id)
        .bind(psychologist_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    async fn notify(&self, account: &Account, personal: &PersonalInfo) {
        let name = format!("{} {}", personal.first_name, personal.last_name);
        if let Err(e) = self
            .mailer
            .send_welcome_email(
                &account.email,
                &name,
                account.role,
                &self.config.service.public_url,
            )
            .await
        {
            tracing::warn!("Welcome email to {} failed: {}", account.email, e);
        }
    }
}

fn normalize_contact(contact: ContactInfo) -> ContactInfo {
    ContactInfo {
        email: contact.email.trim().to_lowercase(),
        ..contact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    struct Fixture {
        pool: SqlitePool,
        service: EnrollmentService,
        admin: Actor,
    }

    async fn fixture() -> Fixture {
        let pool = db::create_memory_pool().await.unwrap();
        let config = Arc::new(ServerConfig::for_testing("/tmp/carepath-test".into()));
        let service = EnrollmentService::new(
            pool.clone(),
            config,
            Arc::new(Mailer::disabled()),
        );

        let admin = service
            .bootstrap_admin(&BootstrapAdminConfig {
                email: "root@uni.edu".to_string(),
                password: "root-password".to_string(),
            })
            .await
            .unwrap()
            .unwrap();

        Fixture {
            pool,
            service,
            admin: Actor::new(admin.id, Role::Admin),
        }
    }

    fn personal(first: &str) -> PersonalInfo {
        PersonalInfo {
            first_name: first.to_string(),
            last_name: "Tester".to_string(),
            gender: None,
            date_of_birth: None,
            bio: None,
        }
    }

    fn contact(email: &str) -> ContactInfo {
        ContactInfo {
            email: email.to_string(),
            phone: None,
            office_location: None,
        }
    }

    fn psychologist_request(email: &str) -> PsychologistEnrollment {
        PsychologistEnrollment {
            contact_info: contact(email),
            personal_info: personal("Paula"),
            professional_info: ProfessionalInfo {
                specialization: Some("CBT".to_string()),
                qualifications: vec!["PhD".to_string()],
                years_of_experience: Some(8),
                license_number: Some("LIC-1".to_string()),
            },
        }
    }

    fn student_request(email: &str) -> StudentEnrollment {
        StudentEnrollment {
            contact_info: contact(email),
            personal_info: personal("Sam"),
            academic_info: AcademicInfo {
                student_number: "S-100".to_string(),
                department: Some("Physics".to_string()),
                program: None,
                year_of_study: Some(2),
            },
        }
    }

    #[tokio::test]
    async fn test_enrollment_chain_integrity() {
        let f = fixture().await;
        let psych = f
            .service
            .enroll_psychologist(&f.admin, psychologist_request("Paula@Uni.edu"))
            .await
            .unwrap();
        assert_eq!(psych.account.email, "paula@uni.edu");
        assert_eq!(psych.account.created_by.as_deref(), Some(f.admin.account_id.as_str()));
        assert_eq!(psych.account.creator_role, Some(Role::Admin));
        assert_eq!(psych.profile.contact_info.email, psych.account.email);

        let psych_actor = Actor::new(psych.account.id.clone(), Role::Psychologist);
        let student = f
            .service
            .enroll_student(&psych_actor, student_request("sam@uni.edu"))
            .await
            .unwrap();

        // Back-reference is the psychologist's account id, not the profile id
        assert_eq!(student.profile.created_by, psych.account.id);
        assert_ne!(student.profile.created_by, psych.profile.id);

        let assigned = f
            .service
            .assigned_psychologist(&student.account.id)
            .await
            .unwrap();
        assert_eq!(assigned.account_id, psych.account.id);

        let listed = f.service.list_students(&psych.account.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(f
            .service
            .is_enrolled_with(&student.account.id, &psych.account.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_per_role_conflicts_without_partial_state() {
        let f = fixture().await;
        f.service
            .enroll_psychologist(&f.admin, psychologist_request("dup@uni.edu"))
            .await
            .unwrap();

        assert!(matches!(
            f.service
                .enroll_psychologist(&f.admin, psychologist_request("dup@uni.edu"))
                .await,
            Err(PortalError::Conflict(_))
        ));

        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE role = 'psychologist'")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM psychologist_profile")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(accounts, 1);
        assert_eq!(profiles, 1);
    }

    #[tokio::test]
    async fn test_failed_profile_rolls_back_account() {
        let f = fixture().await;
        sqlx::query("DROP TABLE psychologist_profile")
            .execute(&f.pool)
            .await
            .unwrap();

        assert!(f
            .service
            .enroll_psychologist(&f.admin, psychologist_request("ghost@uni.edu"))
            .await
            .is_err());

        let accounts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = 'ghost@uni.edu'")
                .fetch_one(&f.pool)
                .await
                .unwrap();
        assert_eq!(accounts, 0);
    }

    #[tokio::test]
    async fn test_hierarchy_enforced() {
        let f = fixture().await;
        assert!(matches!(
            f.service
                .enroll_student(&f.admin, student_request("s@uni.edu"))
                .await,
            Err(PortalError::Forbidden(_))
        ));

        let student_actor = Actor::new("x", Role::Student);
        assert!(matches!(
            f.service
                .enroll_psychologist(&student_actor, psychologist_request("p@uni.edu"))
                .await,
            Err(PortalError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_get_student_owner_only() {
        let f = fixture().await;
        let first = f
            .service
            .enroll_psychologist(&f.admin, psychologist_request("one@uni.edu"))
            .await
            .unwrap();
        let second = f
            .service
            .enroll_psychologist(&f.admin, psychologist_request("two@uni.edu"))
            .await
            .unwrap();
        let owner = Actor::new(first.account.id, Role::Psychologist);
        let other = Actor::new(second.account.id, Role::Psychologist);

        let student = f
            .service
            .enroll_student(&owner, student_request("kid@uni.edu"))
            .await
            .unwrap();

        assert!(f.service.get_student(&owner, &student.account.id).await.is_ok());
        assert!(matches!(
            f.service.get_student(&other, &student.account.id).await,
            Err(PortalError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.get_student(&owner, "missing").await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent_and_grants_everything() {
        let f = fixture().await;
        let again = f
            .service
            .bootstrap_admin(&BootstrapAdminConfig {
                email: "root@uni.edu".to_string(),
                password: "other".to_string(),
            })
            .await
            .unwrap();
        assert!(again.is_none());

        let permissions = AdminPermissionManager::new(f.pool.clone())
            .permissions(&f.admin.account_id)
            .await
            .unwrap();
        assert_eq!(permissions.len(), AdminPermission::ALL.len());
    }

    #[tokio::test]
    async fn test_audit_entry_commits_with_enrollment() {
        let f = fixture().await;
        let psych = f
            .service
            .enroll_psychologist(&f.admin, psychologist_request("paula@uni.edu"))
            .await
            .unwrap();
        assert!(matches!(
            f.service
                .enroll_psychologist(&f.admin, psychologist_request("paula@uni.edu"))
                .await,
            Err(PortalError::Conflict(_))
        ));

        let entries = AdminPermissionManager::new(f.pool.clone())
            .recent_actions(50)
            .await
            .unwrap();
        let enrollments: Vec<_> = entries
            .iter()
            .filter(|e| e.action == "enroll_psychologist")
            .collect();
        assert_eq!(enrollments.len(), 1);
        assert_eq!(enrollments[0].subject_id.as_deref(), Some(psych.account.id.as_str()));
        assert_eq!(enrollments[0].admin_id, f.admin.account_id);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let f = fixture().await;
        let mut request = psychologist_request("not-an-email");
        request.personal_info.first_name = String::new();
        assert!(matches!(
            f.service.enroll_psychologist(&f.admin, request).await,
            Err(PortalError::Validation(_))
        ));
    }
}
