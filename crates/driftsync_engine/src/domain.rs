//! Typed reads and mutations for the signed-in account.

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::query_cache::QueryKey;
use crate::remote::RemoteService;
use crate::writes::MutationOutcome;
use driftsync_protocol::{
    progress_id, Course, CreditRequest, Mutation, Profile, ProfilePatch, Progress,
    ProgressUpdate, Question, Wallet,
};
use driftsync_store::{EntityTable, RecordFilter};

/// Query key of the course catalog.
pub fn courses_key() -> QueryKey {
    QueryKey::list(EntityTable::Course, "all")
}

/// Query key of the questions of one course.
pub fn questions_key(course_id: &str) -> QueryKey {
    QueryKey::list(EntityTable::Question, format!("course={course_id}"))
}

impl SyncContext {
    /// Reads the account's profile. An empty profile when nothing is known.
    pub async fn profile(&self) -> Profile {
        let user = self.account_id().to_string();
        let fetch_user = user.clone();
        self.read_record(&user, |remote| async move {
            remote.get_profile(&fetch_user).await
        })
        .await
        .unwrap_or_else(|| Profile::empty(user))
    }

    /// Reads the account's wallet. Zero balance when nothing is known.
    pub async fn wallet(&self) -> Wallet {
        let user = self.account_id().to_string();
        let fetch_user = user.clone();
        self.read_record(&user, |remote| async move {
            remote.get_wallet(&fetch_user).await
        })
        .await
        .unwrap_or_else(|| Wallet::empty(user))
    }

    /// Reads the account's progress in a course. Zero progress when nothing
    /// is known.
    pub async fn progress(&self, course_id: &str) -> Progress {
        let user = self.account_id().to_string();
        let course = course_id.to_string();
        let id = progress_id(course_id, &user);
        let (fetch_user, fetch_course) = (user.clone(), course.clone());
        self.read_record(&id, |remote| async move {
            remote.get_progress(&fetch_user, &fetch_course).await
        })
        .await
        .unwrap_or(Progress {
            course_id: course,
            user_id: user,
            percent: 0,
            completed: false,
            updated_at: 0,
        })
    }

    /// Reads one course.
    pub async fn course(&self, course_id: &str) -> Option<Course> {
        let course = course_id.to_string();
        self.read_record(course_id, |remote| async move {
            remote.get_course(&course).await
        })
        .await
    }

    /// Reads the course catalog.
    pub async fn courses(&self) -> Vec<Course> {
        self.read_list(courses_key(), RecordFilter::new(), |remote| async move {
            remote.list_courses().await
        })
        .await
    }

    /// Reads the questions of a course.
    pub async fn questions(&self, course_id: &str) -> Vec<Question> {
        let course = course_id.to_string();
        self.read_list(
            questions_key(course_id),
            RecordFilter::new().eq("course_id", course_id),
            |remote| async move { remote.list_questions(&course).await },
        )
        .await
    }

    /// Returns the cached profile and refreshes it in the background.
    pub async fn peek_profile(&self) -> Option<Profile> {
        let user = self.account_id().to_string();
        let fetch_user = user.clone();
        self.peek_record(&user, |remote| async move {
            remote.get_profile(&fetch_user).await
        })
        .await
    }

    /// Returns the cached wallet and refreshes it in the background.
    pub async fn peek_wallet(&self) -> Option<Wallet> {
        let user = self.account_id().to_string();
        let fetch_user = user.clone();
        self.peek_record(&user, |remote| async move {
            remote.get_wallet(&fetch_user).await
        })
        .await
    }

    /// Updates profile fields.
    pub async fn patch_profile(&self, patch: ProfilePatch) -> SyncResult<MutationOutcome<Profile>> {
        let outcome = self.submit(Mutation::PatchProfile(patch)).await?;
        Ok(outcome.try_map(Profile::try_from)?)
    }

    /// Replaces the account's progress in a course.
    pub async fn update_progress(
        &self,
        course_id: &str,
        percent: u8,
        completed: bool,
    ) -> SyncResult<MutationOutcome<Progress>> {
        let outcome = self
            .submit(Mutation::UpdateProgress(ProgressUpdate {
                user_id: self.account_id().to_string(),
                course_id: course_id.to_string(),
                percent,
                completed,
            }))
            .await?;
        Ok(outcome.try_map(Progress::try_from)?)
    }

    /// Adds credits to the account's wallet.
    pub async fn earn_credits(
        &self,
        amount: u32,
        reason: Option<String>,
    ) -> SyncResult<MutationOutcome<Wallet>> {
        let outcome = self
            .submit(Mutation::EarnCredits(self.credit_request(amount, reason)))
            .await?;
        Ok(outcome.try_map(Wallet::try_from)?)
    }

    /// Spends credits from the account's wallet.
    pub async fn spend_credits(
        &self,
        amount: u32,
        reason: Option<String>,
    ) -> SyncResult<MutationOutcome<Wallet>> {
        let outcome = self
            .submit(Mutation::SpendCredits(self.credit_request(amount, reason)))
            .await?;
        Ok(outcome.try_map(Wallet::try_from)?)
    }

    fn credit_request(&self, amount: u32, reason: Option<String>) -> CreditRequest {
        CreditRequest {
            user_id: self.account_id().to_string(),
            amount,
            reason,
        }
    }
}
