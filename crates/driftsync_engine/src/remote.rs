//! Remote service abstraction.

use crate::error::RemoteResult;
use crate::records::EntityRecord;
use async_trait::async_trait;
use driftsync_protocol::{
    ActionId, Course, CreditRequest, Mutation, Profile, ProfilePatch, Progress, ProgressUpdate,
    Question, Wallet,
};

/// The backend the engine reconciles with.
///
/// This trait abstracts the network layer so the engine can run against
/// HTTP ([`crate::HttpRemote`]) or an in-process backend
/// ([`crate::MockRemote`]).
///
/// Every mutating call carries the [`ActionId`] of the mutation. The id is
/// the same for the direct attempt and for every replay, so implementations
/// must forward it as an idempotency key.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Checks the backend is answering.
    async fn probe(&self) -> RemoteResult<()>;

    /// Fetches a profile.
    async fn get_profile(&self, user_id: &str) -> RemoteResult<Profile>;

    /// Applies a partial profile update.
    async fn patch_profile(&self, action_id: ActionId, patch: &ProfilePatch)
        -> RemoteResult<Profile>;

    /// Fetches a user's progress in a course.
    async fn get_progress(&self, user_id: &str, course_id: &str) -> RemoteResult<Progress>;

    /// Replaces a user's progress in a course.
    async fn post_progress(
        &self,
        action_id: ActionId,
        update: &ProgressUpdate,
    ) -> RemoteResult<Progress>;

    /// Fetches a wallet.
    async fn get_wallet(&self, user_id: &str) -> RemoteResult<Wallet>;

    /// Adds credits to a wallet.
    async fn earn_credits(&self, action_id: ActionId, request: &CreditRequest)
        -> RemoteResult<Wallet>;

    /// Removes credits from a wallet.
    async fn spend_credits(
        &self,
        action_id: ActionId,
        request: &CreditRequest,
    ) -> RemoteResult<Wallet>;

    /// Lists the course catalog.
    async fn list_courses(&self) -> RemoteResult<Vec<Course>>;

    /// Fetches one course.
    async fn get_course(&self, course_id: &str) -> RemoteResult<Course>;

    /// Lists the questions of a course.
    async fn list_questions(&self, course_id: &str) -> RemoteResult<Vec<Question>>;
}

/// Sends a mutation to the matching remote operation.
pub async fn dispatch(
    remote: &dyn RemoteService,
    action_id: ActionId,
    mutation: &Mutation,
) -> RemoteResult<EntityRecord> {
    match mutation {
        Mutation::PatchProfile(patch) => remote
            .patch_profile(action_id, patch)
            .await
            .map(EntityRecord::Profile),
        Mutation::UpdateProgress(update) => remote
            .post_progress(action_id, update)
            .await
            .map(EntityRecord::Progress),
        Mutation::EarnCredits(request) => remote
            .earn_credits(action_id, request)
            .await
            .map(EntityRecord::Wallet),
        Mutation::SpendCredits(request) => remote
            .spend_credits(action_id, request)
            .await
            .map(EntityRecord::Wallet),
    }
}
