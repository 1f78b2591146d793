//! In-process backend for tests and demos.

use crate::error::{RemoteError, RemoteResult};
use crate::records::EntityRecord;
use crate::remote::RemoteService;
use async_trait::async_trait;
use driftsync_protocol::{
    progress_id, ActionId, Course, CreditRequest, Profile, ProfilePatch, Progress,
    ProgressUpdate, Question, Wallet,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// One call received by a [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Operation name, e.g. `spend_credits`.
    pub op: &'static str,
    /// Idempotency key of mutating calls.
    pub action_id: Option<ActionId>,
}

#[derive(Debug)]
struct MockState {
    reachable: bool,
    profiles: HashMap<String, Profile>,
    progress: HashMap<String, Progress>,
    wallets: HashMap<String, Wallet>,
    courses: BTreeMap<String, Course>,
    questions: BTreeMap<String, Question>,
    applied: HashMap<ActionId, EntityRecord>,
    scripted: VecDeque<RemoteError>,
    rejections: HashMap<&'static str, RemoteError>,
    calls: Vec<MockCall>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            reachable: true,
            profiles: HashMap::new(),
            progress: HashMap::new(),
            wallets: HashMap::new(),
            courses: BTreeMap::new(),
            questions: BTreeMap::new(),
            applied: HashMap::new(),
            scripted: VecDeque::new(),
            rejections: HashMap::new(),
            calls: Vec::new(),
        }
    }
}

/// An authoritative in-memory backend.
///
/// Mutations are idempotent per [`ActionId`]: replaying an id that was
/// already applied returns the stored result without applying it again.
/// Spending more credits than the wallet holds is rejected with `422`.
///
/// Failure injection:
/// - [`MockRemote::set_reachable`] makes every call fail with a retryable
///   transport error, probes included.
/// - [`MockRemote::fail_next`] scripts errors returned by the next
///   non-probe calls, in order.
/// - [`MockRemote::reject_op`] makes every call to one operation fail with
///   a given error until cleared.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates a reachable, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the backend answers at all.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Queues an error for the next non-probe call.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().scripted.push_back(error);
    }

    /// Queues `count` copies of an error.
    pub fn fail_next_n(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripted.push_back(error.clone());
        }
    }

    /// Makes every call to `op` fail with `error`.
    pub fn reject_op(&self, op: &'static str, error: RemoteError) {
        self.state.lock().rejections.insert(op, error);
    }

    /// Clears the failure configured for `op`.
    pub fn clear_rejection(&self, op: &'static str) {
        self.state.lock().rejections.remove(op);
    }

    /// Stores a profile.
    pub fn seed_profile(&self, profile: Profile) {
        self.state
            .lock()
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    /// Stores a wallet.
    pub fn seed_wallet(&self, wallet: Wallet) {
        self.state
            .lock()
            .wallets
            .insert(wallet.user_id.clone(), wallet);
    }

    /// Stores a progress record.
    pub fn seed_progress(&self, progress: Progress) {
        self.state.lock().progress.insert(progress.id(), progress);
    }

    /// Stores a course.
    pub fn seed_course(&self, course: Course) {
        self.state.lock().courses.insert(course.id.clone(), course);
    }

    /// Stores a question.
    pub fn seed_question(&self, question: Question) {
        self.state
            .lock()
            .questions
            .insert(question.id.clone(), question);
    }

    /// Returns the server-side wallet.
    pub fn wallet(&self, user_id: &str) -> Option<Wallet> {
        self.state.lock().wallets.get(user_id).cloned()
    }

    /// Returns the server-side profile.
    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.state.lock().profiles.get(user_id).cloned()
    }

    /// Returns the server-side progress record.
    pub fn progress(&self, user_id: &str, course_id: &str) -> Option<Progress> {
        self.state
            .lock()
            .progress
            .get(&progress_id(course_id, user_id))
            .cloned()
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Counts calls to one operation.
    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    /// Counts distinct mutations applied.
    pub fn applied_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    fn enter(&self, op: &'static str, action_id: Option<ActionId>) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(MockCall { op, action_id });
        if !state.reachable {
            return Err(RemoteError::transport_retryable("connection refused"));
        }
        if op == "probe" {
            return Ok(());
        }
        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.rejections.get(op) {
            return Err(error.clone());
        }
        Ok(())
    }

    /// Runs a mutation once per action id.
    fn apply_once(
        &self,
        action_id: ActionId,
        apply: impl FnOnce(&mut MockState) -> RemoteResult<EntityRecord>,
    ) -> RemoteResult<EntityRecord> {
        let mut state = self.state.lock();
        if let Some(previous) = state.applied.get(&action_id) {
            return Ok(previous.clone());
        }
        let record = apply(&mut state)?;
        state.applied.insert(action_id, record.clone());
        Ok(record)
    }
}

fn not_found(what: &str, id: &str) -> RemoteError {
    RemoteError::api(404, format!("{what} {id} not found"))
}

fn expect_record<T: TryFrom<EntityRecord>>(record: EntityRecord) -> RemoteResult<T> {
    T::try_from(record).map_err(|_| RemoteError::Decode("action id reused for another entity".into()))
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn probe(&self) -> RemoteResult<()> {
        self.enter("probe", None)
    }

    async fn get_profile(&self, user_id: &str) -> RemoteResult<Profile> {
        self.enter("get_profile", None)?;
        self.profile(user_id)
            .ok_or_else(|| not_found("profile", user_id))
    }

    async fn patch_profile(
        &self,
        action_id: ActionId,
        patch: &ProfilePatch,
    ) -> RemoteResult<Profile> {
        self.enter("patch_profile", Some(action_id))?;
        let record = self.apply_once(action_id, |state| {
            let profile = state
                .profiles
                .entry(patch.user_id.clone())
                .or_insert_with(|| Profile::empty(patch.user_id.clone()));
            patch.apply_to(profile);
            Ok(EntityRecord::Profile(profile.clone()))
        })?;
        expect_record(record)
    }

    async fn get_progress(&self, user_id: &str, course_id: &str) -> RemoteResult<Progress> {
        self.enter("get_progress", None)?;
        self.progress(user_id, course_id)
            .ok_or_else(|| not_found("progress", &progress_id(course_id, user_id)))
    }

    async fn post_progress(
        &self,
        action_id: ActionId,
        update: &ProgressUpdate,
    ) -> RemoteResult<Progress> {
        self.enter("post_progress", Some(action_id))?;
        let record = self.apply_once(action_id, |state| {
            let progress = update.to_progress(chrono::Utc::now().timestamp_millis());
            state.progress.insert(progress.id(), progress.clone());
            Ok(EntityRecord::Progress(progress))
        })?;
        expect_record(record)
    }

    async fn get_wallet(&self, user_id: &str) -> RemoteResult<Wallet> {
        self.enter("get_wallet", None)?;
        self.wallet(user_id)
            .ok_or_else(|| not_found("wallet", user_id))
    }

    async fn earn_credits(
        &self,
        action_id: ActionId,
        request: &CreditRequest,
    ) -> RemoteResult<Wallet> {
        self.enter("earn_credits", Some(action_id))?;
        let record = self.apply_once(action_id, |state| {
            let wallet = state
                .wallets
                .entry(request.user_id.clone())
                .or_insert_with(|| Wallet::empty(request.user_id.clone()));
            wallet.balance += i64::from(request.amount);
            Ok(EntityRecord::Wallet(wallet.clone()))
        })?;
        expect_record(record)
    }

    async fn spend_credits(
        &self,
        action_id: ActionId,
        request: &CreditRequest,
    ) -> RemoteResult<Wallet> {
        self.enter("spend_credits", Some(action_id))?;
        let record = self.apply_once(action_id, |state| {
            let wallet = state
                .wallets
                .entry(request.user_id.clone())
                .or_insert_with(|| Wallet::empty(request.user_id.clone()));
            let amount = i64::from(request.amount);
            if wallet.balance < amount {
                return Err(RemoteError::api(
                    422,
                    format!("insufficient credits: balance {}", wallet.balance),
                ));
            }
            wallet.balance -= amount;
            Ok(EntityRecord::Wallet(wallet.clone()))
        })?;
        expect_record(record)
    }

    async fn list_courses(&self) -> RemoteResult<Vec<Course>> {
        self.enter("list_courses", None)?;
        Ok(self.state.lock().courses.values().cloned().collect())
    }

    async fn get_course(&self, course_id: &str) -> RemoteResult<Course> {
        self.enter("get_course", None)?;
        self.state
            .lock()
            .courses
            .get(course_id)
            .cloned()
            .ok_or_else(|| not_found("course", course_id))
    }

    async fn list_questions(&self, course_id: &str) -> RemoteResult<Vec<Question>> {
        self.enter("list_questions", None)?;
        Ok(self
            .state
            .lock()
            .questions
            .values()
            .filter(|question| question.course_id == course_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(amount: u32) -> CreditRequest {
        CreditRequest {
            user_id: "u1".into(),
            amount,
            reason: None,
        }
    }

    #[tokio::test]
    async fn replay_of_same_action_is_applied_once() {
        let remote = MockRemote::new();
        remote.seed_wallet(Wallet {
            user_id: "u1".into(),
            balance: 5,
        });
        let id = ActionId::generate();

        let first = remote.spend_credits(id, &spend(2)).await.unwrap();
        let second = remote.spend_credits(id, &spend(2)).await.unwrap();
        assert_eq!(first.balance, 3);
        assert_eq!(second.balance, 3);
        assert_eq!(remote.wallet("u1").unwrap().balance, 3);
        assert_eq!(remote.applied_count(), 1);
        assert_eq!(remote.call_count("spend_credits"), 2);
    }

    #[tokio::test]
    async fn overspend_is_rejected() {
        let remote = MockRemote::new();
        let err = remote
            .spend_credits(ActionId::generate(), &spend(1))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(422));
        assert!(!err.is_retryable());
        assert_eq!(remote.applied_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_fails_everything() {
        let remote = MockRemote::new();
        remote.set_reachable(false);
        assert!(remote.probe().await.unwrap_err().is_retryable());
        assert!(remote.list_courses().await.is_err());
        remote.set_reachable(true);
        assert!(remote.probe().await.is_ok());
    }

    #[tokio::test]
    async fn scripted_failures_skip_probes() {
        let remote = MockRemote::new();
        remote.fail_next(RemoteError::api(503, "maintenance"));
        assert!(remote.probe().await.is_ok());
        assert_eq!(
            remote.list_courses().await.unwrap_err().status_code(),
            Some(503)
        );
        assert!(remote.list_courses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn questions_filtered_by_course() {
        let remote = MockRemote::new();
        for (id, course) in [("q1", "c1"), ("q2", "c2")] {
            remote.seed_question(Question {
                id: id.into(),
                course_id: course.into(),
                prompt: "?".into(),
                choices: vec![],
            });
        }
        let questions = remote.list_questions("c1").await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, "q1");
    }
}
