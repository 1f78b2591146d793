//! Queueable mutations.
//!
//! Every write the engine can defer is one variant of [`Mutation`]. The
//! serialized form is a tagged object:
//!
//! ```json
//! {"type": "SPEND_CREDITS", "payload": {"user_id": "u1", "amount": 2}}
//! ```
//!
//! The outbox stores the tag and the payload in separate columns, see
//! [`Mutation::into_parts`] and [`Mutation::from_parts`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::records::{Profile, Progress, Wallet};
use serde::{Deserialize, Serialize};

/// Partial update of a profile. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    /// Account being patched.
    pub user_id: String,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New avatar location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// New biography.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl ProfilePatch {
    /// Creates an empty patch for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the avatar location.
    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Sets the biography.
    #[must_use]
    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    /// Merges the patch into a profile.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.display_name {
            profile.display_name = name.clone();
        }
        if let Some(url) = &self.avatar_url {
            profile.avatar_url = Some(url.clone());
        }
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
    }
}

/// Replacement of a user's progress in one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Account identifier.
    pub user_id: String,
    /// Course identifier.
    pub course_id: String,
    /// Completion percentage, 0 to 100.
    pub percent: u8,
    /// Whether the course is finished.
    #[serde(default)]
    pub completed: bool,
}

impl ProgressUpdate {
    /// Returns the progress record this update produces.
    pub fn to_progress(&self, updated_at: i64) -> Progress {
        Progress {
            course_id: self.course_id.clone(),
            user_id: self.user_id.clone(),
            percent: self.percent,
            completed: self.completed,
            updated_at,
        }
    }
}

/// Credit earned or spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    /// Account identifier.
    pub user_id: String,
    /// Number of credits, always positive.
    pub amount: u32,
    /// Optional reason recorded by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A mutation that can be attempted directly or replayed from the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    /// Partial profile update.
    PatchProfile(ProfilePatch),
    /// Progress replacement.
    UpdateProgress(ProgressUpdate),
    /// Credits added to a wallet.
    EarnCredits(CreditRequest),
    /// Credits removed from a wallet.
    SpendCredits(CreditRequest),
}

impl Mutation {
    /// Every kind tag this build understands.
    pub const KINDS: [&'static str; 4] = [
        "PATCH_PROFILE",
        "UPDATE_PROGRESS",
        "EARN_CREDITS",
        "SPEND_CREDITS",
    ];

    /// Returns the kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::PatchProfile(_) => "PATCH_PROFILE",
            Mutation::UpdateProgress(_) => "UPDATE_PROGRESS",
            Mutation::EarnCredits(_) => "EARN_CREDITS",
            Mutation::SpendCredits(_) => "SPEND_CREDITS",
        }
    }

    /// Returns the account the mutation applies to.
    pub fn user_id(&self) -> &str {
        match self {
            Mutation::PatchProfile(patch) => &patch.user_id,
            Mutation::UpdateProgress(update) => &update.user_id,
            Mutation::EarnCredits(request) | Mutation::SpendCredits(request) => &request.user_id,
        }
    }

    /// Checks the mutation can be sent.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.user_id().is_empty() {
            return Err(ProtocolError::invalid_mutation("user_id must not be empty"));
        }
        match self {
            Mutation::UpdateProgress(update) if update.percent > 100 => Err(
                ProtocolError::invalid_mutation(format!("percent {} exceeds 100", update.percent)),
            ),
            Mutation::UpdateProgress(update) if update.course_id.is_empty() => Err(
                ProtocolError::invalid_mutation("course_id must not be empty"),
            ),
            Mutation::EarnCredits(request) | Mutation::SpendCredits(request)
                if request.amount == 0 =>
            {
                Err(ProtocolError::invalid_mutation("amount must be positive"))
            }
            _ => Ok(()),
        }
    }

    /// Splits the mutation into its kind tag and payload.
    pub fn into_parts(self) -> ProtocolResult<(String, serde_json::Value)> {
        let kind = self.kind().to_string();
        let payload = match self {
            Mutation::PatchProfile(patch) => serde_json::to_value(patch),
            Mutation::UpdateProgress(update) => serde_json::to_value(update),
            Mutation::EarnCredits(request) | Mutation::SpendCredits(request) => {
                serde_json::to_value(request)
            }
        }
        .map_err(|source| ProtocolError::InvalidPayload {
            kind: kind.clone(),
            source,
        })?;
        Ok((kind, payload))
    }

    /// Rebuilds a mutation from a stored kind tag and payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownKind`] for tags written by another build, and
    /// [`ProtocolError::InvalidPayload`] when the payload does not decode.
    pub fn from_parts(kind: &str, payload: serde_json::Value) -> ProtocolResult<Self> {
        let invalid = |source: serde_json::Error| ProtocolError::InvalidPayload {
            kind: kind.to_string(),
            source,
        };
        match kind {
            "PATCH_PROFILE" => serde_json::from_value(payload)
                .map(Mutation::PatchProfile)
                .map_err(invalid),
            "UPDATE_PROGRESS" => serde_json::from_value(payload)
                .map(Mutation::UpdateProgress)
                .map_err(invalid),
            "EARN_CREDITS" => serde_json::from_value(payload)
                .map(Mutation::EarnCredits)
                .map_err(invalid),
            "SPEND_CREDITS" => serde_json::from_value(payload)
                .map(Mutation::SpendCredits)
                .map_err(invalid),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    /// Applies a credit mutation to a wallet. Other kinds leave it unchanged.
    pub fn apply_to_wallet(&self, wallet: &mut Wallet) {
        match self {
            Mutation::EarnCredits(request) => {
                wallet.balance = wallet.balance.saturating_add(i64::from(request.amount));
            }
            Mutation::SpendCredits(request) => {
                wallet.balance = wallet.balance.saturating_sub(i64::from(request.amount));
            }
            Mutation::PatchProfile(_) | Mutation::UpdateProgress(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spend(amount: u32) -> Mutation {
        Mutation::SpendCredits(CreditRequest {
            user_id: "u1".into(),
            amount,
            reason: None,
        })
    }

    #[test]
    fn tagged_wire_shape() {
        let value = serde_json::to_value(spend(2)).unwrap();
        assert_eq!(
            value,
            json!({"type": "SPEND_CREDITS", "payload": {"user_id": "u1", "amount": 2}})
        );
    }

    #[test]
    fn parts_match_tagged_form() {
        let (kind, payload) = spend(2).into_parts().unwrap();
        assert_eq!(kind, "SPEND_CREDITS");
        assert_eq!(Mutation::from_parts(&kind, payload).unwrap(), spend(2));
    }

    #[test]
    fn kinds_cover_every_variant() {
        let all = [
            Mutation::PatchProfile(ProfilePatch::new("u1")),
            Mutation::UpdateProgress(ProgressUpdate {
                user_id: "u1".into(),
                course_id: "c1".into(),
                percent: 1,
                completed: false,
            }),
            Mutation::EarnCredits(CreditRequest {
                user_id: "u1".into(),
                amount: 1,
                reason: None,
            }),
            spend(1),
        ];
        let kinds: Vec<&str> = all.iter().map(Mutation::kind).collect();
        assert_eq!(kinds, Mutation::KINDS);
    }

    #[test]
    fn from_parts_rejects_unknown_and_malformed() {
        assert!(matches!(
            Mutation::from_parts("DELETE_ACCOUNT", json!({})),
            Err(ProtocolError::UnknownKind(kind)) if kind == "DELETE_ACCOUNT"
        ));
        assert!(matches!(
            Mutation::from_parts("SPEND_CREDITS", json!({"amount": "two"})),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn validation() {
        assert!(spend(2).validate().is_ok());
        assert!(spend(0).validate().is_err());
        let over = Mutation::UpdateProgress(ProgressUpdate {
            user_id: "u1".into(),
            course_id: "c1".into(),
            percent: 101,
            completed: false,
        });
        assert!(over.validate().is_err());
        assert!(Mutation::PatchProfile(ProfilePatch::new("")).validate().is_err());
    }

    #[test]
    fn wallet_arithmetic() {
        let mut wallet = Wallet::empty("u1");
        wallet.balance = 5;
        spend(2).apply_to_wallet(&mut wallet);
        assert_eq!(wallet.balance, 3);
        Mutation::EarnCredits(CreditRequest {
            user_id: "u1".into(),
            amount: 10,
            reason: Some("quiz".into()),
        })
        .apply_to_wallet(&mut wallet);
        assert_eq!(wallet.balance, 13);
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut profile = Profile::empty("u1");
        profile.bio = Some("old".into());
        ProfilePatch::new("u1")
            .with_display_name("Ada")
            .apply_to(&mut profile);
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.bio.as_deref(), Some("old"));
    }

    proptest::proptest! {
        #[test]
        fn earn_then_spend_restores_balance(balance in -1_000_000i64..1_000_000, amount in 1u32..100_000) {
            let mut wallet = Wallet { user_id: "u1".into(), balance };
            let request = CreditRequest { user_id: "u1".into(), amount, reason: None };
            Mutation::EarnCredits(request.clone()).apply_to_wallet(&mut wallet);
            Mutation::SpendCredits(request).apply_to_wallet(&mut wallet);
            proptest::prop_assert_eq!(wallet.balance, balance);
        }

        #[test]
        fn progress_percent_is_bounded(percent in 0u8..=255) {
            let update = Mutation::UpdateProgress(ProgressUpdate {
                user_id: "u1".into(),
                course_id: "c1".into(),
                percent,
                completed: false,
            });
            proptest::prop_assert_eq!(update.validate().is_ok(), percent <= 100);
        }
    }
}
