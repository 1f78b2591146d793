//! Binding between protocol records and cache tables.

use driftsync_protocol::{
    progress_id, Course, Mutation, Profile, Progress, ProtocolError, Question, Wallet,
};
use driftsync_store::EntityTable;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record type that lives in one cache table.
pub trait CacheRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The table holding records of this type.
    const TABLE: EntityTable;

    /// Returns the cache id of this record.
    fn record_id(&self) -> String;
}

impl CacheRecord for Profile {
    const TABLE: EntityTable = EntityTable::Profile;

    fn record_id(&self) -> String {
        self.user_id.clone()
    }
}

impl CacheRecord for Course {
    const TABLE: EntityTable = EntityTable::Course;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl CacheRecord for Question {
    const TABLE: EntityTable = EntityTable::Question;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl CacheRecord for Progress {
    const TABLE: EntityTable = EntityTable::Progress;

    fn record_id(&self) -> String {
        self.id()
    }
}

impl CacheRecord for Wallet {
    const TABLE: EntityTable = EntityTable::Wallet;

    fn record_id(&self) -> String {
        self.user_id.clone()
    }
}

/// The entity touched by a mutation, either optimistically or as confirmed
/// by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRecord {
    /// A profile.
    Profile(Profile),
    /// A progress record.
    Progress(Progress),
    /// A wallet.
    Wallet(Wallet),
}

impl EntityRecord {
    /// Returns the cache table of the record.
    pub fn table(&self) -> EntityTable {
        match self {
            EntityRecord::Profile(_) => Profile::TABLE,
            EntityRecord::Progress(_) => Progress::TABLE,
            EntityRecord::Wallet(_) => Wallet::TABLE,
        }
    }

    /// Returns the cache id of the record.
    pub fn id(&self) -> String {
        match self {
            EntityRecord::Profile(profile) => profile.record_id(),
            EntityRecord::Progress(progress) => progress.record_id(),
            EntityRecord::Wallet(wallet) => wallet.record_id(),
        }
    }

    /// Serializes the record as a cache payload.
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            EntityRecord::Profile(profile) => serde_json::to_value(profile),
            EntityRecord::Progress(progress) => serde_json::to_value(progress),
            EntityRecord::Wallet(wallet) => serde_json::to_value(wallet),
        }
    }
}

macro_rules! entity_conversions {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for EntityRecord {
                fn from(record: $variant) -> Self {
                    EntityRecord::$variant(record)
                }
            }

            impl TryFrom<EntityRecord> for $variant {
                type Error = ProtocolError;

                fn try_from(record: EntityRecord) -> Result<Self, Self::Error> {
                    match record {
                        EntityRecord::$variant(inner) => Ok(inner),
                        other => Err(ProtocolError::invalid_mutation(format!(
                            "expected a {} record, got {}",
                            <$variant as CacheRecord>::TABLE,
                            other.table()
                        ))),
                    }
                }
            }
        )*
    };
}

entity_conversions!(Profile, Progress, Wallet);

/// Returns the table and cache id of the entity a mutation changes.
pub fn mutation_target(mutation: &Mutation) -> (EntityTable, String) {
    match mutation {
        Mutation::PatchProfile(patch) => (Profile::TABLE, patch.user_id.clone()),
        Mutation::UpdateProgress(update) => (
            Progress::TABLE,
            progress_id(&update.course_id, &update.user_id),
        ),
        Mutation::EarnCredits(request) | Mutation::SpendCredits(request) => {
            (Wallet::TABLE, request.user_id.clone())
        }
    }
}
