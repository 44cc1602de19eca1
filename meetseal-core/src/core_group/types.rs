//! Group membership types

use crate::core_crypto::PublicKey;
use crate::core_keys::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Meeting identifier (32 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingId(pub Vec<u8>);

impl MeetingId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Generate a random meeting ID
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self::new)
    }
}

impl std::fmt::Display for MeetingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Vec<u8>> for MeetingId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A member of a meeting roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: UserId,
    pub public_key: PublicKey,
    /// Milliseconds since the Unix epoch
    pub joined_at: u64,
}

/// Current membership of a meeting, unique by user id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: BTreeMap<UserId, GroupMember>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member
    pub fn upsert(&mut self, member: GroupMember) {
        self.members.insert(member.user_id.clone(), member);
    }

    pub fn remove(&mut self, user_id: &UserId) -> Option<GroupMember> {
        self.members.remove(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&GroupMember> {
        self.members.get(user_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &GroupMember> {
        self.members.values()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.members.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True when `user_ids` names a different membership set
    pub fn differs_from(&self, user_ids: &[UserId]) -> bool {
        if user_ids.len() != self.members.len() {
            return true;
        }
        user_ids.iter().any(|id| !self.members.contains_key(id))
    }
}
