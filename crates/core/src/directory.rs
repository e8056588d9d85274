use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::member::{MemberId, UnitId};
use crate::domain::step::ApproverRole;

/// What the member directory knows about a person. The engine only reads
/// this; the roster itself is maintained elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: MemberId,
    pub name: String,
    pub unit_id: UnitId,
    pub regional_unit_id: UnitId,
    pub current_role: String,
}

#[derive(Clone, Debug, Error)]
pub enum DirectoryError {
    #[error("directory backend failure: {0}")]
    Backend(String),
}

/// External member-directory collaborator. Role holders are resolved against
/// an organizational scope: the subject's unit for unit-level roles, the
/// regional unit for regional ones.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn find_member(&self, id: &MemberId) -> Result<Option<MemberProfile>, DirectoryError>;

    async fn find_role_holder(
        &self,
        role: ApproverRole,
        scope: &UnitId,
    ) -> Result<Option<MemberId>, DirectoryError>;

    async fn is_regional_director_of(
        &self,
        actor_id: &MemberId,
        regional_unit_id: &UnitId,
    ) -> Result<bool, DirectoryError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryMemberDirectory {
    members: HashMap<String, MemberProfile>,
    role_holders: HashMap<(ApproverRole, String), MemberId>,
    regional_directors: HashMap<String, HashSet<String>>,
}

impl InMemoryMemberDirectory {
    pub fn new(members: Vec<MemberProfile>) -> Self {
        let members = members.into_iter().map(|profile| (profile.id.0.clone(), profile)).collect();
        Self { members, ..Self::default() }
    }

    /// Registers the person resolved for a role within a scope. Regional
    /// directors are additionally tracked for escalation eligibility.
    pub fn with_role_holder(
        mut self,
        role: ApproverRole,
        scope: UnitId,
        holder: MemberId,
    ) -> Self {
        if role == ApproverRole::RegionalDirector {
            self.regional_directors
                .entry(scope.0.clone())
                .or_default()
                .insert(holder.0.clone());
        }
        self.role_holders.insert((role, scope.0), holder);
        self
    }

    /// Registers a regional director without making them the resolved seat
    /// holder, e.g. a deputy, or a director of a region whose seat lookup is
    /// deliberately left vacant in a test.
    pub fn with_regional_director(mut self, regional_unit: UnitId, member: MemberId) -> Self {
        self.regional_directors.entry(regional_unit.0).or_default().insert(member.0);
        self
    }
}

#[async_trait]
impl MemberDirectory for InMemoryMemberDirectory {
    async fn find_member(&self, id: &MemberId) -> Result<Option<MemberProfile>, DirectoryError> {
        Ok(self.members.get(&id.0).cloned())
    }

    async fn find_role_holder(
        &self,
        role: ApproverRole,
        scope: &UnitId,
    ) -> Result<Option<MemberId>, DirectoryError> {
        Ok(self.role_holders.get(&(role, scope.0.clone())).cloned())
    }

    async fn is_regional_director_of(
        &self,
        actor_id: &MemberId,
        regional_unit_id: &UnitId,
    ) -> Result<bool, DirectoryError> {
        Ok(self
            .regional_directors
            .get(&regional_unit_id.0)
            .map(|directors| directors.contains(&actor_id.0))
            .unwrap_or(false))
    }
}
