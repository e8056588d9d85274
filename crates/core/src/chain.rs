use crate::directory::{DirectoryError, MemberDirectory};
use crate::domain::member::{MemberId, SubjectSnapshot, UnitId};
use crate::domain::step::{ApproverRole, TargetTier};

/// One resolved chain level: the role the level requires and the person
/// currently holding it, if anyone does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedApprover {
    pub role: ApproverRole,
    pub actor_id: Option<MemberId>,
}

/// The approver topology is fixed per tier: senior internships answer to the
/// regional director alone, everything else climbs the full three-level
/// ladder.
pub fn chain_template(tier: TargetTier) -> &'static [ApproverRole] {
    match tier {
        TargetTier::SeniorInternship => &[ApproverRole::RegionalDirector],
        TargetTier::MidInternship | TargetTier::Training => &[
            ApproverRole::UnitDirector,
            ApproverRole::RegionalDelegate,
            ApproverRole::RegionalDirector,
        ],
    }
}

pub fn scope_for<'a>(role: ApproverRole, subject: &'a SubjectSnapshot) -> &'a UnitId {
    match role {
        ApproverRole::UnitDirector => &subject.unit_id,
        ApproverRole::RegionalDelegate | ApproverRole::RegionalDirector => {
            &subject.regional_unit_id
        }
    }
}

/// Resolves the full approver chain for a tier against the directory. Vacant
/// roles resolve to `None`; the caller still creates the step so the chain
/// stays complete and auditable.
pub async fn resolve_chain<D>(
    directory: &D,
    tier: TargetTier,
    subject: &SubjectSnapshot,
) -> Result<Vec<ResolvedApprover>, DirectoryError>
where
    D: MemberDirectory,
{
    let template = chain_template(tier);
    let mut chain = Vec::with_capacity(template.len());

    for role in template {
        let actor_id = directory.find_role_holder(*role, scope_for(*role, subject)).await?;
        chain.push(ResolvedApprover { role: *role, actor_id });
    }

    Ok(chain)
}
