use serde::{Deserialize, Serialize};

/// Identifier of a cluster node in the current membership view.
///
/// Wrapper around a UUID string. Stable for the node's lifetime in the current
/// view; a restarted node comes back as a different member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Member(pub String);

impl Member {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for Member {
    fn default() -> Self {
        Self::new()
    }
}

/// One snapshot of the cluster membership.
///
/// Members are kept sorted so views compare structurally regardless of the
/// order a provider discovered them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    pub members: Vec<Member>,
}

impl MembershipView {
    pub fn new(mut members: Vec<Member>) -> Self {
        members.sort();
        members.dedup();
        Self { members }
    }

    pub fn contains(&self, member: &Member) -> bool {
        self.members.binary_search(member).is_ok()
    }

    /// Members present here but absent from `other`.
    pub fn departed_since(&self, other: &MembershipView) -> Vec<Member> {
        self.members
            .iter()
            .filter(|member| !other.contains(member))
            .cloned()
            .collect()
    }
}
