//! Role-based authorization hook.
//!
//! The engine consumes these answers; it never decides on its own who is
//! allowed to announce or to call the all-clear.

use std::collections::HashSet;

use campmesh_shared::Role;

pub trait Authorizer: Send + Sync + 'static {
    fn can_send_announcement(&self, role: Role) -> bool;
    fn is_admin(&self, role: Role) -> bool;
}

/// Static role table.
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    admins: HashSet<Role>,
    announcers: HashSet<Role>,
}

impl RoleAuthorizer {
    pub fn new(admins: impl IntoIterator<Item = Role>, announcers: impl IntoIterator<Item = Role>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            announcers: announcers.into_iter().collect(),
        }
    }
}

impl Default for RoleAuthorizer {
    /// Only camp leads administer and announce.
    fn default() -> Self {
        Self::new([Role::Lead], [Role::Lead])
    }
}

impl Authorizer for RoleAuthorizer {
    fn can_send_announcement(&self, role: Role) -> bool {
        self.announcers.contains(&role) || self.admins.contains(&role)
    }

    fn is_admin(&self, role: Role) -> bool {
        self.admins.contains(&role)
    }
}
