use ulid::Ulid;

/// Capability attached to a principal by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    /// May add and remove recurring classes.
    Admin,
}

/// The signed-in user as reported by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    /// Email-like login name. Display only; never used for authorization.
    pub identifier: String,
    pub role: Role,
}

impl Principal {
    pub fn member(id: Ulid, identifier: impl Into<String>) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            role: Role::Member,
        }
    }

    pub fn admin(id: Ulid, identifier: impl Into<String>) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Session lifecycle events observed by the booking core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Principal),
    SignedOut,
}
