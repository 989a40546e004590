//! Access control gate
//!
//! Authorization is a pure decision table over (principal, project, intent,
//! verified access). The gate turns an `Allowed` decision into a grant token;
//! generation and review entry points accept only grants, so they cannot be
//! reached without passing the gate.
//!
//! | principal            | read                         | write            |
//! |----------------------|------------------------------|------------------|
//! | administrator        | allowed                      | denied           |
//! | owner                | allowed                      | allowed          |
//! | any, unprotected     | allowed                      | allowed          |
//! | any, verified access | allowed                      | allowed          |
//! | any other            | password required            | password required|

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use specmatrix_model::{Principal, Project, ProjectId};
use specmatrix_store::Tables;

/// What the principal wants to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Read the project and everything in it
    Read,
    /// Mutate anything in the project
    Write,
}

/// Outcome of the decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Proceed
    Allowed,
    /// Never permitted for this principal
    Denied,
    /// Permitted after a password challenge
    PasswordRequired,
}

/// Evaluate the decision table
#[must_use]
pub fn decide(principal: &Principal, project: &Project, intent: Intent, verified: bool) -> Decision {
    if principal.is_admin() {
        return match intent {
            Intent::Read => Decision::Allowed,
            Intent::Write => Decision::Denied,
        };
    }
    if project.is_owned_by(principal.user_id) || !project.is_protected() || verified {
        Decision::Allowed
    } else {
        Decision::PasswordRequired
    }
}

/// Proof that `principal` may read `project_id`
#[derive(Debug, Clone)]
pub struct ReadGrant {
    principal: Principal,
    project_id: ProjectId,
}

impl ReadGrant {
    /// Who
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Which project
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }
}

/// Proof that `principal` may write `project_id`
#[derive(Debug, Clone)]
pub struct WriteGrant {
    principal: Principal,
    project_id: ProjectId,
}

impl WriteGrant {
    /// Who
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Which project
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Downgrade to a read grant
    #[must_use]
    pub fn as_read(&self) -> ReadGrant {
        ReadGrant {
            principal: self.principal.clone(),
            project_id: self.project_id,
        }
    }
}

/// Evaluate the table against current state
///
/// # Errors
/// `NotFound` if the project is absent or soft-deleted.
pub fn check(
    tables: &Tables,
    principal: &Principal,
    project_id: ProjectId,
    intent: Intent,
) -> Result<Decision, EngineError> {
    let project = tables
        .project(project_id)
        .ok_or_else(|| EngineError::not_found("project", project_id))?;
    let verified = tables.access(principal.user_id, project_id).is_some();
    Ok(decide(principal, project, intent, verified))
}

fn enforce(decision: Decision, principal: &Principal, project_id: ProjectId, intent: Intent) -> Result<(), EngineError> {
    match decision {
        Decision::Allowed => Ok(()),
        Decision::Denied => {
            tracing::info!(user = %principal.user_id, project = %project_id, ?intent, "access denied");
            Err(EngineError::AccessDenied(
                "administrators have read-only access".into(),
            ))
        }
        Decision::PasswordRequired => Err(EngineError::PasswordRequired { project_id }),
    }
}

/// Authorize a read
///
/// # Errors
/// `NotFound`, `AccessDenied` or `PasswordRequired`.
pub fn authorize_read(
    tables: &Tables,
    principal: &Principal,
    project_id: ProjectId,
) -> Result<ReadGrant, EngineError> {
    let decision = check(tables, principal, project_id, Intent::Read)?;
    enforce(decision, principal, project_id, Intent::Read)?;
    Ok(ReadGrant {
        principal: principal.clone(),
        project_id,
    })
}

/// Authorize a write
///
/// # Errors
/// `NotFound`, `AccessDenied` or `PasswordRequired`.
pub fn authorize_write(
    tables: &Tables,
    principal: &Principal,
    project_id: ProjectId,
) -> Result<WriteGrant, EngineError> {
    let decision = check(tables, principal, project_id, Intent::Write)?;
    enforce(decision, principal, project_id, Intent::Write)?;
    Ok(WriteGrant {
        principal: principal.clone(),
        project_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use specmatrix_model::UserId;

    fn project(owner: UserId, protected: bool) -> Project {
        let p = Project::new("P", owner);
        if protected {
            p.with_password_digest("$argon2id$stub")
        } else {
            p
        }
    }

    #[test]
    fn table_rows() {
        let owner = Principal::engineer("owner");
        let other = Principal::engineer("other");
        let admin = Principal::admin("admin");
        let open = project(owner.user_id, false);
        let locked = project(owner.user_id, true);

        assert_eq!(decide(&owner, &locked, Intent::Write, false), Decision::Allowed);
        assert_eq!(decide(&other, &open, Intent::Write, false), Decision::Allowed);
        assert_eq!(decide(&other, &locked, Intent::Read, false), Decision::PasswordRequired);
        assert_eq!(decide(&other, &locked, Intent::Write, false), Decision::PasswordRequired);
        assert_eq!(decide(&other, &locked, Intent::Read, true), Decision::Allowed);
        assert_eq!(decide(&admin, &locked, Intent::Read, false), Decision::Allowed);
        assert_eq!(decide(&admin, &open, Intent::Write, true), Decision::Denied);
    }

    proptest! {
        #[test]
        fn admin_reads_everything_and_writes_nothing(
            protected in any::<bool>(),
            verified in any::<bool>(),
            owns in any::<bool>(),
        ) {
            let admin = Principal::admin("a");
            let owner = if owns { admin.user_id } else { UserId::new() };
            let p = project(owner, protected);
            prop_assert_eq!(decide(&admin, &p, Intent::Read, verified), Decision::Allowed);
            prop_assert_eq!(decide(&admin, &p, Intent::Write, verified), Decision::Denied);
        }

        #[test]
        fn engineers_write_wherever_they_read(
            protected in any::<bool>(),
            verified in any::<bool>(),
            owns in any::<bool>(),
        ) {
            let eng = Principal::engineer("e");
            let owner = if owns { eng.user_id } else { UserId::new() };
            let p = project(owner, protected);
            prop_assert_eq!(
                decide(&eng, &p, Intent::Read, verified),
                decide(&eng, &p, Intent::Write, verified)
            );
        }
    }
}
