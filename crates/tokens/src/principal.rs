//! Principals that tokens are minted for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of principal a credential is scoped to.
///
/// Each kind is served by its own remote credential session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// A named account on the remote instance.
    Account,
    /// A role inside a project.
    ProjectRole,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => f.write_str("account"),
            Self::ProjectRole => f.write_str("project role"),
        }
    }
}

/// The named entity a token is issued for.
///
/// Serialized with a `principal_kind` tag, so it can be flattened into
/// response payloads and revocation records:
///
/// ```json
/// {"principal_kind": "project_role", "project_name": "web", "project_role_name": "ci"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "principal_kind", rename_all = "snake_case")]
pub enum Principal {
    /// An account principal.
    Account {
        /// Account name.
        account_name: String,
    },
    /// A project role principal.
    ProjectRole {
        /// Project name.
        project_name: String,
        /// Role name within the project.
        project_role_name: String,
    },
}

impl Principal {
    /// Creates an account principal.
    #[must_use]
    pub fn account(name: impl Into<String>) -> Self {
        Self::Account { account_name: name.into() }
    }

    /// Creates a project role principal.
    #[must_use]
    pub fn project_role(project: impl Into<String>, role: impl Into<String>) -> Self {
        Self::ProjectRole { project_name: project.into(), project_role_name: role.into() }
    }

    /// Returns the principal kind.
    #[must_use]
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::Account { .. } => PrincipalKind::Account,
            Self::ProjectRole { .. } => PrincipalKind::ProjectRole,
        }
    }

    /// Returns the account name or the project name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Account { account_name } => account_name,
            Self::ProjectRole { project_name, .. } => project_name,
        }
    }

    /// Returns the role name for project role principals.
    #[must_use]
    pub fn secondary_name(&self) -> Option<&str> {
        match self {
            Self::Account { .. } => None,
            Self::ProjectRole { project_role_name, .. } => Some(project_role_name),
        }
    }
}

/// Renders as `account(name)` or `project/role(project/role)`, the form used
/// in every error message that names a principal.
impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account { account_name } => write!(f, "account({account_name})"),
            Self::ProjectRole { project_name, project_role_name } => {
                write!(f, "project/role({project_name}/{project_role_name})")
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(Principal::account("ci-bot").to_string(), "account(ci-bot)");
        assert_eq!(Principal::project_role("web", "deployer").to_string(), "project/role(web/deployer)");
        assert_eq!(PrincipalKind::ProjectRole.to_string(), "project role");
    }

    #[test]
    fn test_accessors() {
        let p = Principal::project_role("web", "deployer");
        assert_eq!(p.kind(), PrincipalKind::ProjectRole);
        assert_eq!(p.name(), "web");
        assert_eq!(p.secondary_name(), Some("deployer"));

        let a = Principal::account("ci-bot");
        assert_eq!(a.kind(), PrincipalKind::Account);
        assert_eq!(a.secondary_name(), None);
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(Principal::project_role("web", "deployer")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "principal_kind": "project_role",
                "project_name": "web",
                "project_role_name": "deployer",
            })
        );

        let back: Principal =
            serde_json::from_str(r#"{"principal_kind":"account","account_name":"ci-bot"}"#).unwrap();
        assert_eq!(back, Principal::account("ci-bot"));
    }
}
