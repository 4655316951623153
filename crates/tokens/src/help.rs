//! Help text for the mount and each of its paths.

use std::fmt::{self, Write as _};

use crate::fields::{ACCOUNT_SCHEMA, CONFIG_SCHEMA, FieldSchema, PROJECT_SCHEMA};

/// Help for the mount as a whole.
pub const BACKEND_HELP: &str = "\
Creates short-lived Argo CD account tokens and project role tokens, and deletes them
from Argo CD when their lease expires or is revoked.

Mount one instance of this backend per Argo CD instance and write <mount>/config first.
Once configured, the account and project paths issue tokens.";

/// The paths a mount serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpPath {
    /// `config`
    Config,
    /// `account/<account_name>`
    Account,
    /// `project/<project_name>/role/<project_role_name>`
    Project,
}

/// Help for one path.
#[derive(Debug, Clone, Copy)]
pub struct PathHelp {
    /// Path pattern.
    pub pattern: &'static str,
    /// One-line summary.
    pub synopsis: &'static str,
    /// Usage notes.
    pub description: &'static str,
    /// Accepted fields.
    pub fields: &'static [FieldSchema],
}

/// Returns the help for `path`.
#[must_use]
pub fn path_help(path: HelpPath) -> PathHelp {
    match path {
        HelpPath::Config => PathHelp {
            pattern: "config",
            synopsis: "Configures the Argo CD connection for this mount.",
            description: "\
Reading returns the configuration without the admin token.
Writing merges the given fields into the stored configuration; argo_cd_url and
admin_token are required on the first write. Max TTLs default to 6h and are capped at 12h.
argo_cd_url is the bare address, e.g. argocd.example.com or argocd.example.com:8443,
never a URL with https:// in front.",
            fields: CONFIG_SCHEMA,
        },
        HelpPath::Account => PathHelp {
            pattern: "account/<account_name>",
            synopsis: "Creates a token for an Argo CD account.",
            description: "\
Returns the created token once. The ttl defaults to 1h and never exceeds
account_token_max_ttl. The token is deleted from Argo CD when its lease ends.",
            fields: ACCOUNT_SCHEMA,
        },
        HelpPath::Project => PathHelp {
            pattern: "project/<project_name>/role/<project_role_name>",
            synopsis: "Creates a token for a role in an Argo CD project.",
            description: "\
Returns the created token once. The ttl defaults to 1h and never exceeds
project_token_max_ttl. The token is deleted from Argo CD when its lease ends.",
            fields: PROJECT_SCHEMA,
        },
    }
}

impl fmt::Display for PathHelp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writeln!(out, "{}: {}", self.pattern, self.synopsis)?;
        writeln!(out)?;
        writeln!(out, "{}", self.description)?;
        writeln!(out)?;
        writeln!(out, "Fields:")?;
        for field in self.fields {
            writeln!(out, "  {} ({}): {}", field.name, field.ty, field.description)?;
        }
        f.write_str(out.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_is_documented() {
        for path in [HelpPath::Config, HelpPath::Account, HelpPath::Project] {
            let help = path_help(path);
            let rendered = help.to_string();
            for field in help.fields {
                assert!(rendered.contains(field.name), "{} missing from {}", field.name, help.pattern);
            }
        }
    }

    #[test]
    fn test_config_help_mentions_ceilings() {
        let rendered = path_help(HelpPath::Config).to_string();
        assert!(rendered.starts_with("config: Configures"));
        assert!(rendered.contains("capped at 12h"));
        assert!(rendered.contains("admin_token (string)"));
        assert!(rendered.contains("account_token_max_ttl (duration in seconds)"));
    }
}
