//! Inbound field extraction and typed coercion.
//!
//! Front-ends hand the engine a loosely typed JSON object per request. This
//! module checks it against the endpoint's [`FieldSchema`] table and turns
//! it into the typed request structs the rest of the crate accepts. Nothing
//! past this module touches raw maps.

use std::{fmt, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{config::ConfigUpdate, issuance::TokenRequest, principal::Principal};

/// Field names shared by schemas, responses and stored records.
pub mod names {
    /// Remote endpoint, host and optional port.
    pub const ARGO_CD_URL: &str = "argo_cd_url";
    /// Admin token used to mint and delete tokens.
    pub const ADMIN_TOKEN: &str = "admin_token";
    /// Ceiling for account token lifetimes.
    pub const ACCOUNT_TOKEN_MAX_TTL: &str = "account_token_max_ttl";
    /// Ceiling for project token lifetimes.
    pub const PROJECT_TOKEN_MAX_TTL: &str = "project_token_max_ttl";
    /// Skip certificate verification.
    pub const INSECURE: &str = "insecure";
    /// Talk to the remote over plain HTTP.
    pub const PLAINTEXT: &str = "plaintext";
    /// Account name.
    pub const ACCOUNT_NAME: &str = "account_name";
    /// Project name.
    pub const PROJECT_NAME: &str = "project_name";
    /// Project role name.
    pub const PROJECT_ROLE_NAME: &str = "project_role_name";
    /// Requested token lifetime.
    pub const TTL: &str = "ttl";
}

/// Declared type of an inbound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Boolean, also accepted as `"true"`/`"false"`.
    Bool,
    /// Duration given as integer seconds, a numeric string, or a human
    /// readable string such as `"2h"`.
    DurationSecond,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Bool => f.write_str("bool"),
            Self::DurationSecond => f.write_str("duration in seconds"),
        }
    }
}

/// One field an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name.
    pub name: &'static str,
    /// Declared type.
    pub ty: FieldType,
    /// Help text.
    pub description: &'static str,
}

const fn field(name: &'static str, ty: FieldType, description: &'static str) -> FieldSchema {
    FieldSchema { name, ty, description }
}

/// Fields of the `config` endpoint.
pub const CONFIG_SCHEMA: &[FieldSchema] = &[
    field(names::ARGO_CD_URL, FieldType::String, "Argo CD instance address, without protocol"),
    field(names::ADMIN_TOKEN, FieldType::String, "Argo CD account token with admin role"),
    field(names::ACCOUNT_TOKEN_MAX_TTL, FieldType::DurationSecond, "Max TTL for account tokens"),
    field(names::PROJECT_TOKEN_MAX_TTL, FieldType::DurationSecond, "Max TTL for project tokens"),
    field(
        names::INSECURE,
        FieldType::Bool,
        "Skip TLS certificate verification (should not be used in production)",
    ),
    field(
        names::PLAINTEXT,
        FieldType::Bool,
        "Use plaintext HTTP instead of TLS (should not be used in production)",
    ),
];

/// Fields of the `account/<account_name>` endpoint.
pub const ACCOUNT_SCHEMA: &[FieldSchema] = &[
    field(names::ACCOUNT_NAME, FieldType::String, "Argo CD account name"),
    field(names::TTL, FieldType::DurationSecond, "Token TTL, defaults to 1h"),
];

/// Fields of the `project/<project_name>/role/<project_role_name>` endpoint.
pub const PROJECT_SCHEMA: &[FieldSchema] = &[
    field(names::PROJECT_NAME, FieldType::String, "Argo CD project name"),
    field(names::PROJECT_ROLE_NAME, FieldType::String, "Argo CD project role name"),
    field(names::TTL, FieldType::DurationSecond, "Token TTL, defaults to 1h"),
];

/// Field extraction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FieldError {
    /// A required field is absent.
    #[error("missing data: {field} not present in field data")]
    Missing {
        /// Field name.
        field: String,
    },

    /// A field has a JSON type its schema does not allow.
    #[error("incorrect data: wrong type for {field}: expected {expected}")]
    WrongType {
        /// Field name.
        field: String,
        /// Declared type.
        expected: FieldType,
    },

    /// A duration field could not be parsed.
    #[error("incorrect data: cannot parse {field} value {value:?} as a duration: {reason}")]
    Unparsable {
        /// Field name.
        field: String,
        /// The raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// The request body is not a JSON object.
    #[error("incorrect data: request fields must be a JSON object")]
    NotAnObject,

}

/// Raw request fields checked against a schema.
#[derive(Debug, Clone)]
pub struct FieldData {
    schema: &'static [FieldSchema],
    raw: Map<String, Value>,
}

impl FieldData {
    /// Wraps `raw` for extraction under `schema`.
    ///
    /// Keys the schema does not declare are dropped with a warning.
    #[must_use]
    pub fn new(schema: &'static [FieldSchema], mut raw: Map<String, Value>) -> Self {
        raw.retain(|key, _| {
            let known = schema.iter().any(|f| f.name == key.as_str());
            if !known {
                tracing::warn!(field = %key, "ignoring field not declared by this endpoint");
            }
            known
        });
        Self { schema, raw }
    }

    /// Builds field data from a JSON object value.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotAnObject`] if `value` is not an object.
    pub fn from_value(schema: &'static [FieldSchema], value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(raw) => Ok(Self::new(schema, raw)),
            _ => Err(FieldError::NotAnObject),
        }
    }

    /// Returns the schema entries this data was checked against.
    #[must_use]
    pub fn schema(&self) -> &'static [FieldSchema] {
        self.schema
    }

    fn raw(&self, name: &str) -> Option<&Value> {
        self.raw.get(name).filter(|v| !v.is_null())
    }

    /// Returns a string field, if present.
    pub fn get_str(&self, name: &str) -> Result<Option<String>, FieldError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(name, FieldType::String)),
        }
    }

    /// Returns a string field, failing if it is absent or empty.
    pub fn require_str(&self, name: &str) -> Result<String, FieldError> {
        match self.get_str(name)? {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(FieldError::Missing { field: name.to_string() }),
        }
    }

    /// Returns a boolean field, if present.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, FieldError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                _ => Err(wrong_type(name, FieldType::Bool)),
            },
            Some(_) => Err(wrong_type(name, FieldType::Bool)),
        }
    }

    /// Returns a duration field, if present.
    pub fn get_duration(&self, name: &str) -> Result<Option<Duration>, FieldError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(secs) => Ok(Some(Duration::from_secs(secs))),
                None => Err(FieldError::Unparsable {
                    field: name.to_string(),
                    value: n.to_string(),
                    reason: "expected a non-negative whole number of seconds".into(),
                }),
            },
            Some(Value::String(s)) => parse_duration(name, s).map(Some),
            Some(_) => Err(wrong_type(name, FieldType::DurationSecond)),
        }
    }
}

fn wrong_type(name: &str, expected: FieldType) -> FieldError {
    FieldError::WrongType { field: name.to_string(), expected }
}

/// Parses a duration-second field, truncated to whole seconds.
fn parse_duration(name: &str, raw: &str) -> Result<Duration, FieldError> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(trimmed)
        .map(|d| Duration::from_secs(d.as_secs()))
        .map_err(|e| FieldError::Unparsable {
            field: name.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

impl TryFrom<&FieldData> for ConfigUpdate {
    type Error = FieldError;

    fn try_from(data: &FieldData) -> Result<Self, Self::Error> {
        Ok(Self {
            argo_cd_url: data.get_str(names::ARGO_CD_URL)?,
            admin_token: data.get_str(names::ADMIN_TOKEN)?.map(Zeroizing::new),
            account_token_max_ttl: data.get_duration(names::ACCOUNT_TOKEN_MAX_TTL)?,
            project_token_max_ttl: data.get_duration(names::PROJECT_TOKEN_MAX_TTL)?,
            insecure: data.get_bool(names::INSECURE)?,
            plaintext: data.get_bool(names::PLAINTEXT)?,
        })
    }
}

impl TokenRequest {
    /// Extracts an account token request.
    ///
    /// A `ttl` that is present but unparsable is treated as omitted, so the
    /// default lifetime applies.
    pub fn account_from_fields(data: &FieldData) -> Result<Self, FieldError> {
        let principal = Principal::account(data.require_str(names::ACCOUNT_NAME)?);
        Ok(Self::new(principal, requested_ttl(data)?))
    }

    /// Extracts a project role token request.
    ///
    /// `ttl` handling matches [`TokenRequest::account_from_fields`].
    pub fn project_from_fields(data: &FieldData) -> Result<Self, FieldError> {
        let principal = Principal::project_role(
            data.require_str(names::PROJECT_NAME)?,
            data.require_str(names::PROJECT_ROLE_NAME)?,
        );
        Ok(Self::new(principal, requested_ttl(data)?))
    }
}

fn requested_ttl(data: &FieldData) -> Result<Option<Duration>, FieldError> {
    match data.get_duration(names::TTL) {
        Ok(ttl) => Ok(ttl),
        Err(err @ (FieldError::Unparsable { .. } | FieldError::WrongType { .. })) => {
            tracing::debug!(error = %err, "ignoring unparsable ttl, default applies");
            Ok(None)
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn data(schema: &'static [FieldSchema], value: Value) -> FieldData {
        FieldData::from_value(schema, value).unwrap()
    }

    #[rstest]
    #[case(json!(3600), Duration::from_secs(3600))]
    #[case(json!("7200"), Duration::from_secs(7200))]
    #[case(json!("2h"), Duration::from_secs(7200))]
    #[case(json!("1h 30m"), Duration::from_secs(5400))]
    #[case::truncated(json!("90s 500ms"), Duration::from_secs(90))]
    #[case::sub_second(json!("500ms"), Duration::ZERO)]
    fn test_duration_forms(#[case] raw: Value, #[case] expected: Duration) {
        let d = data(ACCOUNT_SCHEMA, json!({ "account_name": "a", "ttl": raw }));
        assert_eq!(d.get_duration(names::TTL).unwrap(), Some(expected));
    }

    #[test]
    fn test_missing_field_message() {
        let d = data(ACCOUNT_SCHEMA, json!({}));
        let err = TokenRequest::account_from_fields(&d).unwrap_err();
        assert_eq!(err.to_string(), "missing data: account_name not present in field data");
    }

    #[test]
    fn test_wrong_type_message() {
        let d = data(PROJECT_SCHEMA, json!({ "project_name": 7, "project_role_name": "r" }));
        let err = TokenRequest::project_from_fields(&d).unwrap_err();
        assert_eq!(err.to_string(), "incorrect data: wrong type for project_name: expected string");
    }

    #[test]
    fn test_unknown_field_ignored() {
        let d = data(ACCOUNT_SCHEMA, json!({ "account_name": "a", "expires_in": 5 }));
        assert!(d.get_duration("expires_in").unwrap().is_none());
        let req = TokenRequest::account_from_fields(&d).unwrap();
        assert_eq!(req.principal, Principal::account("a"));
    }

    #[rstest]
    #[case(json!("soon"))]
    #[case(json!(-5))]
    #[case(json!(true))]
    fn test_unparsable_ttl_falls_back_to_default(#[case] ttl: Value) {
        let d = data(ACCOUNT_SCHEMA, json!({ "account_name": "ci-bot", "ttl": ttl }));
        let req = TokenRequest::account_from_fields(&d).unwrap();
        assert_eq!(req.principal, Principal::account("ci-bot"));
        assert_eq!(req.requested_lifetime, None);
    }

    #[test]
    fn test_project_request() {
        let d = data(
            PROJECT_SCHEMA,
            json!({ "project_name": "web", "project_role_name": "ci", "ttl": 600 }),
        );
        let req = TokenRequest::project_from_fields(&d).unwrap();
        assert_eq!(req.principal, Principal::project_role("web", "ci"));
        assert_eq!(req.requested_lifetime, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_config_update_from_fields() {
        let d = data(
            CONFIG_SCHEMA,
            json!({
                "argo_cd_url": "argocd.example.com",
                "admin_token": "t",
                "account_token_max_ttl": "3h",
                "insecure": "true",
            }),
        );
        let update = ConfigUpdate::try_from(&d).unwrap();
        assert_eq!(update.argo_cd_url.as_deref(), Some("argocd.example.com"));
        assert_eq!(update.admin_token.as_ref().map(|t| t.as_str()), Some("t"));
        assert_eq!(update.account_token_max_ttl, Some(Duration::from_secs(3 * 3600)));
        assert_eq!(update.project_token_max_ttl, None);
        assert_eq!(update.insecure, Some(true));
        assert_eq!(update.plaintext, None);
    }

    #[test]
    fn test_config_rejects_malformed_ttl() {
        let d = data(CONFIG_SCHEMA, json!({ "project_token_max_ttl": "forever" }));
        let err = ConfigUpdate::try_from(&d).unwrap_err();
        assert!(matches!(err, FieldError::Unparsable { ref field, .. } if field == "project_token_max_ttl"));
    }

    #[test]
    fn test_null_is_absent() {
        let d = data(CONFIG_SCHEMA, json!({ "insecure": null }));
        assert_eq!(d.get_bool(names::INSECURE).unwrap(), None);
    }
}
