//! JSON bodies of the Argo CD token endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountTokenRequest<'a> {
    pub name: &'a str,
    pub expires_in: u64,
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectTokenRequest<'a> {
    pub project: &'a str,
    pub role: &'a str,
    pub expires_in: u64,
    pub id: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: Zeroizing<String>,
}

/// Extracts a readable message from an error body.
///
/// The gateway answers `{"error": …, "code": …, "message": …}`. Anything
/// else is passed through as text.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    field("message")
        .or_else(|| field("error"))
        .unwrap_or_else(|| body.trim().to_owned())
}
