use adc_core::deserialize_id;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body for module create and update. The id is chosen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModulePayload {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmodulePayload {
    pub id: String,
    pub name: String,
    pub module_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub role_id: String,
    #[serde(default = "default_active", deserialize_with = "deserialize_flag")]
    pub is_active: bool,
}

/// Body for user create and update. `password: None` keeps the current one.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UserPayload {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub role_id: i64,
    pub is_active: bool,
}

impl fmt::Debug for UserPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPayload")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("role_id", &self.role_id)
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Role {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
}

/// Resolves a user's role id against the role list; unknown ids read as "Unknown".
pub fn role_name<'a>(roles: &'a [Role], role_id: &str) -> &'a str {
    roles
        .iter()
        .find(|role| role.id == role_id)
        .map(|role| role.name.as_str())
        .unwrap_or("Unknown")
}

fn default_active() -> bool {
    true
}

/// Accepts `true`/`false` as JSON booleans or strings.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::Bool(flag) => Ok(flag),
        serde_json::Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        serde_json::Value::Number(n) => Ok(n.as_i64().is_some_and(|v| v != 0)),
        _ => Err(serde::de::Error::custom("expected boolean for flag")),
    }
}
