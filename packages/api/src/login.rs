//! Response body of `POST accounts/login/`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ```json
/// { "status": "ok", "logged_in_user": { "pk": 5678, "username": "alice" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub logged_in_user: Option<LoggedInUser>,
}

/// The account that was just authenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggedInUser {
    /// Numeric on most app versions, a string on some.
    pub pk: Value,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub full_name: Option<String>,
}

impl LoggedInUser {
    /// The user id in string form, whatever JSON type the server used.
    pub fn pk_string(&self) -> Option<String> {
        match &self.pk {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_pk() {
        let resp: LoginResponse = serde_json::from_str(
            r#"{"status":"ok","logged_in_user":{"pk":5678,"username":"alice"}}"#,
        )
        .unwrap();
        let user = resp.logged_in_user.unwrap();
        assert_eq!(user.pk_string().as_deref(), Some("5678"));
        assert_eq!(user.username.as_deref(), Some("alice"));
    }

    #[test]
    fn string_pk() {
        let resp: LoginResponse =
            serde_json::from_str(r#"{"status":"ok","logged_in_user":{"pk":"5678"}}"#).unwrap();
        assert_eq!(resp.logged_in_user.unwrap().pk_string().as_deref(), Some("5678"));
    }

    #[test]
    fn missing_user() {
        let resp: LoginResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(resp.logged_in_user.is_none());
    }

    #[test]
    fn null_pk_has_no_string_form() {
        let user = LoggedInUser {
            pk: Value::Null,
            username: None,
            full_name: None,
        };
        assert!(user.pk_string().is_none());
    }
}
