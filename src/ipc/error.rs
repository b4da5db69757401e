use serde::Serialize;
use serde_json::json;

use crate::error::{AuthError, BackendError, Error};

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        let code = match e {
            AuthError::NotConfigured => "not_configured",
            _ => "auth_error",
        };
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<BackendError> for HandlerErr {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotConfigured => HandlerErr {
                code: "not_configured",
                message: e.to_string(),
                details: None,
            },
            _ => HandlerErr {
                code: "backend_error",
                details: Some(json!({ "code": e.code() })),
                message: e.to_string(),
            },
        }
    }
}

impl From<Error> for HandlerErr {
    fn from(e: Error) -> Self {
        match e {
            Error::Auth(e) => e.into(),
            Error::Backend(e) => e.into(),
        }
    }
}

/// `{id, ok: true, result}` on success, the mapped error otherwise.
pub fn respond<T: Serialize>(id: &str, result: Result<T, HandlerErr>) -> serde_json::Value {
    match result.and_then(|v| {
        serde_json::to_value(v).map_err(|e| HandlerErr {
            code: "internal",
            message: e.to_string(),
            details: None,
        })
    }) {
        Ok(value) => ok(id, value),
        Err(e) => e.response(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_codes_travel_in_details() {
        let e: HandlerErr = Error::Backend(BackendError::request("23505", "duplicate key")).into();
        let resp = e.response("7");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("backend_error"));
        assert_eq!(resp["error"]["message"], json!("duplicate key"));
        assert_eq!(resp["error"]["details"]["code"], json!("23505"));
    }

    #[test]
    fn not_configured_has_its_own_code() {
        let auth: HandlerErr = AuthError::NotConfigured.into();
        let data: HandlerErr = BackendError::NotConfigured.into();
        assert_eq!(auth.code, "not_configured");
        assert_eq!(data.code, "not_configured");
        let invalid: HandlerErr = AuthError::InvalidCredentials.into();
        assert_eq!(invalid.code, "auth_error");
        assert_eq!(invalid.message, "Invalid login credentials");
    }
}
