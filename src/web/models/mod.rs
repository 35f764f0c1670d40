use serde::{Deserialize, Serialize};

pub mod alert_models;
pub mod monitor_models;

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // username, used as the acknowledge actor
    pub user_id: i32,
    pub organization_id: i32,
    pub exp: usize,
}

/// Struct to hold authenticated user details, to be passed as a request extension.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
    pub organization_id: i32,
}

/// Parses an optional enum filter from a query string. Empty and `all` mean no filter.
pub(crate) fn parse_filter<T: serde::de::DeserializeOwned>(
    name: &str,
    raw: Option<&str>,
) -> Result<Option<T>, crate::web::AppError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(value) => serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
            .map(Some)
            .map_err(|_| crate::web::AppError::InvalidInput(format!("Invalid {name} '{value}'"))),
    }
}
