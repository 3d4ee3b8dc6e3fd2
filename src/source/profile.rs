use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How often the remote source wants a fresh verification code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// One code per session; reused until the token expires.
    #[default]
    PerSession,
    /// One-time codes; a new one is fetched before every unit request.
    PerUnit,
}

/// Zero-based column positions of the name-bearing cells in a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub name: usize,
    pub father_name: Option<usize>,
    pub mother_name: Option<usize>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            name: 1,
            father_name: Some(2),
            mother_name: Some(3),
        }
    }
}

/// Form field names posted with each unit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormFields {
    pub token: String,
    pub date: String,
    pub category: String,
    pub verification_code: String,
}

impl Default for FormFields {
    fn default() -> Self {
        Self {
            token: "_token".to_string(),
            date: "date".to_string(),
            category: "gender".to_string(),
            verification_code: "captcha".to_string(),
        }
    }
}

/// Everything that ties the engine to one particular remote site.
///
/// Loaded from JSON; every field has a default so a profile file only needs
/// the values that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProfile {
    pub base_url: String,
    pub landing_path: String,
    pub data_path: String,

    pub token_meta_name: String,
    pub token_field_name: String,
    /// Lowercase fragments that mark a cookie as carrying the token.
    pub token_cookie_hints: Vec<String>,
    /// Header that echoes the token on data requests, if the site wants one.
    pub token_header: Option<String>,

    /// Primary selector first, then fallbacks.
    pub verification_selectors: Vec<String>,
    pub verification_mode: VerificationMode,

    /// Most specific row container first.
    pub row_selectors: Vec<String>,
    pub min_columns: usize,
    pub placeholders: Vec<String>,
    pub columns: ColumnMap,

    pub form: FormFields,
    pub date_format: String,

    /// Status the site answers with when the anti-forgery token has expired.
    pub expired_status: u16,
    /// Markup fragments that mean the request was rejected despite a 2xx.
    pub error_markers: Vec<String>,
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            landing_path: "/".to_string(),
            data_path: "/search".to_string(),
            token_meta_name: "csrf-token".to_string(),
            token_field_name: "_token".to_string(),
            token_cookie_hints: vec!["xsrf".to_string(), "csrf".to_string(), "token".to_string()],
            token_header: Some("X-CSRF-TOKEN".to_string()),
            verification_selectors: vec![
                "#captcha-code".to_string(),
                ".captcha-code".to_string(),
                "span.captcha".to_string(),
                "label[for=captcha] strong".to_string(),
            ],
            verification_mode: VerificationMode::PerSession,
            row_selectors: vec![
                "table#results tbody tr".to_string(),
                "div.table-responsive table tr".to_string(),
                "table tbody tr".to_string(),
                "tr".to_string(),
            ],
            min_columns: 6,
            placeholders: vec!["-".to_string(), "nil".to_string(), "n/a".to_string()],
            columns: ColumnMap::default(),
            form: FormFields::default(),
            date_format: "%d/%m/%Y".to_string(),
            expired_status: 419,
            error_markers: vec![
                "invalid captcha".to_string(),
                "something went wrong".to_string(),
            ],
        }
    }
}

impl SourceProfile {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::BadRequest(format!("Cannot read profile {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn landing_url(&self) -> String {
        join_url(&self.base_url, &self.landing_path)
    }

    pub fn data_url(&self) -> String {
        join_url(&self.base_url, &self.data_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_profile_fills_defaults() {
        let profile: SourceProfile = serde_json::from_str(
            r#"{"base_url": "https://roll.example.org/", "verification_mode": "per_unit"}"#,
        )
        .unwrap();

        assert_eq!(profile.verification_mode, VerificationMode::PerUnit);
        assert_eq!(profile.min_columns, 6);
        assert_eq!(profile.landing_url(), "https://roll.example.org/");
        assert_eq!(profile.data_url(), "https://roll.example.org/search");
    }
}
