use std::sync::Arc;

use chrono::NaiveDate;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::source::session::SessionState;
use crate::source::{SourceProfile, SourceRequest, Transport};

/// Characters left alone in form values (RFC 3986 unreserved).
const FORM_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Longest diagnostic kept from a failed response body.
const DIAGNOSTIC_LIMIT: usize = 200;

/// Why a unit request produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct FetchFailure {
    pub reason: String,
    /// The anti-forgery token was rejected; a session refresh should fix it.
    pub session_expired: bool,
}

impl FetchFailure {
    fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            session_expired: false,
        }
    }

    fn expired(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            session_expired: true,
        }
    }
}

/// Issues the data request for one date.
pub struct UnitFetcher {
    transport: Arc<dyn Transport>,
    profile: Arc<SourceProfile>,
}

impl UnitFetcher {
    pub fn new(transport: Arc<dyn Transport>, profile: Arc<SourceProfile>) -> Self {
        Self { transport, profile }
    }

    /// Fetch the raw page for `unit_key`, returning the body on success.
    pub async fn fetch(
        &self,
        session: &mut SessionState,
        unit_key: NaiveDate,
        category: &str,
    ) -> Result<String, FetchFailure> {
        let (Some(token), Some(code)) = (
            session.token.clone(),
            session.verification_code.clone(),
        ) else {
            return Err(FetchFailure::expired("no session token held"));
        };

        let form = &self.profile.form;
        let date = unit_key.format(&self.profile.date_format).to_string();
        let body = encode_form(&[
            (form.token.as_str(), token.as_str()),
            (form.date.as_str(), date.as_str()),
            (form.category.as_str(), category),
            (form.verification_code.as_str(), code.as_str()),
        ]);

        let mut request = SourceRequest::post(self.profile.data_url(), body)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", self.profile.landing_url());
        if let Some(name) = &self.profile.token_header {
            request = request.header(name.as_str(), token.as_str());
        }
        if let Some(cookies) = session.cookie_header() {
            request = request.header("Cookie", cookies);
        }

        let resp = self
            .transport
            .send(request)
            .await
            .map_err(|e| FetchFailure::transient(e.to_string()))?;
        session.merge_cookies(&resp);

        if resp.status == self.profile.expired_status {
            return Err(FetchFailure::expired(format!(
                "anti-forgery token expired (status {})",
                resp.status
            )));
        }

        if !resp.is_success() {
            return Err(FetchFailure::transient(format!(
                "status {}: {}",
                resp.status,
                truncate(&resp.body)
            )));
        }

        let lower = resp.body.to_lowercase();
        if let Some(marker) = self
            .profile
            .error_markers
            .iter()
            .find(|m| lower.contains(&m.to_lowercase()))
        {
            return Err(FetchFailure::transient(format!(
                "source rejected request ({marker}): {}",
                truncate(&resp.body)
            )));
        }

        Ok(resp.body)
    }
}

fn encode_form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, FORM_VALUE_SET),
                utf8_percent_encode(v, FORM_VALUE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Whitespace-collapsed prefix of a body, cut on a char boundary.
fn truncate(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(DIAGNOSTIC_LIMIT) {
        Some((idx, _)) => format!("{}…", &collapsed[..idx]),
        None => collapsed,
    }
}
