use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use uuid::Uuid;

use crate::error::SessionError;
use crate::source::{SourceProfile, SourceRequest, SourceResponse, Transport};

/// Per-job session material. Never shared between jobs.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    cookies: BTreeMap<String, String>,
    pub token: Option<String>,
    pub verification_code: Option<String>,
}

impl SessionState {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// `Cookie` header value for the next request, if any cookies are held.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Fold every `Set-Cookie` of a response into the jar, newest value wins.
    pub fn merge_cookies(&mut self, response: &SourceResponse) {
        for raw in response.header_values("set-cookie") {
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.token.is_some() && self.verification_code.is_some()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
        self.token = None;
        self.verification_code = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: String,
    pub verification_code: String,
}

/// Acquires the anti-forgery token and verification code from the landing page.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    profile: Arc<SourceProfile>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, profile: Arc<SourceProfile>) -> Self {
        Self { transport, profile }
    }

    /// Refresh `session` in place from the landing page.
    ///
    /// A caller-provided code always wins over an extracted one, but the page
    /// is still fetched so the token and cookies are current.
    pub async fn acquire(
        &self,
        job_id: Uuid,
        session: &mut SessionState,
        provided_code: Option<&str>,
    ) -> Result<SessionGrant, SessionError> {
        let mut request = SourceRequest::get(self.profile.landing_url());
        if let Some(cookies) = session.cookie_header() {
            request = request.header("Cookie", cookies);
        }

        let resp = self.transport.send(request).await?;
        session.merge_cookies(&resp);
        if !resp.is_success() {
            return Err(SessionError::Status(resp.status));
        }

        let page = LandingPage::parse(&resp.body, &self.profile);

        let token = page
            .token
            .or_else(|| self.token_from_cookies(session))
            .ok_or(SessionError::TokenNotFound)?;

        let provided = provided_code.map(str::trim).filter(|c| !c.is_empty());
        let verification_code = match (provided, page.verification_code) {
            (Some(code), _) => code.to_string(),
            (None, Some(code)) => code,
            (None, None) => return Err(SessionError::VerificationCodeMissing),
        };

        tracing::debug!(
            job_id = %job_id,
            provided = provided.is_some(),
            cookies = session.cookies.len(),
            "Session acquired"
        );

        session.token = Some(token.clone());
        session.verification_code = Some(verification_code.clone());

        Ok(SessionGrant {
            token,
            verification_code,
        })
    }

    fn token_from_cookies(&self, session: &SessionState) -> Option<String> {
        session.cookies.iter().find_map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            self.profile
                .token_cookie_hints
                .iter()
                .any(|hint| lower.contains(hint.as_str()))
                .then(|| percent_decode_str(value).decode_utf8_lossy().into_owned())
                .filter(|v| !v.is_empty())
        })
    }
}

/// What the landing page markup yields. Kept apart from the async path
/// because `scraper::Html` is not `Send`.
struct LandingPage {
    token: Option<String>,
    verification_code: Option<String>,
}

impl LandingPage {
    fn parse(body: &str, profile: &SourceProfile) -> Self {
        let doc = Html::parse_document(body);

        let meta = format!("meta[name=\"{}\"]", profile.token_meta_name);
        let field = format!("input[name=\"{}\"]", profile.token_field_name);
        let token = first_attr(&doc, &meta, "content").or_else(|| first_attr(&doc, &field, "value"));

        let verification_code = profile
            .verification_selectors
            .iter()
            .find_map(|sel| first_text(&doc, sel));

        Self {
            token,
            verification_code,
        }
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!("Ignoring invalid selector '{selector}': {e}");
            None
        }
    }
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = parse_selector(selector)?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = parse_selector(selector)?;
    doc.select(&sel).find_map(|el| {
        let text = el
            .value()
            .attr("value")
            .map(String::from)
            .unwrap_or_else(|| el.text().collect::<String>());
        let text = text.split_whitespace().collect::<String>();
        (!text.is_empty()).then_some(text)
    })
}
