//! In-process transport double and page builders for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

use crate::error::TransportError;
use crate::source::{Method, SourceRequest, SourceResponse, Transport};

type Handler = dyn Fn(&SourceRequest) -> Result<SourceResponse, TransportError> + Send + Sync;

/// Transport that answers from a closure and records every request.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<SourceRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&SourceRequest) -> Result<SourceResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<SourceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn landing_hits(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == Method::Get)
            .count()
    }

    pub fn data_hits(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == Method::Post)
            .count()
    }

    /// Dates posted so far, in request order.
    pub fn posted_dates(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| form_value(r, "date"))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: SourceRequest) -> Result<SourceResponse, TransportError> {
        let result = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        result
    }
}

pub fn form_value(request: &SourceRequest, field: &str) -> Option<String> {
    request.body.as_deref()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == field).then(|| percent_decode_str(v).decode_utf8_lossy().into_owned())
    })
}

pub fn respond(status: u16, body: impl Into<String>) -> Result<SourceResponse, TransportError> {
    Ok(SourceResponse {
        status,
        headers: Vec::new(),
        body: body.into(),
    })
}

/// Landing page carrying a meta token and an on-page verification code.
pub fn landing(token: &str, code: &str) -> Result<SourceResponse, TransportError> {
    Ok(SourceResponse {
        status: 200,
        headers: vec![(
            "set-cookie".to_string(),
            "laravel_session=s1; Path=/; HttpOnly".to_string(),
        )],
        body: format!(
            r#"<html><head><meta name="csrf-token" content="{token}"></head>
            <body><form><span id="captcha-code">{code}</span></form></body></html>"#
        ),
    })
}

/// Result page with one six-column row per name.
pub fn results_page(names: &[&str]) -> String {
    let rows: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                "<tr><td>{}</td><td>{name}</td><td>RAMAN</td><td>LAKSHMI</td><td>F</td><td>CHENNAI</td></tr>",
                i + 1
            )
        })
        .collect();
    format!(
        "<html><body><table id=\"results\"><thead><tr><th>No</th><th>Name</th></tr></thead><tbody>{rows}</tbody></table></body></html>"
    )
}
