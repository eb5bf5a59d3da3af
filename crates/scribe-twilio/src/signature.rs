//! Twilio webhook signature validation (HMAC-SHA1).
//!
//! Twilio signs `url + key1 + value1 + key2 + value2 ...` (keys sorted) with the
//! account auth token and sends the base64 digest in `X-Twilio-Signature`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::debug;
use url::Url;

use crate::inbound::FormParams;

type HmacSha1 = Hmac<Sha1>;

/// Verifies inbound webhook calls against the account auth token.
#[derive(Clone)]
pub struct RequestValidator {
    auth_token: String,
}

impl RequestValidator {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    /// True only if `signature` matches the request URL and form parameters.
    ///
    /// A missing, empty or non-base64 signature is a failed validation. The URL is
    /// also tried with the scheme's default port removed and added, since proxies
    /// disagree on whether Twilio's view of the URL carried one.
    pub fn validate(&self, url: &str, params: &FormParams, signature: Option<&str>) -> bool {
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            debug!(url, "Webhook request carries no signature");
            return false;
        };
        let Ok(expected) = STANDARD.decode(signature) else {
            debug!(url, "Webhook signature is not valid base64");
            return false;
        };

        url_candidates(url).iter().any(|candidate| {
            signed_mac(&self.auth_token, candidate, params)
                .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
        })
    }
}

/// Compute the signature Twilio would send for this URL and parameter set.
pub fn compute_signature(url: &str, params: &FormParams, auth_token: &str) -> String {
    signed_mac(auth_token, url, params)
        .map(|mac| STANDARD.encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

fn signed_mac(auth_token: &str, url: &str, params: &FormParams) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    // BTreeMap iterates in key order, which is the order Twilio signs in.
    for (key, value) in params {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(mac)
}

/// The URL as given, then without and with the scheme's default port.
fn url_candidates(raw: &str) -> Vec<String> {
    let mut candidates = vec![raw.to_string()];
    let Ok(parsed) = Url::parse(raw) else {
        return candidates;
    };
    let Some(host) = parsed.host_str() else {
        return candidates;
    };

    let scheme = parsed.scheme();
    let userinfo = match (parsed.username(), parsed.password()) {
        ("", None) => String::new(),
        (user, None) => format!("{user}@"),
        (user, Some(pass)) => format!("{user}:{pass}@"),
    };
    let mut tail = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        tail.push('?');
        tail.push_str(query);
    }

    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };
    push(format!("{scheme}://{userinfo}{host}{tail}"));
    if let Some(port) = parsed.port_or_known_default() {
        push(format!("{scheme}://{userinfo}{host}:{port}{tail}"));
    }

    candidates
}
