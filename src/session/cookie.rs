//! Session cookie attributes and `Cookie`/`Set-Cookie` header handling.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Attributes of a cookie written by the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cookie {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    /// Seconds. 0 omits `Max-Age`; a negative value deletes the cookie.
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for Cookie {
    fn default() -> Self {
        Self {
            name: "_session_id".to_string(),
            path: "/".to_string(),
            domain: None,
            max_age: 2_592_000,
            secure: false,
            http_only: true,
        }
    }
}

impl Cookie {
    /// Same attributes under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Value of this cookie in the request, if present and non-empty.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    /// Append a `Set-Cookie` carrying `value`.
    pub fn set(&self, headers: &mut HeaderMap, value: &str) {
        let line = self.render(value, self.max_age);
        append(headers, &line, &self.name);
    }

    /// Append a `Set-Cookie` that makes the client drop the cookie.
    pub fn delete(&self, headers: &mut HeaderMap) {
        let line = self.render("", -1);
        append(headers, &line, &self.name);
    }

    pub(crate) fn render(&self, value: &str, max_age: i64) -> String {
        let mut line = format!("{}={}", self.name, value);
        if !self.path.is_empty() {
            line.push_str("; Path=");
            line.push_str(&self.path);
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            line.push_str("; Domain=");
            line.push_str(domain);
        }
        if max_age > 0 {
            let expires = Utc::now() + Duration::seconds(max_age);
            line.push_str(&format!(
                "; Expires={}; Max-Age={}",
                expires.format(EXPIRES_FORMAT),
                max_age
            ));
        } else if max_age < 0 {
            // A moment in the past: expire now.
            let past = Utc.timestamp_opt(1, 0).single().unwrap_or_default();
            line.push_str(&format!("; Expires={}; Max-Age=0", past.format(EXPIRES_FORMAT)));
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        if self.secure {
            line.push_str("; Secure");
        }
        line
    }
}

fn append(headers: &mut HeaderMap, line: &str, name: &str) {
    match HeaderValue::from_str(line) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(err) => tracing::warn!(cookie = name, error = %err, "cookie value is not a valid header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_picks_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1; _session_id=abc"));
        headers.append(COOKIE, HeaderValue::from_static("b=2"));

        let cookie = Cookie::default();
        assert_eq!(cookie.read(&headers).as_deref(), Some("abc"));
        assert_eq!(cookie.renamed("b").read(&headers).as_deref(), Some("2"));
        assert_eq!(cookie.renamed("missing").read(&headers), None);

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("_session_id="));
        assert_eq!(cookie.read(&empty), None);
    }

    #[test]
    fn test_set_and_delete_attributes() {
        let cookie = Cookie {
            domain: Some("example.com".into()),
            secure: true,
            ..Cookie::default()
        };
        let mut headers = HeaderMap::new();
        cookie.set(&mut headers, "abc");
        cookie.delete(&mut headers);

        let lines: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("_session_id=abc; Path=/; Domain=example.com; Expires="));
        assert!(lines[0].ends_with("Max-Age=2592000; HttpOnly; Secure"));
        assert!(lines[1].starts_with("_session_id=; Path=/"));
        assert!(lines[1].contains("Expires=Thu, 01 Jan 1970 00:00:01 GMT; Max-Age=0"));
    }

    #[test]
    fn test_zero_max_age_is_a_browser_session_cookie() {
        let cookie = Cookie {
            max_age: 0,
            http_only: false,
            ..Cookie::default()
        };
        assert_eq!(cookie.render("v", 0), "_session_id=v; Path=/");
    }
}
