//! Request templates and their per-call rendering

use crate::context::UserSession;
use crate::outcome::SuccessSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Header carrying the authenticated user id on order requests
pub const USER_ID_HEADER: &str = "X-User-ID";

/// HTTP method of a request template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Canonical method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// How a template authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No credentials
    #[default]
    None,
    /// Bearer token of the client's session
    Bearer,
}

/// A request shape with `{{var}}` placeholders, rendered once per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// Name used to tag outcomes and metrics
    pub name: String,
    /// HTTP method
    pub method: Method,
    /// Path relative to the target base URL, may contain placeholders
    pub path: String,
    /// JSON body, string values may contain placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Authentication mode
    #[serde(default)]
    pub auth: AuthMode,
    /// Send the session's user id in [`USER_ID_HEADER`]
    #[serde(default)]
    pub user_header: bool,
    /// Per-request timeout, overrides the client default
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Statuses counted as success, overrides the classifier default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<SuccessSet>,
}

impl RequestTemplate {
    /// Create a template
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            body: None,
            auth: AuthMode::None,
            user_header: false,
            timeout: None,
            success: None,
        }
    }

    /// GET template
    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::Get, path)
    }

    /// POST template with a JSON body
    pub fn post(name: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self::new(name, Method::Post, path).with_body(body)
    }

    /// Set the body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Authenticate with the session bearer token
    pub fn bearer(mut self) -> Self {
        self.auth = AuthMode::Bearer;
        self
    }

    /// Send the session user id header
    pub fn with_user_header(mut self) -> Self {
        self.user_header = true;
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the success set
    pub fn expect(mut self, success: SuccessSet) -> Self {
        self.success = Some(success);
        self
    }

    /// True if rendering needs a provisioned session
    pub fn needs_session(&self) -> bool {
        self.auth == AuthMode::Bearer || self.user_header
    }

    /// Substitute placeholders and attach credentials
    pub fn render(&self, vars: &TemplateVars, session: Option<&UserSession>) -> PreparedRequest {
        let mut headers = Vec::new();
        if self.user_header {
            if let Some(user_id) = session.and_then(|s| s.user_id.as_deref()) {
                headers.push((USER_ID_HEADER.to_string(), user_id.to_string()));
            }
        }

        let bearer = match self.auth {
            AuthMode::Bearer => session.map(|s| s.access_token.clone()),
            AuthMode::None => None,
        };

        PreparedRequest {
            name: self.name.clone(),
            method: self.method,
            path: vars.substitute(&self.path),
            body: self.body.as_ref().map(|b| vars.render_value(b)),
            bearer,
            headers,
            timeout: self.timeout,
        }
    }
}

/// Values substituted into `{{name}}` placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
    numeric: BTreeSet<String>,
}

impl TemplateVars {
    /// Empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        self.numeric.remove(&key);
        self.vars.insert(key, value.to_string());
        self
    }

    /// Set a variable that renders as a JSON number when it fills a whole value
    pub fn set_number(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        let key = key.into();
        self.vars.insert(key.clone(), value.to_string());
        self.numeric.insert(key);
        self
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style [`set_number`](Self::set_number)
    pub fn with_number(mut self, key: impl Into<String>, value: i64) -> Self {
        self.set_number(key, value);
        self
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Copy every variable of `other` into `self`
    pub fn extend(&mut self, other: &TemplateVars) {
        for (k, v) in &other.vars {
            if other.numeric.contains(k) {
                self.numeric.insert(k.clone());
            } else {
                self.numeric.remove(k);
            }
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Replace known placeholders in `input`; unknown ones are left verbatim
    pub fn substitute(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                out.push_str(&rest[open..]);
                return out;
            };
            match self.vars.get(after[..close].trim()) {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[open..open + close + 4]),
            }
            rest = &after[close + 2..];
        }

        out.push_str(rest);
        out
    }

    /// Render placeholders inside a JSON value
    ///
    /// A string that is exactly one placeholder of a variable set with
    /// [`set_number`](Self::set_number) becomes a JSON number. Every other
    /// placeholder stays a string, even when its value is all digits.
    pub fn render_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                if let Some(key) = sole_placeholder(s).filter(|k| self.numeric.contains(*k)) {
                    if let Some(n) = self.get(key).and_then(|v| v.parse::<i64>().ok()) {
                        return Value::from(n);
                    }
                }
                Value::String(self.substitute(s))
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// A fully rendered request, ready for a [`TargetClient`](crate::traits::TargetClient)
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    /// Template name
    pub name: String,
    /// HTTP method
    pub method: Method,
    /// Rendered path
    pub path: String,
    /// Rendered body
    pub body: Option<Value>,
    /// Bearer token, if the template authenticates
    pub bearer: Option<String>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}
