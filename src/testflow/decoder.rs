use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};

use crate::proxy::OutboundRequest;

use super::chain::ChainNamespace;
use super::expression::{self, Mode};
use super::template::substitute;
use super::{AddTo, AuthType, KeyValue, RequestBody, RequestData, Variable};

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Raw,
    UrlEncoded,
    FormData,
    None,
}

impl BodyMode {
    pub fn from_selected(selected: &str) -> Self {
        match selected {
            "application/json" | "application/xml" | "text/plain" | "text/html" | "raw" => Self::Raw,
            "application/x-www-form-urlencoded" | "urlencoded" => Self::UrlEncoded,
            "multipart/form-data" | "formdata" => Self::FormData,
            _ => Self::None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Raw => "application/json",
            Self::UrlEncoded => "application/x-www-form-urlencoded",
            Self::FormData => "multipart/form-data",
            Self::None => "text/plain",
        }
    }
}

/// Compose the concrete request for one node from its descriptor, the run's
/// environment variables and the responses of earlier nodes.
pub fn decode(request: &RequestData, variables: &[Variable], chain: &ChainNamespace) -> OutboundRequest {
    let method = match request.method.trim() {
        "" => "GET".to_string(),
        method => method.to_uppercase(),
    };

    OutboundRequest {
        url: decode_url(request, variables, chain),
        method,
        headers: decode_headers(request, variables, chain),
        body: decode_body(request, variables, chain),
        content_type: content_type(request),
    }
}

fn checked(pairs: &[KeyValue]) -> impl Iterator<Item = &KeyValue> {
    pairs.iter().filter(|kv| kv.checked && !kv.key.is_empty())
}

fn template_and_evaluate(text: &str, variables: &[Variable], chain: &ChainNamespace) -> String {
    expression::evaluate(&substitute(text, variables), chain, Mode::Raw)
}

fn append_query(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.extend(utf8_percent_encode(key, URI_COMPONENT));
    url.push('=');
    url.extend(utf8_percent_encode(value, URI_COMPONENT));
}

fn decode_url(request: &RequestData, variables: &[Variable], chain: &ChainNamespace) -> String {
    let mut url = template_and_evaluate(request.url.trim(), variables, chain);

    for kv in checked(&request.query_params) {
        let key = template_and_evaluate(&kv.key, variables, chain);
        let value = template_and_evaluate(&kv.value, variables, chain);
        append_query(&mut url, &key, &value);
    }

    if request.selected_request_auth_type == Some(AuthType::ApiKey) {
        let api_key = request.auth.as_ref().and_then(|auth| auth.api_key.as_ref());
        if let Some(key) = api_key.filter(|k| {
            k.add_to == AddTo::QueryParameter && !k.auth_key.is_empty() && !k.auth_value.is_empty()
        }) {
            append_query(
                &mut url,
                &substitute(&key.auth_key, variables),
                &substitute(&key.auth_value, variables),
            );
        }
    }

    let prefix = if url.is_empty() {
        "http://"
    } else if url.starts_with("http://") || url.starts_with("https://") {
        ""
    } else if url.starts_with("//") {
        "http:"
    } else {
        "http://"
    };
    format!("{prefix}{url}")
}

fn auth_header(request: &RequestData, variables: &[Variable]) -> Option<(String, String)> {
    let auth = request.auth.as_ref()?;
    match request.selected_request_auth_type? {
        AuthType::BearerToken => {
            let token = auth.bearer_token.as_deref().filter(|t| !t.is_empty())?;
            Some(("Authorization".into(), format!("Bearer {}", substitute(token, variables))))
        }
        AuthType::BasicAuth => {
            let basic = auth
                .basic_auth
                .as_ref()
                .filter(|b| !b.username.is_empty() && !b.password.is_empty())?;
            let credentials = format!(
                "{}:{}",
                substitute(&basic.username, variables),
                substitute(&basic.password, variables)
            );
            Some(("Authorization".into(), format!("Basic {}", BASE64.encode(credentials))))
        }
        AuthType::ApiKey => {
            let key = auth.api_key.as_ref().filter(|k| {
                k.add_to == AddTo::Header && !k.auth_key.is_empty() && !k.auth_value.is_empty()
            })?;
            Some((substitute(&key.auth_key, variables), substitute(&key.auth_value, variables)))
        }
        AuthType::NoAuth | AuthType::InheritAuth | AuthType::Unknown => None,
    }
}

fn decode_headers(request: &RequestData, variables: &[Variable], chain: &ChainNamespace) -> String {
    let templated = checked(&request.headers)
        .map(|kv| (substitute(&kv.key, variables), substitute(&kv.value, variables)));
    let all = auth_header(request, variables).into_iter().chain(templated);

    let mut unique: Vec<Value> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (key, value) in all {
        let key = key.to_lowercase();
        if key.is_empty() || key == "content-length" || !seen.insert(key.clone()) {
            continue;
        }
        unique.push(json!({"key": key, "value": value}));
    }

    expression::evaluate(&Value::Array(unique).to_string(), chain, Mode::Raw)
}

fn decode_body(request: &RequestData, variables: &[Variable], chain: &ChainNamespace) -> String {
    let Some(body) = request.body.as_ref() else {
        return String::new();
    };
    let mode = BodyMode::from_selected(request.selected_request_body_type.as_deref().unwrap_or(""));

    match mode {
        BodyMode::Raw => decode_raw(body, variables, chain),
        BodyMode::UrlEncoded => {
            let fields: Vec<Value> = checked(&body.urlencoded)
                .map(|kv| json!({"key": substitute(&kv.key, variables), "value": substitute(&kv.value, variables)}))
                .collect();
            expression::evaluate(&Value::Array(fields).to_string(), chain, Mode::Raw)
        }
        BodyMode::FormData => {
            let mut fields: Vec<Value> = Vec::new();
            if let Some(form) = &body.formdata {
                fields.extend(checked(&form.text).map(|kv| {
                    json!({
                        "key": substitute(&kv.key, variables),
                        "value": substitute(&kv.value, variables),
                        "type": "text",
                    })
                }));
                fields.extend(form.file.iter().filter(|f| f.checked != Some(false)).map(|f| {
                    json!({
                        "key": substitute(&f.key, variables),
                        "value": f.value,
                        "base": f.base,
                        "type": "file",
                    })
                }));
            }
            expression::evaluate(&Value::Array(fields).to_string(), chain, Mode::Raw)
        }
        BodyMode::None => String::new(),
    }
}

fn decode_raw(body: &RequestBody, variables: &[Variable], chain: &ChainNamespace) -> String {
    let text = substitute(body.raw.as_deref().unwrap_or(""), variables);
    if text.trim().is_empty() {
        return "{}".into();
    }

    let evaluated = expression::evaluate(&text, chain, Mode::JsonSafe);
    if evaluated.is_empty() {
        return "{}".into();
    }

    super::lenient_json::reformat(&evaluated).unwrap_or(evaluated)
}

fn content_type(request: &RequestData) -> String {
    let selected = request.selected_request_body_type.as_deref().unwrap_or("");
    if selected.contains('/') {
        return selected.to_string();
    }
    BodyMode::from_selected(selected).mime().to_string()
}
