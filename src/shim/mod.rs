//! Rendering of the JavaScript loader that replaces a `.wasm` script.

use http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};

use crate::{
    Error, ShimConfig,
    config::DEFAULT_CONTENT_TYPE,
    request::{InterceptedRequest, is_wasm_script},
};

/// The loader template. The placeholders are substituted by [`render_shim()`].
const TEMPLATE: &str = include_str!("loader.js");

const URL_PLACEHOLDER: &str = "__SHIM_URL__";
const IMPORT_ATTRIBUTE_PLACEHOLDER: &str = "__SHIM_IMPORT_ATTRIBUTE__";
const ALLOW_REFERENCES_PLACEHOLDER: &str = "__SHIM_ALLOW_REFERENCES__";

/// The script served in place of a `.wasm` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimResponse {
    pub body: String,
    pub headers: HeaderMap,
}

impl ShimResponse {
    /// Turn this into an `http::Response` with a `200 OK` status.
    pub fn into_http<B>(self) -> http::Response<B>
    where
        B: From<String>,
    {
        let mut response = http::Response::new(B::from(self.body));
        *response.status_mut() = StatusCode::OK;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Generates loader shims for requests that pass [`is_wasm_script()`].
///
/// A generator holds no mutable state, so the same request always produces a
/// byte-identical body.
#[derive(Debug, Clone)]
pub struct ShimGenerator {
    import_attribute: String,
    allow_global_references: bool,
    content_type: HeaderValue,
}

impl ShimGenerator {
    /// Validate `config` and build a generator from it.
    pub fn new(config: &ShimConfig) -> Result<Self, Error> {
        config.validate_import_attribute()?;
        let content_type = config.content_type_header()?;

        Ok(ShimGenerator {
            import_attribute: config.import_attribute.clone(),
            allow_global_references: config.allow_global_references,
            content_type,
        })
    }

    /// Produce the shim for `request`, or `None` when it isn't a `.wasm`
    /// script and should be handled normally.
    pub fn fetch_wasm_script(&self, request: &InterceptedRequest) -> Option<ShimResponse> {
        if !is_wasm_script(request) {
            tracing::trace!(
                url = %request.url(),
                destination = %request.destination(),
                "Not a wasm script, passing through"
            );
            return None;
        }

        tracing::debug!(url = %request.url(), "Generating a wasm loader shim");

        let mut headers = HeaderMap::with_capacity(1);
        headers.insert(CONTENT_TYPE, self.content_type.clone());

        Some(ShimResponse {
            body: render_shim(
                request.url().as_str(),
                &self.import_attribute,
                self.allow_global_references,
            ),
            headers,
        })
    }
}

impl Default for ShimGenerator {
    fn default() -> Self {
        let config = ShimConfig::default();
        ShimGenerator {
            import_attribute: config.import_attribute,
            allow_global_references: config.allow_global_references,
            content_type: HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        }
    }
}

/// Produce the loader shim for `request` using the default configuration.
///
/// Returns `None` for anything that isn't a `.wasm` file requested as a
/// script.
pub fn fetch_wasm_script(request: &InterceptedRequest) -> Option<ShimResponse> {
    ShimGenerator::default().fetch_wasm_script(request)
}

/// Render the loader template.
///
/// Each value is embedded as an escaped string literal and substitution
/// happens in a single pass, so a substituted value is never scanned for
/// placeholders again.
pub fn render_shim(url: &str, import_attribute: &str, allow_global_references: bool) -> String {
    let url = js_string_literal(url);
    let import_attribute = js_string_literal(import_attribute);
    let allow_references = if allow_global_references {
        "true"
    } else {
        "false"
    };

    let substitutions = [
        (URL_PLACEHOLDER, url.as_str()),
        (IMPORT_ATTRIBUTE_PLACEHOLDER, import_attribute.as_str()),
        (ALLOW_REFERENCES_PLACEHOLDER, allow_references),
    ];

    let mut rendered = String::with_capacity(TEMPLATE.len() + url.len());
    let mut rest = TEMPLATE;

    loop {
        let next = substitutions
            .iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder)
                    .map(|offset| (offset, *placeholder, *value))
            })
            .min_by_key(|(offset, _, _)| *offset);

        match next {
            Some((offset, placeholder, value)) => {
                rendered.push_str(&rest[..offset]);
                rendered.push_str(value);
                rest = &rest[offset + placeholder.len()..];
            }
            None => {
                rendered.push_str(rest);
                return rendered;
            }
        }
    }
}

/// Quote `value` as a JavaScript string literal.
///
/// On top of JSON string escaping, `<`, `>`, `&`, U+2028 and U+2029 are
/// escaped so the literal stays inert when the shim is inlined in HTML and
/// in engines predating ES2019.
pub fn js_string_literal(value: &str) -> String {
    let json = serde_json::Value::String(value.to_string()).to_string();

    let mut literal = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => literal.push_str("\\u003c"),
            '>' => literal.push_str("\\u003e"),
            '&' => literal.push_str("\\u0026"),
            '\u{2028}' => literal.push_str("\\u2028"),
            '\u{2029}' => literal.push_str("\\u2029"),
            c => literal.push(c),
        }
    }
    literal
}
