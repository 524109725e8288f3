use std::{convert::Infallible, fmt, str::FromStr};

use http::{header::HOST, uri::Authority};
use url::Url;

use crate::Error;

const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// How the browser intends to use a fetched resource.
///
/// This mirrors the `destination` of a Fetch request. Both the spelling used
/// by `Request.destination` (`""`) and the one sent in the `Sec-Fetch-Dest`
/// header (`"empty"`) parse to [`Destination::Empty`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Destination {
    /// `fetch()`, XHR and anything else without a more specific use.
    #[default]
    Empty,
    Audio,
    AudioWorklet,
    Document,
    Embed,
    Font,
    Frame,
    IFrame,
    Image,
    Json,
    Manifest,
    Object,
    PaintWorklet,
    Report,
    Script,
    ServiceWorker,
    SharedWorker,
    Style,
    Track,
    Video,
    WebIdentity,
    Worker,
    Xslt,
    /// A destination this crate doesn't know about.
    Other(String),
}

impl Destination {
    pub fn as_str(&self) -> &str {
        match self {
            Destination::Empty => "",
            Destination::Audio => "audio",
            Destination::AudioWorklet => "audioworklet",
            Destination::Document => "document",
            Destination::Embed => "embed",
            Destination::Font => "font",
            Destination::Frame => "frame",
            Destination::IFrame => "iframe",
            Destination::Image => "image",
            Destination::Json => "json",
            Destination::Manifest => "manifest",
            Destination::Object => "object",
            Destination::PaintWorklet => "paintworklet",
            Destination::Report => "report",
            Destination::Script => "script",
            Destination::ServiceWorker => "serviceworker",
            Destination::SharedWorker => "sharedworker",
            Destination::Style => "style",
            Destination::Track => "track",
            Destination::Video => "video",
            Destination::WebIdentity => "webidentity",
            Destination::Worker => "worker",
            Destination::Xslt => "xslt",
            Destination::Other(other) => other,
        }
    }
}

impl FromStr for Destination {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let destination = match s {
            "" | "empty" => Destination::Empty,
            "audio" => Destination::Audio,
            "audioworklet" => Destination::AudioWorklet,
            "document" => Destination::Document,
            "embed" => Destination::Embed,
            "font" => Destination::Font,
            "frame" => Destination::Frame,
            "iframe" => Destination::IFrame,
            "image" => Destination::Image,
            "json" => Destination::Json,
            "manifest" => Destination::Manifest,
            "object" => Destination::Object,
            "paintworklet" => Destination::PaintWorklet,
            "report" => Destination::Report,
            "script" => Destination::Script,
            "serviceworker" => Destination::ServiceWorker,
            "sharedworker" => Destination::SharedWorker,
            "style" => Destination::Style,
            "track" => Destination::Track,
            "video" => Destination::Video,
            "webidentity" => Destination::WebIdentity,
            "worker" => Destination::Worker,
            "xslt" => Destination::Xslt,
            other => Destination::Other(other.to_string()),
        };
        Ok(destination)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(destination) => destination,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request seen by the interception host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    url: Url,
    destination: Destination,
}

impl InterceptedRequest {
    /// Create a request from a URL string and a destination label.
    ///
    /// The URL must be absolute.
    pub fn new(url: &str, destination: impl Into<Destination>) -> Result<Self, Error> {
        let parsed = Url::parse(url).map_err(|error| Error::InvalidUrl {
            error,
            url: url.to_string(),
        })?;
        Ok(InterceptedRequest::from_parts(parsed, destination))
    }

    pub fn from_parts(url: Url, destination: impl Into<Destination>) -> Self {
        InterceptedRequest {
            url,
            destination: destination.into(),
        }
    }

    /// Describe an incoming HTTP request.
    ///
    /// Servers usually see origin-form URIs (`/app.wasm`), so the absolute
    /// URL is rebuilt from the `Host` header, which must be a plain
    /// `host[:port]` authority. The scheme is `https` when `X-Forwarded-Proto`
    /// says so and `http` otherwise. The destination comes from
    /// the `Sec-Fetch-Dest` header and defaults to [`Destination::Empty`].
    pub fn from_http<B>(request: &http::Request<B>) -> Result<Self, Error> {
        let uri = request.uri();
        let headers = request.headers();

        let url = if uri.scheme().is_some() && uri.authority().is_some() {
            uri.to_string()
        } else {
            let host = match headers.get(HOST) {
                Some(value) => Authority::try_from(value.as_bytes())
                    .ok()
                    .filter(|authority| authority.as_str().find('@').is_none())
                    .ok_or(Error::MissingHost)?,
                None => uri.authority().cloned().ok_or(Error::MissingHost)?,
            };
            let scheme = headers
                .get(X_FORWARDED_PROTO)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|scheme| scheme.eq_ignore_ascii_case("https"))
                .map_or("http", |_| "https");
            let path = uri
                .path_and_query()
                .map(|path_and_query| path_and_query.as_str())
                .unwrap_or("/");
            format!("{scheme}://{host}{path}")
        };

        let destination = headers
            .get(SEC_FETCH_DEST)
            .and_then(|value| value.to_str().ok())
            .map(Destination::from)
            .unwrap_or_default();

        InterceptedRequest::new(&url, destination)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }
}

/// Is this a `.wasm` file being loaded through a `<script>` tag?
///
/// The path must end with the exact, case-sensitive suffix `.wasm`; the query
/// string and fragment aren't part of the path.
pub fn is_wasm_script(request: &InterceptedRequest) -> bool {
    request.url.path().ends_with(".wasm") && request.destination == Destination::Script
}
