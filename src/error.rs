/// Errors raised while building requests or generators.
///
/// Generating a shim never fails once a [`ShimGenerator`] exists; these only
/// come up at the edges, when untrusted input is turned into typed values.
///
/// [`ShimGenerator`]: crate::ShimGenerator
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Unable to parse \"{url}\" as an absolute URL")]
    InvalidUrl {
        #[source]
        error: url::ParseError,
        url: String,
    },
    #[error("The request has neither an absolute URI nor a valid \"Host\" header")]
    MissingHost,
    #[error("Invalid configuration for \"{field}\": {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}
