use http::StatusCode;

/// Domain error that knows how it should be presented over HTTP
///
/// Every crate-level error implements this so that the layer rendering
/// vendor error envelopes never has to match on foreign error enums.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `invalid_request_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;

    /// Upstream request id for support correlation, when one is known
    fn request_id(&self) -> Option<&str> {
        None
    }
}
