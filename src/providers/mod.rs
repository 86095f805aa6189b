pub mod mock;
pub mod pool;
pub mod saturn;
pub mod traits;

pub use mock::{MockProvider, MockResponse};
pub use pool::ProviderPool;
pub use saturn::SaturnProvider;
pub use traits::{
    AssistantTurn, ChatDelta, ConversationMessage, Provider, ProviderError, ProviderOptions,
    ToolCall, ToolCallDelta, ToolResult, ToolSpec,
};

/// Map a non-success HTTP response onto the provider error taxonomy:
/// rate limiting and server-side failures are retriable against another
/// backend, anything else means the request itself was refused.
pub(crate) async fn api_error(backend: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = body.chars().take(300).collect::<String>();
    let message = format!("{backend} returned {status}: {detail}");
    if status.as_u16() == 429 || status.is_server_error() {
        ProviderError::BackendUnavailable(message)
    } else {
        ProviderError::RequestRejected(message)
    }
}

/// Classify a transport-level failure.
pub(crate) fn transport_error(backend: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() {
        ProviderError::BackendUnavailable(format!("{backend}: {err}"))
    } else if err.is_decode() {
        ProviderError::ProtocolError(format!("{backend}: {err}"))
    } else {
        ProviderError::BackendUnavailable(format!("{backend}: {err}"))
    }
}
