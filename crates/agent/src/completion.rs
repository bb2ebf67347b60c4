//! Bounded completion calls.

use maistro_core::error::ProviderError;
use maistro_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::time::Duration;

/// Call the provider, giving up after `timeout`.
pub async fn complete_within(
    provider: &dyn Provider,
    request: ProviderRequest,
    timeout: Duration,
) -> Result<ProviderResponse, ProviderError> {
    match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(format!(
            "{} gave no completion within {}s",
            provider.name(),
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use maistro_core::message::Message;

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = ScriptedProvider::texts(&["late"]).with_delay(Duration::from_secs(60));
        let request = ProviderRequest::new("mock-model", vec![Message::user("hi")], 0.0);

        let err = complete_within(&provider, request, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn fast_provider_passes_through() {
        let provider = ScriptedProvider::texts(&["hello"]);
        let request = ProviderRequest::new("mock-model", vec![Message::user("hi")], 0.0);

        let response = complete_within(&provider, request, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.message.content, "hello");
    }
}
