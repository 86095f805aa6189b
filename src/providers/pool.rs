use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::saturn::SaturnProvider;
use super::traits::{
    AssistantTurn, ConversationMessage, Provider, ProviderError, ProviderOptions, ToolSpec,
};
use crate::discovery::{filter, sort_by_score, DiscoveryError, SaturnService, ServiceCache};

/// Default number of additional backends tried after the first failure.
const DEFAULT_MAX_RETRIES: usize = 2;

/// Several discovered backends behind the single-provider chat contract.
///
/// Every request re-consults the cache, scores the matching services, and
/// walks them best-first; `BackendUnavailable` moves on to the next
/// candidate, anything else is final.
#[derive(Debug)]
pub struct ProviderPool {
    cache: Arc<ServiceCache>,
    options: ProviderOptions,
    max_retries: usize,
}

impl ProviderPool {
    pub fn new(cache: Arc<ServiceCache>, options: ProviderOptions) -> Self {
        Self {
            cache,
            options,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Build a pool only if at least `min_services` backends currently pass
    /// the filter.
    pub async fn connect(
        cache: Arc<ServiceCache>,
        options: ProviderOptions,
        min_services: usize,
    ) -> Result<Self, DiscoveryError> {
        let snapshot = cache.get().await?;
        let matching = filter(&snapshot, &options.filter);
        if matching.len() < min_services {
            return Err(DiscoveryError::NoServiceMatches);
        }
        Ok(Self::new(cache, options))
    }

    /// Matching services, best score first.
    async fn candidates(&self) -> Result<Vec<SaturnService>, ProviderError> {
        let snapshot = self
            .cache
            .get()
            .await
            .map_err(|e| ProviderError::BackendUnavailable(e.to_string()))?;
        let mut matching = filter(&snapshot, &self.options.filter);
        sort_by_score(&mut matching);
        if matching.is_empty() {
            return Err(ProviderError::BackendUnavailable(
                "no discovered service matches the filter".into(),
            ));
        }
        Ok(matching)
    }
}

#[async_trait]
impl Provider for ProviderPool {
    fn name(&self) -> &str {
        "saturn-pool"
    }

    fn model(&self) -> String {
        self.options.model.clone()
    }

    fn set_model(&mut self, model: &str) {
        self.options.model = model.to_string();
    }

    fn models(&self) -> Vec<String> {
        let snapshot = self.cache.peek();
        let mut matching = filter(&snapshot, &self.options.filter);
        sort_by_score(&mut matching);
        matching
            .first()
            .map(|s| s.models.clone())
            .unwrap_or_default()
    }

    async fn chat(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError> {
        let candidates = self.candidates().await?;
        let attempts = candidates.len().min(self.max_retries + 1);

        let mut last_error = None;
        for service in candidates.into_iter().take(attempts) {
            let backend = service.name.clone();
            debug!(backend = %backend, score = service.score(), "pool attempting backend");
            let provider = SaturnProvider::new(service, &self.options);
            match provider.chat(system_prompt, conversation, tools).await {
                Ok(turn) => return Ok(turn),
                Err(ProviderError::BackendUnavailable(msg)) => {
                    warn!(backend = %backend, error = %msg, "backend unavailable, trying next");
                    last_error = Some(ProviderError::BackendUnavailable(msg));
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ProviderError::BackendUnavailable("no backend reachable".into())))
    }
}
