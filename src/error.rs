use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("track {0} not found")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("provider panicked")]
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("proxy rejected {target_url}: {reason}")]
    Rejected { target_url: String, reason: String },
    #[error("proxy router panicked while routing {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown provider {0}")]
    UnknownProvider(String),
    #[error("provider {provider} failed")]
    ProviderFailure {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownProvider(_))
    }
}
