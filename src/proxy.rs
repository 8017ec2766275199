use crate::error::ProxyError;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_CONTENT_TYPE: &str = "audio/mp4";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36 Edg/109.0.1518.78";

const MAX_ROUTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub target_url: String,
    pub content_type: String,
    pub referer: Option<String>,
    pub user_agent: String,
}

pub trait ProxyRouter: Send + Sync {
    fn start(&self, request: ProxyRequest) -> Result<(), ProxyError>;
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Mutex<VecDeque<ProxyRequest>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ProxyRequest> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn routes(&self) -> Vec<ProxyRequest> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl ProxyRouter for RouteTable {
    fn start(&self, request: ProxyRequest) -> Result<(), ProxyError> {
        let url = request.target_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProxyError::Rejected {
                target_url: request.target_url,
                reason: String::from("only http(s) targets can be routed"),
            });
        }
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.push_back(request);
        while routes.len() > MAX_ROUTES {
            routes.pop_front();
        }
        Ok(())
    }
}
