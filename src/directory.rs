use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub const UNKNOWN_USER: &str = "unknown user";

pub trait UserDirectory: Send + Sync {
    fn find_name(&self, user_id: &str) -> Option<String>;

    fn display_name(&self, user_id: &str) -> String {
        self.find_name(user_id)
            .unwrap_or_else(|| String::from(UNKNOWN_USER))
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, nickname: &str) {
        let trimmed = nickname.trim();
        let name = if trimmed.is_empty() { user_id } else { trimmed };
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string(), name.to_string());
    }
}

impl UserDirectory for MemoryDirectory {
    fn find_name(&self, user_id: &str) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }
}
