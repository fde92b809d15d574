use std::collections::HashMap;
use std::sync::Arc;
use veris_core::{ChannelAdapter, ChannelError, PaymentMethod};

/// Maps payment methods to their channel adapters. Built once at startup;
/// orchestrators resolve through it rather than holding adapters directly.
pub struct ChannelRouter {
    adapters: HashMap<PaymentMethod, Arc<dyn ChannelAdapter>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.method(), adapter);
        self
    }

    pub fn resolve(&self, method: PaymentMethod) -> Result<Arc<dyn ChannelAdapter>, ChannelError> {
        self.adapters
            .get(&method)
            .cloned()
            .ok_or_else(|| ChannelError::Unavailable(format!("no adapter for {}", method.as_str())))
    }

    pub fn supports(&self, method: PaymentMethod) -> bool {
        self.adapters.contains_key(&method)
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}
