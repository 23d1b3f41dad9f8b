// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inbound replica event dispatch.
//!
//! A process-wide map from event type to handler. Registration happens once
//! at startup before the server accepts traffic; afterwards the map is only
//! read, so a read-write lock keeps the dispatch path cheap.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

/// Handler invoked with the raw payload of one replica event.
pub type EventHandler = Arc<dyn Fn(Bytes) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("event type must not be empty")]
    EmptyEventType,
    #[error("handler already registered for event type: {0}")]
    AlreadyRegistered(String),
}

/// Registry of replica event handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler for an event type. A duplicate registration is
    /// rejected and leaves the first handler in place.
    pub fn register(
        &self,
        event_type: &str,
        handler: impl Fn(Bytes) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        if event_type.is_empty() {
            return Err(RegistryError::EmptyEventType);
        }
        let mut handlers = self.handlers.write();
        if handlers.contains_key(event_type) {
            return Err(RegistryError::AlreadyRegistered(event_type.to_string()));
        }
        handlers.insert(event_type.to_string(), Arc::new(handler));
        tracing::info!(event_type, "replica event handler registered");
        Ok(())
    }

    /// Look up the handler for an event type.
    pub fn get(&self, event_type: &str) -> Option<EventHandler> {
        self.handlers.read().get(event_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_dispatch() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        registry
            .register("test.event", move |payload| {
                assert_eq!(&payload[..], br#"{"key":"value"}"#);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let handler = registry.get("test.event").unwrap();
        handler(Bytes::from_static(br#"{"key":"value"}"#)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_event_type_absent() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("unknown.event").is_none());
    }

    #[test]
    fn test_empty_event_type_rejected() {
        let registry = HandlerRegistry::new();
        let result = registry.register("", |_| Ok(()));
        assert!(matches!(result, Err(RegistryError::EmptyEventType)));
    }

    #[test]
    fn test_duplicate_registration_keeps_first_handler() {
        let registry = HandlerRegistry::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first_calls);
        registry
            .register("dup.event", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let result = registry.register("dup.event", |_| panic!("second handler must not install"));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));

        registry.get("dup.event").unwrap()(Bytes::new()).unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }
}
