// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup with a hot-reloadable level filter.
//!
//! The filter sits behind a [`reload`] layer so `POST /log/level` can change
//! verbosity on a running node without a restart.

use anyhow::bail;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Levels accepted by [`LogLevelHandle::set_level`].
pub const LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Handle for updating the active log level at runtime.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Swap the active filter for the given level name (case-insensitive).
    pub fn set_level(&self, level: &str) -> anyhow::Result<()> {
        let upper = level.to_uppercase();
        if !LEVELS.contains(&upper.as_str()) {
            bail!("log LevelParam can only be one of {:?}", LEVELS);
        }
        let filter = EnvFilter::try_new(upper.to_lowercase())?;
        self.inner.reload(filter)?;
        Ok(())
    }
}

/// Install the global subscriber and return the reload handle.
///
/// `RUST_LOG` takes priority over `default_level` when set.
pub fn init(default_level: &str) -> anyhow::Result<LogLevelHandle> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.to_lowercase()))?;
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(LogLevelHandle { inner: handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        // The accepted list matches what set_level validates against.
        for level in LEVELS {
            assert!(EnvFilter::try_new(level.to_lowercase()).is_ok());
        }
    }
}
