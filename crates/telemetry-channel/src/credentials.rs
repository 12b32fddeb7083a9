// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application secret sent with every ingestion request.
//!
//! The secret is either fixed for the life of the process or produced by a
//! resolver, e.g. read from a mounted file that is rotated out of band. A
//! resolved secret is cached until the endpoint rejects it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Produces the current secret, or `None` when it is not available yet.
pub type SecretResolverFn = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

#[derive(Clone)]
pub enum Credentials {
    Static(Arc<str>),
    Rotating {
        resolver: SecretResolverFn,
        cached: Arc<Mutex<Option<Arc<str>>>>,
    },
}

impl Credentials {
    #[must_use]
    pub fn from_static_secret(secret: &str) -> Self {
        Self::Static(Arc::from(secret))
    }

    #[must_use]
    pub fn from_resolver(resolver: SecretResolverFn) -> Self {
        Self::Rotating {
            resolver,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Reads the trimmed content of `path`, again after every rejection.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::from_resolver(Arc::new(move || -> BoxFuture<'static, Option<String>> {
            let path = path.clone();
            Box::pin(async move {
                let read = tokio::task::spawn_blocking(move || std::fs::read_to_string(path)).await;
                match read {
                    Ok(Ok(secret)) => Some(secret.trim().to_string()).filter(|s| !s.is_empty()),
                    Ok(Err(e)) => {
                        warn!("CREDENTIALS | failed to read app secret: {e}");
                        None
                    }
                    Err(e) => {
                        warn!("CREDENTIALS | failed to read app secret: {e}");
                        None
                    }
                }
            })
        }))
    }

    /// Current secret. A resolver that yields nothing is asked again on the
    /// next call.
    pub async fn app_secret(&self) -> Option<Arc<str>> {
        match self {
            Self::Static(secret) => Some(Arc::clone(secret)),
            Self::Rotating { resolver, cached } => {
                let mut cached = cached.lock().await;
                if cached.is_none() {
                    *cached = resolver().await.map(Arc::from);
                }
                cached.clone()
            }
        }
    }

    /// Forgets a rejected secret. Returns whether a later attempt may see a
    /// different one.
    pub async fn invalidate(&self) -> bool {
        match self {
            Self::Static(_) => false,
            Self::Rotating { cached, .. } => {
                cached.lock().await.take();
                debug!("CREDENTIALS | app secret rejected, resolving it again");
                true
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => write!(f, "Credentials::Static"),
            Self::Rotating { .. } => write!(f, "Credentials::Rotating"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_static_secret_is_never_invalidated() {
        let credentials = Credentials::from_static_secret("app-secret");
        assert_eq!(credentials.app_secret().await.as_deref(), Some("app-secret"));
        assert!(!credentials.invalidate().await);
        assert_eq!(credentials.app_secret().await.as_deref(), Some("app-secret"));
        assert_eq!(format!("{credentials:?}"), "Credentials::Static");
    }

    #[tokio::test]
    async fn test_resolved_secret_is_cached_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let credentials = Credentials::from_resolver(Arc::new(
            move || -> BoxFuture<'static, Option<String>> {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Some(format!("secret-{call}")) })
            },
        ));
        let clone = credentials.clone();

        assert_eq!(credentials.app_secret().await.as_deref(), Some("secret-0"));
        assert_eq!(clone.app_secret().await.as_deref(), Some("secret-0"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(clone.invalidate().await);
        assert_eq!(credentials.app_secret().await.as_deref(), Some("secret-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_secret_is_resolved_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let credentials = Credentials::from_resolver(Arc::new(
            move || -> BoxFuture<'static, Option<String>> {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { (call > 0).then(|| "late".to_string()) })
            },
        ));

        assert_eq!(credentials.app_secret().await, None);
        assert_eq!(credentials.app_secret().await.as_deref(), Some("late"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_file_secret_follows_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-secret");
        let credentials = Credentials::from_file(&path);
        assert_eq!(credentials.app_secret().await, None);

        std::fs::write(&path, "first\n").unwrap();
        assert_eq!(credentials.app_secret().await.as_deref(), Some("first"));

        std::fs::write(&path, "second").unwrap();
        assert_eq!(credentials.app_secret().await.as_deref(), Some("first"));
        assert!(credentials.invalidate().await);
        assert_eq!(credentials.app_secret().await.as_deref(), Some("second"));
    }
}
