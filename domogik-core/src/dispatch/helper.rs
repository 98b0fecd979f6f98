use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// A named helper reachable through `/helper/<name>/<args>...`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// One line shown by `/helper/help`.
    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, args: &[String]) -> Result<Vec<String>, HandlerError>;
}

/// Helpers resolved by name, registered once at startup.
#[derive(Clone, Default)]
pub struct HelperRegistry {
    handlers: Arc<DashMap<String, Arc<dyn Handler>>>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        debug!(helper = %name, "Registering helper");
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).map(|h| Arc::clone(h.value()))
    }

    /// `(name, description)` pairs sorted by name.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut helpers: Vec<(String, String)> = self
            .handlers
            .iter()
            .map(|h| (h.key().clone(), h.value().description().to_string()))
            .collect();
        helpers.sort();
        helpers
    }
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Upper;

    #[async_trait]
    impl Handler for Upper {
        fn description(&self) -> &str {
            "upper-cases its arguments"
        }

        async fn execute(&self, args: &[String]) -> Result<Vec<String>, HandlerError> {
            if args.is_empty() {
                return Err(HandlerError::InvalidArguments("nothing to do".into()));
            }
            Ok(args.iter().map(|a| a.to_uppercase()).collect())
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let helpers = HelperRegistry::new();
        helpers.register("upper", Arc::new(Upper));

        let handler = helpers.get("upper").unwrap();
        assert_eq!(
            handler.execute(&["a".to_string(), "b".to_string()]).await,
            Ok(vec!["A".to_string(), "B".to_string()])
        );
        assert!(handler.execute(&[]).await.is_err());
        assert!(helpers.get("lower").is_none());
        assert_eq!(
            helpers.describe(),
            vec![("upper".to_string(), "upper-cases its arguments".to_string())]
        );
    }
}
