//! Ordered fallback chains of lookup strategies.
//!
//! The executor runs strategies in order and stops at the first value.
//! A miss and a failure are reported differently but both move on to the
//! next strategy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::Lookup;

/// One way of answering a question.
#[async_trait]
pub trait LookupStrategy<I: Sync + ?Sized, T>: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, input: &I) -> Lookup<T>;
}

/// A value plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub strategy: String,
}

pub struct FallbackChain<I: Sync + ?Sized, T> {
    name: String,
    strategies: Vec<Arc<dyn LookupStrategy<I, T>>>,
}

impl<I, T> FallbackChain<I, T>
where
    I: Sync + ?Sized,
    T: Send,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategies: Vec::new(),
        }
    }

    /// Append a strategy. Order of calls is order of attempts.
    pub fn then(mut self, strategy: Arc<dyn LookupStrategy<I, T>>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order; first found value wins.
    pub async fn resolve(&self, input: &I) -> Option<Resolved<T>> {
        for strategy in &self.strategies {
            match strategy.attempt(input).await {
                Lookup::Found(value) => {
                    debug!(chain = %self.name, strategy = strategy.name(), "chain resolved");
                    return Some(Resolved {
                        value,
                        strategy: strategy.name().to_string(),
                    });
                }
                other => {
                    debug!(
                        chain = %self.name,
                        strategy = strategy.name(),
                        outcome = other.outcome(),
                        "strategy yielded nothing"
                    );
                }
            }
        }
        debug!(chain = %self.name, "chain exhausted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fixed {
        name: &'static str,
        answer: Lookup<u32>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl LookupStrategy<str, u32> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, _input: &str) -> Lookup<u32> {
            self.log.lock().unwrap().push(self.name);
            self.answer.clone()
        }
    }

    fn fixed(
        name: &'static str,
        answer: Lookup<u32>,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn LookupStrategy<str, u32>> {
        Arc::new(Fixed {
            name,
            answer,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn first_found_wins_and_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FallbackChain::new("test")
            .then(fixed("embedded", Lookup::Miss, &log))
            .then(fixed("provider-a", Lookup::Failed, &log))
            .then(fixed("provider-b", Lookup::Found(12), &log))
            .then(fixed("never", Lookup::Found(99), &log));

        let resolved = chain.resolve("show").await.unwrap();
        assert_eq!(resolved.value, 12);
        assert_eq!(resolved.strategy, "provider-b");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["embedded", "provider-a", "provider-b"]
        );
    }

    #[tokio::test]
    async fn exhausted_chain_is_none() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FallbackChain::new("test")
            .then(fixed("a", Lookup::Miss, &log))
            .then(fixed("b", Lookup::Failed, &log));
        assert!(chain.resolve("show").await.is_none());
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
