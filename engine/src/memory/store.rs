use super::types::{Decision, Experience};
use super::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Storage for experiences and decisions
///
/// Implementations only persist and return records. Validation, caching and
/// write serialization are handled by the memory service.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    async fn append(&self, experience: Experience) -> Result<()>;

    /// All experiences in insertion order
    async fn list(&self) -> Result<Vec<Experience>>;

    /// Delete the given ids, returning how many were present
    async fn remove(&self, ids: &[String]) -> Result<usize>;

    async fn append_decision(&self, decision: Decision) -> Result<()>;

    async fn list_decisions(&self) -> Result<Vec<Decision>>;
}

/// Process-local store, used in tests and with `backend = "memory"`
#[derive(Default)]
pub struct InMemoryStore {
    experiences: RwLock<Vec<Experience>>,
    decisions: RwLock<Vec<Decision>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperienceStore for InMemoryStore {
    async fn append(&self, experience: Experience) -> Result<()> {
        self.experiences.write().await.push(experience);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Experience>> {
        Ok(self.experiences.read().await.clone())
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut experiences = self.experiences.write().await;
        let before = experiences.len();
        experiences.retain(|exp| !doomed.contains(exp.id.as_str()));
        Ok(before - experiences.len())
    }

    async fn append_decision(&self, decision: Decision) -> Result<()> {
        self.decisions.write().await.push(decision);
        Ok(())
    }

    async fn list_decisions(&self) -> Result<Vec<Decision>> {
        Ok(self.decisions.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{DecisionRecord, DecisionType, ErrorType, ExperienceRecord, Severity};

    fn experience(summary: &str) -> Experience {
        Experience::new(ExperienceRecord::new(
            "p",
            "m",
            "rust",
            Severity::Low,
            ErrorType::Bug,
            summary,
            "cause",
            "fix",
        ))
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = InMemoryStore::new();
        for summary in ["first", "second", "third"] {
            store.append(experience(summary)).await.unwrap();
        }
        let summaries: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.record.summary)
            .collect();
        assert_eq!(summaries, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_remove_counts_present_ids_only() {
        let store = InMemoryStore::new();
        let a = experience("a");
        let id = a.id.clone();
        store.append(a).await.unwrap();
        store.append(experience("b")).await.unwrap();

        let removed = store
            .remove(&[id, "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decisions_are_separate() {
        let store = InMemoryStore::new();
        store
            .append_decision(Decision::new(DecisionRecord::new(
                "p",
                "architecture",
                DecisionType::Architecture,
                "Monolith first",
                "Small team",
            )))
            .await
            .unwrap();
        assert_eq!(store.list_decisions().await.unwrap().len(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }
}
