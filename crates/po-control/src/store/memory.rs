//! In-memory lifecycle store for testing.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{AnalysisDeployment, AnalysisId, DeploymentName, DeploymentUpdate};

use super::{DeploymentFilter, DeploymentStore};

#[derive(Debug, Default)]
struct Records {
    by_name: HashMap<String, (u64, AnalysisDeployment)>,
    next_seq: u64,
}

impl Records {
    fn sorted(&self, keep: impl Fn(&AnalysisDeployment) -> bool) -> Vec<AnalysisDeployment> {
        let mut matched: Vec<_> = self
            .by_name
            .values()
            .filter(|(_, record)| keep(record))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, r)| r.clone()).collect()
    }
}

/// In-memory lifecycle store for testing.
///
/// This implementation is not suitable for production use as data is lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ControlResult<std::sync::RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }

    fn write(&self) -> ControlResult<std::sync::RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &AnalysisDeployment) -> ControlResult<()> {
        let mut records = self.write()?;

        let key = record.deployment_name.as_str().to_owned();
        if records.by_name.contains_key(&key) {
            return Err(ControlError::DuplicateDeployment(key));
        }

        let seq = records.next_seq;
        records.next_seq += 1;
        records.by_name.insert(key, (seq, record.clone()));
        Ok(())
    }

    async fn get_by_deployment_name(
        &self,
        name: &DeploymentName,
    ) -> ControlResult<Option<AnalysisDeployment>> {
        let records = self.read()?;
        Ok(records.by_name.get(name.as_str()).map(|(_, r)| r.clone()))
    }

    async fn get_by_analysis_id(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<Vec<AnalysisDeployment>> {
        let records = self.read()?;
        Ok(records.sorted(|r| &r.analysis_id == analysis_id))
    }

    async fn update_analysis(
        &self,
        analysis_id: &AnalysisId,
        update: &DeploymentUpdate,
    ) -> ControlResult<Vec<AnalysisDeployment>> {
        let mut records = self.write()?;

        for (_, record) in records.by_name.values_mut() {
            if &record.analysis_id == analysis_id {
                update.apply_to(record);
            }
        }

        Ok(records.sorted(|r| &r.analysis_id == analysis_id))
    }

    async fn update_deployment(
        &self,
        name: &DeploymentName,
        update: &DeploymentUpdate,
    ) -> ControlResult<Option<AnalysisDeployment>> {
        let mut records = self.write()?;

        Ok(records.by_name.get_mut(name.as_str()).map(|(_, record)| {
            update.apply_to(record);
            record.clone()
        }))
    }

    async fn delete_by_analysis_id(&self, analysis_id: &AnalysisId) -> ControlResult<u64> {
        let mut records = self.write()?;

        let before = records.by_name.len();
        records
            .by_name
            .retain(|_, (_, record)| &record.analysis_id != analysis_id);

        #[allow(clippy::as_conversions)]
        let removed = (before - records.by_name.len()) as u64;
        Ok(removed)
    }

    async fn delete_deployment(&self, name: &DeploymentName) -> ControlResult<bool> {
        let mut records = self.write()?;
        Ok(records.by_name.remove(name.as_str()).is_some())
    }

    async fn list_analysis_ids(&self) -> ControlResult<Vec<AnalysisId>> {
        let records = self.read()?;
        let ids: BTreeSet<_> = records
            .by_name
            .values()
            .map(|(_, r)| r.analysis_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn list_deployment_names(&self) -> ControlResult<Vec<DeploymentName>> {
        let records = self.read()?;
        let mut names: Vec<_> = records
            .by_name
            .values()
            .map(|(_, r)| r.deployment_name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<AnalysisDeployment>> {
        let records = self.read()?;
        let results = records.sorted(|r| filter.matches(r));

        #[allow(clippy::as_conversions)]
        let offset = filter.offset.unwrap_or(0) as usize;
        let results = results.into_iter().skip(offset);

        if let Some(limit) = filter.limit {
            #[allow(clippy::as_conversions)]
            Ok(results.take(limit as usize).collect())
        } else {
            Ok(results.collect())
        }
    }

    async fn reset(&self) -> ControlResult<()> {
        let mut records = self.write()?;
        *records = Records::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{DeploymentStatus, PodId, ProjectId};

    fn record(analysis: &str, name: &str) -> AnalysisDeployment {
        AnalysisDeployment::new(
            AnalysisId::new(analysis),
            DeploymentName::new(name),
            ProjectId::new("p1"),
            vec![PodId::new(format!("{name}-pod-0"))],
            DeploymentStatus::Created,
            vec![80, 443],
            "img:latest",
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.expect("insert failed");

        let retrieved = store
            .get_by_deployment_name(&DeploymentName::new("svc-1"))
            .await
            .expect("get failed")
            .expect("record not found");

        assert_eq!(retrieved.analysis_id.as_str(), "a1");
        assert_eq!(retrieved.ports, vec![80, 443]);
        assert_eq!(retrieved.pod_ids, vec![PodId::new("svc-1-pod-0")]);
        assert_eq!(retrieved.status, DeploymentStatus::Created);

        assert!(store
            .get_by_deployment_name(&DeploymentName::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_fails_without_mutation() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.expect("first insert failed");

        let err = store.insert(&record("a2", "svc-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeployment);

        let kept = store
            .get_by_deployment_name(&DeploymentName::new("svc-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.analysis_id.as_str(), "a1");
    }

    #[tokio::test]
    async fn analysis_groups_records_in_insertion_order() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-b")).await.unwrap();
        store.insert(&record("a1", "svc-a")).await.unwrap();
        store.insert(&record("a2", "svc-c")).await.unwrap();

        let records = store.get_by_analysis_id(&AnalysisId::new("a1")).await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.deployment_name.as_str()).collect();
        assert_eq!(names, vec!["svc-b", "svc-a"]);

        assert!(store
            .get_by_analysis_id(&AnalysisId::new("none"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_analysis_touches_only_that_analysis() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();
        store.insert(&record("a1", "svc-2")).await.unwrap();
        store.insert(&record("a2", "svc-3")).await.unwrap();

        let updated = store
            .update_analysis(
                &AnalysisId::new("a1"),
                &DeploymentUpdate::new().with_status(DeploymentStatus::Running),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|r| r.status == DeploymentStatus::Running));

        let other = store
            .get_by_deployment_name(&DeploymentName::new("svc-3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.status, DeploymentStatus::Created);

        let none = store
            .update_analysis(
                &AnalysisId::new("missing"),
                &DeploymentUpdate::new().with_status(DeploymentStatus::Running),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn update_single_deployment() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();
        store.insert(&record("a1", "svc-2")).await.unwrap();

        let updated = store
            .update_deployment(
                &DeploymentName::new("svc-2"),
                &DeploymentUpdate::new().with_pod_ids(vec![PodId::new("p-9")]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.pod_ids, vec![PodId::new("p-9")]);

        let untouched = store
            .get_by_deployment_name(&DeploymentName::new("svc-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.pod_ids, vec![PodId::new("svc-1-pod-0")]);

        assert!(store
            .update_deployment(&DeploymentName::new("missing"), &DeploymentUpdate::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mark_stopped() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();
        store.insert(&record("a1", "svc-2")).await.unwrap();

        let stopped = store.mark_stopped(&AnalysisId::new("a1")).await.unwrap();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|r| r.status == DeploymentStatus::Stopped));
    }

    #[tokio::test]
    async fn delete_by_analysis() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();
        store.insert(&record("a1", "svc-2")).await.unwrap();
        store.insert(&record("a2", "svc-3")).await.unwrap();

        assert_eq!(store.delete_by_analysis_id(&AnalysisId::new("a1")).await.unwrap(), 2);
        assert_eq!(store.delete_by_analysis_id(&AnalysisId::new("a1")).await.unwrap(), 0);

        let names = store.list_deployment_names().await.unwrap();
        assert_eq!(names, vec![DeploymentName::new("svc-3")]);
    }

    #[tokio::test]
    async fn delete_single_deployment() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();

        assert!(store.delete_deployment(&DeploymentName::new("svc-1")).await.unwrap());
        assert!(!store.delete_deployment(&DeploymentName::new("svc-1")).await.unwrap());
    }

    #[tokio::test]
    async fn projections() {
        let store = MemoryStore::new();
        store.insert(&record("a2", "svc-3")).await.unwrap();
        store.insert(&record("a1", "svc-1")).await.unwrap();
        store.insert(&record("a1", "svc-2")).await.unwrap();

        let ids = store.list_analysis_ids().await.unwrap();
        assert_eq!(ids, vec![AnalysisId::new("a1"), AnalysisId::new("a2")]);

        let names = store.list_deployment_names().await.unwrap();
        assert_eq!(
            names,
            vec![
                DeploymentName::new("svc-1"),
                DeploymentName::new("svc-2"),
                DeploymentName::new("svc-3"),
            ]
        );

        let pods = store
            .pod_ids_for_deployment(&DeploymentName::new("svc-1"))
            .await
            .unwrap();
        assert_eq!(pods, Some(vec![PodId::new("svc-1-pod-0")]));

        let per_deployment = store
            .pod_ids_for_analysis(&AnalysisId::new("a1"))
            .await
            .unwrap();
        assert_eq!(per_deployment.len(), 2);
        assert_eq!(per_deployment[0].0, DeploymentName::new("svc-1"));
    }

    #[tokio::test]
    async fn list_with_filters_and_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert(&record("a1", &format!("svc-{i}"))).await.unwrap();
        }
        store.insert(&record("a2", "other")).await.unwrap();
        store.mark_stopped(&AnalysisId::new("a2")).await.unwrap();

        let a1 = store
            .list(&DeploymentFilter::new().with_analysis(AnalysisId::new("a1")))
            .await
            .unwrap();
        assert_eq!(a1.len(), 5);

        let stopped = store
            .list(&DeploymentFilter::new().with_status(DeploymentStatus::Stopped))
            .await
            .unwrap();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].deployment_name.as_str(), "other");

        let page1 = store
            .list(
                &DeploymentFilter::new()
                    .with_analysis(AnalysisId::new("a1"))
                    .with_limit(2),
            )
            .await
            .unwrap();
        let page2 = store
            .list(
                &DeploymentFilter::new()
                    .with_analysis(AnalysisId::new("a1"))
                    .with_limit(2)
                    .with_offset(2),
            )
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 2);
        assert_eq!(page1[0].deployment_name.as_str(), "svc-0");
        assert_eq!(page2[0].deployment_name.as_str(), "svc-2");
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = MemoryStore::new();
        store.insert(&record("a1", "svc-1")).await.unwrap();

        store.reset().await.unwrap();

        assert!(store.list_deployment_names().await.unwrap().is_empty());
        store.insert(&record("a1", "svc-1")).await.unwrap();
    }
}
