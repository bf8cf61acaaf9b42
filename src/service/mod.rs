// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Function service
//!
//! Ties the definition store, the validated pipeline cache and the executor
//! together. Writers (create, update, delete) and cache fills are serialized
//! so that the store and the cache never disagree; invocations only take the
//! cache's read lock long enough to clone an `Arc`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{CrudflowError, CrudflowResult};
use crate::gateway::{Filter, Page, Row, Sort, TableGateway};
use crate::pipeline::{
    Deadline, ExecutionContext, FunctionDefinition, FunctionStep, PipelineExecutor, StepResolver,
    ValidatedPipeline,
};
use crate::store::{DefinitionCache, DefinitionStore};

pub const TRACING_TARGET: &str = "crudflow::service";

/// List entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSummary {
    pub name: String,
}

/// A stored definition as returned by create, update and detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDetail {
    pub name: String,
    #[serde(rename = "functions")]
    pub steps: Vec<FunctionStep>,
    pub fingerprint: String,
}

impl From<&ValidatedPipeline> for FunctionDetail {
    fn from(pipeline: &ValidatedPipeline) -> Self {
        Self {
            name: pipeline.name().to_string(),
            steps: pipeline.definition().steps.clone(),
            fingerprint: pipeline.fingerprint().to_string(),
        }
    }
}

pub struct FunctionService {
    store: Arc<dyn DefinitionStore>,
    cache: DefinitionCache,
    executor: PipelineExecutor,
    writes: Mutex<()>,
}

impl FunctionService {
    pub fn new(store: Arc<dyn DefinitionStore>, gateway: Arc<dyn TableGateway>) -> Self {
        Self {
            store,
            cache: DefinitionCache::new(),
            executor: PipelineExecutor::new(gateway),
            writes: Mutex::new(()),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn TableGateway> {
        self.executor.gateway()
    }

    /// Validate and cache every stored definition.
    ///
    /// Definitions that no longer validate are skipped with a warning; they
    /// stay in the store and fail on invocation.
    pub async fn warm(&self) -> CrudflowResult<usize> {
        let _guard = self.writes.lock().await;
        let mut loaded = 0;

        for name in self.store.list(None).await? {
            let definition = match self.store.load(&name).await {
                Ok(Some(definition)) => definition,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        function = %name,
                        %error,
                        "Stored definition could not be read"
                    );
                    continue;
                }
            };
            match StepResolver::validate(&definition) {
                Ok(pipeline) => {
                    self.cache.insert(Arc::new(pipeline));
                    loaded += 1;
                }
                Err(error) => tracing::warn!(
                    target: TRACING_TARGET,
                    function = %name,
                    %error,
                    "Stored definition no longer validates"
                ),
            }
        }

        tracing::info!(target: TRACING_TARGET, loaded, "Definition cache warmed");
        Ok(loaded)
    }

    /// Create a new function
    #[tracing::instrument(skip_all, fields(function = %definition.name))]
    pub async fn create(&self, definition: FunctionDefinition) -> CrudflowResult<FunctionDetail> {
        let pipeline = Arc::new(StepResolver::validate(&definition)?);

        let _guard = self.writes.lock().await;
        if self.store.load(pipeline.name()).await?.is_some() {
            return Err(CrudflowError::FunctionExists {
                name: pipeline.name().to_string(),
            });
        }

        self.store.save(pipeline.definition()).await?;
        self.cache.insert(pipeline.clone());

        tracing::info!(
            target: TRACING_TARGET,
            steps = pipeline.steps().len(),
            fingerprint = %pipeline.fingerprint(),
            "Function created"
        );
        Ok(FunctionDetail::from(pipeline.as_ref()))
    }

    /// Replace every step of an existing function
    #[tracing::instrument(skip(self, steps))]
    pub async fn update(&self, name: &str, steps: Vec<FunctionStep>) -> CrudflowResult<FunctionDetail> {
        let definition = FunctionDefinition {
            name: name.to_string(),
            steps,
        };
        let pipeline = Arc::new(StepResolver::validate(&definition)?);

        let _guard = self.writes.lock().await;
        if self.store.load(name).await?.is_none() {
            return Err(CrudflowError::FunctionNotFound {
                name: name.to_string(),
            });
        }

        self.store.save(pipeline.definition()).await?;
        let previous = self.cache.insert(pipeline.clone());

        tracing::info!(
            target: TRACING_TARGET,
            fingerprint = %pipeline.fingerprint(),
            previous = previous.as_ref().map(|p| p.fingerprint()).unwrap_or("-"),
            "Function replaced"
        );
        Ok(FunctionDetail::from(pipeline.as_ref()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> CrudflowResult<()> {
        let _guard = self.writes.lock().await;

        if !self.store.remove(name).await? {
            return Err(CrudflowError::FunctionNotFound {
                name: name.to_string(),
            });
        }
        self.cache.remove(name);

        tracing::info!(target: TRACING_TARGET, "Function deleted");
        Ok(())
    }

    pub async fn list(&self, search: Option<&str>) -> CrudflowResult<Vec<FunctionSummary>> {
        Ok(self
            .store
            .list(search)
            .await?
            .into_iter()
            .map(|name| FunctionSummary { name })
            .collect())
    }

    pub async fn detail(&self, name: &str) -> CrudflowResult<FunctionDetail> {
        let pipeline = self.pipeline(name).await?;
        Ok(FunctionDetail::from(pipeline.as_ref()))
    }

    /// The validated pipeline for `name`, loading it into the cache on a miss
    pub async fn pipeline(&self, name: &str) -> CrudflowResult<Arc<ValidatedPipeline>> {
        if let Some(pipeline) = self.cache.get(name) {
            return Ok(pipeline);
        }

        let _guard = self.writes.lock().await;
        // A writer may have filled the entry while we waited
        if let Some(pipeline) = self.cache.get(name) {
            return Ok(pipeline);
        }

        let definition = self
            .store
            .load(name)
            .await?
            .ok_or_else(|| CrudflowError::FunctionNotFound {
                name: name.to_string(),
            })?;
        let pipeline = Arc::new(StepResolver::validate(&definition)?);
        self.cache.insert(pipeline.clone());

        tracing::debug!(target: TRACING_TARGET, function = %name, "Definition cached");
        Ok(pipeline)
    }

    /// Run a function with the caller's `data`
    #[tracing::instrument(
        skip(self, data, user_id, deadline, cancel),
        fields(user = user_id.as_deref().unwrap_or("-"))
    )]
    pub async fn invoke(
        &self,
        name: &str,
        data: Value,
        user_id: Option<String>,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> CrudflowResult<Value> {
        let pipeline = self.pipeline(name).await?;
        let context = ExecutionContext::from_value(data, user_id)
            .map_err(|source| CrudflowError::InvalidInput { source })?;

        self.executor
            .execute(&pipeline, context, deadline, cancel)
            .await
            .into_response()
            .map_err(|failure| CrudflowError::step_failed(name, failure))
    }

    /// Browse a table through the shared filter grammar
    pub async fn browse(
        &self,
        table: &str,
        filter: Option<&str>,
        sort: Option<&str>,
        page: Page,
        user_id: Option<&str>,
    ) -> CrudflowResult<Vec<Row>> {
        let filter = match filter {
            Some(expr) => Filter::parse(expr, user_id)?,
            None => Filter::All,
        };
        let sort = sort.map(Sort::parse).transpose()?;

        Ok(self
            .gateway()
            .fetch(table, &filter, &[], sort.as_ref(), page)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> (FunctionService, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::with_tables(["notes"]));
        let service = FunctionService::new(Arc::new(MemoryStore::new()), gateway.clone());
        (service, gateway)
    }

    fn add_note() -> FunctionDefinition {
        serde_json::from_value(json!({
            "name": "add_note",
            "functions": [
                {"idx": 1, "table": "notes", "action": "insert",
                 "values": {"text": {"source": "caller"}, "owner": {"source": "user"}}},
                {"idx": 2, "name": "mine", "table": "notes", "action": "fetch",
                 "columns": ["text"],
                 "filters": [{"column": "owner", "op": "=", "value": {"source": "user"}}]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_invoke_delete() {
        let (service, _) = service();
        let detail = service.create(add_note()).await.unwrap();
        assert_eq!(detail.steps.len(), 2);

        let body = service
            .invoke(
                "add_note",
                json!({"text": "hello"}),
                Some("u1".into()),
                Deadline::none(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(body, json!({"message": "success", "mine": [{"text": "hello"}]}));

        service.delete("add_note").await.unwrap();
        let err = service
            .invoke("add_note", json!({}), None, Deadline::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_invalid() {
        let (service, _) = service();
        service.create(add_note()).await.unwrap();
        assert_eq!(service.create(add_note()).await.unwrap_err().kind(), "AlreadyExists");

        let mut broken = add_note();
        broken.name = "broken".into();
        broken.steps[1].idx = 1;
        assert_eq!(
            service.create(broken).await.unwrap_err().kind(),
            "NonMonotonicIndex"
        );
        assert_eq!(service.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_swaps_pipeline() {
        let (service, gateway) = service();
        let before = service.create(add_note()).await.unwrap();

        let mut steps = add_note().steps;
        steps.truncate(1);
        let after = service.update("add_note", steps).await.unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);

        let body = service
            .invoke(
                "add_note",
                json!({"text": "x"}),
                Some("u".into()),
                Deadline::none(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(body, json!({"message": "success"}));
        assert_eq!(gateway.rows("notes").unwrap().len(), 1);

        assert_eq!(
            service.update("missing", vec![]).await.unwrap_err().kind(),
            "EmptyPipeline"
        );
        assert_eq!(
            service.update("missing", add_note().steps).await.unwrap_err().kind(),
            "NotFound"
        );
    }

    #[tokio::test]
    async fn test_lazy_load_from_store() {
        let store = Arc::new(MemoryStore::new());
        store.save(&add_note()).await.unwrap();
        let service = FunctionService::new(store, Arc::new(MemoryGateway::with_tables(["notes"])));

        let detail = service.detail("add_note").await.unwrap();
        assert_eq!(detail.name, "add_note");
        assert_eq!(service.warm().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_warm_skips_unreadable_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(crate::store::FilesystemStore::new(temp.path()).unwrap());
        store.save(&add_note()).await.unwrap();
        std::fs::write(temp.path().join("my notes.json"), "{}").unwrap();
        std::fs::write(temp.path().join("broken.json"), "{ not json").unwrap();

        let service = FunctionService::new(store, Arc::new(MemoryGateway::with_tables(["notes"])));
        assert_eq!(service.warm().await.unwrap(), 1);
        assert_eq!(service.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_names_step() {
        let (service, _) = service();
        service.create(add_note()).await.unwrap();

        let err = service
            .invoke("add_note", json!({"text": "x"}), None, Deadline::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AuthRequired");
        match err {
            CrudflowError::StepFailed { failure, .. } => assert_eq!(failure.label(), "step_1"),
            other => panic!("unexpected error: {:?}", other),
        }

        let err = service
            .invoke("add_note", json!("text"), Some("u".into()), Deadline::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MalformedInput");
    }

    #[tokio::test]
    async fn test_browse() {
        let (service, gateway) = service();
        gateway
            .insert("notes", json!({"owner": "u", "text": "b"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        gateway
            .insert("notes", json!({"owner": "v", "text": "a"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let rows = service
            .browse("notes", Some("owner = $user.id"), None, Page::default(), Some("u"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = service
            .browse("notes", None, Some("text"), Page::default(), None)
            .await
            .unwrap();
        assert_eq!(rows[0]["text"], json!("a"));

        let err = service
            .browse("notes", Some("owner = $user.id"), None, Page::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AuthRequired");
    }
}
