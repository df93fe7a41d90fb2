//! Read-side operations. None of these mutate state.

use tracing::instrument;

use lpnflow_core::{AggregateRoot, DomainError, LpnId, Sku, TaskId};
use lpnflow_events::{EventEnvelope, StreamId};
use lpnflow_inventory::{InventoryUnit, LpnEvent};
use lpnflow_tasks::{InventoryTask, TaskEvent, TaskPriority, TaskStatus};

use crate::erp::ErpAdapter;
use crate::event_store::StoredEvent;
use crate::repository::{Repository, RepositoryError, TaskFilter, UnitFilter};

use super::{OrchestrationError, TaskOrchestrationService};

impl<R, E> TaskOrchestrationService<R, E>
where
    R: Repository,
    E: ErpAdapter,
{
    pub async fn get_task(&self, task_id: TaskId) -> Result<InventoryTask, OrchestrationError> {
        self.load_task(task_id).await
    }

    pub async fn get_unit(&self, lpn_id: &LpnId) -> Result<InventoryUnit, OrchestrationError> {
        self.repository
            .load_unit(lpn_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("inventory unit {lpn_id}")).into())
    }

    /// Tasks matching the optional filters, most urgent first, oldest first
    /// within a priority.
    #[instrument(skip(self), err)]
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
    ) -> Result<Vec<InventoryTask>, OrchestrationError> {
        let mut tasks = self
            .repository
            .query_tasks(&TaskFilter { status, priority })
            .await?;
        tasks.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.created_at().cmp(&b.created_at()))
                .then_with(|| a.number().cmp(&b.number()))
        });
        Ok(tasks)
    }

    /// Non-terminal units, optionally restricted to one SKU.
    #[instrument(skip(self), err)]
    pub async fn list_active_units(
        &self,
        sku: Option<Sku>,
    ) -> Result<Vec<InventoryUnit>, OrchestrationError> {
        let filter = UnitFilter {
            sku,
            ..UnitFilter::active()
        };
        Ok(self.repository.query_units(&filter).await?)
    }

    /// Raw ordered event stream of any aggregate.
    pub async fn stream_history(
        &self,
        stream: &StreamId,
    ) -> Result<Vec<StoredEvent>, OrchestrationError> {
        Ok(self.repository.load_stream(stream).await?)
    }

    pub async fn task_history(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<EventEnvelope<TaskEvent>>, OrchestrationError> {
        let stream = StreamId::new(
            InventoryTask::AGGREGATE_TYPE,
            task_id.to_string(),
        );
        self.decode_stream(&stream).await
    }

    pub async fn unit_history(
        &self,
        lpn_id: &LpnId,
    ) -> Result<Vec<EventEnvelope<LpnEvent>>, OrchestrationError> {
        let stream = StreamId::new(
            InventoryUnit::AGGREGATE_TYPE,
            lpn_id.to_string(),
        );
        self.decode_stream(&stream).await
    }

    async fn decode_stream<T>(
        &self,
        stream: &StreamId,
    ) -> Result<Vec<EventEnvelope<T>>, OrchestrationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let stored = self.repository.load_stream(stream).await?;
        let decoded = stored
            .iter()
            .map(StoredEvent::decode::<T>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::from)?;
        Ok(decoded)
    }
}
