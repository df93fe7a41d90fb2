//! ERP adjustment adapter boundary.
//!
//! The ERP is the external system of record for stock. This engine only
//! consumes two of its operations, both best-effort: a `false` or an error is
//! logged by the caller and left for out-of-band reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use lpnflow_core::{LocationId, Sku};

#[derive(Debug, Error)]
pub enum ErpError {
    /// The ERP could not be reached or answered with a protocol error.
    #[error("erp transport failure: {0}")]
    Transport(#[source] anyhow::Error),

    /// The ERP answered but refused the request.
    #[error("erp rejected request: {0}")]
    Rejected(String),
}

/// Quantity received for one SKU on an inbound picking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptMove {
    pub sku: Sku,
    pub quantity: i64,
}

/// Quantity correction to push to the ERP (absolute difference semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpAdjustment {
    pub sku: Sku,
    pub location: Option<LocationId>,
    pub quantity_difference: i64,
    pub reason: String,
}

#[async_trait]
pub trait ErpAdapter: Send + Sync {
    /// Post a stock correction of `quantity_difference` units.
    async fn create_inventory_adjustment(
        &self,
        sku: &Sku,
        location: Option<&LocationId>,
        quantity_difference: i64,
        reason: &str,
    ) -> Result<bool, ErpError>;

    /// Confirm an inbound picking with the quantities actually received.
    async fn confirm_receipt(&self, picking_id: &str, moves: &[ReceiptMove])
    -> Result<bool, ErpError>;
}

#[async_trait]
impl<E> ErpAdapter for Arc<E>
where
    E: ErpAdapter + ?Sized,
{
    async fn create_inventory_adjustment(
        &self,
        sku: &Sku,
        location: Option<&LocationId>,
        quantity_difference: i64,
        reason: &str,
    ) -> Result<bool, ErpError> {
        (**self)
            .create_inventory_adjustment(sku, location, quantity_difference, reason)
            .await
    }

    async fn confirm_receipt(
        &self,
        picking_id: &str,
        moves: &[ReceiptMove],
    ) -> Result<bool, ErpError> {
        (**self).confirm_receipt(picking_id, moves).await
    }
}

/// Adapter for development wiring: logs every request and accepts it.
#[derive(Debug, Clone)]
pub struct LoggingErpAdapter {
    company_id: String,
}

impl LoggingErpAdapter {
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
        }
    }
}

#[async_trait]
impl ErpAdapter for LoggingErpAdapter {
    async fn create_inventory_adjustment(
        &self,
        sku: &Sku,
        location: Option<&LocationId>,
        quantity_difference: i64,
        reason: &str,
    ) -> Result<bool, ErpError> {
        info!(
            company_id = %self.company_id,
            sku = %sku,
            location = location.map(LocationId::as_str),
            quantity_difference,
            reason,
            "erp inventory adjustment"
        );
        Ok(true)
    }

    async fn confirm_receipt(
        &self,
        picking_id: &str,
        moves: &[ReceiptMove],
    ) -> Result<bool, ErpError> {
        info!(
            company_id = %self.company_id,
            picking_id,
            moves = moves.len(),
            "erp receipt confirmation"
        );
        Ok(true)
    }
}
