//! Payment delegate consulted before anything is staged.

use async_trait::async_trait;
use ferry_core::AppError;
use uuid::Uuid;

/// A hold placed on an owner's balance for one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub size_bytes: i64,
    pub retention_units: i32,
}

/// Pass/fail balance check. Balance accounting itself lives elsewhere.
#[async_trait]
pub trait PaymentGate: Send + Sync {
    /// Reserve funds for storing `size_bytes` for `retention_units` epochs.
    /// Insufficient balance is `AppError::PaymentRequired`.
    async fn reserve(
        &self,
        owner_id: Uuid,
        size_bytes: i64,
        retention_units: i32,
    ) -> Result<Reservation, AppError>;

    /// Give a reservation back after the ingestion failed.
    async fn release(&self, reservation: &Reservation);
}

/// Accepts every ingestion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPaymentGate;

#[async_trait]
impl PaymentGate for NoopPaymentGate {
    async fn reserve(
        &self,
        owner_id: Uuid,
        size_bytes: i64,
        retention_units: i32,
    ) -> Result<Reservation, AppError> {
        Ok(Reservation {
            id: Uuid::new_v4(),
            owner_id,
            size_bytes,
            retention_units,
        })
    }

    async fn release(&self, reservation: &Reservation) {
        tracing::debug!(reservation_id = %reservation.id, "Released payment reservation");
    }
}
