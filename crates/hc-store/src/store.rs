use async_trait::async_trait;
use hc_domain::Appliance;

use crate::error::StoreError;

/// Keeps the last-known state of every paired appliance.
///
/// The engine owns write access: it upserts an [`Appliance`] whenever the
/// initial load or an event-stream update changes it, and reads from here to
/// answer queries without re-hitting the Home Connect API.
#[async_trait]
pub trait ApplianceStore: Send + Sync + 'static {
    async fn get(&self, ha_id: &str) -> Result<Option<Appliance>, StoreError>;
    async fn list(&self) -> Result<Vec<Appliance>, StoreError>;
    async fn upsert(&self, appliance: Appliance) -> Result<(), StoreError>;
    async fn remove(&self, ha_id: &str) -> Result<(), StoreError>;
}
