use hc_domain::Appliance;

use crate::error::StoreError;
use crate::store::ApplianceStore;

/// Serializes every appliance currently held by `store` to a single JSON
/// array, for callers that want to persist state across restarts themselves
/// (this crate does not do so automatically).
pub async fn export_snapshot(store: &dyn ApplianceStore) -> Result<String, StoreError> {
    let appliances = store.list().await?;
    Ok(serde_json::to_string_pretty(&appliances)?)
}

/// Restores appliances from a JSON array produced by [`export_snapshot`],
/// upserting each one into `store`.
pub async fn import_snapshot(store: &dyn ApplianceStore, json: &str) -> Result<usize, StoreError> {
    let appliances: Vec<Appliance> = serde_json::from_str(json)?;
    let count = appliances.len();
    for appliance in appliances {
        store.upsert(appliance).await?;
    }
    Ok(count)
}
