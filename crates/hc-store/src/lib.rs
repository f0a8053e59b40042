pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use snapshot::{export_snapshot, import_snapshot};
pub use store::ApplianceStore;
