pub mod store;
pub mod types;

pub use store::{JobStore, MIN_PREFIX_LEN, StoreError};
pub use types::{JobRecord, RecordStatus, StatusUpdate};
