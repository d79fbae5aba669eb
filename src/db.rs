pub mod memory_store;
pub mod pg_store;
pub mod store;

pub use memory_store::{MemoryBookingStore, StoreSeed};
pub use pg_store::PgBookingStore;
pub use store::{BookingStore, ClaimOutcome, StatusChange};
