//! Fields, partitions and halo exchange

pub mod field;
pub mod halo;
pub mod layout;
pub mod partition;

pub use field::{Field, FieldUid, FieldValue};
pub use halo::{HaloDirection, HaloTable, MemoryTransfer, TransferEndpoint, TransferMode};
pub use layout::{FieldOptions, MemoryLayout};
pub use partition::{CellOut, NghData, Partition, PartitionMut};
