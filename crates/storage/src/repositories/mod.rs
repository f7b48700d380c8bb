pub mod checkpoint_repo;
pub mod cycle_repo;

pub use checkpoint_repo::CheckpointRepository;
pub use cycle_repo::CycleRecordRepository;
