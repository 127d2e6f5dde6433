pub mod metadata;
pub mod subtask;
pub mod task;
