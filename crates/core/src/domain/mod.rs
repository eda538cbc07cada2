pub mod classification;
pub mod intent;
pub mod task;
pub mod team;
