//! Configuration management

mod settings;

pub use settings::{RetrySettings, ScheduleSettings, Settings, SourceSettings, StorageSettings};
