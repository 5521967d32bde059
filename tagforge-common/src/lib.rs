//! Ambient plumbing shared by the TagForge crates: the tracing bootstrap and
//! the layered settings model.

mod logger;
pub mod settings;

pub use logger::{parse_level, Logger};
pub use settings::{CoordinatorSettings, LogSettings, Settings, DEFAULT_CONFIG_FILE_NAME};
pub use tagforge_error::{TFError, TFResult};
