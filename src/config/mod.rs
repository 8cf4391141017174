pub mod settings;
pub mod targets;

pub use settings::Config;
pub use targets::{load_targets, ChainSettings, TargetFile, TargetSet};
