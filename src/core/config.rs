mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    ConfigError, EngineSettings, Environment, QueueSettings, ReconcileSettings, ScoringSettings,
    Settings,
};
