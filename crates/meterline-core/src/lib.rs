pub mod config;
pub mod duration;
pub mod key;
pub mod policy;
pub mod types;

pub use config::{ConfigError, MeterlineConfig, SloTarget};
pub use key::{EntityKey, KeyError};
pub use policy::{Comparison, PolicyTable, Rule, RuleFamily, Severity};
pub use types::*;
