//! Domain types shared by every stage of the evaluation.

pub mod selection;
pub mod setting;

pub use selection::{FeatureSet, SelectionResult};
pub use setting::{HyperparameterGrid, HyperparameterSetting, SettingParseError};
