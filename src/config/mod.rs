mod settings;

pub use relaychat_core::config::{ClientSettings, ServerSettings, Settings};
pub use settings::{Command, Config, MergeCli};
