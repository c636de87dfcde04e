mod settings;

pub use settings::{ClientSettings, Command, Config, ReplSettings, Settings};
