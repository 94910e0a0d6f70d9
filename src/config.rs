pub mod settings;
pub mod user;

pub use settings::DaemonSettings;
pub use user::{load_user_settings, user_config_path};
