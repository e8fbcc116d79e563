pub mod http;
pub mod settings;
pub mod sinks;
pub mod state;

pub use settings::Settings;
pub use state::AppState;
