pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod selector;
pub mod settings;
pub mod tasks {
    pub mod console;
    pub mod files;
    pub mod loader;
    pub mod session;
}
