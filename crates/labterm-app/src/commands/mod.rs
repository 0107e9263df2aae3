pub mod deeplink;
pub mod health;
pub mod layout;
pub mod settings;
pub mod terminal;
pub mod windows;
