pub mod forecast;
pub mod health;
pub mod report;
pub mod settings;
