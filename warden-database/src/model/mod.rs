pub mod automod;
pub mod cases;
pub mod intents;
pub mod settings;
pub mod tasks;
