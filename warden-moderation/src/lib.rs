pub mod engine;
pub mod error;
pub mod executor;
pub mod guild;
pub mod hook;
pub mod lock;
pub mod roles;
pub mod runner;
pub mod store;
pub mod sweeper;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::ModerationEngine;
pub use error::{ModerationError, ModerationResult};
pub use executor::{ActionExecutor, ApplyRequest};
pub use guild::{GuildApi, SerenityGuildApi};
pub use hook::{CaseEvent, CaseHook};
pub use runner::{RunnerConfig, TaskRunner};
pub use store::{ModerationStore, SettingsSource};
pub use sweeper::Sweeper;
