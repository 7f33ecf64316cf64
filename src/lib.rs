pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod group;
pub mod host;
pub mod log;
pub mod orchestrator;
pub mod role;
pub mod script;
pub mod security;
pub mod ssh;
pub mod task;
pub mod transport;
pub mod utils;

pub use cli::Cli;
pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use gateway::Gateway;
pub use group::Group;
pub use host::{ExecOptions, ExecOutput, FileType, Host};
pub use log::{LogMessage, Severity};
pub use orchestrator::{Entity, Orchestrator};
pub use role::{BroadcastPolicy, HostOutcome, Role, RoleProxy};
pub use task::{task_body, Task, TaskBody, TaskContext};
