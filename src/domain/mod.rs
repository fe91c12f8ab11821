pub mod access;
pub mod alert;
pub mod backup;
pub mod log;
pub mod metrics;
pub mod node;
pub mod server;
pub mod state_machine;
pub mod task;

pub use access::ServerAccess;
pub use alert::{Alert, AlertDelivery, AlertRule};
pub use backup::Backup;
pub use log::ServerLog;
pub use metrics::{NodeMetrics, ServerMetrics};
pub use node::Node;
pub use server::{RestartPolicy, Server, ServerStatus};
pub use task::ScheduledTask;
