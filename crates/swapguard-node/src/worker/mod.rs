//! Supervisable workers

mod leg;
mod periodic;

pub use leg::{LegContext, LegProgress, LegRole, LegWatch, LegWorker, SecretSource};
pub use periodic::{Job, PeriodicWorker};
