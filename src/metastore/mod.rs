//! Transactional relational store of providers, modules, jobs, job items,
//! sessions, and audit records. SQLite in WAL mode, single writer, many
//! readers — see `store::MetaStore`.

mod error;
mod models;
mod schema;
mod store;

pub use error::{Result, StoreError};
pub use models::{
    AuditRecord, Job, JobItem, JobItemStatus, JobKind, JobStatus, Module, ModuleIdentity, Provider,
    ProviderIdentity, Session,
};
pub use store::{MetaStore, NewJobItem};
