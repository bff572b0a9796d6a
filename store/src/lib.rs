// The State & Audit Store: repository traits per aggregate, composed into
// one `Storage` supertrait the way `tos_daemon::core::storage::Storage`
// composes many `*Provider` traits. `postgres` is the production backend;
// `memory` is an in-process backend used by every service crate's unit
// tests so they don't need a live database to exercise business logic.

pub mod memory;
pub mod postgres;
pub mod repos;

pub use repos::*;
