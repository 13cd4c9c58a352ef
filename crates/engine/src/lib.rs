// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

pub use index::Index;
pub use object_table::ObjectTable;
pub use partition::{
    ChangesResult, CommitRecord, DocumentChange, INDEX_DEFINITION_TYPE, Partition,
    PartitionOptions, QueryResult, WriteAction,
};
pub use query::{IndexQuery, ResidualQuery, build_query, parse_query};
pub use service::{Service, ServiceOptions};
pub use watcher::{ChannelSubscriber, NOTIFICATION_TYPE, Subscriber, WatcherRegistry};

mod index;
mod object_table;
mod partition;
pub mod query;
mod service;
mod watcher;

pub use quilldb_core::Error;

pub type Result<T> = quilldb_core::Result<T>;

/// Substrate failures surface to callers as engine-level errors; write
/// exclusivity maps onto the recoverable conflict kind.
pub(crate) fn store_error(e: quilldb_store::Error) -> Error {
    match e {
        quilldb_store::Error::WriteBusy => {
            Error::Conflict("another write transaction is in progress".into())
        }
        other => Error::OperationFailure(other.to_string()),
    }
}
