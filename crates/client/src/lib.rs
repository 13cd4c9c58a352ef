// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

pub use connection::{ConnectionCore, ConnectionOptions, ConnectionStatus, Effect};
pub use driver::Connection;
pub use request::{Request, RequestStatus};
pub use watcher::{Watcher, WatcherAction, WatcherEvent, WatcherStatus};

mod connection;
mod driver;
mod request;
mod watcher;

pub use quilldb_core::Error;

pub type Result<T> = quilldb_core::Result<T>;
