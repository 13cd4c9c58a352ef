// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

pub use cursor::{Cursor, CursorState, SeekPolicy};
pub use error::Error;
pub use kv::{KvStore, ReadTxn, StoreOptions, TxnRef, WriteTxn};

mod cursor;
mod error;
mod log;
mod kv;

pub type Result<T> = std::result::Result<T, Error>;
