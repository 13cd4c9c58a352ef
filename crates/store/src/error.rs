// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted value log: {0}")]
    Corrupted(String),
    #[error("another write transaction is in progress")]
    WriteBusy,
    #[error("transaction is no longer live")]
    TransactionClosed,
}
