// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::kv::TxnRef;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Uninitialized,
    Found,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekPolicy {
    EqualOrLess,
    EqualOrGreater,
}

/// Where the cursor sits in the ordered view.
#[derive(Clone, Debug)]
enum Position {
    None,
    At(Vec<u8>),
    // Fell off the end: `previous` resumes at the last entry.
    OffEnd,
}

/// A position on an entry of a transaction's ordered view.
///
/// The cursor uses lazy fetching of values: forward and backward moves
/// only load the key, and `current` retrieves the value from the
/// transaction. `seek` and `seek_range` fetch eagerly since they do not
/// retain a position across calls.
///
/// A cursor whose transaction was committed or aborted answers false to
/// every operation.
pub struct Cursor {
    txn: TxnRef,
    state: CursorState,
    position: Position,
}

impl Cursor {
    pub fn new(txn: impl Into<TxnRef>) -> Self {
        Cursor { txn: txn.into(), state: CursorState::Uninitialized, position: Position::None }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn first(&mut self) -> bool {
        if self.txn.is_closed() {
            return false;
        }
        match self.txn.first_key() {
            Some(key) => self.found(key),
            None => self.not_found(Position::None),
        }
    }

    pub fn last(&mut self) -> bool {
        if self.txn.is_closed() {
            return false;
        }
        match self.txn.last_key() {
            Some(key) => self.found(key),
            None => self.not_found(Position::None),
        }
    }

    /// Moves to the following entry. Returns false from `Uninitialized`;
    /// it does not implicitly seek.
    pub fn next(&mut self) -> bool {
        if self.state == CursorState::Uninitialized || self.txn.is_closed() {
            return false;
        }
        match &self.position {
            Position::At(key) => match self.txn.next_key(key) {
                Some(next) => self.found(next),
                None => self.not_found(Position::OffEnd),
            },
            Position::OffEnd | Position::None => {
                self.state = CursorState::NotFound;
                false
            }
        }
    }

    /// Moves to the preceding entry. Returns false from `Uninitialized`.
    pub fn previous(&mut self) -> bool {
        if self.state == CursorState::Uninitialized || self.txn.is_closed() {
            return false;
        }
        match &self.position {
            Position::At(key) => match self.txn.prev_key(key) {
                // Off the beginning the cursor stays on the first entry,
                // so a subsequent `next` advances past it.
                Some(prev) => self.found(prev),
                None => {
                    self.state = CursorState::NotFound;
                    false
                }
            },
            Position::OffEnd => match self.txn.last_key() {
                Some(key) => self.found(key),
                None => {
                    self.state = CursorState::NotFound;
                    false
                }
            },
            Position::None => {
                self.state = CursorState::NotFound;
                false
            }
        }
    }

    /// The entry at the current position, when state is `Found`. The
    /// value is materialized from the transaction on demand.
    pub fn current(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.state != CursorState::Found {
            return None;
        }
        let Position::At(key) = &self.position else { return None };
        match self.txn.get(key) {
            Ok(Some(value)) => Some((key.clone(), value)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cursor failed to materialize value");
                None
            }
        }
    }

    /// Exact-match positioning.
    pub fn seek(&mut self, key: &[u8]) -> bool {
        self.state = CursorState::NotFound;
        if self.txn.is_closed() {
            return false;
        }
        if !self.txn.contains_key(key) {
            return false;
        }
        match self.fetch(key) {
            true => self.found(key.to_vec()),
            false => false,
        }
    }

    /// Range positioning: the least entry >= `key` (`EqualOrGreater`) or
    /// the greatest entry <= `key` (`EqualOrLess`).
    ///
    /// `EqualOrLess` rewinds from the lower bound when the exact key is
    /// absent; a lower bound already sitting on the first entry that is
    /// not an exact match means no entry qualifies.
    pub fn seek_range(&mut self, key: &[u8], policy: SeekPolicy) -> bool {
        self.state = CursorState::NotFound;
        if self.txn.is_closed() {
            return false;
        }
        let lower_bound = self.txn.lower_bound(key);
        let target = match policy {
            SeekPolicy::EqualOrGreater => match lower_bound {
                Some(found) => found,
                None => {
                    self.position = Position::OffEnd;
                    return false;
                }
            },
            SeekPolicy::EqualOrLess => match lower_bound {
                Some(found) if found == key => found,
                Some(found) => {
                    let Some(prev) = self.txn.prev_key(&found) else {
                        // The lower bound is the first entry and it is
                        // not an exact match.
                        self.position = Position::At(found);
                        return false;
                    };
                    prev
                }
                None => match self.txn.last_key() {
                    Some(last) => last,
                    None => {
                        self.position = Position::None;
                        return false;
                    }
                },
            },
        };
        match self.fetch(&target) {
            true => self.found(target),
            false => false,
        }
    }

    fn fetch(&self, key: &[u8]) -> bool {
        match self.txn.get(key) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "cursor failed to fetch value during seek");
                false
            }
        }
    }

    fn found(&mut self, key: Vec<u8>) -> bool {
        self.position = Position::At(key);
        self.state = CursorState::Found;
        true
    }

    fn not_found(&mut self, position: Position) -> bool {
        self.position = position;
        self.state = CursorState::NotFound;
        false
    }
}
