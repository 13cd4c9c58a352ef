// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

pub use document::{Document, property};
pub use error::Error;
pub use field::{IndexKind, greater_than, less_than, make_field_value, values_equal};
pub use object_key::ObjectKey;

pub mod document;
mod error;
pub mod field;
pub mod keycode;
mod object_key;

pub type Result<T> = std::result::Result<T, Error>;
