//! `liftride-core`: lift ride domain building blocks.
//!
//! This crate contains **pure domain** code (no IO): the ride record, its
//! validation rules, the queue wire format and the storage item layout.

pub mod error;
pub mod ride;
pub mod storage;
pub mod validation;
pub mod wire;

pub use error::{DecodeError, ValidationError};
pub use ride::{FieldRange, RideEvent, RideField};
pub use storage::{LiftInfo, StorageItem, VERTICAL_PER_LIFT};
pub use validation::{ResortDay, RideBody, RidePath, RideValidator};
pub use wire::WireMessage;
