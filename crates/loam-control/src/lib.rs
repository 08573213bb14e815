//! The control file: a one-page, atomically-rewritten description of a
//! pack's current layout.
//!
//! The file is `[version tag][payload]` with an Adler-32 over the payload.
//! V3 and V4 images upgrade to the current V5 payload on read; only V5 is
//! ever written. A read-write handle rewrites the whole file in one atomic
//! rename; read-only handles can `reload` to follow the writer.

pub mod error;
pub mod file;
pub mod payload;

pub use error::{ControlError, ControlResult};
pub use file::{ControlFile, ControlFileRo, CONTROL_PAGE};
pub use payload::{GcStatus, Payload, PayloadV3, PayloadV4, StatusV3};
