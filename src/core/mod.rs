// Core modules implementing the engine seam, catalog access, schema decoding, and error modeling.
pub mod catalog;
pub mod connection;
pub mod cursor;
pub mod descriptor;
pub mod dump;
pub mod engine;
pub mod error;
pub mod format;
pub mod record;
