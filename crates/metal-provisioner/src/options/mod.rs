//! Configuration diff engine.
//!
//! Computes the minimal JSON-patch that reconciles desired node options with
//! the backend's last-known document. Unchanged values are never re-sent, so
//! running the engine again after the patch was applied yields nothing.

mod diff;
mod value;

pub use diff::{
    options_document, section_update_opts, NodeUpdater, OptionsData, Section, UpdateOp, UpdateOperation,
    UpdateOptsBuilder,
};
pub use value::OptionValue;
