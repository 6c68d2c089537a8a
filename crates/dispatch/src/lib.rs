//! Broadcast dispatch: resolve recipients, gate on a live session, send one
//! message per recipient with pacing.

pub mod address;
pub mod dispatcher;

pub use {
    address::normalize_number,
    dispatcher::{
        DEFAULT_PACING, DispatchReport, DispatchResult, DispatchSummary, Dispatcher, Outcome,
        parse_recipients,
    },
};
