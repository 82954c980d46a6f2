/*
    core_authoring - Signature-gated writes of messages and associations

    Authoring calls either fail as a whole (nothing persisted) or succeed
    with the object stored; stream delivery is reported separately per
    target stream.
*/

pub mod errors;
pub mod fanout;
pub mod service;

pub use errors::{AuthoringError, AuthoringResult};
pub use fanout::{AssociationTargetPolicy, FanoutPolicy, FanoutReport, StreamFailure};
pub use service::{Authored, AuthoringService};
