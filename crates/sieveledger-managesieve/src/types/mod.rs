//! Core ManageSieve types.

mod capability;
mod response_code;
mod script;

pub use capability::{Capabilities, DEFAULT_LANGUAGE};
pub use response_code::{Referral, ResponseCode, Status};
pub use script::{ScriptEntry, active_script, normalize_line_breaks};
