pub mod front_matter;
pub mod state;

use uuid::Uuid;

pub use state::{append_generated_image, DesignBrief, ImageRecord, SessionHeader, SessionState};

/// Default state file location, relative to the project directory.
pub const STATE_FILE_RELATIVE: &str = ".claude/dp.local.md";

const SESSION_ID_LEN: usize = 8;

/// Short random session token: the first eight hex digits of a v4 UUID.
pub fn new_session_id() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SESSION_ID_LEN)
        .collect()
}
