use std::path::PathBuf;

use tracing::{debug, warn};

/// Loads `RP_NODE_*` overrides from a local `.env` file, if there is one.
///
/// A missing or unreadable file is not an error; a file that exists but does
/// not parse is reported and otherwise ignored. Returns the file that was
/// applied.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "loaded environment overrides");
            Some(path)
        }
        Err(dotenvy::Error::Io(_)) => None,
        Err(e) => {
            warn!("found a local `.env` file but could not parse it: {e}");
            None
        }
    }
}
