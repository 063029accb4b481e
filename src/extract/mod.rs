//! Metadata extraction: the resolver seam, failure classification, the
//! cookie arbiter, subtitle retrieval and SponsorBlock segments

pub mod arbiter;
pub mod classify;
pub mod resolver;
pub mod sponsorblock;
pub mod subtitles;

pub use arbiter::{ArbiterTtls, CookieMode, ExtractionArbiter};
pub use classify::{FailureKind, classify};
pub use resolver::{ChannelListing, CookieSource, Credentials, Resolver, YtDlpResolver};
pub use sponsorblock::SponsorBlockService;
pub use subtitles::SubtitleService;

use crate::{Error, Result};

/// Video and channel ids end up in file names and subprocess arguments
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::validation(field, format!("Invalid {}", field)))
    }
}
