//! Durable resume cursor for a source's download progress
//!
//! A checkpoint is advanced only after the corresponding ingestion batch is
//! durably committed. A crash between download and commit re-does work;
//! it never skips it.

use serde::{Deserialize, Serialize};

/// Resume cursor for one source
///
/// `page_token` covers cursor/page-number paging, `byte_offset` covers
/// partially consumed local streams (spooled dump files). `sequence`
/// increases monotonically with every advance; the checkpoint store refuses
/// to commit a stale sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub page_token: Option<String>,
    pub byte_offset: u64,
    pub sequence: u64,
}

impl Checkpoint {
    /// Cursor for a fresh job with no prior progress
    pub fn initial() -> Self {
        Self {
            page_token: None,
            byte_offset: 0,
            sequence: 0,
        }
    }

    /// Next cursor after completing a page identified by `token`
    pub fn advanced_to(&self, page_token: Option<String>, byte_offset: u64) -> Self {
        Self {
            page_token,
            byte_offset,
            sequence: self.sequence + 1,
        }
    }

    /// Human-readable position for status queries
    pub fn position(&self) -> String {
        match &self.page_token {
            Some(token) => format!("page={} seq={}", token, self.sequence),
            None => format!("offset={} seq={}", self.byte_offset, self.sequence),
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::initial()
    }
}
