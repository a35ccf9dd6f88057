use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A contiguous slice of a document's extracted text, the unit of retrieval.
///
/// `char_range` is measured in characters of the extracted text. `page` and `last_page`
/// are 1-based and absent when the loader supplied no page boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub char_range: Range<usize>,
    pub page: Option<u32>,
    pub last_page: Option<u32>,
}

impl Passage {
    pub fn source_label(&self) -> Option<String> {
        self.page.map(|page| format!("Page {page}"))
    }
}
