use common::{error::AppError, storage::types::passage::Passage, utils::config::AppConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl From<&AppConfig> for ChunkingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Splits extracted text into fixed-size, overlapping character windows.
///
/// Window `i + 1` starts `chunk_overlap` characters before window `i` ends, so every pair
/// of neighbours shares exactly that many characters. Sizes are counted in `char`s.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, AppError> {
        if config.chunk_size == 0 {
            return Err(AppError::Validation(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    /// `page_starts` holds the character offset at which each page begins, in page order.
    pub fn split(&self, document_id: &str, text: &str, page_starts: &[usize]) -> Vec<Passage> {
        // Byte offset of every char, plus the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len().saturating_sub(1);
        if total_chars == 0 {
            return Vec::new();
        }

        let step_back = self.config.chunk_overlap;
        let mut passages = Vec::new();
        let mut start = 0usize;

        loop {
            let end = start.saturating_add(self.config.chunk_size).min(total_chars);
            let slice = match (boundaries.get(start), boundaries.get(end)) {
                (Some(&from), Some(&to)) => text.get(from..to).unwrap_or_default(),
                _ => "",
            };

            passages.push(Passage {
                document_id: document_id.to_string(),
                ordinal: passages.len(),
                text: slice.to_string(),
                char_range: start..end,
                page: page_for_offset(page_starts, start),
                last_page: page_for_offset(page_starts, end.saturating_sub(1)),
            });

            if end >= total_chars {
                break;
            }
            start = end.saturating_sub(step_back);
        }

        passages
    }
}

/// 1-based page containing the character at `offset`, or `None` without page boundaries.
pub fn page_for_offset(page_starts: &[usize], offset: usize) -> Option<u32> {
    if page_starts.is_empty() {
        return None;
    }
    let pages_started = page_starts.partition_point(|&start| start <= offset);
    u32::try_from(pages_started.max(1)).ok()
}
