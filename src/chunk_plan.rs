use serde::{Deserialize, Serialize};

/// Separator between paragraphs; restored when chunks are joined back.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Ordered translation units cut from one source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub max_chunk_size: usize,
    pub chunks: Vec<String>,
}

impl ChunkPlan {
    /// Packs paragraphs into chunks of at most `max_chunk_size` characters.
    ///
    /// A paragraph that is longer than the budget on its own is emitted as a
    /// single oversized chunk; it is never cut mid-paragraph. Joining the
    /// chunks with [`PARAGRAPH_SEPARATOR`] yields the input unchanged.
    pub fn from_text(text: &str, max_chunk_size: usize) -> ChunkPlan {
        let max = max_chunk_size.max(1);
        let sep_len = PARAGRAPH_SEPARATOR.chars().count();

        let mut chunks = Vec::new();
        if text.is_empty() {
            return ChunkPlan {
                max_chunk_size: max,
                chunks,
            };
        }

        let mut current = String::new();
        let mut current_len = 0usize;
        let mut started = false;

        for para in text.split(PARAGRAPH_SEPARATOR) {
            let para_len = para.chars().count();
            if started && current_len + sep_len + para_len > max {
                chunks.push(std::mem::take(&mut current));
                current.push_str(para);
                current_len = para_len;
                continue;
            }

            if started {
                current.push_str(PARAGRAPH_SEPARATOR);
                current_len += sep_len;
            }
            current.push_str(para);
            current_len += para_len;
            started = true;
        }

        if started {
            chunks.push(current);
        }

        ChunkPlan {
            max_chunk_size: max,
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// True for the single-paragraph chunks allowed to exceed the budget.
    pub fn is_oversized(&self, index: usize) -> bool {
        self.chunks
            .get(index)
            .is_some_and(|c| c.chars().count() > self.max_chunk_size)
    }

    pub fn join(&self) -> String {
        self.chunks.join(PARAGRAPH_SEPARATOR)
    }
}
