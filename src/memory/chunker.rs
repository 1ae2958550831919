//! 文本分块：先按空行切段落，超长段落再按分隔符优先级切分（UTF-8 安全）

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 单块最大字符数
    pub chunk_size: usize,
    /// 超长段落内部的分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            separators: vec![
                "\n".to_string(),
                "。".to_string(),
                ". ".to_string(),
                "！".to_string(),
                "？".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 段落分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self::new(ChunkingConfig {
            chunk_size: chunk_size.max(1),
            ..ChunkingConfig::default()
        })
    }

    /// 将文本切分为段落大小的块；空白文本返回空列表
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let normalized = text.replace("\r\n", "\n");
        let mut chunks = Vec::new();
        for para in normalized.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            if para.chars().count() <= self.config.chunk_size {
                chunks.push(para.to_string());
            } else {
                chunks.extend(self.split_long(para));
            }
        }
        chunks
    }

    fn split_long(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut out = Vec::new();
        let mut current = 0;

        while current < total {
            let target_end = (current + self.config.chunk_size).min(total);
            let mut actual_end = target_end;

            if target_end < total {
                let slice: String = chars[current..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep.as_str()) {
                        let to_sep = slice[..pos].chars().count() + sep.chars().count();
                        if to_sep > 0 {
                            actual_end = current + to_sep;
                            break;
                        }
                    }
                }
            }

            // 至少前进一个字符
            if actual_end <= current {
                actual_end = (current + 1).min(total);
            }

            let piece: String = chars[current..actual_end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current = actual_end;
        }
        out
    }
}
