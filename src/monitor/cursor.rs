use crate::extract::{parse_block, BlockAssembler, ExtractedBlock};
use crate::source::{LineBuffer, TailError, TailReader};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one delta read.
#[derive(Debug, Default)]
pub struct CursorStep {
    /// Blocks closed by this delta.
    pub blocks: Vec<ExtractedBlock>,
    pub bytes_read: usize,
    pub truncated: bool,
}

/// Tail state for one watched file: the byte offset, the unterminated
/// trailing line, and the still-open trailing block.
///
/// The open block is the look-back overlap. New lines are appended to it, so
/// a block split across reads is parsed once, whole. It is emitted when a
/// later header or separator closes it, or by [`flush`](Self::flush) once the
/// file has been idle. Past `lookback_bytes` the block stays open but keeps
/// only its remark lines.
#[derive(Debug)]
pub struct TailCursor {
    reader: TailReader,
    lines: LineBuffer,
    assembler: BlockAssembler,
    last_growth: Instant,
}

impl TailCursor {
    pub fn new(path: &Path, lookback_bytes: usize) -> Self {
        Self {
            reader: TailReader::new(path),
            lines: LineBuffer::new(),
            assembler: BlockAssembler::with_limit(lookback_bytes),
            last_growth: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    /// Reads everything appended since the last call.
    pub async fn advance(&mut self) -> Result<CursorStep, TailError> {
        let delta = self.reader.read_delta().await?;

        if delta.truncated {
            self.lines.clear();
            self.assembler.clear();
            return Ok(CursorStep {
                truncated: true,
                ..CursorStep::default()
            });
        }

        if delta.is_empty() {
            return Ok(CursorStep::default());
        }

        self.last_growth = Instant::now();
        let mut blocks = Vec::new();
        for line in self.lines.push(&delta.bytes) {
            if let Some(raw) = self.assembler.push_line(&line) {
                blocks.push(parse_block(&raw));
            }
        }

        Ok(CursorStep {
            blocks,
            bytes_read: delta.bytes.len(),
            truncated: false,
        })
    }

    pub fn has_open_block(&self) -> bool {
        self.assembler.has_open_block()
    }

    /// When the open block should be emitted if the file stays idle.
    pub fn settle_deadline(&self, settle_delay: Duration) -> Option<Instant> {
        self.has_open_block()
            .then(|| self.last_growth + settle_delay)
    }

    /// Emits the open block. Only complete lines are included.
    pub fn flush(&mut self) -> Option<ExtractedBlock> {
        self.assembler.finish().map(|raw| parse_block(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_blocks;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn append(file: &mut NamedTempFile, text: &str) {
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    const BLOCK: &str = "THREAD ERROR 01/01/2024 10:00:00\n\
                         [build: 7.00]\n\
                         variable does not exist on MATA010(MATA010.PRX) line : 45\n\
                         [remark: Logged:jdoe Obj:MATA010 - Products]\n";

    #[tokio::test]
    async fn test_split_block_equals_single_pass() {
        let whole = extract_blocks(BLOCK).remove(0);

        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 8192);

        // Cut inside the message line, mid-word.
        let cut = BLOCK.find("does not").unwrap() + 3;
        append(&mut file, &BLOCK[..cut]);
        let step = cursor.advance().await.unwrap();
        assert!(step.blocks.is_empty());

        append(&mut file, &BLOCK[cut..]);
        let step = cursor.advance().await.unwrap();
        assert!(step.blocks.is_empty(), "open block stays carried");

        let flushed = cursor.flush().unwrap();
        assert_eq!(flushed, whole);
        assert_eq!(flushed.user, "jdoe");
        assert_eq!(flushed.line_number, Some(45));
    }

    #[tokio::test]
    async fn test_next_header_closes_carried_block() {
        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 8192);

        append(&mut file, BLOCK);
        assert!(cursor.advance().await.unwrap().blocks.is_empty());

        append(&mut file, "THREAD ERROR 02/01/2024 11:00:00\nsecond\n");
        let step = cursor.advance().await.unwrap();
        assert_eq!(step.blocks.len(), 1);
        assert_eq!(step.blocks[0].routine, "MATA010");
        assert!(cursor.has_open_block());
        assert_eq!(cursor.flush().unwrap().message, "second");
    }

    #[tokio::test]
    async fn test_block_past_lookback_keeps_late_remark() {
        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 512);

        let mut text = String::from("THREAD ERROR 01/01/2024 10:00:00\nfirst body line\n");
        for i in 0..200 {
            text.push_str(&format!("Called from STACK{:03}(MATA010.PRX) line : {}\n", i, i));
        }
        let (head, tail) = text.split_at(text.len() / 2);
        append(&mut file, head);
        assert!(cursor.advance().await.unwrap().blocks.is_empty());
        append(&mut file, tail);
        append(&mut file, "[remark: Logged:jdoe Obj:MATA010 - Products]\n");
        assert!(cursor.advance().await.unwrap().blocks.is_empty());
        assert!(cursor.has_open_block());

        let block = cursor.flush().unwrap();
        assert_eq!(block.user, "jdoe");
        assert_eq!(block.routine, "MATA010");
        assert_eq!(block.routine_description, "Products");
        assert_eq!(block.message, "Called from STACK000(MATA010.PRX) line : 0");
        assert_eq!(block.line_number, Some(0));
        assert!(block.raw_block.len() < 512 + 128);
    }

    #[tokio::test]
    async fn test_truncation_discards_carry() {
        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 8192);

        append(&mut file, BLOCK);
        cursor.advance().await.unwrap();
        assert!(cursor.has_open_block());

        std::fs::write(file.path(), "x\n").unwrap();
        let step = cursor.advance().await.unwrap();
        assert!(step.truncated);
        assert!(!cursor.has_open_block());
        assert_eq!(cursor.offset(), 2);
        assert!(cursor.flush().is_none());
    }

    #[tokio::test]
    async fn test_settle_deadline_only_with_open_block() {
        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 8192);
        assert!(cursor.settle_deadline(Duration::from_secs(2)).is_none());

        append(&mut file, "THREAD ERROR\nbody\n");
        cursor.advance().await.unwrap();
        let deadline = cursor.settle_deadline(Duration::from_secs(2)).unwrap();
        assert!(deadline > Instant::now());
    }

    #[tokio::test]
    async fn test_lines_after_flush_wait_for_next_header() {
        let mut file = NamedTempFile::new().unwrap();
        let mut cursor = TailCursor::new(file.path(), 8192);

        append(&mut file, "THREAD ERROR 01/01/2024 10:00:00\nfirst half\n");
        cursor.advance().await.unwrap();
        let flushed = cursor.flush().unwrap();
        assert_eq!(flushed.user, "Unknown");

        // The rest of a flushed block has no header to attach to.
        append(&mut file, "[remark: Logged:jdoe Obj:MATA010 - Products]\n");
        assert!(cursor.advance().await.unwrap().blocks.is_empty());
        assert!(!cursor.has_open_block());

        append(&mut file, "THREAD ERROR 01/01/2024 10:05:00\nnext\n");
        cursor.advance().await.unwrap();
        assert_eq!(cursor.flush().unwrap().message, "next");
    }
}
