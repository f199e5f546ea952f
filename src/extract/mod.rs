//! Block Extractor: splits log text into `THREAD ERROR` blocks and pulls
//! structured fields out of each one.
//!
//! Extraction never fails. Fields that cannot be found fall back to an
//! empty string, or `Unknown` for the user.

pub mod rules;

use rules::{
    find_timestamp, first_match, is_header, is_remark_line, is_separator, BlockContext, LINE_NUMBER_RULES,
    MESSAGE_RULES, OBJECT_RULES, SOURCE_RULES, USER_RULES,
};
use serde::Serialize;

pub const UNKNOWN_USER: &str = "Unknown";

/// One error block with its best-effort fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedBlock {
    pub log_timestamp: String,
    pub message: String,
    pub user: String,
    pub source_ref: String,
    pub routine: String,
    pub routine_description: String,
    pub line_number: Option<u32>,
    pub remark: String,
    pub raw_block: String,
}

/// Groups lines into blocks. A header opens a block; the next header, a
/// separator banner or [`finish`](Self::finish) closes it. Lines outside any
/// block are dropped.
///
/// With a byte limit, a block that outgrows it stays open but stops keeping
/// body lines, except `[remark: ...]` lines, which are still needed for the
/// user and object fields.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    open: Vec<String>,
    open_bytes: usize,
    limit: Option<usize>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Feeds one line (without terminator). Returns the block it closed, if any.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if is_header(line) {
            let closed = self.finish();
            self.open_bytes = line.len() + 1;
            self.open.push(line.to_string());
            return closed;
        }

        if is_separator(line) {
            return self.finish();
        }

        if !self.open.is_empty() && (!self.is_full() || is_remark_line(line)) {
            self.open_bytes += line.len() + 1;
            self.open.push(line.to_string());
        }
        None
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.open_bytes >= limit)
    }

    /// Closes the open block, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.open.is_empty() {
            return None;
        }
        let mut lines = std::mem::take(&mut self.open);
        self.open_bytes = 0;

        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        Some(lines.join("\n"))
    }

    pub fn has_open_block(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
        self.open_bytes = 0;
    }
}

/// Extracts every block in `text`. The trailing block is closed at end of input.
pub fn extract_blocks(text: &str) -> Vec<ExtractedBlock> {
    let mut assembler = BlockAssembler::new();
    let mut blocks: Vec<ExtractedBlock> = text
        .lines()
        .filter_map(|line| assembler.push_line(line.trim_end_matches('\r')))
        .map(|raw| parse_block(&raw))
        .collect();

    if let Some(raw) = assembler.finish() {
        blocks.push(parse_block(&raw));
    }
    blocks
}

/// Parses one block's fields. `raw` is kept verbatim as `raw_block`.
pub fn parse_block(raw: &str) -> ExtractedBlock {
    let mut ctx = BlockContext::new(raw);

    let log_timestamp = ctx
        .header_line()
        .and_then(find_timestamp)
        .unwrap_or_default();

    // raw-head always yields for a non-empty block.
    ctx.message = first_match(MESSAGE_RULES, &ctx)
        .map(|(_, message)| message)
        .unwrap_or_default();

    let source_ref = first_match(SOURCE_RULES, &ctx)
        .map(|(_, source)| source)
        .unwrap_or_default();
    let user = first_match(USER_RULES, &ctx)
        .map(|(_, user)| user)
        .unwrap_or_else(|| UNKNOWN_USER.to_string());
    let (routine, routine_description) = first_match(OBJECT_RULES, &ctx)
        .map(|(_, object)| object)
        .unwrap_or_default();
    let line_number = first_match(LINE_NUMBER_RULES, &ctx).map(|(_, n)| n);

    ExtractedBlock {
        log_timestamp,
        message: ctx.message,
        user,
        source_ref,
        routine,
        routine_description,
        line_number,
        remark: ctx.remark.unwrap_or_default(),
        raw_block: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_scenario() {
        let text = "THREAD ERROR 01/01/2024 10:00:00\nCall on FOO(BAR.PRW)\n[remark: Logged:jdoe Obj:BAR - Bar routine]\n";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.user, "jdoe");
        assert_eq!(block.routine, "BAR");
        assert_eq!(block.routine_description, "Bar routine");
        assert_eq!(block.source_ref, "BAR.PRW");
        assert_eq!(block.log_timestamp, "01/01/2024 10:00:00");
        assert_eq!(block.message, "Call on FOO(BAR.PRW)");
        assert_eq!(block.line_number, None);
    }

    #[test]
    fn test_no_header_yields_nothing() {
        assert!(extract_blocks("").is_empty());
        assert!(extract_blocks("plain line\nanother\n").is_empty());
    }

    #[test]
    fn test_k_blocks_without_bleed() {
        let text = "preamble noise\n\
                    THREAD ERROR 01/02/2024 08:00:00\n\
                    first failure on A(A1.PRW)\n\
                    THREAD ERROR 01/02/2024 08:05:00\n\
                    second failure\n\
                    extra detail\n\
                    /*------------------------------\n\
                    banner text outside blocks\n\
                    THREAD ERROR 01/02/2024 08:10:00\n\
                    third failure\n";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 3);

        assert_eq!(
            blocks[0].raw_block,
            "THREAD ERROR 01/02/2024 08:00:00\nfirst failure on A(A1.PRW)"
        );
        assert_eq!(
            blocks[1].raw_block,
            "THREAD ERROR 01/02/2024 08:05:00\nsecond failure\nextra detail"
        );
        assert_eq!(
            blocks[2].raw_block,
            "THREAD ERROR 01/02/2024 08:10:00\nthird failure"
        );
        assert!(!blocks.iter().any(|b| b.raw_block.contains("banner")));
        assert!(!blocks.iter().any(|b| b.raw_block.contains("preamble")));
        assert_eq!(blocks[1].log_timestamp, "01/02/2024 08:05:00");
    }

    #[test]
    fn test_unparseable_block_still_recorded() {
        let blocks = extract_blocks("THREAD ERROR\n[only: tags]\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].user, UNKNOWN_USER);
        assert_eq!(blocks[0].message, "THREAD ERROR | [only: tags]");
        assert_eq!(blocks[0].log_timestamp, "");
        assert_eq!(blocks[0].routine, "");
        assert_eq!(blocks[0].source_ref, "");
    }

    #[test]
    fn test_crlf_and_trailing_blank_lines() {
        let blocks = extract_blocks("THREAD ERROR\r\nboom on X(Y.PRX) line : 7\r\n\r\n\r\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw_block, "THREAD ERROR\nboom on X(Y.PRX) line : 7");
        assert_eq!(blocks[0].source_ref, "Y.PRX");
        assert_eq!(blocks[0].line_number, Some(7));
    }

    #[test]
    fn test_assembler_tracks_open_block() {
        let mut assembler = BlockAssembler::new();
        assert_eq!(assembler.push_line("outside"), None);
        assert!(!assembler.has_open_block());

        assert_eq!(assembler.push_line("THREAD ERROR"), None);
        assert_eq!(assembler.push_line("body"), None);

        let closed = assembler.push_line("THREAD ERROR again");
        assert_eq!(closed.as_deref(), Some("THREAD ERROR\nbody"));
        assert!(assembler.has_open_block());

        assert_eq!(assembler.finish().as_deref(), Some("THREAD ERROR again"));
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_limited_block_keeps_late_remark() {
        let mut text = String::from("THREAD ERROR 01/01/2024 10:00:00\nfailure on X(MATA010.PRX)\n");
        for i in 0..200 {
            text.push_str(&format!("Called from FUNC{:03}(MATA010.PRX) line : {}\n", i, i));
        }
        text.push_str("[remark: Logged:jdoe Obj:MATA010 - Products]\n");

        let mut assembler = BlockAssembler::with_limit(1024);
        for line in text.lines() {
            assert_eq!(assembler.push_line(line), None);
        }
        let raw = assembler.finish().unwrap();
        assert!(raw.len() < text.len());
        assert!(raw.ends_with("[remark: Logged:jdoe Obj:MATA010 - Products]"));

        let limited = parse_block(&raw);
        let whole = extract_blocks(&text).remove(0);
        assert_eq!(limited.user, "jdoe");
        assert_eq!(limited.user, whole.user);
        assert_eq!(limited.routine, whole.routine);
        assert_eq!(limited.routine_description, "Products");
        assert_eq!(limited.message, whole.message);
        assert_eq!(limited.source_ref, whole.source_ref);
    }
}
