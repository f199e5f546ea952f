//! Named extraction rules, applied in the order they are listed.
//!
//! Every rule is a pure function from a block to an optional field value.
//! The first rule that yields a value wins; when none does the field keeps
//! its default.

use regex::Regex;
use std::sync::OnceLock;

macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new($re).unwrap())
    }};
}

/// Marker that opens an error block.
pub const HEADER_MARKER: &str = "THREAD ERROR";

/// Source file extensions recognized in routine references.
pub const EXTENSIONS: [&str; 3] = ["PRW", "PRX", "TLPP"];

/// Lines that start with the header marker, ignoring case and indentation.
pub fn is_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed
        .get(..HEADER_MARKER.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(HEADER_MARKER))
}

/// Comment banners such as `/*-----` or `/*=====` that sit between errors.
pub fn is_separator(line: &str) -> bool {
    regex!(r"^\s*/\*[-=]+").is_match(line)
}

/// Lines carrying a `[remark: ...]` annotation.
pub fn is_remark_line(line: &str) -> bool {
    regex!(r"(?i)\[remark:").is_match(line)
}

/// The first `dd/mm/yyyy hh:mm:ss` pair in `text`, rendered `"<date> <time>"`.
pub fn find_timestamp(text: &str) -> Option<String> {
    regex!(r"(\d{2}/\d{2}/\d{4})\s+(\d{2}:\d{2}:\d{2})")
        .captures(text)
        .map(|caps| format!("{} {}", &caps[1], &caps[2]))
}

/// A block under extraction.
#[derive(Debug)]
pub struct BlockContext<'a> {
    pub text: &'a str,
    pub lines: Vec<&'a str>,
    /// Index of the header line within `lines`, if present.
    pub header: Option<usize>,
    /// Contents of `[remark: ...]`, whitespace collapsed.
    pub remark: Option<String>,
    /// The chosen message, filled in once the message rules have run.
    pub message: String,
}

impl<'a> BlockContext<'a> {
    pub fn new(text: &'a str) -> Self {
        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        let header = lines.iter().position(|l| is_header(l));
        let remark = regex!(r"(?is)\[remark:(.*?)\]")
            .captures(text)
            .map(|caps| collapse_whitespace(&caps[1]))
            .filter(|r| !r.is_empty());

        Self {
            text,
            lines,
            header,
            remark,
            message: String::new(),
        }
    }

    pub fn header_line(&self) -> Option<&'a str> {
        self.header.map(|i| self.lines[i])
    }

    /// Lines after the header that can carry the message: not blank, not a
    /// `[tag]` line and not a `*` revision banner.
    pub fn candidate_lines(&self) -> impl Iterator<Item = &'a str> + '_ {
        let start = self.header.map_or(0, |i| i + 1);
        self.lines[start..].iter().copied().filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('[') && !trimmed.starts_with('*')
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A named extraction step.
pub struct Rule<T> {
    pub name: &'static str,
    pub apply: fn(&BlockContext<'_>) -> Option<T>,
}

/// Runs `rules` in order and returns the first hit with the name of the rule
/// that produced it.
pub fn first_match<T>(rules: &[Rule<T>], ctx: &BlockContext<'_>) -> Option<(&'static str, T)> {
    rules
        .iter()
        .find_map(|rule| (rule.apply)(ctx).map(|value| (rule.name, value)))
}

pub const MESSAGE_RULES: &[Rule<String>] = &[
    Rule {
        name: "signature",
        apply: message_signature,
    },
    Rule {
        name: "first-body-line",
        apply: message_first_body_line,
    },
    Rule {
        name: "raw-head",
        apply: message_raw_head,
    },
];

pub const SOURCE_RULES: &[Rule<String>] = &[
    Rule {
        name: "on-call-in-message",
        apply: source_on_call,
    },
    Rule {
        name: "parenthesized-module-in-block",
        apply: source_parenthesized_module,
    },
];

pub const USER_RULES: &[Rule<String>] = &[
    Rule {
        name: "logged",
        apply: user_logged,
    },
    Rule {
        name: "logged-loose",
        apply: user_logged_loose,
    },
    Rule {
        name: "before-obj",
        apply: user_before_obj,
    },
];

/// `(routine, description)`; the description may be empty.
pub const OBJECT_RULES: &[Rule<(String, String)>] = &[Rule {
    name: "obj",
    apply: object_obj,
}];

pub const LINE_NUMBER_RULES: &[Rule<u32>] = &[Rule {
    name: "line-in-message",
    apply: line_in_message,
}];

fn message_signature(ctx: &BlockContext<'_>) -> Option<String> {
    let signature = regex!(r"(?i)\bon\s+[A-Z0-9_]+\s*\(|\.(?:PRW|PRX|TLPP)\b");
    ctx.candidate_lines()
        .find(|line| signature.is_match(line))
        .map(|line| line.trim().to_string())
}

fn message_first_body_line(ctx: &BlockContext<'_>) -> Option<String> {
    ctx.candidate_lines().next().map(|line| line.trim().to_string())
}

fn message_raw_head(ctx: &BlockContext<'_>) -> Option<String> {
    let head: Vec<&str> = ctx
        .lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(3)
        .collect();
    (!head.is_empty()).then(|| head.join(" | "))
}

fn module_reference(module: &str, ext: &str) -> String {
    format!("{}.{}", module, ext.to_ascii_uppercase())
}

fn source_on_call(ctx: &BlockContext<'_>) -> Option<String> {
    regex!(r"(?i)\bon\s+[A-Z0-9_]+\s*\(\s*([A-Z0-9_]+)\.(PRW|PRX|TLPP)\s*\)")
        .captures(&ctx.message)
        .map(|caps| module_reference(&caps[1], &caps[2]))
}

fn source_parenthesized_module(ctx: &BlockContext<'_>) -> Option<String> {
    regex!(r"(?i)\(\s*([A-Z0-9_]+)\.(PRW|PRX|TLPP)\s*\)")
        .captures(ctx.text)
        .map(|caps| module_reference(&caps[1], &caps[2]))
}

fn user_logged(ctx: &BlockContext<'_>) -> Option<String> {
    let remark = ctx.remark.as_deref()?;
    regex!(r"(?i)Logged\s*:\s*([A-Z0-9._\-@]+)")
        .captures(remark)
        .map(|caps| caps[1].to_string())
}

fn user_logged_loose(ctx: &BlockContext<'_>) -> Option<String> {
    let remark = ctx.remark.as_deref()?;
    regex!(r"(?i)Logged\s*:\s*(\S+)")
        .captures(remark)
        .map(|caps| caps[1].to_string())
}

fn user_before_obj(ctx: &BlockContext<'_>) -> Option<String> {
    let remark = ctx.remark.as_deref()?;
    regex!(r"(?i)([A-Z0-9._\-@]+)\s+[A-Z0-9]{4,8}\s+Obj\s*:")
        .captures(remark)
        .map(|caps| caps[1].to_string())
}

fn object_obj(ctx: &BlockContext<'_>) -> Option<(String, String)> {
    let remark = ctx.remark.as_deref()?;
    regex!(r"(?i)Obj\s*:\s*([U_]*[A-Z0-9_]+)\s*(?:-\s*(.+))?")
        .captures(remark)
        .map(|caps| {
            let routine = caps[1].trim().to_string();
            let description = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            (routine, description)
        })
}

fn line_in_message(ctx: &BlockContext<'_>) -> Option<u32> {
    regex!(r"(?i)\bline\s*:\s*(\d+)")
        .captures(&ctx.message)
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_message(text: &str) -> BlockContext<'_> {
        let mut ctx = BlockContext::new(text);
        if let Some((_, message)) = first_match(MESSAGE_RULES, &ctx) {
            ctx.message = message;
        }
        ctx
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header("THREAD ERROR ([1234], user, HOST) 01/01/2024 10:00:00"));
        assert!(is_header("   thread error (x)"));
        assert!(!is_header("some THREAD ERROR mid-line"));
        assert!(!is_header("THREAD"));
    }

    #[test]
    fn test_separator_detection() {
        assert!(is_separator("/*-----------------"));
        assert!(is_separator("  /*=========="));
        assert!(!is_separator("/* plain comment"));
    }

    #[test]
    fn test_timestamp() {
        assert_eq!(
            find_timestamp("THREAD ERROR ([77], a, b)   05/03/2024  17:45:01").as_deref(),
            Some("05/03/2024 17:45:01")
        );
        assert_eq!(find_timestamp("THREAD ERROR"), None);
    }

    #[test]
    fn test_signature_preferred_over_first_line() {
        let text = "THREAD ERROR 01/01/2024 10:00:00\n\
                    [build: 7.00]\n\
                    * SVN Revision 1234\n\
                    Generic failure text\n\
                    variable does not exist on MATA010(MATA010.PRX) 01/01/2024 10:00:00 line : 45\n";
        let ctx = BlockContext::new(text);
        let (rule, message) = first_match(MESSAGE_RULES, &ctx).unwrap();
        assert_eq!(rule, "signature");
        assert!(message.starts_with("variable does not exist on MATA010"));
    }

    #[test]
    fn test_first_body_line_skips_tags_and_banners() {
        let text = "THREAD ERROR\n\n[thread: 12]\n*** revision\nOut of memory\nsecond\n";
        let ctx = BlockContext::new(text);
        assert_eq!(
            first_match(MESSAGE_RULES, &ctx),
            Some(("first-body-line", "Out of memory".to_string()))
        );
    }

    #[test]
    fn test_raw_head_fallback() {
        let text = "THREAD ERROR 01/01/2024 10:00:00\n[tag: one]\n[tag: two]\n[tag: three]\n";
        let ctx = BlockContext::new(text);
        assert_eq!(
            first_match(MESSAGE_RULES, &ctx),
            Some((
                "raw-head",
                "THREAD ERROR 01/01/2024 10:00:00 | [tag: one] | [tag: two]".to_string()
            ))
        );
    }

    #[test]
    fn test_source_prefers_on_call() {
        let text = "THREAD ERROR\n\
                    Error on CTB010ACOLS(ctba010.prw)\n\
                    Called from HELPER(OTHER.TLPP)\n";
        let ctx = ctx_with_message(text);
        assert_eq!(
            first_match(SOURCE_RULES, &ctx),
            Some(("on-call-in-message", "ctba010.PRW".to_string()))
        );
    }

    #[test]
    fn test_source_falls_back_to_block() {
        let text = "THREAD ERROR\nInvalid argument\nCalled from HELPER(OTHER.tlpp) line 9\n";
        let ctx = ctx_with_message(text);
        assert_eq!(ctx.message, "Called from HELPER(OTHER.tlpp) line 9");
        assert_eq!(
            first_match(SOURCE_RULES, &ctx),
            Some(("parenthesized-module-in-block", "OTHER.TLPP".to_string()))
        );
    }

    #[test]
    fn test_unrecognized_extension_ignored() {
        let ctx = ctx_with_message("THREAD ERROR\nfailed on RUN(MODULE.CPP)\n");
        assert_eq!(first_match(SOURCE_RULES, &ctx), None);
    }

    #[test]
    fn test_remark_anywhere_and_collapsed() {
        let text = "THREAD ERROR\nmsg\n[remark:   Logged :  maria.s\n   Obj :  U_FAT001  -   Billing   run ]\ntrailer\n";
        let ctx = BlockContext::new(text);
        assert_eq!(
            ctx.remark.as_deref(),
            Some("Logged : maria.s Obj : U_FAT001 - Billing run")
        );
        assert_eq!(
            first_match(USER_RULES, &ctx),
            Some(("logged", "maria.s".to_string()))
        );
        assert_eq!(
            first_match(OBJECT_RULES, &ctx),
            Some(("obj", ("U_FAT001".to_string(), "Billing run".to_string())))
        );
    }

    #[test]
    fn test_user_loose_and_before_obj() {
        let ctx = BlockContext::new("THREAD ERROR\n[remark: Logged: #weird! Obj:X]\n");
        assert_eq!(
            first_match(USER_RULES, &ctx),
            Some(("logged-loose", "#weird!".to_string()))
        );

        let ctx = BlockContext::new("THREAD ERROR\n[remark: Emp:01 jsilva ABCD12 Obj: MATA410]\n");
        assert_eq!(
            first_match(USER_RULES, &ctx),
            Some(("before-obj", "jsilva".to_string()))
        );
    }

    #[test]
    fn test_object_without_description() {
        let ctx = BlockContext::new("THREAD ERROR\n[remark: Obj:FINA050]\n");
        assert_eq!(
            first_match(OBJECT_RULES, &ctx),
            Some(("obj", ("FINA050".to_string(), String::new())))
        );
    }

    #[test]
    fn test_no_remark_means_no_user() {
        let ctx = BlockContext::new("THREAD ERROR\nmessage only\n");
        assert!(ctx.remark.is_none());
        assert_eq!(first_match(USER_RULES, &ctx), None);
        assert_eq!(first_match(OBJECT_RULES, &ctx), None);
    }

    #[test]
    fn test_line_number() {
        let ctx = ctx_with_message("THREAD ERROR\narray out of bounds on X(Y.PRW) line : 1203\n");
        assert_eq!(first_match(LINE_NUMBER_RULES, &ctx), Some(("line-in-message", 1203)));

        let ctx = ctx_with_message("THREAD ERROR\npipeline stalled\n");
        assert_eq!(first_match(LINE_NUMBER_RULES, &ctx), None);
    }
}
