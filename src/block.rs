//! Lexer / BlockParser.
//!
//! Scans a template string into an ordered sequence of [`Block`]s, tracking
//! 1-based line numbers per the owning template. Delimiter scanning is
//! built on `nom`, the same way `<# #>` / `<#= #>` / `<#@ #>` scanning is
//! done elsewhere in the `nom` ecosystem; this version adds the `<#+ #>`
//! member delimiter and full line tracking across an arbitrary block
//! sequence rather than a single fixed body.

use nom::{bytes::complete::tag, combinator::not, IResult};

use crate::error::Error;

/// The kind of a lexical fragment of template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Literal text, copied verbatim to the rendered output.
    Text,
    /// A `<# ... #>` statement, emitted verbatim into `Render`.
    Statement,
    /// A `<#= ... #>` expression, written to the output.
    Expression,
    /// A `<#+ ... #>` class-member region delimiter.
    Member,
    /// A `<#@ ... #>` directive.
    Directive,
}

/// An immutable lexical fragment of a template, produced by [`lex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    /// Name of the template that owns this block (propagated across
    /// `include` splicing so diagnostics point at the original source).
    pub name: String,
    /// 1-based line, in the owning template, of the delimiter's opening
    /// (or of the first character, for `Text` blocks).
    pub start_line: usize,
}

impl Block {
    fn new(kind: BlockKind, text: impl Into<String>, name: &str, start_line: usize) -> Self {
        Block { kind, text: text.into(), name: name.to_string(), start_line }
    }
}

fn count_lines(s: &str) -> usize {
    s.matches('\n').count()
}

fn code_open(s: &str) -> IResult<&str, &str> {
    let (rest, tagged) = tag("<#")(s)?;
    Ok((rest, tagged))
}

fn expr_open(s: &str) -> IResult<&str, &str> { tag("<#=")(s) }
fn directive_open(s: &str) -> IResult<&str, &str> { tag("<#@")(s) }
fn member_open(s: &str) -> IResult<&str, &str> { tag("<#+")(s) }

fn close_tag(s: &str) -> IResult<&str, &str> {
    let (rest, tagged) = tag("#>")(s)?;
    // First closing `#>` after an opening wins; reject a doubled close so
    // the doubled-delimiter escape below can still see it.
    not(tag("#>"))(rest)?;
    Ok((rest, tagged))
}

fn double_open(s: &str) -> IResult<&str, &str> { tag("<#<#")(s) }
fn double_close(s: &str) -> IResult<&str, &str> { tag("#>#>")(s) }

/// Scan `source` (belonging to template `name`) into an ordered block
/// sequence. Adjacent `Text` blocks are merged.
pub fn lex(name: &str, source: &str) -> Result<Vec<Block>, Error> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut cur = source;
    let mut line = 1usize;

    while !cur.is_empty() {
        let (text, text_line, rest) = scan_text(cur, line);
        push_text(&mut blocks, name, text_line, text);
        line += count_lines(cur) - count_lines(rest);
        cur = rest;

        if cur.is_empty() {
            break;
        }

        let open_line = line;
        if let Ok((after, _)) = expr_open(cur) {
            let (body, rest) = scan_code(name, after, open_line)?;
            blocks.push(Block::new(BlockKind::Expression, body.trim(), name, open_line));
            line += count_lines(cur) - count_lines(rest);
            cur = rest;
        } else if let Ok((after, _)) = directive_open(cur) {
            let (body, rest) = scan_code(name, after, open_line)?;
            blocks.push(Block::new(BlockKind::Directive, body, name, open_line));
            line += count_lines(cur) - count_lines(rest);
            cur = rest;
        } else if let Ok((after, _)) = member_open(cur) {
            let (body, rest) = scan_code(name, after, open_line)?;
            blocks.push(Block::new(BlockKind::Member, body, name, open_line));
            line += count_lines(cur) - count_lines(rest);
            cur = rest;
        } else if let Ok((after, _)) = code_open(cur) {
            let (body, rest) = scan_code(name, after, open_line)?;
            blocks.push(Block::new(BlockKind::Statement, body, name, open_line));
            line += count_lines(cur) - count_lines(rest);
            cur = rest;
        } else {
            // Shouldn't happen: scan_text stops exactly at an opening
            // delimiter or end of input.
            break;
        }
    }

    Ok(merge_adjacent_text(blocks))
}

fn push_text(blocks: &mut Vec<Block>, name: &str, line: usize, text: String) {
    if text.is_empty() {
        return;
    }
    blocks.push(Block::new(BlockKind::Text, text, name, line));
}

/// Consume text up to (but not including) the next real delimiter opening,
/// resolving the `<#<#` escape into a literal `<#`.
fn scan_text(input: &str, start_line: usize) -> (String, usize, &str) {
    let mut content = String::new();
    let mut cur = input;
    let line = start_line;

    loop {
        match find_next_open(cur) {
            Some(pos) => {
                content.push_str(&cur[..pos]);
                let after = &cur[pos..];
                if let Ok((rest, _)) = double_open(after) {
                    content.push_str("<#");
                    cur = rest;
                    continue;
                }
                return (content, line, after);
            }
            None => {
                content.push_str(cur);
                return (content, line, "");
            }
        }
    }
}

fn find_next_open(s: &str) -> Option<usize> {
    s.find("<#")
}

/// Consume a code/directive/expression/member body up to its closing
/// `#>`, resolving the `#>#>` escape into a literal `#>`.
fn scan_code<'a>(
    name: &str,
    input: &'a str,
    open_line: usize,
) -> Result<(String, &'a str), Error> {
    let mut content = String::new();
    let mut cur = input;

    loop {
        match take_until_close(cur) {
            Some(pos) => {
                content.push_str(&cur[..pos]);
                let after = &cur[pos..];
                if let Ok((rest, _)) = double_close(after) {
                    content.push_str("#>");
                    cur = rest;
                    continue;
                }
                if let Ok((rest, _)) = close_tag(after) {
                    return Ok((content, rest));
                }
                // `#>` followed by yet another `#>` that isn't a doubled
                // escape (e.g. three in a row): treat the first as the
                // real close.
                return Ok((content, &after[2..]));
            }
            None => {
                return Err(Error::Parse {
                    name: name.to_string(),
                    line: open_line,
                    reason: "unterminated delimiter".to_string(),
                });
            }
        }
    }
}

fn take_until_close(s: &str) -> Option<usize> {
    s.find("#>")
}

fn merge_adjacent_text(blocks: Vec<Block>) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
    for b in blocks {
        if b.kind == BlockKind::Text {
            if let Some(last) = out.last_mut() {
                if last.kind == BlockKind::Text {
                    last.text.push_str(&b.text);
                    continue;
                }
            }
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_only() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "Hello, world!").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert_eq!(blocks[0].text, "Hello, world!");
        assert_eq!(blocks[0].start_line, 1);
    }

    #[test]
    fn expression_block() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "Hi <#= name #>!").unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert_eq!(blocks[1].kind, BlockKind::Expression);
        assert_eq!(blocks[1].text, "name");
        assert_eq!(blocks[2].kind, BlockKind::Text);
    }

    #[test]
    fn statement_block() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "<# for i in 0..3 { #>x<# } #>").unwrap();
        let kinds: Vec<_> = blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Statement,
                BlockKind::Text,
                BlockKind::Statement,
            ]
        );
    }

    #[test]
    fn directive_block() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "<#@ template name=\"A\" #>body").unwrap();
        assert_eq!(blocks[0].kind, BlockKind::Directive);
        assert_eq!(blocks[0].text.trim(), "template name=\"A\"");
    }

    #[test]
    fn member_region_markers() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "<#+ fn helper() {} #>rest").unwrap();
        assert_eq!(blocks[0].kind, BlockKind::Member);
    }

    #[test]
    fn line_tracking() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "one\ntwo\n<#= x #>\nfour").unwrap();
        let expr = blocks.iter().find(|b| b.kind == BlockKind::Expression).unwrap();
        assert_eq!(expr.start_line, 3);
    }

    #[test]
    fn unterminated_delimiter_is_fatal() {
        let _ = env_logger::builder().is_test(true).try_init();
        let err = lex("A", "text <# unterminated").unwrap_err();
        match err {
            Error::Parse { name, line, .. } => {
                assert_eq!(name, "A");
                assert_eq!(line, 1);
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn double_escape_start_and_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "a <#<# b #># > c").unwrap();
        // `<#<#` unescapes to a literal `<#`; the rest is plain text since
        // there is no unescaped opening delimiter left to start a block.
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].text.contains("<#"));
    }

    #[test]
    fn consecutive_text_blocks_merge() {
        let _ = env_logger::builder().is_test(true).try_init();
        let blocks = lex("A", "<#@ import namespace=\"x\" #>abc<#@ import namespace=\"y\" #>def").unwrap();
        let texts: Vec<_> = blocks.iter().filter(|b| b.kind == BlockKind::Text).collect();
        assert_eq!(texts.len(), 2);
    }
}
