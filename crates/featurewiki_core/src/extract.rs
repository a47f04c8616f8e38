use serde::Serialize;

/// Header tokens that open a specification inside a fenced region.
pub const HEADER_TOKENS: &[&str] = &["Feature:", "Business Need:", "Ability:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecificationBlock {
    pub identifier: String,
    pub name: String,
    pub body: String,
    /// 1-based line of the header within the page.
    pub line: usize,
}

/// Iterate the specification blocks of `text`, one per fenced region whose
/// lines include a header token, in document order. A block's body runs from
/// the header line up to the closing fence, byte-for-byte. The sequence is lazy
/// and calling this again on the same text yields the same blocks.
pub fn extract_blocks(text: &str) -> Blocks<'_> {
    Blocks {
        text,
        offset: 0,
        line: 1,
    }
}

/// Lowercased, hyphenated form of a header name.
pub fn slugify(name: &str) -> String {
    name.trim().replace(' ', "-").to_lowercase()
}

#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl Iterator for Blocks<'_> {
    type Item = SpecificationBlock;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let region = next_region(self.text, self.offset, self.line)?;
            self.offset = region.resume_offset;
            self.line = region.resume_line;
            if let Some(block) = block_in_region(self.text, &region) {
                return Some(block);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    start: usize,
    /// Content without the line terminator.
    content: &'a str,
    number: usize,
}

#[derive(Debug, Clone)]
struct Region<'a> {
    lines: Vec<Line<'a>>,
    closing_start: usize,
    resume_offset: usize,
    resume_line: usize,
}

fn lines_from(text: &str, offset: usize, first_line: usize) -> impl Iterator<Item = Line<'_>> {
    let mut start = offset;
    let mut number = first_line;
    std::iter::from_fn(move || {
        if start >= text.len() {
            return None;
        }
        let rest = &text[start..];
        let (raw, advance) = match rest.find('\n') {
            Some(index) => (&rest[..index], index + 1),
            None => (rest, rest.len()),
        };
        let line = Line {
            start,
            content: raw.strip_suffix('\r').unwrap_or(raw),
            number,
        };
        start += advance;
        number += 1;
        Some(line)
    })
}

fn next_region(text: &str, offset: usize, first_line: usize) -> Option<Region<'_>> {
    let mut lines = lines_from(text, offset, first_line);
    while let Some(open) = lines.next() {
        let Some((marker, width)) = opening_fence(open.content) else {
            continue;
        };
        let mut inner = Vec::new();
        for line in lines.by_ref() {
            if closes_fence(line.content, marker, width) {
                let resume_offset = text[line.start..]
                    .find('\n')
                    .map_or(text.len(), |index| line.start + index + 1);
                return Some(Region {
                    lines: inner,
                    closing_start: line.start,
                    resume_offset,
                    resume_line: line.number + 1,
                });
            }
            inner.push(line);
        }
        // Unclosed fence: nothing after it can form a region.
        return None;
    }
    None
}

fn opening_fence(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let width = trimmed.chars().take_while(|ch| *ch == marker).count();
    if width < 3 {
        return None;
    }
    // A backtick info string cannot itself contain backticks.
    if marker == '`' && trimmed[width..].contains('`') {
        return None;
    }
    Some((marker, width))
}

fn closes_fence(line: &str, marker: char, width: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= width && trimmed.chars().all(|ch| ch == marker)
}

fn header_name(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    HEADER_TOKENS
        .iter()
        .find_map(|token| trimmed.strip_prefix(*token))
        .map(str::trim)
}

fn block_in_region(text: &str, region: &Region<'_>) -> Option<SpecificationBlock> {
    let (header, name) = region
        .lines
        .iter()
        .find_map(|line| header_name(line.content).map(|name| (line, name)))?;
    let identifier = slugify(name);
    if identifier.is_empty() {
        return None;
    }
    Some(SpecificationBlock {
        identifier,
        name: name.to_string(),
        body: text[header.start..region.closing_start].to_string(),
        line: header.number,
    })
}
