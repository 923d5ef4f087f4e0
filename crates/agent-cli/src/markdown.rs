//! Markdown rendering for assistant answers
//!
//! Maps headings, emphasis, code and lists onto the ANSI styles in
//! [`crate::display`]. Raw HTML is printed as text, never interpreted.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::display::{BLUE, BOLD, CYAN, DIM, ITALIC, RESET};

const RULE_WIDTH: usize = 40;
const CODE_INDENT: &str = "    ";

/// Render `text` as styled terminal output, without a trailing newline
pub fn render_markdown(text: &str) -> String {
    let mut writer = Writer::default();
    for event in Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH) {
        writer.event(event);
    }
    writer.out.trim_end().to_string()
}

fn heading_styles(level: HeadingLevel) -> &'static [&'static str] {
    match level {
        HeadingLevel::H1 | HeadingLevel::H2 => &[BOLD, CYAN],
        _ => &[BOLD],
    }
}

#[derive(Default)]
struct Writer {
    out: String,
    /// Active inline styles, re-applied after every reset
    styles: Vec<&'static str>,
    /// One entry per open list: the next number, or `None` for bullets
    lists: Vec<Option<u64>>,
    /// Open link target and the text seen inside it
    link: Option<(String, String)>,
    in_code_block: bool,
    at_line_start: bool,
}

impl Writer {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) if self.in_code_block => self.code_lines(&text),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                self.indent_if_needed();
                self.out.push_str(CYAN);
                self.out.push_str(&code);
                self.reset();
            }
            Event::Html(html) | Event::InlineHtml(html) => self.text(&html),
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => self.newline(),
            Event::Rule => {
                self.ensure_newline();
                self.out.push_str(DIM);
                self.out.push_str(&"─".repeat(RULE_WIDTH));
                self.out.push_str(RESET);
                self.end_block();
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.ensure_newline();
                for &style in heading_styles(level) {
                    self.push_style(style);
                }
            }
            Tag::Emphasis => self.push_style(ITALIC),
            Tag::Strong => self.push_style(BOLD),
            Tag::Strikethrough => self.push_style(DIM),
            Tag::Link { dest_url, .. } => {
                self.push_style(BLUE);
                self.link = Some((dest_url.to_string(), String::new()));
            }
            Tag::CodeBlock(kind) => {
                self.ensure_newline();
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        let indent = self.indent();
                        self.out.push_str(&format!("{}{}{}{}\n", indent, DIM, lang, RESET));
                    }
                }
                self.in_code_block = true;
            }
            Tag::List(start) => {
                self.ensure_newline();
                self.lists.push(start);
            }
            Tag::Item => {
                self.ensure_newline();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.out.push_str(&"  ".repeat(depth));
                self.out.push_str(&marker);
                self.at_line_start = false;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.end_block(),
            TagEnd::Heading(level) => {
                for _ in heading_styles(level) {
                    self.pop_style();
                }
                self.end_block();
            }
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link => {
                self.pop_style();
                if let Some((url, text)) = self.link.take() {
                    if !url.is_empty() && url != text {
                        self.out.push_str(&format!(" {}({}){}", DIM, url, RESET));
                        self.restore_styles();
                    }
                }
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.end_block();
            }
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.end_block();
                } else {
                    self.ensure_newline();
                }
            }
            TagEnd::Item => self.ensure_newline(),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        self.indent_if_needed();
        self.out.push_str(text);
        if let Some((_, link_text)) = self.link.as_mut() {
            link_text.push_str(text);
        }
    }

    fn code_lines(&mut self, text: &str) {
        let indent = self.indent();
        for line in text.lines() {
            self.out.push_str(&format!("{}{}{}{}{}\n", indent, CODE_INDENT, CYAN, line, RESET));
        }
        self.at_line_start = true;
    }

    /// Content indentation inside list items
    fn indent(&self) -> String {
        "  ".repeat(self.lists.len())
    }

    fn indent_if_needed(&mut self) {
        if self.at_line_start {
            let indent = self.indent();
            self.out.push_str(&indent);
            self.at_line_start = false;
        }
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.at_line_start = true;
    }

    fn ensure_newline(&mut self) {
        if !self.out.is_empty() && !self.at_line_start {
            self.newline();
        }
    }

    /// Close a block; top-level blocks are separated by a blank line
    fn end_block(&mut self) {
        self.ensure_newline();
        if self.lists.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn push_style(&mut self, style: &'static str) {
        self.styles.push(style);
        self.out.push_str(style);
    }

    fn pop_style(&mut self) {
        self.styles.pop();
        self.reset();
    }

    fn reset(&mut self) {
        self.out.push_str(RESET);
        self.restore_styles();
    }

    fn restore_styles(&mut self) {
        for style in &self.styles {
            self.out.push_str(style);
        }
    }
}
