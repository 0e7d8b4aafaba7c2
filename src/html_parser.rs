//! Token-level markup handling.
//!
//! Pages are tokenized rather than parsed into a tree so the rewritten output
//! stays as close as possible to what the forum served. The sink tracks which
//! raw-text element it is inside so `script` and `style` bodies are written
//! back verbatim instead of being entity-escaped.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub self_closing: bool,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctype {
    pub name: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupToken {
    Doctype(Doctype),
    StartTag(StartTag),
    EndTag(String),
    /// Character data that is escaped on output.
    Text(String),
    /// Body of a raw-text element such as `script` or `style`.
    RawText { element: String, data: String },
    Comment(String),
}

/// Which kind of element the tokenizer is currently inside.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TextState {
    Data,
    RawText(String),
    Rcdata(String),
}

fn raw_kind_for(element: &str) -> Option<RawKind> {
    match element {
        "script" => Some(RawKind::ScriptData),
        "style" | "xmp" | "iframe" | "noembed" | "noframes" => Some(RawKind::Rawtext),
        "title" | "textarea" => Some(RawKind::Rcdata),
        _ => None,
    }
}

struct TokenCollector {
    tokens: Vec<MarkupToken>,
    state: TextState,
}

impl TokenCollector {
    fn new() -> Self {
        Self {
            tokens: Vec::new(),
            state: TextState::Data,
        }
    }

    fn push_text(&mut self, text: &str) {
        if let TextState::RawText(element) = &self.state {
            if let Some(MarkupToken::RawText { data, .. }) = self.tokens.last_mut() {
                data.push_str(text);
            } else {
                self.tokens.push(MarkupToken::RawText {
                    element: element.clone(),
                    data: text.to_string(),
                });
            }
            return;
        }

        if let Some(MarkupToken::Text(data)) = self.tokens.last_mut() {
            data.push_str(text);
        } else {
            self.tokens.push(MarkupToken::Text(text.to_string()));
        }
    }

    fn process_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = tag.name.to_string();

        match tag.kind {
            TagKind::StartTag => {
                let attrs = tag
                    .attrs
                    .into_iter()
                    .map(|attr| Attribute {
                        name: attr.name.local.to_string(),
                        value: attr.value.to_string(),
                    })
                    .collect();
                self.tokens.push(MarkupToken::StartTag(StartTag {
                    name: name.clone(),
                    attrs,
                    self_closing: tag.self_closing,
                }));

                // a trailing slash does not close `script` or `style`
                match raw_kind_for(&name) {
                    Some(RawKind::Rcdata) => {
                        self.state = TextState::Rcdata(name);
                        TokenSinkResult::RawData(RawKind::Rcdata)
                    }
                    Some(kind) => {
                        self.state = TextState::RawText(name);
                        TokenSinkResult::RawData(kind)
                    }
                    None => TokenSinkResult::Continue,
                }
            }
            TagKind::EndTag => {
                let closes_current = match &self.state {
                    TextState::RawText(element) | TextState::Rcdata(element) => *element == name,
                    TextState::Data => false,
                };
                if closes_current {
                    self.state = TextState::Data;
                }
                self.tokens.push(MarkupToken::EndTag(name));
                TokenSinkResult::Continue
            }
        }
    }
}

impl TokenSink for TokenCollector {
    type Handle = ();

    fn process_token(&mut self, token: Token, line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => return self.process_tag(tag),
            Token::CharacterTokens(text) => self.push_text(&text),
            Token::NullCharacterToken => self.push_text("\u{FFFD}"),
            Token::CommentToken(comment) => {
                self.tokens.push(MarkupToken::Comment(comment.to_string()))
            }
            Token::DoctypeToken(doctype) => self.tokens.push(MarkupToken::Doctype(Doctype {
                name: doctype.name.map(|s| s.to_string()),
                public_id: doctype.public_id.map(|s| s.to_string()),
                system_id: doctype.system_id.map(|s| s.to_string()),
            })),
            Token::ParseError(message) => trace!("Markup parse error at line {}: {}", line_number, message),
            Token::EOFToken => {}
        }
        TokenSinkResult::Continue
    }
}

/// A tokenized page whose tokens can be rewritten in place and serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupDocument {
    pub tokens: Vec<MarkupToken>,
}

impl MarkupDocument {
    pub fn parse(html: &str) -> Self {
        let opts = TokenizerOpts {
            discard_bom: false,
            ..TokenizerOpts::default()
        };
        let mut tokenizer = Tokenizer::new(TokenCollector::new(), opts);
        let mut input = BufferQueue::new();
        input.push_back(StrTendril::from_slice(html));

        let _ = tokenizer.feed(&mut input);
        tokenizer.end();

        Self {
            tokens: tokenizer.sink.tokens,
        }
    }

    pub fn serialize(&self) -> String {
        let mut output = String::new();
        for token in &self.tokens {
            write_token(&mut output, token);
        }
        output
    }
}

/// `style` and inline event handler attributes carry script or CSS text that
/// is written back as-is.
pub fn is_unescaped_attribute(name: &str) -> bool {
    name == "style" || name.starts_with("on")
}

fn write_token(output: &mut String, token: &MarkupToken) {
    match token {
        MarkupToken::Doctype(doctype) => {
            output.push_str("<!DOCTYPE");
            if let Some(name) = &doctype.name {
                output.push(' ');
                output.push_str(name);
            }
            match (&doctype.public_id, &doctype.system_id) {
                (Some(public_id), system_id) => {
                    output.push_str(&format!(" PUBLIC \"{}\"", public_id));
                    if let Some(system_id) = system_id {
                        output.push_str(&format!(" \"{}\"", system_id));
                    }
                }
                (None, Some(system_id)) => output.push_str(&format!(" SYSTEM \"{}\"", system_id)),
                (None, None) => {}
            }
            output.push('>');
        }
        MarkupToken::StartTag(tag) => {
            output.push('<');
            output.push_str(&tag.name);
            for attr in &tag.attrs {
                output.push(' ');
                output.push_str(&attr.name);
                output.push('=');
                if is_unescaped_attribute(&attr.name) {
                    write_raw_attribute_value(output, &attr.value);
                } else {
                    output.push('"');
                    escape_into(output, &attr.value, true);
                    output.push('"');
                }
            }
            output.push_str(if tag.self_closing { "/>" } else { ">" });
        }
        MarkupToken::EndTag(name) => {
            output.push_str("</");
            output.push_str(name);
            output.push('>');
        }
        MarkupToken::Text(text) => escape_into(output, text, false),
        MarkupToken::RawText { data, .. } => output.push_str(data),
        MarkupToken::Comment(comment) => {
            output.push_str("<!--");
            output.push_str(comment);
            output.push_str("-->");
        }
    }
}

fn write_raw_attribute_value(output: &mut String, value: &str) {
    match (value.contains('"'), value.contains('\'')) {
        (true, false) => {
            output.push('\'');
            output.push_str(value);
            output.push('\'');
        }
        (true, true) => {
            output.push('"');
            output.push_str(&value.replace('"', "&quot;"));
            output.push('"');
        }
        _ => {
            output.push('"');
            output.push_str(value);
            output.push('"');
        }
    }
}

fn escape_into(output: &mut String, text: &str, in_attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' if in_attribute => output.push_str("&quot;"),
            '\r' => output.push_str("&#13;"),
            c => output.push(c),
        }
    }
}
