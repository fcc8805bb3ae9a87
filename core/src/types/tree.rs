//! Tree structure of a litua text document.

use std::collections::HashMap;
use std::fmt::{self, Display};

/// Argument key under which the whitespace between a call name (or its
/// last argument group) and its content is preserved.
pub const META_WHITESPACE: &str = "=whitespace";
/// Argument key under which the whitespace in front of a raw string
/// terminator is preserved.
pub const META_WHITESPACE_AFTER: &str = "=whitespace-after";

/// Reserved call name reducing to a literal `{`.
pub const CALL_LEFT_BRACE: &str = "left-curly-brace";
/// Reserved call name reducing to a literal `}`.
pub const CALL_RIGHT_BRACE: &str = "right-curly-brace";

/* -------------------- *
 *       ELEMENT        *
 * -------------------- */
/// Represents one child slot of a node: either literal text or a
/// nested call. Modifier hooks may turn a call into text in place,
/// so both variants must live in the same sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text(String),
    Call(Node),
}

impl Element {
    /// Text projection of this element, see [`Node::totext`].
    #[must_use]
    pub fn totext(&self) -> String {
        match self {
            Element::Text(text) => text.clone(),
            Element::Call(node) => node.totext(),
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Element::Text(text) => f.write_str(text),
            Element::Call(node) => node.fmt(f),
        }
    }
}

/* -------------------- *
 *     STRING FORM      *
 * -------------------- */
/// How a node renders itself as a string.
///
/// `Markup` reproduces the call syntax so that the output lexes back to
/// an equivalent node. `Bare` concatenates the string forms of the
/// children only; the synthetic `document` root is the one node created
/// with it, which is why transformed output carries no outer
/// `{document ...}` wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringForm {
    #[default]
    Markup,
    Bare,
}

/* -------------------- *
 *         NODE         *
 * -------------------- */
/// A function call in the text document. For example
/// `{text[style=bold] message}` is a node with call `text`, the key
/// `style` mapped to the text element `bold` in `args` and the text
/// element `message` as `content`.
///
/// Raw strings are nodes too: their call is a run of 1 to 126 `<`
/// characters and their content is the single verbatim body.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The call name of the node.
    pub call: String,
    /// Keyword arguments; every key maps to the ordered sequence of
    /// elements collected from its `[key=value]` groups. Keys starting
    /// with `=` are reserved for the lexer and parser.
    pub args: HashMap<String, Vec<Element>>,
    /// The ordered children of the node.
    pub content: Vec<Element>,
    /// Per-instance override of the string form.
    pub form: StringForm,
}

impl Node {
    /// Creates an empty node with the given call name.
    #[must_use]
    pub fn new(call: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            args: HashMap::new(),
            content: Vec::new(),
            form: StringForm::Markup,
        }
    }

    /// Creates the synthetic `document` root around the parsed
    /// top-level sequence. Its args stay empty and its string form is
    /// the bare concatenation of its children.
    #[must_use]
    pub fn document(content: Vec<Element>) -> Self {
        Self {
            call: "document".to_owned(),
            args: HashMap::new(),
            content,
            form: StringForm::Bare,
        }
    }

    /// Creates a raw string node of the given delimiter depth. The body
    /// keeps its boundary whitespace; the first and last scalar are
    /// additionally recorded under the whitespace meta keys.
    #[must_use]
    pub fn raw(depth: u8, body: &str) -> Self {
        let mut node = Self::new("<".repeat(usize::from(depth)));

        if let Some(first) = body.chars().next() {
            node.args.insert(META_WHITESPACE.to_owned(), vec![Element::Text(first.to_string())]);
        }
        if let Some(last) = body.chars().next_back() {
            node.args
                .insert(META_WHITESPACE_AFTER.to_owned(), vec![Element::Text(last.to_string())]);
        }

        node.content.push(Element::Text(body.to_owned()));
        node
    }

    /// Checks whether this node is the internal raw string form.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        !self.call.is_empty() && self.call.bytes().all(|byte| byte == b'<')
    }

    /// Checks a call name against the grammar: non-empty, containing
    /// none of `{`, `}`, `[`, `<`, `=` or whitespace — except the
    /// internal raw string form, a run of 1 to 126 `<` characters.
    #[must_use]
    pub fn is_valid_call(name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        if name.bytes().all(|byte| byte == b'<') {
            return name.len() <= 126;
        }

        !name
            .chars()
            .any(|chr| chr.is_whitespace() || matches!(chr, '{' | '}' | '[' | '<' | '='))
    }

    /// Returns the argument keys in lexicographic order. Every place
    /// where argument iteration is observable goes through this.
    #[must_use]
    pub fn sorted_arg_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.args.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Concatenated text stored under a meta key, if present.
    #[must_use]
    pub fn meta_text(&self, key: &str) -> Option<String> {
        let elements = self.args.get(key)?;
        let mut text = String::new();

        for element in elements {
            if let Element::Text(part) = element {
                text.push_str(part);
            }
        }

        Some(text)
    }

    /// Text projection: the concatenation of all text in `content`,
    /// recursive through child nodes. Call names, arguments and the
    /// whitespace meta values are discarded.
    #[must_use]
    pub fn totext(&self) -> String {
        let mut text = String::new();

        for element in &self.content {
            text.push_str(&element.totext());
        }

        text
    }
}

impl Display for Node {
    /// Identity serialization: the rendered string lexes back to an
    /// equivalent node. Argument keys are emitted sorted, one group per
    /// key with the value elements in order; repeated source groups for
    /// one key therefore fold into a single group on reserialization.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.form == StringForm::Bare {
            for element in &self.content {
                element.fmt(f)?;
            }
            return Ok(());
        }

        write!(f, "{{{}", self.call)?;

        if self.is_raw() {
            for element in &self.content {
                element.fmt(f)?;
            }
            return write!(f, "{}}}", ">".repeat(self.call.len()));
        }

        for key in self.sorted_arg_keys() {
            if key.starts_with('=') {
                continue;
            }

            write!(f, "[{key}=")?;
            for element in &self.args[&key] {
                element.fmt(f)?;
            }
            write!(f, "]")?;
        }

        match self.meta_text(META_WHITESPACE) {
            Some(separator) => f.write_str(&separator)?,
            // a hook built the node without a recorded separator
            None if !self.content.is_empty() => f.write_str(" ")?,
            None => {}
        }

        for element in &self.content {
            element.fmt(f)?;
        }

        if let Some(trailing) = self.meta_text(META_WHITESPACE_AFTER) {
            f.write_str(&trailing)?;
        }

        write!(f, "}}")
    }
}
