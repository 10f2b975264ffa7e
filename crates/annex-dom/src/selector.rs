//! # Selectors
//!
//! Parsing and matching for the selector subset used by delegation and
//! `query_selector_all`:
//!
//! - type (`div`), universal (`*`), id (`#main`), class (`.btn`)
//! - attribute presence and equality (`[href]`, `[type=submit]`, `[data-x="a b"]`)
//! - descendant (` `) and child (`>`) combinators
//! - selector lists (`a, .btn`)

use std::rc::Rc;

use crate::{DomError, Node};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrSelector {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    /// `None` for `*` or when no type selector was given.
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

impl Compound {
    fn matches(&self, node: &Node) -> bool {
        let Some(tag) = node.tag_name() else {
            return false;
        };
        if let Some(ref want) = self.tag {
            if !tag.eq_ignore_ascii_case(want) {
                return false;
            }
        }
        if let Some(ref id) = self.id {
            if node.get_attribute("id").as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| node.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|attr| match attr {
            AttrSelector::Exists(name) => node.has_attribute(name),
            AttrSelector::Equals(name, value) => {
                node.get_attribute(name).as_deref() == Some(value.as_str())
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// Compounds left to right; `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<Compound>,
    combinators: Vec<Combinator>,
}

impl ComplexSelector {
    fn matches(&self, node: &Rc<Node>) -> bool {
        self.matches_at(node, self.compounds.len() - 1)
    }

    fn matches_at(&self, node: &Rc<Node>, index: usize) -> bool {
        if !self.compounds[index].matches(node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match self.combinators[index - 1] {
            Combinator::Child => node
                .parent()
                .map(|parent| self.matches_at(&parent, index - 1))
                .unwrap_or(false),
            Combinator::Descendant => node
                .ancestors()
                .iter()
                .any(|ancestor| self.matches_at(ancestor, index - 1)),
        }
    }
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    /// Parse a selector list.
    pub fn parse(input: &str) -> Result<Self, DomError> {
        let selectors = split_top_level(input)
            .into_iter()
            .map(|part| Parser::new(input, part).parse_complex())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    /// Whether any selector in the list matches `node`.
    pub fn matches(&self, node: &Rc<Node>) -> bool {
        self.selectors.iter().any(|s| s.matches(node))
    }
}

/// Split on commas that are not inside brackets or quotes.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

struct Parser<'a> {
    /// Whole selector text, for error messages.
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, part: &str) -> Self {
        Self {
            source,
            chars: part.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DomError {
        DomError::InvalidSelector {
            selector: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, DomError> {
        if self.chars.is_empty() {
            return Err(self.error("empty selector"));
        }
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        while self.pos < self.chars.len() {
            let saw_space = self.skip_whitespace();
            let combinator = if self.peek() == Some('>') {
                self.pos += 1;
                self.skip_whitespace();
                Combinator::Child
            } else if saw_space {
                Combinator::Descendant
            } else {
                return Err(self.error(format!("unexpected character at {}", self.pos)));
            };
            if self.peek().is_none() {
                return Err(self.error("dangling combinator"));
            }
            combinators.push(combinator);
            compounds.push(self.parse_compound()?);
        }

        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, DomError> {
        let mut compound = Compound::default();
        let start = self.pos;

        if self.peek() == Some('*') {
            self.pos += 1;
        } else if self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error(format!("expected a simple selector at {}", self.pos)));
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, DomError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("expected identifier at {}", self.pos)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attr(&mut self) -> Result<AttrSelector, DomError> {
        self.skip_whitespace();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let selector = match self.peek() {
            Some(']') => AttrSelector::Exists(name),
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = match self.peek() {
                    Some(q @ ('"' | '\'')) => {
                        self.pos += 1;
                        let start = self.pos;
                        while self.peek().is_some_and(|c| c != q) {
                            self.pos += 1;
                        }
                        if self.peek().is_none() {
                            return Err(self.error("unterminated string"));
                        }
                        let value: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        value
                    }
                    _ => self.parse_ident()?,
                };
                self.skip_whitespace();
                AttrSelector::Equals(name, value)
            }
            _ => return Err(self.error("expected ']' or '='")),
        };
        if self.peek() != Some(']') {
            return Err(self.error("unterminated attribute selector"));
        }
        self.pos += 1;
        Ok(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Rc<Node>, Rc<Node>, Rc<Node>) {
        let form = Node::element("form", &[("id", "signup")]);
        let row = Node::element("div", &[("class", "row wide")]);
        let button = Node::element("button", &[("type", "submit"), ("class", "btn")]);
        form.append_child(row.clone()).unwrap();
        row.append_child(button.clone()).unwrap();
        (form, row, button)
    }

    #[test]
    fn test_simple_selectors() {
        let (form, row, button) = tree();
        assert!(SelectorList::parse("form").unwrap().matches(&form));
        assert!(SelectorList::parse("#signup").unwrap().matches(&form));
        assert!(SelectorList::parse(".row.wide").unwrap().matches(&row));
        assert!(!SelectorList::parse(".row.narrow").unwrap().matches(&row));
        assert!(SelectorList::parse("*").unwrap().matches(&button));
        assert!(SelectorList::parse("BUTTON").unwrap().matches(&button));
    }

    #[test]
    fn test_attribute_selectors() {
        let (_, _, button) = tree();
        assert!(SelectorList::parse("[type]").unwrap().matches(&button));
        assert!(SelectorList::parse("[type=submit]").unwrap().matches(&button));
        assert!(SelectorList::parse("button[type='submit']").unwrap().matches(&button));
        assert!(!SelectorList::parse("[type=reset]").unwrap().matches(&button));
    }

    #[test]
    fn test_combinators() {
        let (_form, row, button) = tree();
        assert!(SelectorList::parse("form button").unwrap().matches(&button));
        assert!(SelectorList::parse("form > .row > .btn").unwrap().matches(&button));
        assert!(!SelectorList::parse("form > .btn").unwrap().matches(&button));
        assert!(SelectorList::parse("#signup .row").unwrap().matches(&row));
    }

    #[test]
    fn test_selector_lists() {
        let (form, _, button) = tree();
        let list = SelectorList::parse("table, .btn").unwrap();
        assert!(list.matches(&button));
        assert!(!list.matches(&form));
    }

    #[test]
    fn test_invalid_selectors() {
        for bad in ["", "   ", "a,", ".", "#", "[x", "[x=", "div >", "a ! b", "[x='open]"] {
            assert!(
                matches!(
                    SelectorList::parse(bad),
                    Err(DomError::InvalidSelector { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_non_elements_never_match() {
        let text = Node::new(crate::NodeType::Text("hi".into()));
        assert!(!SelectorList::parse("*").unwrap().matches(&text));
    }
}
