//! Configuration tree.
//!
//! A domain configuration is a nested list: every list starts with a
//! symbolic tag naming the node, followed by its children. Leaves are atoms
//! kept as text; numeric values are parsed on read.
//!
//! ```text
//! (vm (name vm1)
//!     (memory 64)
//!     (image (linux (kernel /boot/k)))
//!     (device (vif))
//!     (device (vbd (uname phy:sda1) (dev hda1))))
//! ```
//!
//! Serialized with serde the tree is untagged: atoms become strings and lists
//! become arrays (`["vm", ["name", "vm1"], ...]`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A node of the configuration tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Atom(String),
    List(Vec<Node>),
}

impl Node {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Create an atom.
    pub fn atom(value: impl ToString) -> Self {
        Node::Atom(value.to_string())
    }

    /// Create a tagged list with the given children.
    pub fn list(tag: impl Into<String>, children: impl IntoIterator<Item = Node>) -> Self {
        let mut items = vec![Node::Atom(tag.into())];
        items.extend(children);
        Node::List(items)
    }

    /// Create a tagged list with no children, e.g. `(vif)`.
    pub fn tag(tag: impl Into<String>) -> Self {
        Node::List(vec![Node::Atom(tag.into())])
    }

    /// Create a `(tag value)` pair.
    pub fn field(tag: impl Into<String>, value: impl ToString) -> Self {
        Node::List(vec![Node::Atom(tag.into()), Node::atom(value)])
    }

    /// Append a child and return self (builder style).
    pub fn with(mut self, child: Node) -> Self {
        self.push(child);
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Atom text, `None` for lists.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Node::Atom(value) => Some(value),
            Node::List(_) => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Node::List(_))
    }

    /// Tag of a list node, `None` for atoms, empty lists and untagged lists.
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::List(items) => items.first().and_then(Node::as_atom),
            Node::Atom(_) => None,
        }
    }

    /// Children of a list node (everything after the tag), in document order.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// Children whose tag is `tag`, in document order.
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children()
            .iter()
            .filter(move |child| child.name() == Some(tag))
    }

    /// First child.
    pub fn child0(&self) -> Option<&Node> {
        self.children().first()
    }

    /// First child tagged `tag`.
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.name() == Some(tag))
    }

    /// Value of the child tagged `tag`, i.e. the first element after its tag.
    ///
    /// For `(vm (memory 64))`, `child_value("memory")` is the atom `64`.
    pub fn child_value(&self, tag: &str) -> Option<&Node> {
        self.child(tag).and_then(Node::child0)
    }

    /// Atom value of the child tagged `tag`.
    pub fn child_str(&self, tag: &str) -> Option<&str> {
        self.child_value(tag).and_then(Node::as_atom)
    }

    /// Atom value of the child tagged `tag`, or `default` when absent.
    pub fn child_str_or<'a>(&'a self, tag: &str, default: &'a str) -> &'a str {
        self.child_str(tag).unwrap_or(default)
    }

    /// Parse the atom value of the child tagged `tag`.
    ///
    /// Returns `None` when the child is absent, `Some(Err(raw))` when its
    /// value is not an atom or does not parse.
    pub fn child_parse<T: FromStr>(&self, tag: &str) -> Option<Result<T, String>> {
        let value = self.child_value(tag)?;
        Some(match value.as_atom() {
            Some(text) => text.trim().parse::<T>().map_err(|_| text.to_string()),
            None => Err(value.to_string()),
        })
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    /// Append a child to a list node. Atoms are left untouched.
    pub fn push(&mut self, child: Node) -> bool {
        match self {
            Node::List(items) => {
                items.push(child);
                true
            }
            Node::Atom(_) => false,
        }
    }

    /// Remove the first child equal to `child`. Returns whether one was removed.
    pub fn remove(&mut self, child: &Node) -> bool {
        let Node::List(items) = self else {
            return false;
        };
        match items.iter().skip(1).position(|item| item == child) {
            Some(pos) => {
                items.remove(pos + 1);
                true
            }
            None => false,
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Atom(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Atom(value)
    }
}

// ============================================================================
// S-EXPRESSION RENDERING
// ============================================================================

fn needs_quotes(atom: &str) -> bool {
    atom.is_empty()
        || atom
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\\' | '\''))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Atom(atom) if needs_quotes(atom) => {
                f.write_str("\"")?;
                for c in atom.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Node::Atom(atom) => f.write_str(atom),
            Node::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}
