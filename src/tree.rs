//! Immutable syntax-tree model consumed by the differ and merger.
//!
//! Trees are built from shared "green" data: interior nodes, tokens, and
//! trivia are allocated once behind `Arc` and reused wholesale by every
//! revision that leaves them untouched. Identity is the address of that
//! shared allocation ([`NodeKey`]), so an identity hit is an O(1) proof
//! that two subtrees are equal down to their trivia — the fast
//! "unchanged" test both algorithms lean on.
//!
//! The model is language-agnostic: kinds are raw [`SyntaxKind`] tags the
//! host maps its grammar onto, and the only non-structural node property
//! is an optional `label` (e.g. a bound name) that the merger reconciles
//! separately from tree shape. Zero-length elements are structurally
//! invisible: [`NodeOrToken::children`] filters them out of traversal.

use std::fmt;
use std::sync::Arc;

/// Raw syntax-kind tag. Hosts map their own grammar's kinds onto it and
/// should keep node kinds and token kinds in disjoint ranges — kind
/// equality is the differ's "similar" test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntaxKind(pub u16);

/// Half-open byte range over a document, trivia included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub len: usize,
}

impl TextSpan {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Strict overlap; ranges that merely touch do not overlap.
    pub fn overlaps(&self, other: &TextSpan) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end())
    }
}

/// Identity of a shared green allocation. Equal keys imply equal subtrees:
/// same kind, same text, same trivia, same descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

impl NodeKey {
    pub(crate) fn of_trivia(trivia: &Arc<GreenTrivia>) -> NodeKey {
        NodeKey(Arc::as_ptr(trivia) as usize)
    }
}

/// Non-semantic text attached to a token edge (whitespace, comments).
#[derive(Debug)]
pub struct GreenTrivia {
    kind: SyntaxKind,
    text: String,
}

impl GreenTrivia {
    pub fn kind(&self) -> SyntaxKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Leaf token: main text plus leading/trailing trivia.
#[derive(Debug)]
pub struct GreenToken {
    kind: SyntaxKind,
    text: String,
    leading: Vec<Arc<GreenTrivia>>,
    trailing: Vec<Arc<GreenTrivia>>,
    full_len: usize,
}

/// Interior node: a kind, an optional label, and an ordered child list.
#[derive(Debug)]
pub struct GreenNode {
    kind: SyntaxKind,
    label: Option<String>,
    children: Vec<GreenElement>,
    full_len: usize,
}

/// A shared tree element: interior node or leaf token.
#[derive(Debug, Clone)]
pub enum GreenElement {
    Node(Arc<GreenNode>),
    Token(Arc<GreenToken>),
}

/// Build an interior node from child elements.
pub fn node(kind: SyntaxKind, children: Vec<GreenElement>) -> GreenElement {
    let full_len = children.iter().map(GreenElement::full_len).sum();
    GreenElement::Node(Arc::new(GreenNode {
        kind,
        label: None,
        children,
        full_len,
    }))
}

/// Build an interior node carrying a non-structural label (e.g. the name a
/// declaration binds).
pub fn labeled_node(
    kind: SyntaxKind,
    label: impl Into<String>,
    children: Vec<GreenElement>,
) -> GreenElement {
    let full_len = children.iter().map(GreenElement::full_len).sum();
    GreenElement::Node(Arc::new(GreenNode {
        kind,
        label: Some(label.into()),
        children,
        full_len,
    }))
}

/// Build a bare token with no trivia.
pub fn token(kind: SyntaxKind, text: impl Into<String>) -> GreenElement {
    token_with_trivia(kind, text, Vec::new(), Vec::new())
}

/// Build a token with leading and trailing trivia.
pub fn token_with_trivia(
    kind: SyntaxKind,
    text: impl Into<String>,
    leading: Vec<Arc<GreenTrivia>>,
    trailing: Vec<Arc<GreenTrivia>>,
) -> GreenElement {
    let text = text.into();
    let full_len = leading.iter().map(|t| t.len()).sum::<usize>()
        + text.len()
        + trailing.iter().map(|t| t.len()).sum::<usize>();
    GreenElement::Token(Arc::new(GreenToken {
        kind,
        text,
        leading,
        trailing,
        full_len,
    }))
}

/// Build a trivia piece, shareable between any number of tokens.
pub fn trivia(kind: SyntaxKind, text: impl Into<String>) -> Arc<GreenTrivia> {
    Arc::new(GreenTrivia {
        kind,
        text: text.into(),
    })
}

impl GreenElement {
    pub fn kind(&self) -> SyntaxKind {
        match self {
            GreenElement::Node(n) => n.kind,
            GreenElement::Token(t) => t.kind,
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, GreenElement::Token(_))
    }

    /// Length in bytes, trivia included.
    pub fn full_len(&self) -> usize {
        match self {
            GreenElement::Node(n) => n.full_len,
            GreenElement::Token(t) => t.full_len,
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            GreenElement::Node(n) => NodeKey(Arc::as_ptr(n) as usize),
            GreenElement::Token(t) => NodeKey(Arc::as_ptr(t) as usize),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            GreenElement::Node(n) => n.label.as_deref(),
            GreenElement::Token(_) => None,
        }
    }

    /// Raw child elements, zero-length ones included.
    pub(crate) fn green_children(&self) -> &[GreenElement] {
        match self {
            GreenElement::Node(n) => &n.children,
            GreenElement::Token(_) => &[],
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        match self {
            GreenElement::Node(n) => {
                for child in &n.children {
                    child.write_text(out);
                }
            }
            GreenElement::Token(t) => {
                for tr in &t.leading {
                    out.push_str(&tr.text);
                }
                out.push_str(&t.text);
                for tr in &t.trailing {
                    out.push_str(&tr.text);
                }
            }
        }
    }

    /// Render the full text, trivia included.
    pub fn full_text(&self) -> String {
        let mut out = String::with_capacity(self.full_len());
        self.write_text(&mut out);
        out
    }

    /// Deep content comparison: same kind, text, trivia, labels, and
    /// children. Shared identity short-circuits.
    pub fn structurally_equal(&self, other: &GreenElement) -> bool {
        if self.key() == other.key() {
            return true;
        }
        if self.kind() != other.kind() || self.full_len() != other.full_len() {
            return false;
        }
        match (self, other) {
            (GreenElement::Token(a), GreenElement::Token(b)) => {
                a.text == b.text
                    && trivia_eq(&a.leading, &b.leading)
                    && trivia_eq(&a.trailing, &b.trailing)
            }
            (GreenElement::Node(a), GreenElement::Node(b)) => {
                a.label == b.label
                    && a.children.len() == b.children.len()
                    && a.children
                        .iter()
                        .zip(&b.children)
                        .all(|(x, y)| x.structurally_equal(y))
            }
            _ => false,
        }
    }
}

fn trivia_eq(a: &[Arc<GreenTrivia>], b: &[Arc<GreenTrivia>]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.kind == y.kind && x.text == y.text)
}

/// A positioned view of a green element inside one particular tree.
///
/// Cheap to clone: an `Arc` handle plus an absolute byte offset.
#[derive(Debug, Clone)]
pub struct NodeOrToken {
    green: GreenElement,
    position: usize,
}

impl NodeOrToken {
    pub fn kind(&self) -> SyntaxKind {
        self.green.kind()
    }

    pub fn is_token(&self) -> bool {
        self.green.is_token()
    }

    pub fn is_node(&self) -> bool {
        !self.is_token()
    }

    /// Absolute start offset in this tree's document.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn full_len(&self) -> usize {
        self.green.full_len()
    }

    pub fn full_span(&self) -> TextSpan {
        TextSpan::new(self.position, self.green.full_len())
    }

    pub fn key(&self) -> NodeKey {
        self.green.key()
    }

    pub fn green(&self) -> &GreenElement {
        &self.green
    }

    pub fn label(&self) -> Option<&str> {
        self.green.label()
    }

    /// Main text of a token, trivia excluded. `None` for interior nodes.
    pub fn token_text(&self) -> Option<&str> {
        match &self.green {
            GreenElement::Token(t) => Some(&t.text),
            GreenElement::Node(_) => None,
        }
    }

    pub fn leading_trivia(&self) -> &[Arc<GreenTrivia>] {
        match &self.green {
            GreenElement::Token(t) => &t.leading,
            GreenElement::Node(_) => &[],
        }
    }

    pub fn trailing_trivia(&self) -> &[Arc<GreenTrivia>] {
        match &self.green {
            GreenElement::Token(t) => &t.trailing,
            GreenElement::Node(_) => &[],
        }
    }

    /// Ordered children with absolute positions. Zero-length children are
    /// structurally invisible and skipped.
    pub fn children(&self) -> impl Iterator<Item = NodeOrToken> + '_ {
        let mut pos = self.position;
        self.green.green_children().iter().filter_map(move |g| {
            let start = pos;
            pos += g.full_len();
            (g.full_len() > 0).then(|| NodeOrToken {
                green: g.clone(),
                position: start,
            })
        })
    }

    pub(crate) fn write_full_text(&self, out: &mut String) {
        self.green.write_text(out);
    }

    /// Render the full text of this subtree, trivia included.
    pub fn full_text(&self) -> String {
        self.green.full_text()
    }
}

impl fmt::Display for NodeOrToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_text())
    }
}

/// An immutable tree: a root element viewed at offset zero.
///
/// Revisions of the same document are expected to share green elements for
/// unchanged subtrees; that sharing is what gives the differ its identity
/// fast path and the merger its untouched-node selection.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    root: GreenElement,
}

impl SyntaxTree {
    pub fn new(root: GreenElement) -> Self {
        Self { root }
    }

    pub fn root(&self) -> NodeOrToken {
        NodeOrToken {
            green: self.root.clone(),
            position: 0,
        }
    }

    pub fn root_green(&self) -> &GreenElement {
        &self.root
    }

    pub fn key(&self) -> NodeKey {
        self.root.key()
    }

    pub fn full_len(&self) -> usize {
        self.root.full_len()
    }

    /// Identity comparison: a shared root implies identical contents.
    pub fn same_root(&self, other: &SyntaxTree) -> bool {
        self.key() == other.key()
    }

    /// Render the document text.
    pub fn text(&self) -> String {
        self.root.full_text()
    }
}

impl fmt::Display for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: SyntaxKind = SyntaxKind(0);
    const WORD: SyntaxKind = SyntaxKind(1);
    const WS: SyntaxKind = SyntaxKind(2);

    #[test]
    fn token_full_len_includes_trivia() {
        let tok = token_with_trivia(WORD, "let", vec![trivia(WS, "  ")], vec![trivia(WS, " ")]);
        assert_eq!(tok.full_len(), 6);
        assert_eq!(tok.full_text(), "  let ");
    }

    #[test]
    fn children_positions_are_cumulative() {
        let root = node(FILE, vec![token(WORD, "ab"), token(WORD, "cde")]);
        let tree = SyntaxTree::new(root);
        let children: Vec<_> = tree.root().children().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].full_span(), TextSpan::new(0, 2));
        assert_eq!(children[1].full_span(), TextSpan::new(2, 3));
    }

    #[test]
    fn zero_length_children_are_invisible_but_positions_hold() {
        let root = node(
            FILE,
            vec![token(WORD, "a"), token(WORD, ""), token(WORD, "b")],
        );
        let tree = SyntaxTree::new(root);
        let children: Vec<_> = tree.root().children().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].position(), 1);
        assert_eq!(tree.text(), "ab");
    }

    #[test]
    fn shared_greens_have_equal_keys() {
        let shared = token(WORD, "same");
        let a = node(FILE, vec![shared.clone()]);
        let b = node(FILE, vec![shared]);
        let ka: Vec<_> = SyntaxTree::new(a).root().children().map(|c| c.key()).collect();
        let kb: Vec<_> = SyntaxTree::new(b).root().children().map(|c| c.key()).collect();
        assert_eq!(ka, kb);
    }

    #[test]
    fn distinct_greens_differ_by_key_but_can_be_structurally_equal() {
        let a = token(WORD, "x");
        let b = token(WORD, "x");
        assert_ne!(a.key(), b.key());
        assert!(a.structurally_equal(&b));
        assert!(!a.structurally_equal(&token(WORD, "y")));
    }

    #[test]
    fn labels_participate_in_structural_equality() {
        let a = labeled_node(FILE, "f", vec![token(WORD, "x")]);
        let b = labeled_node(FILE, "f", vec![token(WORD, "x")]);
        let c = labeled_node(FILE, "g", vec![token(WORD, "x")]);
        assert!(a.structurally_equal(&b));
        assert!(!a.structurally_equal(&c));
        assert_eq!(a.label(), Some("f"));
    }
}
