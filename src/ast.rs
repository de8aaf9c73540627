/// Decides whether the right side of a sequence gets evaluated, given how
/// the left side ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `;` — the right side runs no matter what the left returned.
    Sequence,
    /// `&&` — the right side runs only after a zero status on the left.
    And,
    /// `||` — the right side runs only after a non-zero status on the left.
    Or,
}

/// Which standard descriptor a redirection rewires, and how the file opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    /// `< file` — stdin from file.
    In,
    /// `> file` — stdout to file, truncating.
    Out,
    /// `>> file` — stdout to file, appending.
    Append,
    /// `2> file` — stderr to file, truncating.
    Err,
    /// `&> file` — stdout and stderr to file, truncating.
    ErrOut,
}

/// A parsed command tree. The evaluator walks this read-only; binary
/// variants own both subtrees, unary variants own one.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Blank input. Evaluating it changes nothing, not even `$?`.
    Empty,
    /// A program invocation; `argv[0]` is the program name.
    Simple { argv: Vec<String> },
    /// `left ; right`, `left && right`, or `left || right`.
    Sequence {
        op: Connector,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `inner &` — evaluate without waiting.
    Background { inner: Box<Node> },
    /// `left | right`.
    Pipe { left: Box<Node>, right: Box<Node> },
    /// A redirection wrapping the command it applies to.
    Redirect {
        kind: RedirKind,
        path: String,
        inner: Box<Node>,
    },
}
