use std::fmt;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the tmux session created when `--session-name` is not given.
pub const DEFAULT_SESSION_NAME: &str = "bosh-ssh";

/// One running instance of a deployment, as reported by the director.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    /// Instance group (job) name, e.g. `web`.
    pub group: String,
    /// Instance id, a UUID on modern directors or an index on old ones.
    pub id: String,
}

impl Instance {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Instance { group: group.into(), id: id.into() }
    }

    /// The `group/id` string used for filtering and as the `bosh ssh` target.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.group, self.id)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.id)
    }
}

/// Split direction, in tmux terms: `Vertical` stacks the new pane below,
/// `Horizontal` places it to the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind { Horizontal, Vertical }

impl LayoutKind {
    pub fn split_flag(self) -> &'static str {
        match self {
            LayoutKind::Horizontal => "-h",
            LayoutKind::Vertical => "-v",
        }
    }
}

/// Target grid shape for a pane session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub rows: usize,
    pub columns: usize,
}

impl Layout {
    pub const fn new(rows: usize, columns: usize) -> Self {
        Layout { rows, columns }
    }

    pub fn capacity(&self) -> usize {
        self.rows * self.columns
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.columns)
    }
}
