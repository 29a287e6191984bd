//! Board editor.
//!
//! Click-driven tools that mutate a [`CellGraph`] while the board is in
//! edit mode. Every successful mutation is recorded as an [`EditCommand`]
//! keyed by positions, so undo and redo survive cell ids being reissued.

use serde::{Serialize, Deserialize};

use super::cell::{is_neighbor, neighbors4, CellId, CellKind, Pos};
use super::graph::{CellGraph, GraphError};

/// Active editor tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    /// Place a new cell of this kind on an empty position.
    Create(CellKind),
    /// Two clicks: source, then target.
    Link,
    /// Two clicks: source, then target.
    Unlink,
    /// Remove the clicked cell with all its links.
    Delete,
}

impl Default for Tool {
    fn default() -> Self {
        Tool::Create(CellKind::Standard)
    }
}

/// Links made automatically around a created cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoLink {
    /// New cell links to each existing neighbour.
    pub outgoing: bool,
    /// Each existing neighbour links to the new cell.
    pub incoming: bool,
}

impl AutoLink {
    /// Both directions.
    pub const BOTH: Self = Self { outgoing: true, incoming: true };
}

/// A reversible edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditCommand {
    /// Cell created, with the edges made alongside it.
    Create {
        /// Cell position.
        pos: Pos,
        /// Cell variant.
        kind: CellKind,
        /// Edges as `(from, to)` positions.
        links: Vec<(Pos, Pos)>,
    },
    /// Cell deleted, with every edge it touched.
    Delete {
        /// Cell position.
        pos: Pos,
        /// Cell variant.
        kind: CellKind,
        /// Edges as `(from, to)` positions.
        links: Vec<(Pos, Pos)>,
    },
    /// One edge added.
    Link {
        /// Source.
        from: Pos,
        /// Target.
        to: Pos,
    },
    /// One edge removed.
    Unlink {
        /// Source.
        from: Pos,
        /// Target.
        to: Pos,
    },
}

/// Result of an editor click.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Click had no effect.
    Nothing,
    /// First click of a two-click tool.
    Selected(Pos),
    /// Graph changed.
    Applied(EditCommand),
}

/// Editor state: tool, pending selection, history.
#[derive(Clone, Debug)]
pub struct Editor {
    tool: Tool,
    auto_link: AutoLink,
    only_neighboring: bool,
    selected: Option<Pos>,
    done: Vec<EditCommand>,
    undone: Vec<EditCommand>,
}

impl Default for Editor {
    fn default() -> Self {
        Self {
            tool: Tool::default(),
            auto_link: AutoLink::BOTH,
            only_neighboring: true,
            selected: None,
            done: Vec::new(),
            undone: Vec::new(),
        }
    }
}

impl Editor {
    /// Editor with the standard-cell tool and two-way auto-link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tool.
    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switch tool. Drops any pending selection.
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.selected = None;
    }

    /// Auto-link flags.
    pub fn auto_link(&self) -> AutoLink {
        self.auto_link
    }

    /// Set auto-link flags.
    pub fn set_auto_link(&mut self, auto_link: AutoLink) {
        self.auto_link = auto_link;
    }

    /// Restrict link tools to orthogonal neighbours.
    pub fn set_only_neighboring(&mut self, only: bool) {
        self.only_neighboring = only;
    }

    /// Pending first click of a two-click tool.
    pub fn selected(&self) -> Option<Pos> {
        self.selected
    }

    /// Number of commands that can be undone.
    pub fn history_len(&self) -> usize {
        self.done.len()
    }

    /// Forget history and selection.
    pub fn reset(&mut self) {
        self.selected = None;
        self.done.clear();
        self.undone.clear();
    }

    /// Apply the current tool at `pos`.
    pub fn click(&mut self, graph: &mut CellGraph, pos: Pos) -> Result<EditOutcome, GraphError> {
        let command = match self.tool {
            Tool::Create(kind) => {
                if graph.id_at(pos).is_some() {
                    return Ok(EditOutcome::Nothing);
                }
                self.create(graph, pos, kind)?
            }
            Tool::Delete => {
                if graph.id_at(pos).is_none() {
                    return Ok(EditOutcome::Nothing);
                }
                self.delete(graph, pos)?
            }
            Tool::Link | Tool::Unlink => {
                if graph.id_at(pos).is_none() {
                    return Ok(EditOutcome::Nothing);
                }
                let Some(from) = self.selected else {
                    self.selected = Some(pos);
                    return Ok(EditOutcome::Selected(pos));
                };
                if from == pos || (self.only_neighboring && !is_neighbor(from, pos)) {
                    return Ok(EditOutcome::Nothing);
                }
                let command = if self.tool == Tool::Link {
                    EditCommand::Link { from, to: pos }
                } else {
                    EditCommand::Unlink { from, to: pos }
                };
                apply(graph, &command)?;
                self.selected = None;
                command
            }
        };
        self.done.push(command.clone());
        self.undone.clear();
        Ok(EditOutcome::Applied(command))
    }

    fn create(&self, graph: &mut CellGraph, pos: Pos, kind: CellKind) -> Result<EditCommand, GraphError> {
        let id = graph.insert(pos, kind)?;
        let mut links = Vec::new();
        for n in neighbors4(pos) {
            let Some(other) = graph.id_at(n) else {
                continue;
            };
            if self.auto_link.outgoing && graph.link(id, other).is_ok() {
                links.push((pos, n));
            }
            if self.auto_link.incoming && graph.link(other, id).is_ok() {
                links.push((n, pos));
            }
        }
        Ok(EditCommand::Create { pos, kind, links })
    }

    fn delete(&self, graph: &mut CellGraph, pos: Pos) -> Result<EditCommand, GraphError> {
        let id = graph.id_at(pos).ok_or(GraphError::EmptyPosition(pos))?;
        let links = touching(graph, pos);
        let model = graph.delete(id)?;
        Ok(EditCommand::Delete { pos, kind: model.kind, links })
    }

    /// Revert the last command. Returns it, or `None` with empty history.
    pub fn undo(&mut self, graph: &mut CellGraph) -> Result<Option<EditCommand>, GraphError> {
        let Some(command) = self.done.pop() else {
            return Ok(None);
        };
        apply(graph, &inverse(&command))?;
        self.selected = None;
        self.undone.push(command.clone());
        Ok(Some(command))
    }

    /// Reapply the last undone command.
    pub fn redo(&mut self, graph: &mut CellGraph) -> Result<Option<EditCommand>, GraphError> {
        let Some(command) = self.undone.pop() else {
            return Ok(None);
        };
        apply(graph, &command)?;
        self.selected = None;
        self.done.push(command.clone());
        Ok(Some(command))
    }
}

/// Every edge with `pos` at either end, once per multiplicity.
fn touching(graph: &CellGraph, pos: Pos) -> Vec<(Pos, Pos)> {
    let position = |id: CellId| graph.get(id).map(|c| c.pos);
    graph
        .edges()
        .into_iter()
        .filter_map(|(a, b)| Some((position(a)?, position(b)?)))
        .filter(|(a, b)| *a == pos || *b == pos)
        .collect()
}

fn inverse(command: &EditCommand) -> EditCommand {
    match command.clone() {
        EditCommand::Create { pos, kind, links } => EditCommand::Delete { pos, kind, links },
        EditCommand::Delete { pos, kind, links } => EditCommand::Create { pos, kind, links },
        EditCommand::Link { from, to } => EditCommand::Unlink { from, to },
        EditCommand::Unlink { from, to } => EditCommand::Link { from, to },
    }
}

fn id(graph: &CellGraph, pos: Pos) -> Result<CellId, GraphError> {
    graph.id_at(pos).ok_or(GraphError::EmptyPosition(pos))
}

/// Replay a command against the graph.
fn apply(graph: &mut CellGraph, command: &EditCommand) -> Result<(), GraphError> {
    match command {
        EditCommand::Create { pos, kind, links } => {
            graph.insert(*pos, *kind)?;
            for (a, b) in links {
                graph.link(id(graph, *a)?, id(graph, *b)?)?;
            }
        }
        EditCommand::Delete { pos, .. } => {
            graph.delete(id(graph, *pos)?)?;
        }
        EditCommand::Link { from, to } => {
            graph.link(id(graph, *from)?, id(graph, *to)?)?;
        }
        EditCommand::Unlink { from, to } => {
            graph.unlink(id(graph, *from)?, id(graph, *to)?);
        }
    }
    Ok(())
}
