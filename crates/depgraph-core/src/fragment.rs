//! Last-writer tracking for object fragments.
//!
//! Each tracked object (`RefId`) has a table of per-fragment last writers plus
//! an optional whole-object (`Fragment::Complete`) writer:
//!
//! - a fragment read depends on that fragment's last writer, falling back to
//!   the whole-object writer when the fragment was not written since
//! - a complete read depends on the whole-object writer and every fragment
//!   writer
//! - a complete write drops every per-fragment entry of the object
//!
//! Objects loaded out of a fragment with `track = true` remember where they
//! came from (`state_refs`), so later reads through them also depend on the
//! writer of that slot.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use depgraph_types::{AccessMode, Fragment, FragmentAccess, NodeId, RefId};

use crate::brackets::Brackets;
use crate::context::CmdContext;
use crate::error::{DepGraphError, Result};

/// The slot an object reference was read from or written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefFrag {
    pub ref_id: RefId,
    pub fragment: Fragment,
}

/// Fragment accesses of the nodes of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentAccesses {
    pub by_node: BTreeMap<NodeId, Vec<FragmentAccess>>,
    /// Per node, the earlier nodes that first made an object it read visible,
    /// for reads no in-window write explains.
    pub init_cmd_nodes: BTreeMap<NodeId, Vec<NodeId>>,
}

impl FragmentAccesses {
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty() && self.init_cmd_nodes.is_empty()
    }

    /// Total number of access records.
    pub fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    fn push(&mut self, access: FragmentAccess) {
        self.by_node.entry(access.node).or_default().push(access);
    }

    fn add_init_node(&mut self, node: NodeId, init: NodeId) {
        let inits = self.init_cmd_nodes.entry(node).or_default();
        if !inits.contains(&init) {
            inits.push(init);
        }
    }
}

/// Receives fragment notifications for a sequence of commands.
pub trait FragmentTracker: Send {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()>;

    /// Close the command bracket and return the accesses of its nodes.
    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<FragmentAccesses>;

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    /// `owner.fragment` was read, yielding `value`. With `track`, later
    /// reads through `value` are attributed back to this slot.
    fn on_read_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        value: Option<RefId>,
        track: bool,
    ) -> Result<()>;

    /// `owner.fragment` was overwritten, replacing `old` with `new`.
    fn on_write_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        old: Option<RefId>,
        new: Option<RefId>,
        track: bool,
    ) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Tracked object references; only readable after [`close`](Self::close).
    fn state_refs(&self) -> Result<&HashMap<RefId, RefFrag>>;
}

#[derive(Debug, Default, Clone)]
struct ObjectWrites {
    complete: Option<NodeId>,
    fragments: HashMap<Fragment, NodeId>,
}

impl ObjectWrites {
    fn writers(&self, fragment: &Fragment, out: &mut Vec<NodeId>) {
        match fragment {
            Fragment::Complete => {
                out.extend(self.complete);
                out.extend(self.fragments.values().copied());
            }
            _ => out.extend(self.fragments.get(fragment).copied().or(self.complete)),
        }
    }

    fn record(&mut self, fragment: Fragment, node: NodeId) {
        if fragment.is_complete() {
            self.complete = Some(node);
            self.fragments.clear();
        } else {
            self.fragments.insert(fragment, node);
        }
    }
}

/// Synchronous fragment tracker.
#[derive(Debug, Default)]
pub struct FragmentWatcher {
    brackets: Brackets,
    last_writes: HashMap<RefId, ObjectWrites>,
    first_seen: HashMap<RefId, NodeId>,
    state_refs: HashMap<RefId, RefFrag>,
    pending: FragmentAccesses,
    closed: bool,
}

impl FragmentWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn writers(&self, owner: RefId, fragment: &Fragment) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(writes) = self.last_writes.get(&owner) {
            writes.writers(fragment, &mut out);
        }
        out
    }

    /// Writers of the slots `owner` was loaded from, following the chain of
    /// tracked references outwards.
    fn alias_writers(&self, owner: RefId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([owner]);
        let mut cursor = owner;
        while let Some(slot) = self.state_refs.get(&cursor) {
            if !visited.insert(slot.ref_id) {
                break;
            }
            if let Some(writes) = self.last_writes.get(&slot.ref_id) {
                writes.writers(&slot.fragment, &mut out);
            }
            cursor = slot.ref_id;
        }
        out
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DepGraphError::AlreadyClosed {
                component: "fragment tracker",
            });
        }
        Ok(())
    }
}

impl FragmentTracker for FragmentWatcher {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.begin_cmd(ctx)
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<FragmentAccesses> {
        self.check_open()?;
        self.brackets.end_cmd(ctx)?;
        let accesses = std::mem::take(&mut self.pending);
        trace!(
            node = %ctx.node_id,
            accesses = accesses.len(),
            "fragment accesses resolved"
        );
        Ok(accesses)
    }

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.begin_sub_cmd(sub)
    }

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.end_sub_cmd(sub)
    }

    fn on_read_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        value: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.check_open()?;
        let node = self.brackets.current("fragment read")?;
        let mut access = FragmentAccess::new(node, owner, fragment.clone(), AccessMode::Read);

        let direct = self.writers(owner, &fragment);
        if direct.is_empty() {
            if let Some(&first) = self.first_seen.get(&owner) {
                if first < node {
                    self.pending.add_init_node(node, first);
                }
            }
        }
        // Writers allocated after `node` are its own descendants; nesting is
        // recorded as `parent_node`, not as an edge.
        for dep in direct.into_iter().chain(self.alias_writers(owner)) {
            if dep < node {
                access.add_dep(dep);
            }
        }

        if track {
            if let Some(value) = value {
                self.state_refs.insert(
                    value,
                    RefFrag {
                        ref_id: owner,
                        fragment,
                    },
                );
            }
        }
        self.first_seen.entry(owner).or_insert(node);
        self.pending.push(access);
        Ok(())
    }

    fn on_write_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        old: Option<RefId>,
        new: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.check_open()?;
        let node = self.brackets.current("fragment write")?;
        let mut access = FragmentAccess::new(node, owner, fragment.clone(), AccessMode::Write);

        // Overwriting a tracked reference keeps the provenance of the old value.
        if let Some(slot) = old.and_then(|old| self.state_refs.get(&old)) {
            for dep in self.writers(slot.ref_id, &slot.fragment) {
                if dep < node {
                    access.add_dep(dep);
                }
            }
        }

        self.last_writes
            .entry(owner)
            .or_default()
            .record(fragment.clone(), node);

        if track {
            if let Some(new) = new {
                self.state_refs.insert(
                    new,
                    RefFrag {
                        ref_id: owner,
                        fragment,
                    },
                );
            }
        }
        self.first_seen.entry(owner).or_insert(node);
        self.pending.push(access);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.check_open()?;
        if self.brackets.is_open() {
            warn!("fragment tracker closed with an open command bracket");
        }
        self.closed = true;
        Ok(())
    }

    fn state_refs(&self) -> Result<&HashMap<RefId, RefFrag>> {
        if !self.closed {
            return Err(DepGraphError::NotClosed {
                component: "fragment tracker",
            });
        }
        Ok(&self.state_refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brackets::test_support::{cmd, sub};

    const OBJ: RefId = RefId(100);

    fn field(name: &str) -> Fragment {
        Fragment::field("Image", name)
    }

    fn deps_of(accesses: &FragmentAccesses, node: u32) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = accesses
            .by_node
            .get(&NodeId(node))
            .into_iter()
            .flatten()
            .flat_map(|a| a.deps.iter().copied())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Runs one command whose body is `body`, returning its accesses.
    fn run(
        watcher: &mut FragmentWatcher,
        node: u32,
        body: impl FnOnce(&mut FragmentWatcher),
    ) -> FragmentAccesses {
        let ctx = cmd(node);
        watcher.on_begin_cmd(&ctx).unwrap();
        body(watcher);
        watcher.on_end_cmd(&ctx).unwrap()
    }

    #[test]
    fn test_read_depends_on_last_field_writer() {
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, field("layout"), None, None, true).unwrap()
        });
        let acc = run(&mut w, 1, |w| {
            w.on_read_frag(OBJ, field("layout"), None, false).unwrap()
        });
        assert_eq!(deps_of(&acc, 1), vec![NodeId(0)]);

        // A different field was never written.
        let acc = run(&mut w, 2, |w| {
            w.on_read_frag(OBJ, field("format"), None, false).unwrap()
        });
        assert!(deps_of(&acc, 2).is_empty());
    }

    #[test]
    fn test_complete_write_covers_field_reads() {
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, Fragment::Complete, None, None, false)
                .unwrap()
        });
        let acc = run(&mut w, 1, |w| {
            w.on_read_frag(OBJ, field("layout"), None, false).unwrap();
            w.on_read_frag(OBJ, Fragment::array_index(3), None, false)
                .unwrap();
        });
        assert_eq!(deps_of(&acc, 1), vec![NodeId(0)]);
    }

    #[test]
    fn test_complete_write_supersedes_field_writers() {
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, field("layout"), None, None, false)
                .unwrap()
        });
        run(&mut w, 1, |w| {
            w.on_write_frag(OBJ, Fragment::Complete, None, None, false)
                .unwrap()
        });
        let acc = run(&mut w, 2, |w| {
            w.on_read_frag(OBJ, field("layout"), None, false).unwrap()
        });
        assert_eq!(deps_of(&acc, 2), vec![NodeId(1)]);
    }

    #[test]
    fn test_complete_read_sees_every_writer() {
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, Fragment::Complete, None, None, false)
                .unwrap()
        });
        run(&mut w, 1, |w| {
            w.on_write_frag(OBJ, field("layout"), None, None, false)
                .unwrap()
        });
        run(&mut w, 2, |w| {
            w.on_write_frag(OBJ, Fragment::map_index("k"), None, None, false)
                .unwrap()
        });
        let acc = run(&mut w, 3, |w| {
            w.on_read_frag(OBJ, Fragment::Complete, None, false).unwrap()
        });
        assert_eq!(deps_of(&acc, 3), vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_reads_through_tracked_reference() {
        let child = RefId(7);
        let mut w = FragmentWatcher::new();
        // n0 stores `child` into OBJ.binding.
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, field("binding"), None, Some(child), true)
                .unwrap()
        });
        // n1 reads a field of `child` it reached through OBJ.binding.
        let acc = run(&mut w, 1, |w| {
            w.on_read_frag(child, field("size"), None, false).unwrap()
        });
        assert_eq!(deps_of(&acc, 1), vec![NodeId(0)]);
    }

    #[test]
    fn test_overwriting_tracked_reference_keeps_provenance() {
        let first = RefId(7);
        let second = RefId(8);
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, field("binding"), None, Some(first), true)
                .unwrap()
        });
        let acc = run(&mut w, 1, |w| {
            w.on_write_frag(OBJ, field("binding"), Some(first), Some(second), true)
                .unwrap()
        });
        assert_eq!(deps_of(&acc, 1), vec![NodeId(0)]);

        // An untracked old value adds nothing.
        let acc = run(&mut w, 2, |w| {
            w.on_write_frag(OBJ, field("other"), Some(RefId(99)), None, false)
                .unwrap()
        });
        assert!(deps_of(&acc, 2).is_empty());
    }

    #[test]
    fn test_sub_command_accesses_attributed_to_sub_node() {
        let mut w = FragmentWatcher::new();
        let c = cmd(0);
        let s = sub(&c, 0, 1);
        w.on_begin_cmd(&c).unwrap();
        w.on_write_frag(OBJ, field("format"), None, None, false)
            .unwrap();
        w.on_begin_sub_cmd(&s).unwrap();
        w.on_read_frag(OBJ, field("format"), None, false).unwrap();
        w.on_write_frag(OBJ, field("layout"), None, None, false)
            .unwrap();
        w.on_end_sub_cmd(&s).unwrap();
        w.on_read_frag(OBJ, field("layout"), None, false).unwrap();
        let acc = w.on_end_cmd(&c).unwrap();

        assert_eq!(acc.by_node[&NodeId(1)][1].mode, AccessMode::Write);
        // The sub-command sees its parent's earlier write.
        assert_eq!(deps_of(&acc, 1), vec![NodeId(0)]);
        // The parent does not depend on its own sub-command.
        assert!(deps_of(&acc, 0).is_empty());
    }

    #[test]
    fn test_self_reads_are_not_dependencies() {
        let mut w = FragmentWatcher::new();
        let acc = run(&mut w, 0, |w| {
            w.on_write_frag(OBJ, field("layout"), None, None, false)
                .unwrap();
            w.on_read_frag(OBJ, field("layout"), None, false).unwrap();
        });
        assert!(deps_of(&acc, 0).is_empty());
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_unexplained_read_records_init_node() {
        let mut w = FragmentWatcher::new();
        // n0 touches OBJ (reads a field nobody wrote).
        run(&mut w, 0, |w| {
            w.on_read_frag(OBJ, field("layout"), None, false).unwrap()
        });
        let acc = run(&mut w, 1, |w| {
            w.on_read_frag(OBJ, field("format"), None, false).unwrap()
        });
        assert!(deps_of(&acc, 1).is_empty());
        assert_eq!(acc.init_cmd_nodes[&NodeId(1)], vec![NodeId(0)]);
    }

    #[test]
    fn test_state_refs_require_close() {
        let mut w = FragmentWatcher::new();
        run(&mut w, 0, |w| {
            w.on_read_frag(OBJ, field("binding"), Some(RefId(5)), true)
                .unwrap()
        });
        assert!(matches!(
            w.state_refs(),
            Err(DepGraphError::NotClosed { .. })
        ));
        w.close().unwrap();
        let refs = w.state_refs().unwrap();
        assert_eq!(refs[&RefId(5)].ref_id, OBJ);
        assert!(w.on_begin_cmd(&cmd(1)).is_err());
        assert!(w.close().is_err());
    }

    #[test]
    fn test_access_outside_bracket_is_rejected() {
        let mut w = FragmentWatcher::new();
        let err = w
            .on_read_frag(OBJ, field("layout"), None, false)
            .unwrap_err();
        assert!(matches!(err, DepGraphError::NoOpenNode { .. }));
    }
}
