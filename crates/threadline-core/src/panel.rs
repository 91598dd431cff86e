//! Rendering-surface abstraction for the conversation list panel.
//!
//! The panel is owned by someone else: its conversation links come and go
//! on their own. This crate only reads the links, and adds or removes the
//! separator nodes it created itself.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::feed::ChangeNotifier;
use crate::grouping::element_key;

/// Stable handle on a node inside a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// A conversation link as currently shown, in panel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub node: NodeId,
    pub href: Option<String>,
}

/// Where record ids live in link targets, and how separators are tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelLayout {
    pub link_marker: String,
    pub separator_class: String,
}

impl Default for PanelLayout {
    fn default() -> Self {
        Self {
            link_marker: "/c/".to_string(),
            separator_class: "tm-date-separator".to_string(),
        }
    }
}

pub const SEPARATOR_STYLE_ID: &str = "threadline-separator-style";

/// Stylesheet for the separator class.
pub fn separator_css(class: &str) -> String {
    format!(
        ".{class} {{\n\
         \x20   background: #303030;\n\
         \x20   color: #ececec;\n\
         \x20   font-weight: bold;\n\
         \x20   font-size: 0.95em;\n\
         \x20   border-bottom: 2px solid rgba(68,68,68,0.6);\n\
         \x20   padding: 6px 16px;\n\
         \x20   margin: 8px 0 4px 0;\n\
         \x20   border-radius: 6px;\n\
         \x20   user-select: none;\n\
         \x20   pointer-events: none;\n\
         }}\n"
    )
}

pub trait Panel {
    /// Whether the list container currently exists.
    fn is_mounted(&self) -> bool;

    /// Every link in document order. Empty when unmounted.
    fn anchors(&self) -> Vec<Anchor>;

    /// Links whose target carries a record id after `marker`. Other links
    /// in the panel (settings, projects) are not counted.
    fn conversation_count(&self, marker: &str) -> usize {
        self.anchors()
            .iter()
            .filter(|anchor| {
                anchor
                    .href
                    .as_deref()
                    .and_then(|href| element_key(href, marker))
                    .is_some()
            })
            .count()
    }

    /// Remove every separator tagged with `class`. Returns how many went.
    fn remove_separators(&mut self, class: &str) -> usize;

    /// Insert a separator directly before `node`. Returns `false` if the
    /// node is no longer in the panel.
    fn insert_separator_before(&mut self, node: NodeId, class: &str, label: &str) -> bool;

    /// Add a stylesheet once per `id`. Returns `true` if it was added now.
    fn inject_style(&mut self, id: &str, css: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelNode {
    Link {
        node: NodeId,
        href: Option<String>,
        label: String,
    },
    Separator {
        class: String,
        label: String,
    },
}

#[derive(Debug, Default)]
struct PanelTree {
    mounted: bool,
    nodes: Vec<PanelNode>,
    styles: BTreeMap<String, String>,
    next_id: u64,
}

/// In-process panel.
///
/// Clones share the same tree, so a test (or the CLI) can keep adding links
/// while a controller owns another handle. When a notifier is attached,
/// every structural change is reported through it.
#[derive(Debug, Clone, Default)]
pub struct MemoryPanel {
    tree: Arc<Mutex<PanelTree>>,
    notifier: Option<ChangeNotifier>,
}

impl MemoryPanel {
    pub fn new() -> Self {
        let panel = Self::unmounted();
        panel.lock().mounted = true;
        panel
    }

    pub fn unmounted() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn mount(&self) {
        self.lock().mounted = true;
        self.changed();
    }

    pub fn push_link(&self, href: &str, label: &str) -> NodeId {
        let id = self.insert_link(None, href, label);
        self.changed();
        id
    }

    /// New conversations show up at the top.
    pub fn prepend_link(&self, href: &str, label: &str) -> NodeId {
        let id = self.insert_link(Some(0), href, label);
        self.changed();
        id
    }

    pub fn nodes(&self) -> Vec<PanelNode> {
        self.lock().nodes.clone()
    }

    pub fn separator_labels(&self) -> Vec<String> {
        self.lock()
            .nodes
            .iter()
            .filter_map(|node| match node {
                PanelNode::Separator { label, .. } => Some(label.clone()),
                PanelNode::Link { .. } => None,
            })
            .collect()
    }

    pub fn has_style(&self, id: &str) -> bool {
        self.lock().styles.contains_key(id)
    }

    /// Plain-text view: separators as headings, links indented beneath.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.lock().nodes {
            match node {
                PanelNode::Separator { label, .. } => {
                    out.push_str(&format!("── {label} ──\n"));
                }
                PanelNode::Link { label, .. } => {
                    out.push_str(&format!("   {label}\n"));
                }
            }
        }
        out
    }

    fn insert_link(&self, at: Option<usize>, href: &str, label: &str) -> NodeId {
        let mut tree = self.lock();
        let node = NodeId(tree.next_id);
        tree.next_id += 1;
        let link = PanelNode::Link {
            node,
            href: Some(href.to_string()),
            label: label.to_string(),
        };
        match at {
            Some(index) => tree.nodes.insert(index, link),
            None => tree.nodes.push(link),
        }
        node
    }

    fn changed(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelTree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Panel for MemoryPanel {
    fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    fn anchors(&self) -> Vec<Anchor> {
        let tree = self.lock();
        if !tree.mounted {
            return Vec::new();
        }
        tree.nodes
            .iter()
            .filter_map(|node| match node {
                PanelNode::Link { node, href, .. } => Some(Anchor {
                    node: *node,
                    href: href.clone(),
                }),
                PanelNode::Separator { .. } => None,
            })
            .collect()
    }

    fn remove_separators(&mut self, class: &str) -> usize {
        let removed = {
            let mut tree = self.lock();
            let before = tree.nodes.len();
            tree.nodes.retain(
                |node| !matches!(node, PanelNode::Separator { class: c, .. } if c == class),
            );
            before - tree.nodes.len()
        };
        if removed > 0 {
            self.changed();
        }
        removed
    }

    fn insert_separator_before(&mut self, node: NodeId, class: &str, label: &str) -> bool {
        let inserted = {
            let mut tree = self.lock();
            let position = tree
                .nodes
                .iter()
                .position(|n| matches!(n, PanelNode::Link { node: id, .. } if *id == node));
            match position {
                Some(index) => {
                    tree.nodes.insert(
                        index,
                        PanelNode::Separator {
                            class: class.to_string(),
                            label: label.to_string(),
                        },
                    );
                    true
                }
                None => false,
            }
        };
        if inserted {
            self.changed();
        }
        inserted
    }

    fn inject_style(&mut self, id: &str, css: &str) -> bool {
        let mut tree = self.lock();
        if tree.styles.contains_key(id) {
            return false;
        }
        tree.styles.insert(id.to_string(), css.to_string());
        true
    }
}
