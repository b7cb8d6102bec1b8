//! # Reveal Plugins
//!
//! Per-node-type overrides of how content is measured and truncated.
//!
//! The slicer asks the [`PluginRegistry`] about every node before it falls back
//! to the default character walk. The first plugin that claims a node decides
//! for it; later plugins never see that node.
//!
//! The built-in plugins all make their nodes **atomic**: the node counts as one
//! unit and is either shown whole or not at all. A half-typed formula or
//! diagram source is not renderable, so it is held back until it can be shown
//! completely. Without these plugins such nodes are truncated character by
//! character like any other leaf, which is allowed but may render garbage.

use std::fmt;
use std::sync::Arc;

use crate::ast::{AstNode, NodeKind, NodeRef, NodeType};
use crate::error::OptionsError;

/// Result of a plugin slice: the node to show (if any) and how many units the
/// node used up from the reveal budget.
#[derive(Debug, Clone)]
pub struct Cut {
    pub node: Option<NodeRef>,
    pub consumed: usize,
}

pub trait RevealPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Node types this plugin may claim.
    fn node_types(&self) -> &'static [NodeType];

    /// Whether this plugin handles `node`. Defaults to a type match.
    fn claims(&self, node: &AstNode) -> bool {
        self.node_types().contains(&node.node_type())
    }

    /// Revealable length of `node`, or `None` to use the default count.
    fn count_chars(&self, _node: &AstNode) -> Option<usize> {
        None
    }

    /// Truncates `node` to `remaining` units, or `None` to use the default slicer.
    ///
    /// `total` is the count reported for `node`.
    fn slice(&self, _node: &NodeRef, _remaining: usize, _total: usize) -> Option<Cut> {
        None
    }
}

/// Shared slicing rule for atomic nodes.
fn atomic_cut(node: &NodeRef, remaining: usize) -> Cut {
    if remaining >= 1 {
        Cut {
            node: Some(Arc::clone(node)),
            consumed: 1,
        }
    } else {
        Cut {
            node: None,
            consumed: 0,
        }
    }
}

/// Inline and block math are revealed whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct MathPlugin;

impl RevealPlugin for MathPlugin {
    fn name(&self) -> &'static str {
        "math"
    }

    fn node_types(&self) -> &'static [NodeType] {
        &[NodeType::Math, NodeType::InlineMath]
    }

    fn count_chars(&self, _node: &AstNode) -> Option<usize> {
        Some(1)
    }

    fn slice(&self, node: &NodeRef, remaining: usize, _total: usize) -> Option<Cut> {
        Some(atomic_cut(node, remaining))
    }
}

/// Fenced code blocks in a diagram language are revealed whole.
#[derive(Debug, Clone)]
pub struct DiagramPlugin {
    languages: Vec<String>,
}

impl DiagramPlugin {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: languages.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for DiagramPlugin {
    fn default() -> Self {
        Self::new(["mermaid"])
    }
}

impl RevealPlugin for DiagramPlugin {
    fn name(&self) -> &'static str {
        "diagram"
    }

    fn node_types(&self) -> &'static [NodeType] {
        &[NodeType::Code]
    }

    fn claims(&self, node: &AstNode) -> bool {
        match &node.kind {
            NodeKind::Code {
                lang: Some(lang), ..
            } => self.languages.iter().any(|l| l.eq_ignore_ascii_case(lang)),
            _ => false,
        }
    }

    fn count_chars(&self, _node: &AstNode) -> Option<usize> {
        Some(1)
    }

    fn slice(&self, node: &NodeRef, remaining: usize, _total: usize) -> Option<Cut> {
        Some(atomic_cut(node, remaining))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImagePlugin;

impl RevealPlugin for ImagePlugin {
    fn name(&self) -> &'static str {
        "image"
    }

    fn node_types(&self) -> &'static [NodeType] {
        &[NodeType::Image]
    }

    fn count_chars(&self, _node: &AstNode) -> Option<usize> {
        Some(1)
    }

    fn slice(&self, node: &NodeRef, remaining: usize, _total: usize) -> Option<Cut> {
        Some(atomic_cut(node, remaining))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThematicBreakPlugin;

impl RevealPlugin for ThematicBreakPlugin {
    fn name(&self) -> &'static str {
        "thematic-break"
    }

    fn node_types(&self) -> &'static [NodeType] {
        &[NodeType::ThematicBreak]
    }

    fn count_chars(&self, _node: &AstNode) -> Option<usize> {
        Some(1)
    }

    fn slice(&self, node: &NodeRef, remaining: usize, _total: usize) -> Option<Cut> {
        Some(atomic_cut(node, remaining))
    }
}

/// Ordered set of plugins consulted by the slicer.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn RevealPlugin>>,
}

impl PluginRegistry {
    pub const BUILTIN_NAMES: [&'static str; 4] = ["math", "diagram", "image", "thematic-break"];

    /// No overrides: every node is truncated character by character.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with(MathPlugin)
            .with(DiagramPlugin::default())
            .with(ImagePlugin)
            .with(ThematicBreakPlugin)
    }

    /// Builds a registry from built-in plugin names, in the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, OptionsError> {
        names.iter().try_fold(Self::empty(), |registry, name| {
            let registry = match name.as_ref() {
                "math" => registry.with(MathPlugin),
                "diagram" => registry.with(DiagramPlugin::default()),
                "image" => registry.with(ImagePlugin),
                "thematic-break" => registry.with(ThematicBreakPlugin),
                other => return Err(OptionsError::UnknownPlugin(other.to_string())),
            };
            Ok(registry)
        })
    }

    pub fn with(mut self, plugin: impl RevealPlugin + 'static) -> Self {
        self.register(Arc::new(plugin));
        self
    }

    pub fn register(&mut self, plugin: Arc<dyn RevealPlugin>) {
        for node_type in plugin.node_types() {
            if let Some(owner) = self
                .plugins
                .iter()
                .find(|p| p.node_types().contains(node_type))
            {
                log::debug!(
                    "plugin '{}' registered after '{}' for {node_type:?}; '{}' wins where both claim a node",
                    plugin.name(),
                    owner.name(),
                    owner.name()
                );
            }
        }
        self.plugins.push(plugin);
    }

    /// First plugin claiming `node`.
    pub fn find(&self, node: &AstNode) -> Option<&dyn RevealPlugin> {
        self.plugins
            .iter()
            .find(|p| p.claims(node))
            .map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
