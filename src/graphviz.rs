//! Read-only graph iteration surface plus a Graphviz DOT emitter (§6
//! "Renderer interface", §10). The renderer itself — turning a graph
//! description into pixels — is out of scope (§1); this only exposes the
//! iteration a renderer crate would need, and one DOT string builder
//! grounded in the teacher's own `machine/visualization.rs`.

use crate::graph::{Graph, TransitionId, TransitionKind, VertexId, VertexKind};

/// Arena-backed, read-only view over a graph's vertices and transitions.
/// A renderer crate can be built against this trait without linking the
/// executor; the engine itself emits no graph output.
pub trait GraphView {
    fn vertex_ids(&self) -> Vec<VertexId>;
    fn vertex_name(&self, id: VertexId) -> Option<String>;
    fn vertex_kind(&self, id: VertexId) -> VertexKind;
    fn vertex_parent(&self, id: VertexId) -> Option<VertexId>;
    fn transition_ids(&self) -> Vec<TransitionId>;
    fn transition_endpoints(&self, id: TransitionId) -> (VertexId, VertexId);
    fn transition_kind(&self, id: TransitionId) -> TransitionKind;
    fn transition_label(&self, id: TransitionId) -> Option<String>;
    fn transition_has_guard(&self, id: TransitionId) -> bool;
    fn transition_has_action(&self, id: TransitionId) -> bool;
}

impl<C, E> GraphView for Graph<C, E> {
    fn vertex_ids(&self) -> Vec<VertexId> {
        self.vertices().map(|v| v.id).collect()
    }

    fn vertex_name(&self, id: VertexId) -> Option<String> {
        self.vertex(id).name.clone()
    }

    fn vertex_kind(&self, id: VertexId) -> VertexKind {
        self.vertex(id).kind
    }

    fn vertex_parent(&self, id: VertexId) -> Option<VertexId> {
        self.parent(id)
    }

    fn transition_ids(&self) -> Vec<TransitionId> {
        self.transitions().map(|t| t.id).collect()
    }

    fn transition_endpoints(&self, id: TransitionId) -> (VertexId, VertexId) {
        let t = self.transition(id);
        (t.source, t.target)
    }

    fn transition_kind(&self, id: TransitionId) -> TransitionKind {
        self.transition(id).kind
    }

    fn transition_label(&self, id: TransitionId) -> Option<String> {
        self.transition(id).label.clone()
    }

    fn transition_has_guard(&self, id: TransitionId) -> bool {
        self.transition(id).guard.is_some()
    }

    fn transition_has_action(&self, id: TransitionId) -> bool {
        self.transition(id).action.is_some()
    }
}

fn shape_for(kind: VertexKind) -> &'static str {
    match kind {
        VertexKind::Simple => "box",
        VertexKind::Composite | VertexKind::Parallel => "box3d",
        VertexKind::Initial | VertexKind::Terminate => "circle",
        VertexKind::Final => "doublecircle",
        VertexKind::Junction => "diamond",
        VertexKind::ShallowHistory | VertexKind::DeepHistory => "circle",
    }
}

fn dot_label(view: &impl GraphView, id: VertexId) -> String {
    view.vertex_name(id).unwrap_or_else(|| format!("{id}"))
}

/// Renders `view` as a Graphviz DOT digraph: one node per vertex (shaped
/// by kind), one edge per transition (labeled, dashed when internal,
/// annotated with `[guard]`/`{action}` markers when present).
pub fn to_dot(view: &impl GraphView) -> String {
    let mut out = String::from("digraph state_machine {\n    rankdir=LR;\n");
    for id in view.vertex_ids() {
        let kind = view.vertex_kind(id);
        out.push_str(&format!(
            "    \"{}\" [shape={}];\n",
            dot_label(view, id),
            shape_for(kind)
        ));
    }
    for id in view.transition_ids() {
        let (source, target) = view.transition_endpoints(id);
        let mut label = view.transition_label(id).unwrap_or_default();
        if view.transition_has_guard(id) {
            label.push_str(" [guard]");
        }
        if view.transition_has_action(id) {
            label.push_str(" {action}");
        }
        let style = match view.transition_kind(id) {
            TransitionKind::Internal => " style=dashed",
            TransitionKind::External => "",
        };
        out.push_str(&format!(
            "    \"{}\" -> \"{}\" [label=\"{}\"{}];\n",
            dot_label(view, source),
            dot_label(view, target),
            label,
            style
        ));
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;

    #[test]
    fn emits_nodes_and_edges() {
        let mut b: GraphBuilder<(), &'static str> = GraphBuilder::new();
        let s1 = b.state(None, "s1").unwrap();
        let s2 = b.state(None, "s2").unwrap();
        b.on(s1, "go", s2).unwrap();
        b.set_initial(b.root(), s1).unwrap();
        let graph = b.into_graph();

        let dot = to_dot(&graph);
        assert!(dot.starts_with("digraph state_machine {"));
        assert!(dot.contains("\"s1\""));
        assert!(dot.contains("\"s2\""));
        assert!(dot.contains("\"s1\" -> \"s2\""));
    }
}
