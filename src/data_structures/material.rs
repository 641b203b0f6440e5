//! Materials and their shading node graphs.
//!
//! A [`Material`] owns a small node graph: typed nodes with named sockets and
//! links between an output socket and an input socket. An input socket holds at
//! most one link; wiring into an occupied input replaces the existing link.

use crate::data_structures::scene_graph::ImageId;

/// Socket names used by the graphs this crate builds and inspects.
pub mod socket {
    pub const BASE_COLOR: &str = "Base Color";
    pub const EMISSION: &str = "Emission";
    pub const COLOR: &str = "Color";
    pub const ALPHA: &str = "Alpha";
    pub const FAC: &str = "Fac";
    pub const COLOR1: &str = "Color1";
    pub const COLOR2: &str = "Color2";
    pub const BSDF: &str = "BSDF";
    pub const SURFACE: &str = "Surface";
}

/// Label carried by the texture node that drives the emission input.
pub const EMISSIVE_LABEL: &str = "EMISSIVE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Mix,
    LinearLight,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// The principal shading node consuming colour and emission.
    Principled,
    ImageTexture { image: Option<ImageId> },
    MixRgb { blend: BlendMode },
    Output,
    Other(String),
}

#[derive(Clone, Debug)]
pub struct ShaderNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub location: [f32; 2],
}

impl ShaderNode {
    pub fn is_image_texture(&self) -> bool {
        matches!(self.kind, NodeKind::ImageTexture { .. })
    }

    pub fn image(&self) -> Option<ImageId> {
        match self.kind {
            NodeKind::ImageTexture { image } => image,
            _ => None,
        }
    }
}

/// One end of a link: a node and one of its socket names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketRef {
    pub node: NodeId,
    pub socket: String,
}

impl SocketRef {
    pub fn new(node: NodeId, socket: &str) -> Self {
        Self {
            node,
            socket: socket.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub from: SocketRef,
    pub to: SocketRef,
}

#[derive(Clone, Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<ShaderNode>,
    links: Vec<Link>,
    next_id: u32,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A principled node connected to a material output, the layout every
    /// imported material starts from.
    pub fn principled() -> (Self, NodeId) {
        let mut graph = Self::new();
        let bsdf = graph.add_node(NodeKind::Principled, "", [0.0, 0.0]);
        let output = graph.add_node(NodeKind::Output, "", [300.0, 0.0]);
        graph.wire(
            SocketRef::new(bsdf, socket::BSDF),
            SocketRef::new(output, socket::SURFACE),
        );
        (graph, bsdf)
    }

    pub fn add_node(&mut self, kind: NodeKind, label: &str, location: [f32; 2]) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.push(ShaderNode {
            id,
            kind,
            label: label.to_string(),
            location,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&ShaderNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[ShaderNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Link `from` into `to`, replacing whatever was linked into `to` before.
    pub fn wire(&mut self, from: SocketRef, to: SocketRef) {
        self.links.retain(|link| link.to != to);
        self.links.push(Link { from, to });
    }

    /// The link feeding an input socket, if any.
    pub fn link_into(&self, node: NodeId, input: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.to.node == node && link.to.socket == input)
    }

    /// The node feeding an input socket, if any.
    pub fn upstream(&self, node: NodeId, input: &str) -> Option<&ShaderNode> {
        self.link_into(node, input)
            .and_then(|link| self.node(link.from.node))
    }

    /// First node matching `predicate` in creation order.
    pub fn find(&self, predicate: impl Fn(&ShaderNode) -> bool) -> Option<&ShaderNode> {
        self.nodes.iter().find(|n| predicate(n))
    }

    pub fn find_by_label(&self, label: &str) -> Option<&ShaderNode> {
        self.find(|n| n.label == label)
    }

    /// First principal shading node; graphs are expected to carry exactly one.
    pub fn principled_node(&self) -> Option<&ShaderNode> {
        self.find(|n| n.kind == NodeKind::Principled)
    }

    /// Images referenced by texture nodes of this graph.
    pub fn images(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.nodes.iter().filter_map(ShaderNode::image)
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub graph: NodeGraph,
}

impl Material {
    pub fn new(name: &str) -> Self {
        let (graph, _) = NodeGraph::principled();
        Self {
            name: name.to_string(),
            graph,
        }
    }
}
