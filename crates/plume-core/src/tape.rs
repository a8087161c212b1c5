//! Gradient tape.
//!
//! Records every advection launched through a device context together with
//! shared references to its inputs. Holding the inputs keeps their buffers
//! alive after the caller frees the handles, so the reverse pass always
//! sees the exact forward data.

use std::sync::Arc;

use plume_types::FieldHandle;

use crate::context::FieldData;

/// One recorded advection step.
#[derive(Debug)]
pub(crate) struct AdvectNode {
    pub density: FieldHandle,
    pub velocity: FieldHandle,
    pub output: FieldHandle,
    pub density_data: Arc<FieldData>,
    pub velocity_data: Arc<FieldData>,
    pub dt: f32,
    /// Frame index of the output.
    pub frame: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TapeState {
    /// Seeds may be added.
    #[default]
    Recording,
    /// Seeds were pushed through the tape; re-arm with `reset`.
    Propagated,
}

#[derive(Debug, Default)]
pub(crate) struct Tape {
    nodes: Vec<AdvectNode>,
    state: TapeState,
}

impl Tape {
    pub fn record(&mut self, node: AdvectNode) {
        self.nodes.push(node);
    }

    /// Nodes in forward order. Propagation walks them in reverse.
    pub fn nodes(&self) -> &[AdvectNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_propagated(&self) -> bool {
        self.state == TapeState::Propagated
    }

    pub fn mark_propagated(&mut self) {
        self.state = TapeState::Propagated;
    }

    /// Re-arms the tape for another reverse pass over the same nodes.
    pub fn reset(&mut self) {
        self.state = TapeState::Recording;
    }

    /// Drops every node and the field data they hold.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.state = TapeState::Recording;
    }

    /// True when a node produced `handle`.
    pub fn is_output(&self, handle: FieldHandle) -> bool {
        self.nodes.iter().any(|n| n.output == handle)
    }

    /// True when a node reads or produced `handle`.
    pub fn references(&self, handle: FieldHandle) -> bool {
        self.nodes
            .iter()
            .any(|n| n.density == handle || n.velocity == handle || n.output == handle)
    }
}
