//! Named reference frames.
//!
//! [`FrameGraph`] stores parent → child poses and resolves any frame into any
//! other by breadth-first search.  Edges are walkable in both directions: a
//! reverse hop uses the inverse pose, so registering `world → agv1_tray` is
//! enough to answer `agv1_tray → world` as well.
//!
//! The cell only ever asks for world poses ([`FrameGraph::world_pose`]);
//! static frames such as `agv2_tray` or `kts1_tool_changer_parts_frame` are
//! registered once at start-up.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::pose::Pose;

pub const WORLD_FRAME: &str = "world";

#[derive(Debug, Default, Clone)]
pub struct FrameGraph {
    /// `edges[from][to]`; every registration inserts the forward pose and its
    /// inverse.
    edges: HashMap<String, HashMap<String, Pose>>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the pose of `child` relative to `parent`.
    pub fn set_transform(&mut self, parent: &str, child: &str, pose: Pose) {
        self.edges
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string(), pose);
        self.edges
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string(), pose.inverse());
    }

    /// Shorthand for a frame hanging directly off `world`.
    pub fn set_world_pose(&mut self, frame: &str, pose: Pose) {
        self.set_transform(WORLD_FRAME, frame, pose);
    }

    pub fn contains(&self, frame: &str) -> bool {
        frame == WORLD_FRAME || self.edges.contains_key(frame)
    }

    /// Pose of `target` expressed in `source`, or `None` when disconnected.
    pub fn lookup(&self, source: &str, target: &str) -> Option<Pose> {
        if source == target {
            return Some(Pose::identity());
        }

        let mut queue: VecDeque<(&str, Pose)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        queue.push_back((source, Pose::identity()));
        visited.insert(source);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(edge);
                if next == target {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }

    pub fn world_pose(&self, frame: &str) -> Option<Pose> {
        self.lookup(WORLD_FRAME, frame)
    }
}
