//! In-process network of ring nodes.
//!
//! Each node gets its own `MemoryStore`; the network moves `Outcome`s
//! between nodes until a message either delivers, dies, or errors. Nodes
//! can be marked down: a send toward a down node is rerouted through the
//! sender's next-best neighbours, and when no better hop is live the sender
//! serves the message itself.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use common::prelude::*;

use crate::router::{Outcome, RingNode, RouteError};

/// Alternate hops tried around a dead node before giving up.
const MAX_REROUTES: usize = 3;

struct TestNode {
    node: RingNode,
    store: Arc<MemoryStore>,
}

/// A simulated network keyed by ring id.
#[derive(Default)]
pub struct Network {
    nodes: BTreeMap<NodeId, TestNode>,
    down: HashSet<NodeId>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network where every node already knows every other, trimmed to
    /// each node's bounded neighbour tables.
    pub fn mesh(ids: impl IntoIterator<Item = u64>) -> Self {
        let mut net = Self::new();
        let ids: Vec<NodeId> = ids.into_iter().map(NodeId).collect();
        for &id in &ids {
            net.add(id);
        }
        for &id in &ids {
            if let Some(entry) = net.nodes.get_mut(&id) {
                for &other in &ids {
                    entry.node.add_neighbour(other);
                }
            }
        }
        net
    }

    /// Add a node with an empty neighbour table and its own store.
    pub fn add(&mut self, id: NodeId) -> NodeId {
        let store = Arc::new(MemoryStore::new());
        let node = RingNode::new(id, store.clone());
        self.nodes.insert(id, TestNode { node, store });
        id
    }

    pub fn node(&self, id: NodeId) -> &RingNode {
        &self.nodes[&id].node
    }

    /// Mutable node access, for wiring topologies by hand.
    pub fn node_mut(&mut self, id: NodeId) -> &mut RingNode {
        &mut self
            .nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no node {id}"))
            .node
    }

    /// The node's backing store, for seeding blocks and inspecting writes.
    pub fn store(&self, id: NodeId) -> Arc<MemoryStore> {
        self.nodes[&id].store.clone()
    }

    pub fn set_down(&mut self, id: NodeId, down: bool) {
        if down {
            self.down.insert(id);
        } else {
            self.down.remove(&id);
        }
    }

    /// The live node whose id is nearest to `target`.
    pub fn closest_to(&self, target: NodeId) -> Option<NodeId> {
        self.nodes
            .keys()
            .filter(|id| !self.down.contains(id))
            .copied()
            .min_by_key(|id| id.distance(target))
    }

    /// Originate `body` at `from` and pump until quiescent, returning every
    /// message delivered back to a node.
    pub async fn originate(
        &mut self,
        from: NodeId,
        body: Body,
    ) -> Result<Vec<Message>, RouteError> {
        let outcomes = self.nodes.get_mut(&from).map(|n| &mut n.node);
        let outcomes = match outcomes {
            Some(node) => node.originate(body).await?,
            None => return Err(RouteError::Unreachable(from)),
        };
        self.pump(from, outcomes).await
    }

    /// Announce `joiner` to the ring through `contact` and settle.
    pub async fn join(&mut self, joiner: NodeId, contact: NodeId) -> Result<(), RouteError> {
        let outcome = match self.nodes.get_mut(&joiner) {
            Some(n) => n.node.join_via(contact),
            None => return Err(RouteError::Unreachable(joiner)),
        };
        self.pump(joiner, vec![outcome]).await?;
        Ok(())
    }

    /// Let `id` exchange neighbour sets with its nearest node per side.
    pub async fn stabilize(&mut self, id: NodeId) -> Result<(), RouteError> {
        let outcomes = match self.nodes.get(&id) {
            Some(n) => n.node.stabilize(),
            None => return Err(RouteError::Unreachable(id)),
        };
        self.pump(id, outcomes).await?;
        Ok(())
    }

    /// Move outcomes between nodes until nothing is in flight.
    async fn pump(
        &mut self,
        origin: NodeId,
        outcomes: Vec<Outcome>,
    ) -> Result<Vec<Message>, RouteError> {
        let mut delivered = Vec::new();
        let mut queue: VecDeque<(NodeId, Outcome)> =
            outcomes.into_iter().map(|o| (origin, o)).collect();

        while let Some((from, outcome)) = queue.pop_front() {
            match outcome {
                Outcome::Handled => {}
                Outcome::Delivered(msg) => delivered.push(msg),
                Outcome::Send { to, msg } => {
                    let next = match self.live_hop(from, to, &msg)? {
                        Some(next) => next,
                        None => {
                            // no better live hop; the sender serves it
                            let sender = self
                                .nodes
                                .get_mut(&from)
                                .ok_or(RouteError::Unreachable(from))?;
                            let outs = sender.node.assume(msg).await?;
                            queue.extend(outs.into_iter().map(|o| (from, o)));
                            continue;
                        }
                    };
                    let receiver = self
                        .nodes
                        .get_mut(&next)
                        .ok_or(RouteError::Unreachable(next))?;
                    let outs = receiver.node.handle(msg).await?;
                    queue.extend(outs.into_iter().map(|o| (next, o)));
                }
            }
        }
        Ok(delivered)
    }

    /// Resolve `to` to a live node, rerouting through the sender's
    /// next-best neighbours when it is down. `Ok(None)` means no better
    /// live hop exists and the sender must act itself.
    fn live_hop(
        &self,
        from: NodeId,
        to: NodeId,
        msg: &Message,
    ) -> Result<Option<NodeId>, RouteError> {
        if self.is_live(to) {
            return Ok(Some(to));
        }
        tracing::debug!(%from, %to, "hop is down, rerouting");
        let sender = match self.nodes.get(&from) {
            Some(n) => &n.node,
            None => return Err(RouteError::Unreachable(from)),
        };
        let mut tried = vec![to];
        while tried.len() <= MAX_REROUTES {
            match sender.next_hop(msg.target(), msg, &tried) {
                Some(alt) if self.is_live(alt) => return Ok(Some(alt)),
                Some(alt) => tried.push(alt),
                None => return Ok(None),
            }
        }
        Err(RouteError::Unreachable(msg.target()))
    }

    fn is_live(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id) && !self.down.contains(&id)
    }
}
