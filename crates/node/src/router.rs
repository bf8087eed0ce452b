//! Greedy ring routing.
//!
//! A `RingNode` keeps a bounded set of neighbours on each side of its id and
//! forwards every message to the live neighbour strictly closest to the
//! message's target. When no neighbour improves on the node's own distance,
//! the node is authoritative for the target and acts on the body itself:
//! integrating a joiner, merging an echo, admitting a write, answering a
//! lookup, or surfacing a reply addressed to it.
//!
//! The node owns no sockets. `handle` returns `Outcome`s and the transport
//! (or the in-process test network) moves them; that keeps the routing rules
//! testable without any I/O.

use std::sync::Arc;

use common::prelude::*;
use common::ring::Side;
use common::store::PutClaim;
use common::wire::{Echo, GetResult, Join, Put, PutAccept};

/// Neighbours tracked per ring side, nearest first.
pub const NEIGHBOURS_PER_SIDE: usize = 5;

/// What a node wants done with a message after processing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Forward to this peer.
    Send { to: NodeId, msg: Message },
    /// The message reached the node it targets; hand it to the caller.
    Delivered(Message),
    /// Consumed internally, nothing to move.
    Handled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The message already passed through this node.
    #[error("routing loop: {0} is already on the hop list")]
    Loop(NodeId),

    /// No live path toward the target remains.
    #[error("no route toward {0}")]
    Unreachable(NodeId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A DHT node: a ring id, bounded neighbour tables, and the content store
/// it answers for when authoritative.
pub struct RingNode {
    id: NodeId,
    store: Arc<dyn ContentStore>,
    /// Predecessor-side neighbours, nearest first.
    left: Vec<NodeId>,
    /// Successor-side neighbours, nearest first.
    right: Vec<NodeId>,
}

impl RingNode {
    pub fn new(id: NodeId, store: Arc<dyn ContentStore>) -> Self {
        Self {
            id,
            store,
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Node with a fresh random ring id.
    pub fn with_random_id(store: Arc<dyn ContentStore>) -> Self {
        use rand::Rng;
        Self::new(NodeId(rand::rng().random()), store)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// All known neighbours, both sides.
    pub fn neighbours(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.left.iter().chain(self.right.iter()).copied()
    }

    pub fn knows(&self, id: NodeId) -> bool {
        self.left.contains(&id) || self.right.contains(&id)
    }

    /// Track `id` on its side of the ring, keeping only the
    /// `NEIGHBOURS_PER_SIDE` nearest per side.
    pub fn add_neighbour(&mut self, id: NodeId) {
        if id == self.id {
            return;
        }
        let center = self.id;
        let list = match self.id.side_of(id) {
            Side::Successor => &mut self.right,
            Side::Predecessor => &mut self.left,
        };
        if list.contains(&id) {
            return;
        }
        list.push(id);
        list.sort_by_key(|n| center.distance(*n));
        list.truncate(NEIGHBOURS_PER_SIDE);
    }

    /// The neighbour to forward a message for `target` to: the one nearest
    /// to the target among those strictly closer than this node, skipping
    /// nodes the message has visited and the explicit exclusions.
    pub fn next_hop(&self, target: NodeId, msg: &Message, exclude: &[NodeId]) -> Option<NodeId> {
        self.neighbours()
            .filter(|n| !msg.has_visited(*n) && !exclude.contains(n))
            .filter(|n| self.id.is_closer(*n, target))
            .min_by_key(|n| n.distance(target))
    }

    /// Process an incoming message: stamp our hop, then forward it or act
    /// on it if we are the closest node we know of.
    pub async fn handle(&mut self, mut msg: Message) -> Result<Vec<Outcome>, RouteError> {
        if msg.has_visited(self.id) {
            return Err(RouteError::Loop(self.id));
        }
        // every hop list is a free topology sample
        for hop in msg.hops().to_vec() {
            self.add_neighbour(hop);
        }
        msg.add_hop(self.id);

        let target = msg.target();
        if target != self.id {
            if let Some(next) = self.next_hop(target, &msg, &[]) {
                tracing::trace!(node = %self.id, %target, %next, kind = msg.body().name(), "forward");
                return Ok(vec![Outcome::Send { to: next, msg }]);
            }
        }
        self.assume(msg).await
    }

    /// Act as the authoritative node for a message we will not forward.
    ///
    /// Also the transport's fallback: when every better hop is dead, the
    /// sender takes the message back and serves it here.
    pub async fn assume(&mut self, msg: Message) -> Result<Vec<Outcome>, RouteError> {
        let target = msg.target();
        // we just stamped our hop, so an origin always exists
        let origin = msg.origin().unwrap_or(self.id);
        tracing::debug!(node = %self.id, %target, kind = msg.body().name(), "authoritative");

        let body = msg.body().clone();
        match body {
            Body::Join(Join { target: joiner }) => {
                if joiner == self.id {
                    // our own announcement found its way back; the ring has
                    // no closer node yet
                    return Ok(vec![Outcome::Handled]);
                }
                self.add_neighbour(joiner);
                let known: Vec<NodeId> = self.neighbours().chain([self.id]).collect();
                let echo = Echo::new(joiner, known);
                Ok(vec![self.reply(Message::new(Body::Echo(echo)))])
            }

            Body::Echo(echo) => {
                if echo.target == self.id {
                    for &n in &echo.neighbours {
                        self.add_neighbour(n);
                    }
                    Ok(vec![Outcome::Handled])
                } else {
                    tracing::warn!(node = %self.id, %target, "dropping echo for unknown node");
                    Ok(vec![Outcome::Handled])
                }
            }

            Body::Put(put) => self.accept_put(&put, origin).await,

            Body::Get(get) => {
                let size = match ContentHash::decode(get.key()) {
                    Ok(hash) => self.store.size_of(&hash).await?.unwrap_or(0),
                    // not an encoded content hash; nothing can be filed
                    // under it here
                    Err(_) => 0,
                };
                let result = GetResult::for_get(&get, size, origin);
                Ok(vec![self.reply(Message::new(Body::GetResult(result)))])
            }

            Body::PutAccept(_) | Body::GetResult(_) => {
                if target == self.id {
                    Ok(vec![Outcome::Delivered(msg)])
                } else {
                    Err(RouteError::Unreachable(target))
                }
            }
        }
    }

    /// Verify and admit a write announcement, answering with PUT_ACCEPT.
    /// A claim that fails verification is dropped without a reply.
    async fn accept_put(&mut self, put: &Put, origin: NodeId) -> Result<Vec<Outcome>, RouteError> {
        let claim = match PutClaim::from_put(put) {
            Ok(claim) => claim,
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "rejecting malformed put");
                return Ok(vec![Outcome::Handled]);
            }
        };
        if let Err(e) = self.store.admit(&claim).await {
            tracing::warn!(node = %self.id, error = %e, "rejecting put claim");
            return Ok(vec![Outcome::Handled]);
        }
        let accept = PutAccept::for_put(put, origin);
        Ok(vec![self.reply(Message::new(Body::PutAccept(accept)))])
    }

    /// Send a freshly built reply on its way: stamp our hop, deliver
    /// locally if it targets us, otherwise route greedily. With no closer
    /// neighbour the target itself is addressed directly; replies target a
    /// node we learned from the request's hop list even if the bounded
    /// tables have since evicted it.
    fn reply(&self, mut msg: Message) -> Outcome {
        msg.add_hop(self.id);
        let target = msg.target();
        if target == self.id {
            return Outcome::Delivered(msg);
        }
        match self.next_hop(target, &msg, &[]) {
            Some(next) => Outcome::Send { to: next, msg },
            None => Outcome::Send { to: target, msg },
        }
    }

    /// Start a message from this node.
    pub async fn originate(&mut self, body: Body) -> Result<Vec<Outcome>, RouteError> {
        self.handle(Message::new(body)).await
    }

    /// Announce this node to the ring through a known contact. The JOIN
    /// targets our own id; whoever currently owns that region integrates us
    /// and echoes its neighbour set back.
    pub fn join_via(&mut self, contact: NodeId) -> Outcome {
        self.add_neighbour(contact);
        let mut msg = Message::new(Body::Join(Join { target: self.id }));
        msg.add_hop(self.id);
        Outcome::Send { to: contact, msg }
    }

    /// Exchange neighbour sets with the nearest node on each side.
    pub fn stabilize(&self) -> Vec<Outcome> {
        let known: Vec<NodeId> = self.neighbours().chain([self.id]).collect();
        let mut out = Vec::new();
        for peer in [self.left.first(), self.right.first()].into_iter().flatten() {
            let echo = Echo::new(*peer, known.clone());
            let mut msg = Message::new(Body::Echo(echo));
            msg.add_hop(self.id);
            out.push(Outcome::Send { to: *peer, msg });
        }
        out
    }
}

impl std::fmt::Debug for RingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingNode")
            .field("id", &self.id)
            .field("left", &self.left)
            .field("right", &self.right)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::wire::Get;

    fn node(id: u64) -> RingNode {
        RingNode::new(NodeId(id), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn neighbour_tables_are_bounded_and_nearest_first() {
        let mut n = node(1000);
        for id in [1100, 1001, 1500, 1200, 1300, 1400, 1250] {
            n.add_neighbour(NodeId(id));
        }
        assert_eq!(n.right.len(), NEIGHBOURS_PER_SIDE);
        assert_eq!(
            n.right,
            vec![
                NodeId(1001),
                NodeId(1100),
                NodeId(1200),
                NodeId(1250),
                NodeId(1300)
            ]
        );
        assert!(n.left.is_empty());

        n.add_neighbour(NodeId(900));
        assert_eq!(n.left, vec![NodeId(900)]);
    }

    #[test]
    fn random_ids_are_distinct() {
        let a = RingNode::with_random_id(Arc::new(MemoryStore::new()));
        let b = RingNode::with_random_id(Arc::new(MemoryStore::new()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn self_and_duplicates_are_ignored() {
        let mut n = node(50);
        n.add_neighbour(NodeId(50));
        n.add_neighbour(NodeId(60));
        n.add_neighbour(NodeId(60));
        assert_eq!(n.neighbours().count(), 1);
    }

    #[test]
    fn next_hop_picks_nearest_strict_improvement() {
        let mut n = node(0);
        for id in [100, 200, 300] {
            n.add_neighbour(NodeId(id));
        }
        let msg = Message::new(Body::Join(Join {
            target: NodeId(250),
        }));
        assert_eq!(n.next_hop(NodeId(250), &msg, &[]), Some(NodeId(200)));
        assert_eq!(n.next_hop(NodeId(250), &msg, &[NodeId(200)]), Some(NodeId(300)));

        // nothing improves on a node that already owns the target region
        let owner = node(250);
        assert_eq!(owner.next_hop(NodeId(250), &msg, &[]), None);
    }

    #[test]
    fn next_hop_skips_visited_nodes() {
        let mut n = node(0);
        n.add_neighbour(NodeId(200));
        let mut msg = Message::new(Body::Join(Join {
            target: NodeId(250),
        }));
        msg.add_hop(NodeId(200));
        assert_eq!(n.next_hop(NodeId(250), &msg, &[]), None);
    }

    #[tokio::test]
    async fn handle_rejects_looping_message() {
        let mut n = node(7);
        let mut msg = Message::new(Body::Join(Join { target: NodeId(9) }));
        msg.add_hop(NodeId(3));
        msg.add_hop(NodeId(7));
        assert_eq!(n.handle(msg).await, Err(RouteError::Loop(NodeId(7))));
    }

    #[tokio::test]
    async fn handle_learns_neighbours_from_hops() {
        let mut n = node(500);
        let mut msg = Message::new(Body::Join(Join {
            target: NodeId(400),
        }));
        msg.add_hop(NodeId(300));
        msg.add_hop(NodeId(600));
        let _ = n.handle(msg).await.unwrap();
        assert!(n.knows(NodeId(300)));
        assert!(n.knows(NodeId(600)));
    }

    #[tokio::test]
    async fn authoritative_join_integrates_and_echoes() {
        let mut n = node(500);
        n.add_neighbour(NodeId(800));
        let mut msg = Message::new(Body::Join(Join {
            target: NodeId(510),
        }));
        msg.add_hop(NodeId(510));

        let outcomes = n.handle(msg).await.unwrap();
        assert!(n.knows(NodeId(510)));
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Send { to, msg } => {
                assert_eq!(*to, NodeId(510));
                match msg.body() {
                    Body::Echo(echo) => {
                        assert_eq!(echo.target, NodeId(510));
                        assert!(echo.neighbours.contains(&NodeId(500)));
                        assert!(echo.neighbours.contains(&NodeId(800)));
                    }
                    other => panic!("expected echo, got {}", other.name()),
                }
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn echo_for_self_merges_neighbours() {
        let mut n = node(500);
        let echo = Echo::new(NodeId(500), [NodeId(480), NodeId(520)]);
        let mut msg = Message::new(Body::Echo(echo));
        msg.add_hop(NodeId(480));

        let outcomes = n.handle(msg).await.unwrap();
        assert_eq!(outcomes, vec![Outcome::Handled]);
        assert!(n.knows(NodeId(480)));
        assert!(n.knows(NodeId(520)));
    }

    #[tokio::test]
    async fn reply_for_absent_target_is_unreachable() {
        let mut n = node(500);
        let get = Get::new(bytes::Bytes::from(vec![9u8; 34])).unwrap();
        let result = GetResult::for_get(&get, 0, NodeId(123));
        let mut msg = Message::new(Body::GetResult(result));
        msg.add_hop(NodeId(777));
        // 500 knows no one closer to 123, so it would have to be 123 itself
        let err = n.handle(msg).await.unwrap_err();
        assert_eq!(err, RouteError::Unreachable(NodeId(123)));
    }
}
