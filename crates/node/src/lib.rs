/**
 * Greedy ring routing: the RingNode state machine,
 *  its neighbour tables, and message outcomes.
 */
pub mod router;
/**
 * In-process test network. Drives RingNode outcomes
 *  between in-memory nodes, with per-node down
 *  switches and rerouting around dead hops.
 */
pub mod testkit;

pub use router::{Outcome, RingNode, RouteError, NEIGHBOURS_PER_SIDE};
