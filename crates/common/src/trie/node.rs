use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;

use crate::block::ContentHash;
use crate::store::{ContentStore, SignedWriter};
use crate::wire::codec;
use crate::wire::WireError;

use super::{chunk, TrieError, MAX_KEY_SIZE};

/// Number of key bits consumed per trie level.
pub const BIT_WIDTH: usize = 4;
/// Slots per node: one per possible chunk value.
pub const RADIX: usize = 1 << BIT_WIDTH;

const SLOT_LEAF: u8 = 0;
const SLOT_LINK: u8 = 1;

/// One occupied slot: either an inline key/value leaf or a content-hash
/// link to a child node held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Leaf { key: Bytes, value: ContentHash },
    Link(ContentHash),
}

impl Slot {
    fn write(&self, buf: &mut BytesMut) {
        match self {
            Slot::Leaf { key, value } => {
                buf.put_u8(SLOT_LEAF);
                codec::write_blob(buf, key);
                value.write(buf);
            }
            Slot::Link(hash) => {
                buf.put_u8(SLOT_LINK);
                hash.write(buf);
            }
        }
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        match codec::read_u8(buf, "slot tag")? {
            SLOT_LEAF => {
                let key = codec::read_blob(buf, MAX_KEY_SIZE, "leaf key")?;
                let value = ContentHash::read(buf)?;
                Ok(Slot::Leaf { key, value })
            }
            SLOT_LINK => Ok(Slot::Link(ContentHash::read(buf)?)),
            other => Err(WireError::UnknownSlotTag(other)),
        }
    }
}

/// A CHAMP node: a presence bitmap plus the occupied slots in ascending
/// slot-index order.
///
/// Nodes are immutable values; every mutation builds a new node sharing the
/// untouched slots. The serialized form is a pure function of the key/value
/// set in the subtree — ascending slot order, path compression on delete —
/// so equal contents always produce equal bytes and equal hashes, whatever
/// the operation history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Champ {
    bitmap: u16,
    slots: Vec<Slot>,
}

impl Champ {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn occupied(&self, chunk: u8) -> bool {
        self.bitmap & (1 << chunk) != 0
    }

    /// Compressed index of `chunk` among the occupied slots.
    fn index(&self, chunk: u8) -> usize {
        (self.bitmap & ((1u16 << chunk) - 1)).count_ones() as usize
    }

    fn slot(&self, chunk: u8) -> Option<&Slot> {
        if self.occupied(chunk) {
            Some(&self.slots[self.index(chunk)])
        } else {
            None
        }
    }

    /// New node with `slot` set at `chunk`, sharing every other slot.
    fn with_slot(&self, chunk: u8, slot: Slot) -> Champ {
        let mut slots = self.slots.clone();
        let index = self.index(chunk);
        if self.occupied(chunk) {
            slots[index] = slot;
        } else {
            slots.insert(index, slot);
        }
        Champ {
            bitmap: self.bitmap | (1 << chunk),
            slots,
        }
    }

    /// New node with the slot at `chunk` cleared.
    fn without_slot(&self, chunk: u8) -> Champ {
        let mut slots = self.slots.clone();
        if self.occupied(chunk) {
            slots.remove(self.index(chunk));
        }
        Champ {
            bitmap: self.bitmap & !(1 << chunk),
            slots,
        }
    }

    /// If this node holds exactly one leaf and nothing else, return it.
    /// The parent inlines it during delete (path compression).
    fn lone_leaf(&self) -> Option<&Slot> {
        match (self.slots.len(), self.slots.first()) {
            (1, Some(slot @ Slot::Leaf { .. })) => Some(slot),
            _ => None,
        }
    }

    /// Canonical byte form: `[bitmap: u16]` then slots ascending.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.bitmap);
        for slot in &self.slots {
            slot.write(&mut buf);
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        let bitmap = codec::read_u16(&mut buf, "trie bitmap")?;
        let count = bitmap.count_ones() as usize;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(Slot::read(&mut buf)?);
        }
        if buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                count: buf.remaining(),
            });
        }
        Ok(Self { bitmap, slots })
    }

    /// Look up `key`, consuming one chunk per level.
    pub fn get<'a, S: ContentStore + ?Sized>(
        &'a self,
        key: &'a [u8],
        depth: usize,
        store: &'a S,
    ) -> BoxFuture<'a, Result<Option<ContentHash>, TrieError>> {
        Box::pin(async move {
            let c = match chunk(key, depth) {
                Some(c) => c,
                // key exhausted: nothing this short is stored below here
                None => return Ok(None),
            };
            match self.slot(c) {
                None => Ok(None),
                Some(Slot::Leaf { key: stored, value }) => {
                    if stored.as_ref() == key {
                        Ok(Some(*value))
                    } else {
                        Ok(None)
                    }
                }
                Some(Slot::Link(hash)) => {
                    let child = fetch_node(store, hash).await?;
                    child.get(key, depth + 1, store).await
                }
            }
        })
    }

    /// Copy-on-write insert/update.
    ///
    /// `expected` is the compare-and-swap precondition: the value currently
    /// associated with `key` (None when absent) must equal it, or the
    /// operation fails with `ConcurrentModification` and nothing is
    /// published above the conflict point.
    ///
    /// Every node built on the way back up is published through `writer`
    /// before its hash is embedded in its parent, so the returned root hash
    /// is always fully resolvable.
    pub fn put<'a, S: ContentStore + ?Sized>(
        &'a self,
        writer: &'a SignedWriter,
        key: &'a [u8],
        depth: usize,
        expected: Option<ContentHash>,
        value: ContentHash,
        store: &'a S,
    ) -> BoxFuture<'a, Result<(Champ, ContentHash), TrieError>> {
        Box::pin(async move {
            let c = chunk(key, depth).ok_or(TrieError::InvalidKey(
                "key exhausted before reaching its slot",
            ))?;
            let updated = match self.slot(c) {
                None => {
                    check_expected(expected, None)?;
                    self.with_slot(
                        c,
                        Slot::Leaf {
                            key: Bytes::copy_from_slice(key),
                            value,
                        },
                    )
                }
                Some(Slot::Leaf {
                    key: stored,
                    value: current,
                }) if stored.as_ref() == key => {
                    check_expected(expected, Some(*current))?;
                    self.with_slot(
                        c,
                        Slot::Leaf {
                            key: stored.clone(),
                            value,
                        },
                    )
                }
                Some(Slot::Leaf {
                    key: stored,
                    value: current,
                }) => {
                    // collision at this depth with a different key
                    check_expected(expected, None)?;
                    let (_, child_hash) = split_leaves(
                        writer,
                        stored.clone(),
                        *current,
                        Bytes::copy_from_slice(key),
                        value,
                        depth + 1,
                        store,
                    )
                    .await?;
                    self.with_slot(c, Slot::Link(child_hash))
                }
                Some(Slot::Link(hash)) => {
                    let child = fetch_node(store, hash).await?;
                    let (_, child_hash) = child
                        .put(writer, key, depth + 1, expected, value, store)
                        .await?;
                    self.with_slot(c, Slot::Link(child_hash))
                }
            };
            publish(writer, store, updated).await
        })
    }

    /// Copy-on-write delete with path compression.
    ///
    /// Removing an absent key republishes the unchanged node (idempotent)
    /// and returns the same hash. A child left holding a single leaf is
    /// inlined into this node's slot, which is what keeps deletion
    /// canonical.
    pub fn remove<'a, S: ContentStore + ?Sized>(
        &'a self,
        writer: &'a SignedWriter,
        key: &'a [u8],
        depth: usize,
        store: &'a S,
    ) -> BoxFuture<'a, Result<(Champ, ContentHash), TrieError>> {
        Box::pin(async move {
            let c = match chunk(key, depth) {
                Some(c) => c,
                None => return publish(writer, store, self.clone()).await,
            };
            let updated = match self.slot(c) {
                None => self.clone(),
                Some(Slot::Leaf { key: stored, .. }) => {
                    if stored.as_ref() == key {
                        self.without_slot(c)
                    } else {
                        self.clone()
                    }
                }
                Some(Slot::Link(hash)) => {
                    let child = fetch_node(store, hash).await?;
                    let (new_child, new_hash) =
                        child.remove(writer, key, depth + 1, store).await?;
                    if let Some(leaf) = new_child.lone_leaf() {
                        self.with_slot(c, leaf.clone())
                    } else if new_child.is_empty() {
                        self.without_slot(c)
                    } else {
                        self.with_slot(c, Slot::Link(new_hash))
                    }
                }
            };
            publish(writer, store, updated).await
        })
    }
}

/// Split two colliding leaves into a subtree one level down, deepening
/// while their chunks still collide. Nodes are published deepest-first so
/// every embedded hash already resolves.
async fn split_leaves<S: ContentStore + ?Sized>(
    writer: &SignedWriter,
    a_key: Bytes,
    a_value: ContentHash,
    b_key: Bytes,
    b_value: ContentHash,
    depth: usize,
    store: &S,
) -> Result<(Champ, ContentHash), TrieError> {
    debug_assert_ne!(a_key, b_key, "equal keys are updates, never splits");

    let mut shared = Vec::new();
    let mut d = depth;
    let node = loop {
        let (ca, cb) = match (chunk(&a_key, d), chunk(&b_key, d)) {
            (Some(ca), Some(cb)) => (ca, cb),
            // one key ran out of chunks while still colliding: it is a
            // strict prefix of the other (or bitwise identical), which the
            // structure cannot represent
            _ => {
                return Err(TrieError::InvalidKey(
                    "key is a prefix of an existing key",
                ))
            }
        };
        if ca == cb {
            shared.push(ca);
            d += 1;
            continue;
        }
        break Champ::empty()
            .with_slot(
                ca,
                Slot::Leaf {
                    key: a_key.clone(),
                    value: a_value,
                },
            )
            .with_slot(
                cb,
                Slot::Leaf {
                    key: b_key.clone(),
                    value: b_value,
                },
            );
    };

    let (mut node, mut hash) = publish(writer, store, node).await?;
    for c in shared.into_iter().rev() {
        let wrapped = Champ::empty().with_slot(c, Slot::Link(hash));
        let published = publish(writer, store, wrapped).await?;
        node = published.0;
        hash = published.1;
    }
    Ok((node, hash))
}

/// Publish a node and return it with its content hash.
async fn publish<S: ContentStore + ?Sized>(
    writer: &SignedWriter,
    store: &S,
    node: Champ,
) -> Result<(Champ, ContentHash), TrieError> {
    let hash = writer.put_block(store, node.serialize()).await?;
    Ok((node, hash))
}

/// Fetch and decode a child node, re-verifying the digest before trusting
/// the bytes.
async fn fetch_node<S: ContentStore + ?Sized>(
    store: &S,
    hash: &ContentHash,
) -> Result<Champ, TrieError> {
    let bytes = store.get(hash).await?;
    if !hash.verifies(&bytes) {
        return Err(TrieError::Integrity { hash: *hash });
    }
    Ok(Champ::decode(&bytes)?)
}

fn check_expected(
    expected: Option<ContentHash>,
    current: Option<ContentHash>,
) -> Result<(), TrieError> {
    if expected != current {
        return Err(TrieError::ConcurrentModification { current });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &[u8], value_of: &[u8]) -> Slot {
        Slot::Leaf {
            key: Bytes::copy_from_slice(key),
            value: ContentHash::of(value_of),
        }
    }

    #[test]
    fn empty_node_serializes_to_bare_bitmap() {
        let node = Champ::empty();
        assert_eq!(&node.serialize()[..], &[0, 0]);
        assert_eq!(Champ::decode(&node.serialize()).unwrap(), node);
    }

    #[test]
    fn codec_round_trip() {
        let node = Champ::empty()
            .with_slot(3, leaf(b"abcdefgh", b"v1"))
            .with_slot(0, Slot::Link(ContentHash::of(b"child")))
            .with_slot(15, leaf(b"zyxwvuts", b"v2"));
        let bytes = node.serialize();
        assert_eq!(Champ::decode(&bytes).unwrap(), node);
    }

    #[test]
    fn slot_order_is_ascending_regardless_of_insertion_order() {
        let a = Champ::empty()
            .with_slot(9, leaf(b"aaaaaaaa", b"v"))
            .with_slot(2, leaf(b"bbbbbbbb", b"w"));
        let b = Champ::empty()
            .with_slot(2, leaf(b"bbbbbbbb", b"w"))
            .with_slot(9, leaf(b"aaaaaaaa", b"v"));
        assert_eq!(a.serialize(), b.serialize());
    }

    #[test]
    fn with_and_without_slot() {
        let node = Champ::empty().with_slot(5, leaf(b"kkkkkkkk", b"v"));
        assert!(node.occupied(5));
        assert_eq!(node.slot_count(), 1);
        let cleared = node.without_slot(5);
        assert!(cleared.is_empty());
        // clearing an unoccupied slot is a no-op
        assert_eq!(node.without_slot(9), node);
    }

    #[test]
    fn decode_rejects_bitmap_slot_disagreement() {
        let node = Champ::empty().with_slot(1, leaf(b"kkkkkkkk", b"v"));
        let mut bytes = node.serialize().to_vec();
        // claim a second occupied slot without providing it
        bytes[1] |= 0b100;
        assert!(matches!(
            Champ::decode(&bytes),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_slot_tag() {
        let node = Champ::empty().with_slot(0, Slot::Link(ContentHash::of(b"c")));
        let mut bytes = node.serialize().to_vec();
        bytes[2] = 7; // slot tag byte
        assert!(matches!(
            Champ::decode(&bytes),
            Err(WireError::UnknownSlotTag(7))
        ));
    }

    #[test]
    fn lone_leaf_only_matches_single_leaf_nodes() {
        let single = Champ::empty().with_slot(4, leaf(b"kkkkkkkk", b"v"));
        assert!(single.lone_leaf().is_some());
        let link_only = Champ::empty().with_slot(4, Slot::Link(ContentHash::of(b"c")));
        assert!(link_only.lone_leaf().is_none());
        let two = single.with_slot(8, leaf(b"qqqqqqqq", b"w"));
        assert!(two.lone_leaf().is_none());
        assert!(Champ::empty().lone_leaf().is_none());
    }
}
