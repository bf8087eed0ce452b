//! The DHT wire protocol
//!
//! Six message types route authenticated PUT/GET traffic and maintain ring
//! topology:
//!
//! - **JOIN / ECHO**: topology maintenance between ring-adjacent nodes
//! - **PUT / PUT_ACCEPT**: announce and accept an authenticated write
//! - **GET / GET_RESULT**: look up a block by content key
//!
//! Every message carries an append-only hop list ahead of its variant body.
//! `hops[0]` is the origin; each node appends itself as it processes the
//! message, which gives replies a return path and forwarding a loop guard.
//!
//! The byte layout is normative: `[tag: u8][hop count: u32][hop: u64 ...]`
//! followed by the variant fields, big-endian throughout, variable fields as
//! cap-checked length-prefixed blobs. `add_hop` is the only mutation a
//! message admits after construction.

pub mod codec;

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::PUBLIC_KEY_SIZE;
use crate::ring::NodeId;

pub use codec::WireError;

/// Cap on the PUT/GET key field (an encoded content hash).
pub const KEY_WIRE_MAX: usize = 64;
/// Fixed reply key size on PUT_ACCEPT/GET_RESULT.
pub const REPLY_KEY_SIZE: usize = 32;
/// Cap on the sharing-key field.
pub const SHARING_KEY_MAX: usize = 64;
/// Exact map-key size: the trie key a block files under.
pub const MAP_KEY_SIZE: usize = 32;
/// Cap on the ownership-proof field.
pub const PROOF_WIRE_MAX: usize = 4096;
/// Cap on the hop list; a ring route never legitimately approaches this.
pub const MAX_HOPS: usize = 128;
/// Cap on the ECHO neighbour set.
pub const MAX_NEIGHBOURS: usize = 256;

/// A routed message: the shared hop prefix plus one of six bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    hops: Vec<NodeId>,
    body: Body,
}

/// The six message variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Join(Join),
    Echo(Echo),
    Put(Put),
    PutAccept(PutAccept),
    Get(Get),
    GetResult(GetResult),
}

impl Body {
    fn tag(&self) -> u8 {
        match self {
            Body::Join(_) => 0,
            Body::Echo(_) => 1,
            Body::Put(_) => 2,
            Body::PutAccept(_) => 3,
            Body::Get(_) => 4,
            Body::GetResult(_) => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Body::Join(_) => "JOIN",
            Body::Echo(_) => "ECHO",
            Body::Put(_) => "PUT",
            Body::PutAccept(_) => "PUT_ACCEPT",
            Body::Get(_) => "GET",
            Body::GetResult(_) => "GET_RESULT",
        }
    }

    /// The ring id this message routes toward. Pure on the body; for the
    /// reply variants it was fixed at construction to the request's origin.
    pub fn target(&self) -> NodeId {
        match self {
            Body::Join(m) => m.target,
            Body::Echo(m) => m.target,
            Body::Put(m) => m.target(),
            Body::PutAccept(m) => m.target,
            Body::Get(m) => m.target,
            Body::GetResult(m) => m.target,
        }
    }
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self {
            hops: Vec::new(),
            body,
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn target(&self) -> NodeId {
        self.body.target()
    }

    /// Nodes this message has passed through, origin first.
    pub fn hops(&self) -> &[NodeId] {
        &self.hops
    }

    /// First hop: the node that originated the message. Empty until the
    /// origin appends itself.
    pub fn origin(&self) -> Option<NodeId> {
        self.hops.first().copied()
    }

    pub fn has_visited(&self, id: NodeId) -> bool {
        self.hops.contains(&id)
    }

    /// Append a node to the hop list. The only post-construction mutation.
    pub fn add_hop(&mut self, id: NodeId) {
        self.hops.push(id);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.body.tag());
        buf.put_u32(self.hops.len() as u32);
        for hop in &self.hops {
            buf.put_u64(hop.0);
        }
        match &self.body {
            Body::Join(m) => m.write(&mut buf),
            Body::Echo(m) => m.write(&mut buf),
            Body::Put(m) => m.write(&mut buf),
            Body::PutAccept(m) => m.write(&mut buf),
            Body::Get(m) => m.write(&mut buf),
            Body::GetResult(m) => m.write(&mut buf),
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        let tag = codec::read_u8(&mut buf, "message tag")?;
        let hop_count = codec::read_u32(&mut buf, "hop count")? as usize;
        if hop_count > MAX_HOPS {
            return Err(WireError::FieldTooLarge {
                field: "hop count",
                len: hop_count,
                max: MAX_HOPS,
            });
        }
        let mut hops = Vec::with_capacity(hop_count);
        for _ in 0..hop_count {
            hops.push(NodeId(codec::read_u64(&mut buf, "hop")?));
        }
        let body = match tag {
            0 => Body::Join(Join::read(&mut buf)?),
            1 => Body::Echo(Echo::read(&mut buf)?),
            2 => Body::Put(Put::read(&mut buf)?),
            3 => Body::PutAccept(PutAccept::read(&mut buf)?),
            4 => Body::Get(Get::read(&mut buf)?),
            5 => Body::GetResult(GetResult::read(&mut buf)?),
            other => return Err(WireError::UnknownTag(other)),
        };
        if buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                count: buf.remaining(),
            });
        }
        Ok(Self { hops, body })
    }
}

/// A node announcing itself; routed toward its own id so the current owner
/// of that ring region can integrate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Join {
    pub target: NodeId,
}

impl Join {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u64(self.target.0);
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        Ok(Self {
            target: NodeId(codec::read_u64(buf, "join target")?),
        })
    }
}

/// Neighbour-set exchange between ring-adjacent nodes.
///
/// The neighbour set is unordered and unique; it is encoded ascending so
/// equal sets encode to equal bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub target: NodeId,
    pub neighbours: BTreeSet<NodeId>,
}

impl Echo {
    pub fn new(target: NodeId, neighbours: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            target,
            neighbours: neighbours.into_iter().collect(),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u64(self.target.0);
        buf.put_u32(self.neighbours.len() as u32);
        for n in &self.neighbours {
            buf.put_u64(n.0);
        }
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        let target = NodeId(codec::read_u64(buf, "echo target")?);
        let count = codec::read_u32(buf, "neighbour count")? as usize;
        if count > MAX_NEIGHBOURS {
            return Err(WireError::FieldTooLarge {
                field: "neighbour count",
                len: count,
                max: MAX_NEIGHBOURS,
            });
        }
        let mut neighbours = BTreeSet::new();
        for _ in 0..count {
            neighbours.insert(NodeId(codec::read_u64(buf, "neighbour")?));
        }
        Ok(Self { target, neighbours })
    }
}

/// An authenticated write announcement.
///
/// Routes toward the ring id in the leading 8 bytes of `key` (the key is an
/// encoded content hash). The block bytes themselves move out-of-band once
/// the owner of that region answers with PUT_ACCEPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    key: Bytes,
    size: u32,
    owner: Bytes,
    sharing_key: Bytes,
    map_key: [u8; MAP_KEY_SIZE],
    proof: Bytes,
}

impl Put {
    pub fn new(
        key: Bytes,
        size: u32,
        owner: Bytes,
        sharing_key: Bytes,
        map_key: [u8; MAP_KEY_SIZE],
        proof: Bytes,
    ) -> Result<Self, WireError> {
        check_key(&key)?;
        check_cap(&owner, PUBLIC_KEY_SIZE, "put owner")?;
        check_cap(&sharing_key, SHARING_KEY_MAX, "put sharing key")?;
        check_cap(&proof, PROOF_WIRE_MAX, "put proof")?;
        Ok(Self {
            key,
            size,
            owner,
            sharing_key,
            map_key,
            proof,
        })
    }

    /// Target ring id: the first 8 bytes of the key.
    pub fn target(&self) -> NodeId {
        key_target(&self.key)
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn owner(&self) -> &Bytes {
        &self.owner
    }

    pub fn sharing_key(&self) -> &Bytes {
        &self.sharing_key
    }

    pub fn map_key(&self) -> &[u8; MAP_KEY_SIZE] {
        &self.map_key
    }

    pub fn proof(&self) -> &Bytes {
        &self.proof
    }

    fn write(&self, buf: &mut BytesMut) {
        codec::write_blob(buf, &self.key);
        buf.put_u32(self.size);
        codec::write_blob(buf, &self.owner);
        codec::write_blob(buf, &self.sharing_key);
        codec::write_blob(buf, &self.map_key);
        codec::write_blob(buf, &self.proof);
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        let key = codec::read_blob(buf, KEY_WIRE_MAX, "put key")?;
        check_key(&key)?;
        let size = codec::read_u32(buf, "put size")?;
        let owner = codec::read_blob(buf, PUBLIC_KEY_SIZE, "put owner")?;
        let sharing_key = codec::read_blob(buf, SHARING_KEY_MAX, "put sharing key")?;
        let map_key_blob = codec::read_blob(buf, MAP_KEY_SIZE, "put map key")?;
        if map_key_blob.len() != MAP_KEY_SIZE {
            return Err(WireError::FieldLengthMismatch {
                field: "put map key",
                expected: MAP_KEY_SIZE,
                actual: map_key_blob.len(),
            });
        }
        let mut map_key = [0u8; MAP_KEY_SIZE];
        map_key.copy_from_slice(&map_key_blob);
        let proof = codec::read_blob(buf, PROOF_WIRE_MAX, "put proof")?;
        Ok(Self {
            key,
            size,
            owner,
            sharing_key,
            map_key,
            proof,
        })
    }
}

/// Acceptance of a PUT, routed back to the PUT's origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAccept {
    pub key: [u8; REPLY_KEY_SIZE],
    pub size: u32,
    pub target: NodeId,
}

impl PutAccept {
    /// Build the reply for `put`; `origin` is the PUT's first hop.
    pub fn for_put(put: &Put, origin: NodeId) -> Self {
        Self {
            key: reply_key(put.key()),
            size: put.size(),
            target: origin,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.key);
        buf.put_u32(self.size);
        buf.put_u64(self.target.0);
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        let mut key = [0u8; REPLY_KEY_SIZE];
        codec::read_exact(buf, &mut key, "put_accept key")?;
        let size = codec::read_u32(buf, "put_accept size")?;
        let target = NodeId(codec::read_u64(buf, "put_accept target")?);
        Ok(Self { key, size, target })
    }
}

/// A block lookup, routed toward the key's ring id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    key: Bytes,
    target: NodeId,
}

impl Get {
    pub fn new(key: Bytes) -> Result<Self, WireError> {
        check_key(&key)?;
        let target = key_target(&key);
        Ok(Self { key, target })
    }

    /// Lookup with an explicit routing target. The override is a local
    /// routing concern and is not carried on the wire; a decoded GET always
    /// targets its key.
    pub fn with_target(key: Bytes, target: NodeId) -> Result<Self, WireError> {
        check_key(&key)?;
        Ok(Self { key, target })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    fn write(&self, buf: &mut BytesMut) {
        codec::write_blob(buf, &self.key);
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        let key = codec::read_blob(buf, KEY_WIRE_MAX, "get key")?;
        check_key(&key)?;
        let target = key_target(&key);
        Ok(Self { key, target })
    }
}

/// Answer to a GET, routed back to the GET's origin. `size` is the stored
/// block length; 0 when the block is absent (absence and replication lag
/// are not distinguished in-band).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    pub key: [u8; REPLY_KEY_SIZE],
    pub size: u32,
    pub target: NodeId,
}

impl GetResult {
    /// Build the reply for `get`; `origin` is the GET's first hop.
    pub fn for_get(get: &Get, size: u32, origin: NodeId) -> Self {
        Self {
            key: reply_key(get.key()),
            size,
            target: origin,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.key);
        buf.put_u32(self.size);
        buf.put_u64(self.target.0);
    }

    fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        let mut key = [0u8; REPLY_KEY_SIZE];
        codec::read_exact(buf, &mut key, "get_result key")?;
        let size = codec::read_u32(buf, "get_result size")?;
        let target = NodeId(codec::read_u64(buf, "get_result target")?);
        Ok(Self { key, size, target })
    }
}

/// Ring target of a content key: its first 8 bytes, big-endian.
fn key_target(key: &[u8]) -> NodeId {
    let mut id = [0u8; 8];
    id.copy_from_slice(&key[..8]);
    NodeId(u64::from_be_bytes(id))
}

/// Fixed-size reply key: the first 32 bytes of the request key, zero-padded
/// when the request key is shorter.
fn reply_key(key: &[u8]) -> [u8; REPLY_KEY_SIZE] {
    let mut out = [0u8; REPLY_KEY_SIZE];
    let n = key.len().min(REPLY_KEY_SIZE);
    out[..n].copy_from_slice(&key[..n]);
    out
}

fn check_key(key: &[u8]) -> Result<(), WireError> {
    if key.len() > KEY_WIRE_MAX {
        return Err(WireError::FieldTooLarge {
            field: "content key",
            len: key.len(),
            max: KEY_WIRE_MAX,
        });
    }
    // the leading 8 bytes are the routing target
    if key.len() < 8 {
        return Err(WireError::Truncated {
            field: "content key",
        });
    }
    Ok(())
}

fn check_cap(bytes: &[u8], max: usize, field: &'static str) -> Result<(), WireError> {
    if bytes.len() > max {
        return Err(WireError::FieldTooLarge {
            field,
            len: bytes.len(),
            max,
        });
    }
    Ok(())
}
