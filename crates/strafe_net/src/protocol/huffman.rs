//! # Adaptive Huffman Coding
//!
//! Order-0 adaptive coder over byte symbols, compressing message payloads
//! after the netchan header.
//!
//! ## Design
//!
//! The tree is an arena of nodes addressed by index. Every node is also a
//! member of a doubly-linked list ranked by weight, lowest first, with the
//! NYT ("not yet transmitted") leaf always at the head. Nodes of equal
//! weight share a *block head* slot that names the highest-ranked node of
//! the block; incrementing a node first swaps it with that leader, which
//! keeps the sibling property without rebuilding the tree.
//!
//! ```text
//!            (4)                 list, lowest rank first:
//!           /   \
//!        (2)     'a'(2)          NYT(0) -> 'b'(1) -> (1) -> 'c'(1) -> (2) -> 'a'(2) -> (4)
//!       /   \
//!    (1)     'c'(1)
//!   /   \
//! NYT    'b'(1)
//! ```
//!
//! A symbol seen for the first time is sent as the NYT code followed by its
//! 8-bit literal, most significant bit first; then a new internal node and
//! leaf are spliced in where NYT was.
//!
//! Both ends must feed identical symbol sequences to their trees. There is
//! no resynchronization: one lost or corrupted message and every later one
//! decodes to garbage.

use crate::error::{NetError, NetResult};
use crate::protocol::message::Message;

/// Number of byte symbols.
const HMAX: usize = 256;
/// Symbol value of the NYT leaf.
const NYT: u16 = HMAX as u16;
/// Symbol value of internal nodes.
const INTERNAL_NODE: u16 = HMAX as u16 + 1;
/// Arena capacity; 257 leaves and 256 internal nodes at most.
const MAX_NODES: usize = 2 * HMAX + 2;

#[derive(Clone, Copy, Debug)]
struct Node {
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
    next: Option<usize>,
    prev: Option<usize>,
    /// Slot in `HuffmanTree::heads` naming this node's block leader.
    head: Option<usize>,
    weight: u32,
    symbol: u16,
}

impl Node {
    const fn leaf(symbol: u16, weight: u32) -> Self {
        Self {
            left: None,
            right: None,
            parent: None,
            next: None,
            prev: None,
            head: None,
            weight,
            symbol,
        }
    }
}

struct BitWriter {
    bytes: Vec<u8>,
    bloc: usize,
}

impl BitWriter {
    fn put_bit(&mut self, bit: u8) {
        if self.bloc & 7 == 0 {
            self.bytes.push(0);
        }
        if let Some(last) = self.bytes.last_mut() {
            *last |= bit << (self.bloc & 7);
        }
        self.bloc += 1;
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    bloc: usize,
}

impl BitReader<'_> {
    fn get_bit(&mut self) -> u8 {
        let bit = self
            .bytes
            .get(self.bloc >> 3)
            .map_or(0, |&b| (b >> (self.bloc & 7)) & 1);
        self.bloc += 1;
        bit
    }
}

/// One direction of adaptive Huffman state.
#[derive(Clone, Debug)]
pub struct HuffmanTree {
    nodes: Vec<Node>,
    heads: Vec<Option<usize>>,
    free_heads: Vec<usize>,
    root: usize,
    /// Lowest-ranked node; always the NYT leaf.
    lhead: usize,
    loc: [Option<usize>; HMAX + 1],
}

impl HuffmanTree {
    /// Creates a tree holding only the NYT leaf.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(MAX_NODES);
        nodes.push(Node::leaf(NYT, 0));
        let mut loc = [None; HMAX + 1];
        loc[NYT as usize] = Some(0);
        Self {
            nodes,
            heads: Vec::with_capacity(MAX_NODES),
            free_heads: Vec::new(),
            root: 0,
            lhead: 0,
            loc,
        }
    }

    /// Total weight of the tree, i.e. symbols seen so far.
    #[must_use]
    pub fn symbols_seen(&self) -> u32 {
        self.nodes[self.root].weight
    }

    /// Distinct byte values seen so far.
    #[must_use]
    pub fn distinct_symbols(&self) -> usize {
        self.loc[..HMAX].iter().filter(|l| l.is_some()).count()
    }

    fn alloc_head(&mut self) -> usize {
        if let Some(slot) = self.free_heads.pop() {
            slot
        } else {
            self.heads.push(None);
            self.heads.len() - 1
        }
    }

    fn free_head(&mut self, slot: usize) {
        self.heads[slot] = None;
        self.free_heads.push(slot);
    }

    fn head_of(&self, node: usize) -> Option<usize> {
        self.nodes[node].head.and_then(|slot| self.heads[slot])
    }

    fn set_head_of(&mut self, node: usize, value: Option<usize>) {
        if let Some(slot) = self.nodes[node].head {
            self.heads[slot] = value;
        }
    }

    /// Exchanges the tree positions of two nodes.
    fn swap(&mut self, a: usize, b: usize) {
        let par_a = self.nodes[a].parent;
        let par_b = self.nodes[b].parent;

        match par_a {
            Some(p) if self.nodes[p].left == Some(a) => self.nodes[p].left = Some(b),
            Some(p) => self.nodes[p].right = Some(b),
            None => self.root = b,
        }
        match par_b {
            Some(p) if self.nodes[p].left == Some(b) => self.nodes[p].left = Some(a),
            Some(p) => self.nodes[p].right = Some(a),
            None => self.root = a,
        }

        self.nodes[a].parent = par_b;
        self.nodes[b].parent = par_a;
    }

    /// Exchanges the list ranks of two nodes.
    fn swap_list(&mut self, a: usize, b: usize) {
        let next_a = self.nodes[a].next;
        self.nodes[a].next = self.nodes[b].next;
        self.nodes[b].next = next_a;

        let prev_a = self.nodes[a].prev;
        self.nodes[a].prev = self.nodes[b].prev;
        self.nodes[b].prev = prev_a;

        if self.nodes[a].next == Some(a) {
            self.nodes[a].next = Some(b);
        }
        if self.nodes[b].next == Some(b) {
            self.nodes[b].next = Some(a);
        }
        if let Some(n) = self.nodes[a].next {
            self.nodes[n].prev = Some(a);
        }
        if let Some(n) = self.nodes[b].next {
            self.nodes[n].prev = Some(b);
        }
        if let Some(p) = self.nodes[a].prev {
            self.nodes[p].next = Some(a);
        }
        if let Some(p) = self.nodes[b].prev {
            self.nodes[p].next = Some(b);
        }
    }

    fn increment(&mut self, node: Option<usize>) {
        let Some(node) = node else {
            return;
        };
        let weight = self.nodes[node].weight;

        if let Some(next) = self.nodes[node].next {
            if self.nodes[next].weight == weight {
                if let Some(leader) = self.head_of(node) {
                    if Some(leader) != self.nodes[node].parent {
                        self.swap(leader, node);
                    }
                    self.swap_list(leader, node);
                }
            }
        }

        match self.nodes[node].prev {
            Some(prev) if self.nodes[prev].weight == weight => self.set_head_of(node, Some(prev)),
            _ => {
                if let Some(slot) = self.nodes[node].head {
                    self.free_head(slot);
                }
            }
        }

        self.nodes[node].weight += 1;
        let weight = self.nodes[node].weight;

        match self.nodes[node].next {
            Some(next) if self.nodes[next].weight == weight => {
                self.nodes[node].head = self.nodes[next].head;
            }
            _ => {
                let slot = self.alloc_head();
                self.heads[slot] = Some(node);
                self.nodes[node].head = Some(slot);
            }
        }

        if let Some(parent) = self.nodes[node].parent {
            self.increment(Some(parent));
            if self.nodes[node].prev == Some(parent) {
                self.swap_list(node, parent);
                if self.head_of(node) == Some(node) {
                    self.set_head_of(node, Some(parent));
                }
            }
        }
    }

    /// Records one occurrence of `ch`, splicing in a leaf on first sight.
    pub fn add_ref(&mut self, ch: u8) {
        if let Some(leaf) = self.loc[usize::from(ch)] {
            self.increment(Some(leaf));
            return;
        }

        let lhead = self.lhead;
        let internal = self.nodes.len();
        let leaf = internal + 1;
        self.nodes.push(Node::leaf(INTERNAL_NODE, 1));
        self.nodes.push(Node::leaf(u16::from(ch), 1));

        // Internal node goes right after NYT in rank order.
        self.link_after_nyt(internal);
        // The leaf goes between NYT and the internal node.
        self.link_after_nyt(leaf);

        match self.nodes[lhead].parent {
            Some(p) if self.nodes[p].left == Some(lhead) => self.nodes[p].left = Some(internal),
            Some(p) => self.nodes[p].right = Some(internal),
            None => self.root = internal,
        }

        self.nodes[internal].right = Some(leaf);
        self.nodes[internal].left = Some(lhead);
        self.nodes[internal].parent = self.nodes[lhead].parent;
        self.nodes[lhead].parent = Some(internal);
        self.nodes[leaf].parent = Some(internal);

        self.loc[usize::from(ch)] = Some(leaf);

        let grand = self.nodes[internal].parent;
        self.increment(grand);
    }

    fn link_after_nyt(&mut self, node: usize) {
        let lhead = self.lhead;
        let old_next = self.nodes[lhead].next;
        self.nodes[node].next = old_next;
        match old_next {
            Some(n) => {
                self.nodes[n].prev = Some(node);
                if self.nodes[n].weight == 1 {
                    self.nodes[node].head = self.nodes[n].head;
                } else {
                    let slot = self.alloc_head();
                    self.heads[slot] = Some(node);
                    self.nodes[node].head = Some(slot);
                }
            }
            None => {
                let slot = self.alloc_head();
                self.heads[slot] = Some(node);
                self.nodes[node].head = Some(slot);
            }
        }
        self.nodes[lhead].next = Some(node);
        self.nodes[node].prev = Some(lhead);
    }

    /// Emits the path from the root to `node`.
    fn send(&self, node: usize, out: &mut BitWriter) {
        let mut path = [0u8; MAX_NODES];
        let mut depth = 0;
        let mut child = node;
        while let Some(parent) = self.nodes[child].parent {
            path[depth] = u8::from(self.nodes[parent].right == Some(child));
            depth += 1;
            child = parent;
        }
        for &bit in path[..depth].iter().rev() {
            out.put_bit(bit);
        }
    }

    fn transmit(&self, ch: u8, out: &mut BitWriter) {
        match self.loc[usize::from(ch)] {
            Some(leaf) => self.send(leaf, out),
            None => {
                self.send(self.lhead, out);
                for i in (0..8).rev() {
                    out.put_bit((ch >> i) & 1);
                }
            }
        }
    }

    fn receive(&self, input: &mut BitReader<'_>) -> u16 {
        let mut node = Some(self.root);
        while let Some(n) = node {
            if self.nodes[n].symbol != INTERNAL_NODE {
                return self.nodes[n].symbol;
            }
            node = if input.get_bit() == 1 {
                self.nodes[n].right
            } else {
                self.nodes[n].left
            };
        }
        0
    }

    /// Compresses `msg` in place from byte `offset` on.
    ///
    /// Output is a big-endian 16-bit symbol count followed by the codes.
    ///
    /// # Errors
    ///
    /// [`NetError::CompressionOverflow`] if the output does not fit.
    pub fn compress(&mut self, msg: &mut Message, offset: usize) -> NetResult<()> {
        let size = msg.cursize().saturating_sub(offset);
        if size == 0 {
            return Ok(());
        }
        if size > usize::from(u16::MAX) {
            return Err(NetError::CompressionOverflow {
                needed: size,
                maxsize: usize::from(u16::MAX),
            });
        }

        let mut out = BitWriter {
            bytes: Vec::with_capacity(size + 2),
            bloc: 0,
        };
        out.bytes.extend_from_slice(&(size as u16).to_be_bytes());
        out.bloc = 16;

        let payload = msg.data()[offset..].to_vec();
        for &ch in &payload {
            self.transmit(ch, &mut out);
            self.add_ref(ch);
        }

        let needed = offset + out.bytes.len();
        if needed > msg.maxsize() {
            return Err(NetError::CompressionOverflow {
                needed,
                maxsize: msg.maxsize(),
            });
        }
        msg.buffer_mut()[offset..needed].copy_from_slice(&out.bytes);
        msg.set_cursize(needed);
        Ok(())
    }

    /// Reverses [`HuffmanTree::compress`] in place.
    ///
    /// Never reads past the compressed bytes nor writes past `maxsize`;
    /// truncated input stops decoding early.
    pub fn decompress(&mut self, msg: &mut Message, offset: usize) {
        let size = msg.cursize().saturating_sub(offset);
        if size == 0 {
            return;
        }
        let input = msg.data()[offset..].to_vec();
        let declared = if size >= 2 {
            usize::from(u16::from_be_bytes([input[0], input[1]]))
        } else {
            0
        };
        let count = declared.min(msg.maxsize() - offset);

        let mut reader = BitReader {
            bytes: &input,
            bloc: 16,
        };
        let mut decoded = Vec::with_capacity(count);
        for _ in 0..count {
            if reader.bloc >> 3 >= size {
                break;
            }
            let mut ch = self.receive(&mut reader);
            if ch == NYT {
                ch = 0;
                for _ in 0..8 {
                    ch = (ch << 1) | u16::from(reader.get_bit());
                }
            }
            let byte = ch as u8;
            decoded.push(byte);
            self.add_ref(byte);
        }

        let end = offset + decoded.len();
        msg.buffer_mut()[offset..end].copy_from_slice(&decoded);
        msg.set_cursize(end);
    }
}

impl Default for HuffmanTree {
    fn default() -> Self {
        Self::new()
    }
}

/// The compressor and decompressor trees owned by one connection.
#[derive(Clone, Debug, Default)]
pub struct Huffman {
    compressor: HuffmanTree,
    decompressor: HuffmanTree,
}

impl Huffman {
    /// Creates a fresh pair.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compresses an outgoing payload after `offset`.
    ///
    /// # Errors
    ///
    /// See [`HuffmanTree::compress`].
    pub fn compress(&mut self, msg: &mut Message, offset: usize) -> NetResult<()> {
        self.compressor.compress(msg, offset)
    }

    /// Decompresses an incoming payload after `offset`.
    pub fn decompress(&mut self, msg: &mut Message, offset: usize) {
        self.decompressor.decompress(msg, offset);
    }

    /// Discards all learned statistics in both directions.
    pub fn reset(&mut self) {
        self.compressor = HuffmanTree::new();
        self.decompressor = HuffmanTree::new();
    }

    /// Outgoing tree, for statistics.
    #[must_use]
    pub const fn compressor(&self) -> &HuffmanTree {
        &self.compressor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn message_with(header: &[u8], payload: &[u8]) -> Message {
        let mut msg = Message::new(4096);
        msg.write_data(header).unwrap();
        msg.write_data(payload).unwrap();
        msg
    }

    fn check_weights(tree: &HuffmanTree, node: usize) -> u32 {
        let n = tree.nodes[node];
        match (n.left, n.right) {
            (Some(l), Some(r)) => {
                let sum = check_weights(tree, l) + check_weights(tree, r);
                assert_eq!(n.weight, sum, "internal node weight must equal its children");
                assert_eq!(tree.nodes[l].parent, Some(node));
                assert_eq!(tree.nodes[r].parent, Some(node));
                n.weight
            }
            (None, None) => n.weight,
            _ => panic!("internal node with one child"),
        }
    }

    #[test]
    fn test_round_trip_single_message() {
        let payload = b"the quick brown fox jumps over the lazy dog, again and again";
        let mut sender = Huffman::new();
        let mut receiver = Huffman::new();

        let mut msg = message_with(&[1, 2, 3, 4], payload);
        sender.compress(&mut msg, 4).unwrap();
        assert_eq!(&msg.data()[..4], &[1, 2, 3, 4]);
        assert_eq!(&msg.data()[4..6], &(payload.len() as u16).to_be_bytes());

        receiver.decompress(&mut msg, 4);
        assert_eq!(&msg.data()[..4], &[1, 2, 3, 4]);
        assert_eq!(&msg.data()[4..], payload);
    }

    #[test]
    fn test_persistent_stream_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut sender = Huffman::new();
        let mut receiver = Huffman::new();
        let mut sizes = Vec::new();

        for _ in 0..20 {
            let len = rng.gen_range(200..600);
            // Skewed distribution so the coder has something to learn.
            let payload: Vec<u8> = (0..len)
                .map(|_| if rng.gen_bool(0.8) { rng.gen_range(0..8) } else { rng.gen() })
                .collect();

            let mut msg = message_with(&[0xAA; 8], &payload);
            sender.compress(&mut msg, 8).unwrap();
            sizes.push((payload.len(), msg.cursize() - 8));
            receiver.decompress(&mut msg, 8);
            assert_eq!(&msg.data()[8..], payload.as_slice());
        }

        let (raw, packed) = sizes.last().copied().unwrap();
        assert!(packed < raw, "skewed payload should shrink: {packed} >= {raw}");
        assert_eq!(sender.compressor().symbols_seen(), receiver.decompressor.symbols_seen());
    }

    #[test]
    fn test_every_symbol() {
        let payload: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        let mut sender = HuffmanTree::new();
        let mut receiver = HuffmanTree::new();

        let mut msg = message_with(&[], &payload);
        sender.compress(&mut msg, 0).unwrap();
        receiver.decompress(&mut msg, 0);
        assert_eq!(msg.data(), payload.as_slice());
        assert_eq!(sender.distinct_symbols(), 256);
        assert!(sender.nodes.len() <= MAX_NODES);
    }

    #[test]
    fn test_tree_weights_stay_consistent() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut tree = HuffmanTree::new();
        for i in 0..5000u32 {
            let ch = if i % 3 == 0 { rng.gen() } else { rng.gen_range(b'a'..=b'f') };
            tree.add_ref(ch);
        }
        assert_eq!(tree.symbols_seen(), 5000);
        assert_eq!(check_weights(&tree, tree.root), 5000);
        assert_eq!(tree.nodes[tree.lhead].symbol, NYT);
        assert_eq!(tree.nodes[tree.lhead].weight, 0);
    }

    #[test]
    fn test_empty_payload_untouched() {
        let mut codec = Huffman::new();
        let mut msg = message_with(&[9, 9], &[]);
        codec.compress(&mut msg, 2).unwrap();
        assert_eq!(msg.data(), &[9, 9]);
        codec.decompress(&mut msg, 2);
        assert_eq!(msg.data(), &[9, 9]);
    }

    #[test]
    fn test_truncated_input_is_bounded() {
        let payload = vec![7u8; 300];
        let mut sender = HuffmanTree::new();
        let mut msg = message_with(&[], &payload);
        sender.compress(&mut msg, 0).unwrap();

        let cut = msg.data()[..msg.cursize() / 2].to_vec();
        let mut truncated = Message::from_bytes(&cut, 64);
        HuffmanTree::new().decompress(&mut truncated, 0);
        assert!(truncated.cursize() <= truncated.maxsize());
        assert!(truncated.cursize() < payload.len());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut codec = Huffman::new();
        let mut msg = message_with(&[], b"abcabc");
        codec.compress(&mut msg, 0).unwrap();
        assert_eq!(codec.compressor().symbols_seen(), 6);
        codec.reset();
        assert_eq!(codec.compressor().symbols_seen(), 0);
    }
}
