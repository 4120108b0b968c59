// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared-identity round trips: DAGs, cycles, beans and transform graphs.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use beangraph_core::transform::TransformStepNodeCodec;
use beangraph_core::{
    BeanStateReaderLookup, BeanStateWriterLookup, Codec, CodecError, CodecLimits, NodeCodec,
    ProtocolViolation, ReadContext, SharedId, WriteContext, decode_from_bytes, encode_to_vec,
};
use beangraph_dry_tests::{Project, Task, diamond, fixture_catalog, project_with_tasks};

#[derive(Debug)]
struct Leaf(i64);

#[derive(Default)]
struct LeafCodec {
    payloads_written: AtomicUsize,
    payloads_read: AtomicUsize,
}

impl NodeCodec for LeafCodec {
    type Node = Leaf;

    fn encode_payload(&self, ctx: &mut WriteContext<'_>, node: &Leaf) -> Result<(), CodecError> {
        self.payloads_written.fetch_add(1, Ordering::SeqCst);
        ctx.write_i64(node.0);
        Ok(())
    }

    fn decode_payload(&self, ctx: &mut ReadContext<'_>, _id: SharedId) -> Result<Arc<Leaf>, CodecError> {
        self.payloads_read.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Leaf(ctx.read_i64()?)))
    }
}

struct Ring {
    value: i64,
    next: OnceLock<Arc<Ring>>,
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring").field("value", &self.value).finish_non_exhaustive()
    }
}

fn ring(values: &[i64]) -> Arc<Ring> {
    let nodes: Vec<Arc<Ring>> = values
        .iter()
        .map(|&value| {
            Arc::new(Ring {
                value,
                next: OnceLock::new(),
            })
        })
        .collect();
    for (i, node) in nodes.iter().enumerate() {
        node.next.set(Arc::clone(&nodes[(i + 1) % nodes.len()])).unwrap();
    }
    Arc::clone(&nodes[0])
}

/// Ring codec; `early_bind` toggles binding before the recursive decode.
struct RingCodec {
    early_bind: bool,
}

impl NodeCodec for RingCodec {
    type Node = Ring;

    fn encode_payload(&self, ctx: &mut WriteContext<'_>, node: &Ring) -> Result<(), CodecError> {
        ctx.write_i64(node.value);
        let next = node
            .next
            .get()
            .ok_or_else(|| CodecError::Payload("ring not closed".into()))?;
        self.encode(ctx, next)
    }

    fn decode_payload(&self, ctx: &mut ReadContext<'_>, id: SharedId) -> Result<Arc<Ring>, CodecError> {
        let node = Arc::new(Ring {
            value: ctx.read_i64()?,
            next: OnceLock::new(),
        });
        if self.early_bind {
            ctx.register_shared(id, &node)?;
        }
        let next = self.decode(ctx)?;
        node.next
            .set(next)
            .map_err(|_| CodecError::Payload("ring link set twice".into()))?;
        Ok(node)
    }
}

struct LeafPairs<'a>(&'a LeafCodec);

impl Codec for LeafPairs<'_> {
    type Value = Vec<Arc<Leaf>>;

    fn encode(&self, ctx: &mut WriteContext<'_>, value: &Self::Value) -> Result<(), CodecError> {
        ctx.write_collection(value, |ctx, leaf| self.0.encode(ctx, leaf))
    }

    fn decode(&self, ctx: &mut ReadContext<'_>) -> Result<Self::Value, CodecError> {
        ctx.read_collection(|ctx| self.0.decode(ctx))
    }
}

#[test]
fn shared_leaf_is_written_once_and_shared_after_decode() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();
    let leaf_codec = LeafCodec::default();
    let codec = LeafPairs(&leaf_codec);

    let shared = Arc::new(Leaf(42));
    let other = Arc::new(Leaf(7));
    let graph = vec![Arc::clone(&shared), other, Arc::clone(&shared), shared];

    let bytes = encode_to_vec(&codec, &graph, &writers, CodecLimits::default()).unwrap();
    assert_eq!(leaf_codec.payloads_written.load(Ordering::SeqCst), 2);

    let decoded = decode_from_bytes(&codec, &bytes, &readers, CodecLimits::default()).unwrap();
    assert_eq!(leaf_codec.payloads_read.load(Ordering::SeqCst), 2);
    assert_eq!(decoded.len(), 4);
    assert!(Arc::ptr_eq(&decoded[0], &decoded[2]));
    assert!(Arc::ptr_eq(&decoded[0], &decoded[3]));
    assert!(!Arc::ptr_eq(&decoded[0], &decoded[1]));
    assert_eq!(decoded[0].0, 42);
    assert_eq!(decoded[1].0, 7);
}

#[test]
fn equal_but_distinct_values_stay_distinct() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();
    let leaf_codec = LeafCodec::default();
    let codec = LeafPairs(&leaf_codec);

    let graph = vec![Arc::new(Leaf(1)), Arc::new(Leaf(1))];
    let bytes = encode_to_vec(&codec, &graph, &writers, CodecLimits::default()).unwrap();
    let decoded = decode_from_bytes(&codec, &bytes, &readers, CodecLimits::default()).unwrap();
    assert!(!Arc::ptr_eq(&decoded[0], &decoded[1]));
}

#[test]
fn ids_are_dense_in_first_encounter_order() {
    let writers = BeanStateWriterLookup::empty();
    let codec = LeafCodec::default();
    let a = Arc::new(Leaf(0));
    let b = Arc::new(Leaf(1));

    let mut ctx = WriteContext::new(&writers);
    codec.encode(&mut ctx, &b).unwrap();
    codec.encode(&mut ctx, &a).unwrap();
    codec.encode(&mut ctx, &b).unwrap();
    assert_eq!(ctx.shared_count(), 2);
    let bytes = ctx.finish().unwrap();

    let mut expected = vec![0x01, 0x00];
    expected.extend_from_slice(&1i64.to_le_bytes());
    expected.extend_from_slice(&[0x01, 0x01]);
    expected.extend_from_slice(&0i64.to_le_bytes());
    expected.extend_from_slice(&[0x02, 0x00]);
    assert_eq!(bytes, expected);
}

#[test]
fn every_session_starts_at_id_zero() {
    let writers = BeanStateWriterLookup::empty();
    let codec = LeafCodec::default();
    let leaf = Arc::new(Leaf(5));

    let first = encode_to_vec(&codec, &leaf, &writers, CodecLimits::default()).unwrap();
    let second = encode_to_vec(&codec, &leaf, &writers, CodecLimits::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(&first[..2], &[0x01, 0x00]);
}

#[test]
fn ring_round_trips_with_early_binding() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();
    let codec = RingCodec { early_bind: true };

    let original = ring(&[1, 2, 3]);
    let bytes = encode_to_vec(&codec, &original, &writers, CodecLimits::default()).unwrap();
    let head = decode_from_bytes(&codec, &bytes, &readers, CodecLimits::default()).unwrap();

    let second = head.next.get().unwrap();
    let third = second.next.get().unwrap();
    assert_eq!((head.value, second.value, third.value), (1, 2, 3));
    assert!(Arc::ptr_eq(third.next.get().unwrap(), &head));
}

#[test]
fn self_loop_round_trips() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();
    let codec = RingCodec { early_bind: true };

    let original = ring(&[9]);
    let bytes = encode_to_vec(&codec, &original, &writers, CodecLimits::default()).unwrap();
    let decoded = decode_from_bytes(&codec, &bytes, &readers, CodecLimits::default()).unwrap();
    assert!(Arc::ptr_eq(decoded.next.get().unwrap(), &decoded));
}

#[test]
fn ring_without_early_binding_hits_unbound_reference() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();

    let bytes = encode_to_vec(
        &RingCodec { early_bind: true },
        &ring(&[1, 2]),
        &writers,
        CodecLimits::default(),
    )
    .unwrap();
    let err = decode_from_bytes(
        &RingCodec { early_bind: false },
        &bytes,
        &readers,
        CodecLimits::default(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        CodecError::Protocol(ProtocolViolation::UnboundReference { id: SharedId(0) })
    );
}

#[test]
fn project_task_cycle_round_trips() {
    let (writers, readers) = fixture_catalog().unwrap().into_lookups();
    let original = project_with_tasks("echo", &["design", "build", "ship"]);

    let mut w = WriteContext::new(&writers);
    w.write_bean_of(&original).unwrap();
    assert_eq!(w.shared_count(), 4);
    let bytes = w.finish().unwrap();

    let mut r = ReadContext::new(&bytes, &readers);
    let project = r.read_bean_of::<Project>().unwrap();
    r.finish().unwrap();

    assert_eq!(project.name(), "echo");
    let titles: Vec<&str> = project.tasks().iter().map(|t| t.title()).collect();
    assert_eq!(titles, ["design", "build", "ship"]);
    for task in project.tasks() {
        assert!(Arc::ptr_eq(task.project().unwrap(), &project));
    }
    assert!(Arc::ptr_eq(&project.tasks()[1].blocked_by()[0], &project.tasks()[0]));
    assert!(Arc::ptr_eq(&project.tasks()[2].blocked_by()[0], &project.tasks()[1]));
}

#[test]
fn cycle_can_be_entered_from_any_bean() {
    let (writers, readers) = fixture_catalog().unwrap().into_lookups();
    let original = project_with_tasks("p", &["a", "b"]);
    let entry = Arc::clone(&original.tasks()[1]);

    let mut w = WriteContext::new(&writers);
    w.write_bean_of(&entry).unwrap();
    w.write_bean_of(&original).unwrap();
    let bytes = w.finish().unwrap();

    let mut r = ReadContext::new(&bytes, &readers);
    let task = r.read_bean_of::<Task>().unwrap();
    let project = r.read_bean_of::<Project>().unwrap();
    r.finish().unwrap();

    assert_eq!(task.title(), "b");
    assert!(Arc::ptr_eq(task.project().unwrap(), &project));
    assert!(Arc::ptr_eq(&project.tasks()[1], &task));
    assert_eq!(project.tasks()[0].title(), "a");
}

#[test]
fn bean_strategies_are_built_once_per_lookup() {
    let (writers, readers) = fixture_catalog().unwrap().into_lookups();
    for _ in 0..3 {
        let bytes = encode_to_vec(
            &TransformStepNodeCodec::new(),
            &diamond()[0],
            &writers,
            CodecLimits::default(),
        )
        .unwrap();
        decode_from_bytes(&TransformStepNodeCodec::new(), &bytes, &readers, CodecLimits::default())
            .unwrap();

        let mut w = WriteContext::new(&writers);
        w.write_bean_of(&project_with_tasks("p", &["t"])).unwrap();
        let bytes = w.finish().unwrap();
        let mut r = ReadContext::new(&bytes, &readers);
        r.read_bean_of::<Project>().unwrap();
    }
    assert_eq!(writers.cached_len(), 2);
    assert_eq!(readers.cached_len(), 2);
}

#[test]
fn transform_diamond_keeps_shared_root_and_step() {
    let writers = BeanStateWriterLookup::empty();
    let readers = BeanStateReaderLookup::empty();
    let codec = TransformStepNodeCodec::new();
    let nodes = diamond();

    let mut w = WriteContext::new(&writers);
    codec.encode_all(&mut w, &nodes).unwrap();
    // left, its step, root, right
    assert_eq!(w.shared_count(), 4);
    let bytes = w.finish().unwrap();

    let mut r = ReadContext::new(&bytes, &readers);
    let decoded = codec.decode_all(&mut r).unwrap();
    r.finish().unwrap();

    let [left, right] = [&decoded[0], &decoded[1]];
    assert_eq!((left.node_id, right.node_id), (2, 3));
    let root = left.previous().unwrap();
    assert!(Arc::ptr_eq(root, right.previous().unwrap()));
    assert_eq!(root.node_id, 1);
    assert!(Arc::ptr_eq(&left.step, &right.step));
    assert!(Arc::ptr_eq(&left.step, &root.step));
    assert_eq!(left.step.display_name, "unzip");
    assert_eq!(left.source_attributes["variant"], "debug");
    assert_eq!(right.source_attributes["variant"], "release");
}
