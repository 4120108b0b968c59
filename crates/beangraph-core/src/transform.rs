// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transform-step nodes and their codecs.
//!
//! A transform step (an artifact transform action plus its parameters) is
//! typically shared by many nodes, and a chained node shares its predecessor
//! with every other chain built on top of it. Both codecs are
//! [`NodeCodec`]s, so each step and each node is written once per session no
//! matter how many references reach it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{Codec, NodeCodec};
use crate::context::{ReadContext, WriteContext};
use crate::error::{CodecError, ProtocolViolation};
use crate::ident::{Hash, SharedId};

const INITIAL_TAG: u8 = 0;
const CHAINED_TAG: u8 = 1;

/// A configured transform action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformStep {
    /// Human-readable name.
    pub display_name: String,
    /// Fully-qualified action type.
    pub action_type: String,
    /// BLAKE3 digest of the isolated action parameters.
    pub parameters_digest: Hash,
}

impl TransformStep {
    /// Builds a step, digesting `parameters`.
    pub fn new(
        display_name: impl Into<String>,
        action_type: impl Into<String>,
        parameters: &[u8],
    ) -> Self {
        Self {
            display_name: display_name.into(),
            action_type: action_type.into(),
            parameters_digest: blake3::hash(parameters).into(),
        }
    }
}

/// An artifact produced by dependency resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// Owning component identifier.
    pub component_id: String,
    /// Artifact file name.
    pub file_name: String,
}

/// What a transform step node consumes.
#[derive(Debug)]
pub enum TransformInput {
    /// A resolved artifact (first step of a chain).
    Initial(ResolvedArtifact),
    /// The output of a previous step.
    Chained(Arc<TransformStepNode>),
}

/// One scheduled application of a [`TransformStep`].
#[derive(Debug)]
pub struct TransformStepNode {
    /// Build-unique node id.
    pub node_id: i64,
    /// Step applied by this node.
    pub step: Arc<TransformStep>,
    /// Attributes of the variant being transformed.
    pub source_attributes: BTreeMap<String, String>,
    /// Input of the step.
    pub input: TransformInput,
}

impl TransformStepNode {
    /// First node of a chain, consuming `artifact`.
    pub fn initial(
        node_id: i64,
        step: Arc<TransformStep>,
        source_attributes: BTreeMap<String, String>,
        artifact: ResolvedArtifact,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            step,
            source_attributes,
            input: TransformInput::Initial(artifact),
        })
    }

    /// Node consuming the output of `previous`.
    pub fn chained(
        node_id: i64,
        step: Arc<TransformStep>,
        source_attributes: BTreeMap<String, String>,
        previous: Arc<Self>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            step,
            source_attributes,
            input: TransformInput::Chained(previous),
        })
    }

    /// Predecessor, for chained nodes.
    pub fn previous(&self) -> Option<&Arc<Self>> {
        match &self.input {
            TransformInput::Initial(_) => None,
            TransformInput::Chained(previous) => Some(previous),
        }
    }

    /// Number of nodes from this one back to the start of its chain.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cursor = self.previous();
        while let Some(node) = cursor {
            len += 1;
            cursor = node.previous();
        }
        len
    }
}

/// Codec for shared [`TransformStep`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransformStepCodec;

impl NodeCodec for TransformStepCodec {
    type Node = TransformStep;

    fn encode_payload(&self, ctx: &mut WriteContext<'_>, node: &TransformStep) -> Result<(), CodecError> {
        ctx.write_string(&node.display_name)?;
        ctx.write_string(&node.action_type)?;
        ctx.write_bytes(&node.parameters_digest)
    }

    fn decode_payload(
        &self,
        ctx: &mut ReadContext<'_>,
        _id: SharedId,
    ) -> Result<Arc<TransformStep>, CodecError> {
        let display_name = ctx.read_string()?;
        let action_type = ctx.read_string()?;
        let digest = ctx.read_bytes()?;
        let parameters_digest: Hash = digest
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::Payload(format!("digest of {} bytes", digest.len())))?;
        Ok(Arc::new(TransformStep {
            display_name,
            action_type,
            parameters_digest,
        }))
    }
}

/// Codec for [`TransformStepNode`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransformStepNodeCodec {
    steps: TransformStepCodec,
}

impl TransformStepNodeCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a list of node references (e.g. a task's dependencies).
    pub fn encode_all(
        &self,
        ctx: &mut WriteContext<'_>,
        nodes: &[Arc<TransformStepNode>],
    ) -> Result<(), CodecError> {
        ctx.write_collection(nodes, |ctx, node| self.encode(ctx, node))
    }

    /// Reads a list written by [`encode_all`](Self::encode_all).
    pub fn decode_all(
        &self,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Vec<Arc<TransformStepNode>>, CodecError> {
        ctx.read_collection(|ctx| self.decode(ctx))
    }
}

impl NodeCodec for TransformStepNodeCodec {
    type Node = TransformStepNode;

    fn encode_payload(
        &self,
        ctx: &mut WriteContext<'_>,
        node: &TransformStepNode,
    ) -> Result<(), CodecError> {
        ctx.write_i64(node.node_id);
        self.steps.encode(ctx, &node.step)?;
        ctx.write_collection(&node.source_attributes, |ctx, (name, value)| {
            ctx.write_string(name)?;
            ctx.write_string(value)
        })?;
        match &node.input {
            TransformInput::Initial(artifact) => {
                ctx.write_u8(INITIAL_TAG);
                ctx.write_string(&artifact.component_id)?;
                ctx.write_string(&artifact.file_name)
            }
            TransformInput::Chained(previous) => {
                ctx.write_u8(CHAINED_TAG);
                self.encode(ctx, previous)
            }
        }
    }

    fn decode_payload(
        &self,
        ctx: &mut ReadContext<'_>,
        _id: SharedId,
    ) -> Result<Arc<TransformStepNode>, CodecError> {
        let node_id = ctx.read_i64()?;
        let step = self.steps.decode(ctx)?;
        let source_attributes = ctx
            .read_collection(|ctx| Ok((ctx.read_string()?, ctx.read_string()?)))?
            .into_iter()
            .collect();
        let input = match ctx.read_u8()? {
            INITIAL_TAG => TransformInput::Initial(ResolvedArtifact {
                component_id: ctx.read_string()?,
                file_name: ctx.read_string()?,
            }),
            CHAINED_TAG => TransformInput::Chained(self.decode(ctx)?),
            tag => {
                return Err(ProtocolViolation::InvalidTag {
                    what: "transform input",
                    tag,
                }
                .into())
            }
        };
        Ok(Arc::new(TransformStepNode {
            node_id,
            step,
            source_attributes,
            input,
        }))
    }
}
