// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transform-step graph builders.

use beangraph_core::transform::{ResolvedArtifact, TransformStep, TransformStepNode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step named `name` with parameters derived from the name.
pub fn step(name: &str) -> Arc<TransformStep> {
    Arc::new(TransformStep::new(
        name,
        format!("org.example.transforms.{name}"),
        name.as_bytes(),
    ))
}

/// Artifact `<component>.jar` of `component`.
pub fn artifact(component: &str) -> ResolvedArtifact {
    ResolvedArtifact {
        component_id: component.to_string(),
        file_name: format!("{component}.jar"),
    }
}

fn attributes(variant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("artifactType".to_string(), "jar".to_string()),
        ("variant".to_string(), variant.to_string()),
    ])
}

/// `len` nodes chained on one another, all applying the same step.
///
/// Returns the nodes in chain order (initial first). Node ids are `1..=len`.
pub fn chain(len: usize) -> Vec<Arc<TransformStepNode>> {
    let shared = step("minify");
    let mut nodes: Vec<Arc<TransformStepNode>> = Vec::with_capacity(len);
    for id in (1..).take(len) {
        let node = match nodes.last() {
            None => TransformStepNode::initial(
                id,
                Arc::clone(&shared),
                attributes("main"),
                artifact("lib"),
            ),
            Some(prev) => TransformStepNode::chained(
                id,
                Arc::clone(&shared),
                attributes("main"),
                Arc::clone(prev),
            ),
        };
        nodes.push(node);
    }
    nodes
}

/// Diamond: one initial node `root`, two nodes `left`/`right` chained on it.
///
/// Returns `[left, right]`; both reach `root` and share one step instance.
pub fn diamond() -> [Arc<TransformStepNode>; 2] {
    let unzip = step("unzip");
    let root =
        TransformStepNode::initial(1, Arc::clone(&unzip), attributes("main"), artifact("core"));
    let left =
        TransformStepNode::chained(2, Arc::clone(&unzip), attributes("debug"), Arc::clone(&root));
    let right = TransformStepNode::chained(3, unzip, attributes("release"), root);
    [left, right]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn diamond_shares_root_and_step() {
        let [left, right] = diamond();
        assert!(Arc::ptr_eq(left.previous().unwrap(), right.previous().unwrap()));
        assert!(Arc::ptr_eq(&left.step, &right.step));
    }

    #[test]
    fn chain_links_each_node_to_its_predecessor() {
        let nodes = chain(4);
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[3].chain_len(), 4);
        assert_eq!(nodes[3].node_id, 4);
        assert!(nodes[0].previous().is_none());
    }
}
