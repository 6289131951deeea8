//! Determinism and containment properties of the interaction graph.
//!
//! The same edge set inserted in different orders must yield the same
//! partition, and resonance must never leak outside the source's component.

#![allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]

use std::collections::BTreeSet;

use concord_topology::{Attenuation, InteractionGraph, TopologyManager, TopologyTransition};
use concord_types::AgentId;

fn graph_from(edges: &[(u64, u64)]) -> InteractionGraph {
    let mut g = InteractionGraph::new();
    for &(a, b) in edges {
        g.update_edge(AgentId(a), AgentId(b), 1.0).unwrap();
    }
    g
}

#[test]
fn two_pairs_form_two_components() {
    let g = graph_from(&[(1, 2), (3, 4)]);
    let partition = g.detect_fragmentation().unwrap();
    assert_eq!(partition.count(), 2);
    let expected: Vec<BTreeSet<AgentId>> = vec![
        [AgentId(1), AgentId(2)].into_iter().collect(),
        [AgentId(3), AgentId(4)].into_iter().collect(),
    ];
    assert_eq!(partition.components, expected);
}

#[test]
fn resonance_stays_in_source_component() {
    let g = graph_from(&[(1, 2), (3, 4)]);
    let map = g
        .propagate_resonance(AgentId(1), 1.0, Attenuation::default())
        .unwrap();
    let reached: Vec<AgentId> = map.keys().copied().collect();
    assert_eq!(reached, vec![AgentId(1), AgentId(2)]);
    assert!(!map.contains_key(&AgentId(3)));
    assert!(!map.contains_key(&AgentId(4)));
}

#[test]
fn partition_ignores_insertion_order() {
    let edges = [(5, 1), (2, 9), (9, 4), (7, 7), (3, 6), (6, 8), (1, 2), (10, 11)];
    let forward = graph_from(&edges);
    let mut reversed_edges = edges;
    reversed_edges.reverse();
    let backward = graph_from(&reversed_edges);

    let p1 = forward.detect_fragmentation().unwrap();
    let p2 = backward.detect_fragmentation().unwrap();
    assert_eq!(p1, p2);
    assert_eq!(p1.count(), 4);
    assert_eq!(p1.components[0].len(), 5);
}

#[test]
fn containment_holds_for_every_source() {
    let g = graph_from(&[(1, 2), (2, 3), (4, 5), (6, 6), (7, 8), (8, 9), (9, 7)]);
    let partition = g.detect_fragmentation().unwrap();
    for source in g.nodes() {
        let map = g
            .propagate_resonance(source, 3.0, Attenuation::default())
            .unwrap();
        let component = partition.component_of(source).unwrap();
        let reached: BTreeSet<AgentId> = map.keys().copied().collect();
        assert_eq!(reached, partition.components[component]);
        assert_eq!(map[&source], 3.0);
    }
}

#[test]
fn decay_fragments_then_new_interactions_recover() {
    let mut m = TopologyManager::new(1, Attenuation::default(), 0.5, 0.2).unwrap();
    m.record_interaction(AgentId(1), AgentId(2), 1.0).unwrap();
    m.record_interaction(AgentId(2), AgentId(3), 0.3).unwrap();
    assert!(!m.check(0).unwrap().partition.is_fragmented());

    // 0.3 -> 0.15 falls under the threshold; 1.0 -> 0.5 survives.
    m.decay().unwrap();
    let check = m.check(1).unwrap();
    assert_eq!(check.transition, TopologyTransition::Fragmented { components: 2 });

    m.record_interaction(AgentId(3), AgentId(1), 1.0).unwrap();
    assert_eq!(m.check(2).unwrap().transition, TopologyTransition::Recovered);
}
