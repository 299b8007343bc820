#![no_main]

use libfuzzer_sys::fuzz_target;
use lore_graph::{Compiler, MergeCompiler, PersistenceOp};
use lore_ingest::parse_graph_fragment;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(fragment) = parse_graph_fragment(&raw) else {
        return;
    };
    let Ok(ops) = MergeCompiler.compile(&fragment) else {
        return;
    };

    let first_relationship = ops
        .iter()
        .position(|op| matches!(op, PersistenceOp::MergeRelationship { .. }))
        .unwrap_or(ops.len());
    assert!(ops[first_relationship..]
        .iter()
        .all(|op| matches!(op, PersistenceOp::MergeRelationship { .. })));
    for op in &ops {
        let statement = op.to_cypher();
        assert!(!statement.text.contains("``"));
    }
});
