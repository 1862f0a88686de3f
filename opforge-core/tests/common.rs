use opforge_core::attribute::{attrs, AttrValue};
use opforge_core::node::{OperatorNode, SlotMap};
use std::sync::Once;

static INIT: Once = Once::new();

// Initializes env_logger once per test binary; later calls are no-ops.
#[allow(dead_code)]
pub fn setup_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Slot bindings from `(slot, variable)` pairs; a repeated slot binds several
/// variables.
#[allow(dead_code)]
pub fn slots(pairs: &[(&str, &str)]) -> SlotMap {
    let mut map = SlotMap::new();
    for (slot, var) in pairs {
        map.entry(slot.to_string()).or_default().push(var.to_string());
    }
    map
}

#[allow(dead_code)]
pub fn kldiv_node(x: &str, target: &str, loss: &str, reduction: &str) -> OperatorNode {
    OperatorNode::builder("kldiv_loss")
        .input("X", [x])
        .input("Target", [target])
        .output("Loss", [loss])
        .attrs(attrs([("reduction", AttrValue::from(reduction))]))
        .build()
}
