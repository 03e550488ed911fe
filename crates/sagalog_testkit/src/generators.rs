//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entries that satisfy the entry
//! invariants, and whole saga executions in a plausible order.

use proptest::prelude::*;
use sagalog_core::{EntryId, SagaLogEntry, SagaLogEntryBuilder, SAGA_NODE_ID};
use serde_json::{Map, Value};

/// Strategy for generating entry ids.
pub fn entry_id_strategy() -> impl Strategy<Value = EntryId> {
    any::<u64>().prop_map(EntryId::new)
}

/// Strategy for generating execution ids.
pub fn execution_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9_.:-]{0,35}").expect("Invalid regex")
}

/// Strategy for generating action node ids.
pub fn action_node_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_-]{0,15}")
        .expect("Invalid regex")
        .prop_filter("Action node must not be the saga node", |s| s != SAGA_NODE_ID)
}

/// Strategy for generating saga names, which may contain spaces.
pub fn saga_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 _.:-]{0,32}").expect("Invalid regex")
}

/// Strategy for generating JSON object payloads.
pub fn json_payload_strategy() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::String),
    ];
    let value = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    });

    prop::collection::btree_map("[a-z]{1,8}", value, 0..4).prop_map(|fields| {
        let object: Map<String, Value> = fields.into_iter().collect();
        Value::Object(object).to_string()
    })
}

/// Strategy for generating builders of every entry type, without ids.
pub fn entry_builder_strategy() -> impl Strategy<Value = SagaLogEntryBuilder> {
    let b = SagaLogEntryBuilder::new;
    prop_oneof![
        (execution_id_strategy(), saga_name_strategy(), json_payload_strategy())
            .prop_map(move |(x, name, json)| b().start_saga(x, name, json)),
        execution_id_strategy().prop_map(move |x| b().end_saga(x)),
        (execution_id_strategy(), action_node_strategy())
            .prop_map(move |(x, node)| b().start_action(x, node)),
        (execution_id_strategy(), action_node_strategy(), json_payload_strategy())
            .prop_map(move |(x, node, json)| b().end_action(x, node, json)),
        (execution_id_strategy(), action_node_strategy())
            .prop_map(move |(x, node)| b().abort(x, node)),
        execution_id_strategy().prop_map(move |x| b().abort(x, SAGA_NODE_ID)),
        (execution_id_strategy(), action_node_strategy())
            .prop_map(move |(x, node)| b().comp_done(x, node)),
    ]
}

/// Strategy for generating complete, valid entries.
pub fn entry_strategy() -> impl Strategy<Value = SagaLogEntry> {
    (entry_builder_strategy(), entry_id_strategy()).prop_map(|(builder, id)| {
        builder
            .id(id)
            .build()
            .expect("Generated builder should be valid")
    })
}

/// Strategy for generating one successful saga execution.
///
/// Every action starts and ends between the saga's start and end.
pub fn saga_execution_strategy() -> impl Strategy<Value = Vec<SagaLogEntryBuilder>> {
    (
        execution_id_strategy(),
        saga_name_strategy(),
        json_payload_strategy(),
        prop::collection::btree_set(action_node_strategy(), 0..6),
        json_payload_strategy(),
    )
        .prop_map(|(execution_id, saga_name, input, actions, output)| {
            let b = SagaLogEntryBuilder::new;
            let mut builders = vec![b().start_saga(&execution_id, saga_name, input)];
            for action in &actions {
                builders.push(b().start_action(&execution_id, action));
            }
            for action in &actions {
                builders.push(b().end_action(&execution_id, action, output.clone()));
            }
            builders.push(b().end_saga(&execution_id));
            builders
        })
}
