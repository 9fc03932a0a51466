//! Tests for EntityGraph internals: rollback, the fixup guard and the consistency checker.

use super::*;
use crate::{
    entitykey::EntityKey,
    error::CacheError,
    event::{EntityAction, EntityEvent, EventFilter},
    properties::{DataValue, PropertyValue, Uuid},
    state::EntityState,
    tests::helpers::{assert_consistent, create_test_graph, drain},
};
use test_log::test;

#[test]
fn test_failed_transitive_attach_rolls_back_everything() {
    let (mut graph, cache) = create_test_graph();
    let existing = graph
        .create_attached(cache, "Order", vec![("orderID", 1.into())], EntityState::Unchanged)
        .unwrap();

    let customer = graph
        .create_entity("Customer", vec![("customerID", Uuid::new_v4().into())])
        .unwrap();
    let clashing = graph.create_entity("Order", vec![("orderID", 1.into())]).unwrap();
    let other = graph.create_entity("Order", vec![("orderID", 2.into())]).unwrap();
    graph.push(customer, "orders", clashing).unwrap();
    graph.push(customer, "orders", other).unwrap();
    let mut events = graph.subscribe(EventFilter::All);

    let err = graph
        .attach_entity(cache, customer, EntityState::Unchanged)
        .unwrap_err();
    assert!(matches!(err, CacheError::DuplicateKey { .. }));

    for id in [customer, clashing, other] {
        assert_eq!(graph.entity_state(id).unwrap(), EntityState::Detached);
        assert_eq!(graph.aspect(id).unwrap().entity_manager(), None);
    }
    assert_eq!(graph.manager(cache).unwrap().len(), 1);
    assert_eq!(
        graph.find_entity_by_key(cache, &EntityKey::new("Order", [1])),
        Some(existing)
    );
    assert_eq!(
        graph.collection(customer, "orders").unwrap().as_slice(),
        &[clashing, other]
    );
    assert!(drain(&mut events).is_empty());
    assert!(graph.journal.is_none());
    assert!(graph.fixup_guard.is_empty());
    assert_consistent(&graph);
}

#[test]
fn test_rollback_forgets_generated_temp_keys() {
    let (mut graph, cache) = create_test_graph();
    graph
        .create_attached(cache, "Order", vec![("orderID", 1.into())], EntityState::Unchanged)
        .unwrap();
    let customer = graph.create_entity("Customer", vec![]).unwrap();
    let clashing = graph.create_entity("Order", vec![("orderID", 1.into())]).unwrap();
    graph
        .set_reference(clashing, "customer", Some(customer))
        .unwrap();

    assert!(graph.add_entity(cache, customer).is_err());
    assert_eq!(
        graph.get_value(customer, "customerID").unwrap(),
        DataValue::Guid(Uuid::nil())
    );
    assert!(!graph.aspect(customer).unwrap().has_temp_key());
    assert_eq!(
        graph
            .manager(cache)
            .unwrap()
            .key_generator()
            .temp_keys()
            .count(),
        0
    );
    assert_eq!(graph.get_reference(clashing, "customer").unwrap(), Some(customer));
    assert_consistent(&graph);
}

#[test]
fn test_invalid_write_changes_nothing() {
    let (mut graph, cache) = create_test_graph();
    let order = graph
        .create_attached(cache, "Order", vec![("orderID", 3.into())], EntityState::Unchanged)
        .unwrap();
    let mut events = graph.subscribe(EventFilter::Entity(order));

    let err = graph.set_value(order, "freight", "heavy").unwrap_err();
    assert!(matches!(err, CacheError::InvalidPropertyValue { .. }));
    let err = graph.set_value(order, "freight", DataValue::Null).unwrap_err();
    assert!(err.to_string().contains("not nullable"));
    let err = graph.set_value(order, "orderID", i64::from(i32::MAX) + 1).unwrap_err();
    assert!(matches!(err, CacheError::InvalidPropertyValue { .. }));

    assert_eq!(graph.entity_state(order).unwrap(), EntityState::Unchanged);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_key_edit_reindexes_and_repoints_children() {
    let (mut graph, cache) = create_test_graph();
    let (old_id, new_id) = (Uuid::new_v4(), Uuid::new_v4());
    let customer = graph
        .create_attached(
            cache,
            "Customer",
            vec![("customerID", old_id.into())],
            EntityState::Unchanged,
        )
        .unwrap();
    let order = graph
        .create_attached(
            cache,
            "Order",
            vec![("orderID", 10.into()), ("customerID", old_id.into())],
            EntityState::Unchanged,
        )
        .unwrap();
    assert_eq!(graph.get_reference(order, "customer").unwrap(), Some(customer));

    graph.set_value(customer, "customerID", new_id).unwrap();

    assert_eq!(
        graph.find_entity_by_key(cache, &EntityKey::new("Customer", [old_id])),
        None
    );
    assert_eq!(
        graph.find_entity_by_key(cache, &EntityKey::new("Customer", [new_id])),
        Some(customer)
    );
    assert_eq!(graph.get_value(order, "customerID").unwrap(), DataValue::Guid(new_id));
    assert_eq!(graph.get_reference(order, "customer").unwrap(), Some(customer));
    assert_eq!(graph.entity_state(order).unwrap(), EntityState::Modified);
    assert_eq!(
        graph.aspect(order).unwrap().original_values().get("customerID"),
        Some(&DataValue::Guid(old_id))
    );
    assert_eq!(graph.entity_state(customer).unwrap(), EntityState::Modified);
    assert_consistent(&graph);
}

#[test]
fn test_key_edit_to_taken_key_fails() {
    let (mut graph, cache) = create_test_graph();
    let first = graph
        .create_attached(cache, "Product", vec![("productID", 1.into())], EntityState::Unchanged)
        .unwrap();
    let second = graph
        .create_attached(cache, "Product", vec![("productID", 2.into())], EntityState::Unchanged)
        .unwrap();

    let err = graph.set_value(second, "productID", 1).unwrap_err();
    assert!(matches!(err, CacheError::DuplicateKey { .. }));
    assert_eq!(graph.get_value(second, "productID").unwrap(), DataValue::Int(2));
    assert_eq!(graph.entity_state(second).unwrap(), EntityState::Unchanged);
    assert_eq!(
        graph.get_entity_by_key(cache, "Product", vec![1.into()]).unwrap(),
        Some(first)
    );
}

#[test]
fn test_navigation_assignment_event_order() {
    let (mut graph, cache) = create_test_graph();
    let customer_id = Uuid::new_v4();
    let customer = graph
        .create_attached(
            cache,
            "Customer",
            vec![("customerID", customer_id.into())],
            EntityState::Unchanged,
        )
        .unwrap();
    let order = graph
        .create_attached(cache, "Order", vec![("orderID", 5.into())], EntityState::Unchanged)
        .unwrap();
    let mut events = graph.subscribe(EventFilter::All);

    graph.set_reference(order, "customer", Some(customer)).unwrap();

    let events = drain(&mut events);
    assert_eq!(events.len(), 4, "{events:?}");
    match &events[0] {
        EntityEvent::PropertyChanged(change) => {
            assert_eq!(change.property, "customer");
            assert_eq!(change.old_value, PropertyValue::Entity(None));
            assert_eq!(change.new_value, PropertyValue::Entity(Some(customer)));
        }
        other => panic!("unexpected {other}"),
    }
    assert!(matches!(
        &events[1],
        EntityEvent::CollectionChanged(c) if c.owner == customer && c.added == vec![order]
    ));
    assert!(matches!(
        &events[2],
        EntityEvent::PropertyChanged(c) if c.property == "customerID"
            && c.new_value == PropertyValue::Data(customer_id.into())
    ));
    assert!(matches!(
        events[3],
        EntityEvent::EntityChanged {
            action: EntityAction::EntityStateChange,
            ..
        }
    ));
    assert!(graph.fixup_guard.is_empty());
}

#[test]
fn test_relation_graph_finds_management_cycles() {
    let (mut graph, cache) = create_test_graph();
    let employee = |graph: &mut EntityGraph, id: i32, reports_to: i32| {
        graph
            .create_attached(
                cache,
                "Employee",
                vec![
                    ("employeeID", id.into()),
                    ("reportsToEmployeeID", reports_to.into()),
                ],
                EntityState::Unchanged,
            )
            .unwrap()
    };
    let e1 = employee(&mut graph, 1, 3);
    let e2 = employee(&mut graph, 2, 1);
    let e3 = employee(&mut graph, 3, 1);

    assert_eq!(graph.get_reference(e1, "manager").unwrap(), Some(e3));
    let relations = graph.relation_graph(cache).unwrap();
    assert_eq!(relations.node_count(), 3);
    assert_eq!(relations.edge_count(), 3);
    assert_eq!(
        relations.children(e1),
        vec![(e2, "Employee_DirectReports"), (e3, "Employee_DirectReports")]
    );
    assert_eq!(relations.parents(e1), vec![(e3, "Employee_DirectReports")]);
    assert_eq!(relations.cycles(), vec![vec![e1, e3]]);
    assert_consistent(&graph);
}

#[test]
fn test_built_in_test_reports_corruption() {
    let (mut graph, cache) = create_test_graph();
    let customer = graph
        .create_attached(cache, "Customer", vec![], EntityState::Added)
        .unwrap();
    let order = graph.create_entity("Order", vec![]).unwrap();
    graph.push(customer, "orders", order).unwrap();
    assert_consistent(&graph);

    if let Some(record) = graph.records.get_mut(&order) {
        record.aspect.entity_manager = None;
    }
    let errors = graph.built_in_test();
    assert!(errors.iter().any(|e| e.contains("manager is None")), "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("different caches")), "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("does not own")), "{errors:?}");
}
