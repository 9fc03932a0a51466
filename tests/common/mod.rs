//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use entity_cache::{
    cache::EntityGraph,
    config::CacheConfig,
    event::EntityEvent,
    metadata::{Association, AutoGeneratedKeyType, EntityTypeBuilder, MetadataStore},
    properties::{DataType, ManagerId},
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Customer, Order, OrderDetail, Product and Employee, plus the one-way TimeGroup/TimeLimit
/// pair.
///
/// Customer keys are client-generated Guids, OrderDetail has the composite key
/// (orderID, productID), Product_OrderDetails is only navigable from the detail and
/// TimeGroup_TimeLimits only from the group.
#[allow(dead_code)]
pub fn northwind() -> Arc<MetadataStore> {
    let metadata = MetadataStore::builder()
        .entity_type(
            EntityTypeBuilder::new("Customer")
                .key("customerID", DataType::Guid)
                .auto_generated(AutoGeneratedKeyType::KeyGenerator)
                .nullable("companyName", DataType::String)
                .nullable("city", DataType::String),
        )
        .entity_type(
            EntityTypeBuilder::new("Order")
                .key("orderID", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("customerID", DataType::Guid)
                .nullable("employeeID", DataType::Int32)
                .nullable("shipCity", DataType::String)
                .property("freight", DataType::Double),
        )
        .entity_type(
            EntityTypeBuilder::new("OrderDetail")
                .key("orderID", DataType::Int32)
                .key("productID", DataType::Int32)
                .property("quantity", DataType::Int32),
        )
        .entity_type(
            EntityTypeBuilder::new("Product")
                .key("productID", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("productName", DataType::String),
        )
        .entity_type(
            EntityTypeBuilder::new("Employee")
                .key("employeeID", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("lastName", DataType::String)
                .nullable("reportsToEmployeeID", DataType::Int32),
        )
        .entity_type(
            EntityTypeBuilder::new("TimeGroup")
                .key("id", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("comment", DataType::String),
        )
        .entity_type(
            EntityTypeBuilder::new("TimeLimit")
                .key("id", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("timeGroupId", DataType::Int32)
                .property("maxTime", DataType::Int32),
        )
        .association(
            Association::new("Customer_Orders", "Customer", "Order", ["customerID"])
                .parent_navigation("orders")
                .child_navigation("customer"),
        )
        .association(
            Association::new("Employee_Orders", "Employee", "Order", ["employeeID"])
                .parent_navigation("orders")
                .child_navigation("employee"),
        )
        .association(
            Association::new("Order_OrderDetails", "Order", "OrderDetail", ["orderID"])
                .parent_navigation("orderDetails")
                .child_navigation("order"),
        )
        .association(
            Association::new("Product_OrderDetails", "Product", "OrderDetail", ["productID"])
                .child_navigation("product"),
        )
        .association(
            Association::new(
                "Employee_DirectReports",
                "Employee",
                "Employee",
                ["reportsToEmployeeID"],
            )
            .parent_navigation("directReports")
            .child_navigation("manager"),
        )
        .association(
            Association::new("TimeGroup_TimeLimits", "TimeGroup", "TimeLimit", ["timeGroupId"])
                .parent_navigation("timeLimits"),
        )
        .build()
        .expect("northwind metadata is valid");
    Arc::new(metadata)
}

#[allow(dead_code)]
pub fn create_test_graph() -> (EntityGraph, ManagerId) {
    create_test_graph_with(CacheConfig::default())
}

#[allow(dead_code)]
pub fn create_test_graph_with(config: CacheConfig) -> (EntityGraph, ManagerId) {
    init_logging();
    let mut graph = EntityGraph::with_config(northwind(), config);
    let cache = graph.new_manager();
    (graph, cache)
}

#[allow(dead_code)]
pub fn drain(rx: &mut UnboundedReceiver<EntityEvent>) -> Vec<EntityEvent> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Fail with the built-in test report if any invariant is broken.
#[allow(dead_code)]
pub fn assert_consistent(graph: &EntityGraph) {
    let errors = graph.built_in_test();
    assert!(errors.is_empty(), "Invariant violations:\n{}", errors.join("\n"));
}
