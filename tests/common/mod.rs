//! Shared world fixtures for the integration tests.
//!
//! Two worlds mirror the shapes the engine is exercised with: a
//! handles-and-containers world (bodies, fixed/prismatic connections, one
//! cabinet with drawers) and a doors-and-drawers world (mixed body sizes,
//! revolute connections).

#![allow(dead_code)]

use std::sync::Arc;

use entiql::{Query, SymbolGraph, TypeId, Value};

/// Install a tracing subscriber once so evaluator warnings show up under
/// `--nocapture`.
pub fn init_tracing() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Drain a single-entity query into plain values, failing the test on error.
pub fn collect_values(query: &Query) -> Vec<Value> {
    query
        .evaluate_values()
        .collect::<entiql::Result<Vec<_>>>()
        .expect("query evaluation failed")
}

pub fn collect_names(query: &Query) -> Vec<String> {
    collect_values(query).iter().map(name_of).collect()
}

pub struct WorldTypes {
    pub body: TypeId,
    pub handle: TypeId,
    pub container: TypeId,
    pub connection: TypeId,
    pub fixed: TypeId,
    pub prismatic: TypeId,
    pub revolute: TypeId,
    pub world: TypeId,
    pub view: TypeId,
    pub drawer: TypeId,
    pub cabinet: TypeId,
    pub door: TypeId,
    pub wardrobe: TypeId,
}

impl WorldTypes {
    pub fn register(graph: &SymbolGraph) -> Self {
        let world = graph.define_type("World", None, &["id", "bodies", "connections", "views"]);
        let body = graph.define_type("Body", None, &["name", "size", "world"]);
        let handle = graph.define_type("Handle", Some(body), &[]);
        let container = graph.define_type("Container", Some(body), &[]);
        let connection = graph.define_type("Connection", None, &["parent", "child", "world"]);
        let fixed = graph.define_type("FixedConnection", Some(connection), &[]);
        let prismatic = graph.define_type("PrismaticConnection", Some(connection), &[]);
        let revolute = graph.define_type("RevoluteConnection", Some(connection), &[]);
        let view = graph.define_type("View", None, &["world"]);
        let drawer = graph.define_type("Drawer", Some(view), &["handle", "container"]);
        let cabinet = graph.define_type("Cabinet", Some(view), &["container", "drawers"]);
        let door = graph.define_type("Door", Some(view), &["handle", "body"]);
        let wardrobe = graph.define_type("Wardrobe", Some(view), &["handle", "body", "container"]);
        WorldTypes {
            body,
            handle,
            container,
            connection,
            fixed,
            prismatic,
            revolute,
            world,
            view,
            drawer,
            cabinet,
            door,
            wardrobe,
        }
    }
}

pub struct TestWorld {
    pub graph: Arc<SymbolGraph>,
    pub types: WorldTypes,
    pub world: Value,
    pub bodies: Vec<Value>,
    pub connections: Vec<Value>,
    pub views: Vec<Value>,
}

impl TestWorld {
    pub fn body_named(&self, name: &str) -> &Value {
        self.bodies
            .iter()
            .find(|b| name_of(b) == name)
            .unwrap_or_else(|| panic!("no body named {name}"))
    }
}

pub fn name_of(value: &Value) -> String {
    match value.get_attr("name") {
        Ok(Value::Str(s)) => s.to_string(),
        _ => panic!("value has no name: {value:?}"),
    }
}

pub fn type_name_of(value: &Value) -> String {
    value.as_object().expect("not an object").type_name.to_string()
}

fn make_body(graph: &SymbolGraph, ty: TypeId, name: &str, size: i64, world: &Value) -> Value {
    graph
        .create(
            ty,
            vec![
                ("name", Value::from(name)),
                ("size", Value::from(size)),
                ("world", world.clone()),
            ],
        )
        .expect("body creation failed")
}

fn make_connection(graph: &SymbolGraph, ty: TypeId, parent: &Value, child: &Value, world: &Value) -> Value {
    graph
        .create(
            ty,
            vec![
                ("parent", parent.clone()),
                ("child", child.clone()),
                ("world", world.clone()),
            ],
        )
        .expect("connection creation failed")
}

/// Bodies `[Handle1..3, Container1..3]`, connections
/// `[Fixed(C1,H1), Prismatic(C2,C1), Fixed(C3,H3), Prismatic(C2,C3)]`, one
/// cabinet on Container2 holding three drawers, and the first drawer shared
/// into the views.
pub fn handles_and_containers_world() -> TestWorld {
    init_tracing();
    let graph = Arc::new(SymbolGraph::new());
    let types = WorldTypes::register(&graph);
    let world = graph
        .create(types.world, vec![("id", Value::from(0i64))])
        .expect("world creation failed");

    let h1 = make_body(&graph, types.handle, "Handle1", 1, &world);
    let h2 = make_body(&graph, types.handle, "Handle2", 1, &world);
    let h3 = make_body(&graph, types.handle, "Handle3", 1, &world);
    let c1 = make_body(&graph, types.container, "Container1", 1, &world);
    let c2 = make_body(&graph, types.container, "Container2", 1, &world);
    let c3 = make_body(&graph, types.container, "Container3", 1, &world);
    let bodies = vec![h1.clone(), h2.clone(), h3.clone(), c1.clone(), c2.clone(), c3.clone()];

    let connections = vec![
        make_connection(&graph, types.fixed, &c1, &h1, &world),
        make_connection(&graph, types.prismatic, &c2, &c1, &world),
        make_connection(&graph, types.fixed, &c3, &h3, &world),
        make_connection(&graph, types.prismatic, &c2, &c3, &world),
    ];

    let d1 = graph
        .create(
            types.drawer,
            vec![("handle", h1), ("container", c1), ("world", world.clone())],
        )
        .expect("drawer creation failed");
    let d2 = graph
        .create(
            types.drawer,
            vec![("handle", h2), ("container", c2.clone()), ("world", world.clone())],
        )
        .expect("drawer creation failed");
    let d3 = graph
        .create(
            types.drawer,
            vec![("handle", h3), ("container", c3), ("world", world.clone())],
        )
        .expect("drawer creation failed");
    let cabinet = graph
        .create(
            types.cabinet,
            vec![
                ("container", c2),
                ("drawers", Value::from(vec![d1.clone(), d2, d3])),
                ("world", world.clone()),
            ],
        )
        .expect("cabinet creation failed");
    let views = vec![cabinet, d1];

    if let Some(w) = world.as_object() {
        w.set("bodies", Value::from(bodies.clone()));
        w.set("connections", Value::from(connections.clone()));
        w.set("views", Value::from(views.clone()));
    }

    TestWorld { graph, types, world, bodies, connections, views }
}

/// Mixed bodies with one oversized body, fixed connections
/// `[(Body2,Handle2), (Body4,Handle4), (Container1,Handle1)]`, one prismatic
/// `(Container2,Container1)` and revolutes `[(Body3,Handle3),
/// (Container2,Body4)]`.
pub fn doors_and_drawers_world() -> TestWorld {
    init_tracing();
    let graph = Arc::new(SymbolGraph::new());
    let types = WorldTypes::register(&graph);
    let world = graph
        .create(types.world, vec![("id", Value::from(1i64))])
        .expect("world creation failed");

    let b2 = make_body(&graph, types.body, "Body2", 2, &world);
    let h2 = make_body(&graph, types.handle, "Handle2", 1, &world);
    let b3 = make_body(&graph, types.body, "Body3", 1, &world);
    let h3 = make_body(&graph, types.handle, "Handle3", 1, &world);
    let b4 = make_body(&graph, types.body, "Body4", 1, &world);
    let h4 = make_body(&graph, types.handle, "Handle4", 1, &world);
    let c1 = make_body(&graph, types.container, "Container1", 1, &world);
    let h1 = make_body(&graph, types.handle, "Handle1", 1, &world);
    let c2 = make_body(&graph, types.container, "Container2", 1, &world);
    let bodies = vec![
        b2.clone(),
        h2.clone(),
        b3.clone(),
        h3.clone(),
        b4.clone(),
        h4.clone(),
        c1.clone(),
        h1.clone(),
        c2.clone(),
    ];

    let connections = vec![
        make_connection(&graph, types.fixed, &b2, &h2, &world),
        make_connection(&graph, types.fixed, &b4, &h4, &world),
        make_connection(&graph, types.fixed, &c1, &h1, &world),
        make_connection(&graph, types.prismatic, &c2, &c1, &world),
        make_connection(&graph, types.revolute, &b3, &h3, &world),
        make_connection(&graph, types.revolute, &c2, &b4, &world),
    ];

    if let Some(w) = world.as_object() {
        w.set("bodies", Value::from(bodies.clone()));
        w.set("connections", Value::from(connections.clone()));
    }

    TestWorld { graph, types, world, bodies, connections, views: Vec::new() }
}
