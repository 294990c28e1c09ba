//! Flattening and universal/existential quantification over iterable
//! attributes.

mod common;

use common::{collect_values, handles_and_containers_world, name_of};
use entiql::{
    an, entity, exists, flatten, for_all, in_, let_, lit, not_, symbolic_mode, the, with_graph,
    Value,
};

#[test]
fn flatten_enumerates_an_iterable_attribute() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let drawers = flatten(cabinets.attr("drawers"));
            an(entity(drawers, vec![]))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 3);
    let handles: Vec<String> = results
        .iter()
        .map(|d| name_of(&d.get_attr("handle").unwrap()))
        .collect();
    assert_eq!(handles, vec!["Handle1", "Handle2", "Handle3"]);
}

#[test]
fn flatten_composes_with_inequality() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let drawer_1 = an(entity(
                let_(w.types.drawer, w.views.clone()),
                vec![],
            ));
            let drawers = flatten(cabinets.attr("drawers"));
            an(entity(drawers, vec![drawer_1.expr().ne(drawers)]))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 2);
    let handles: Vec<String> = results
        .iter()
        .map(|d| name_of(&d.get_attr("handle").unwrap()))
        .collect();
    assert_eq!(handles, vec!["Handle2", "Handle3"]);
}

#[test]
fn flatten_of_flatten_is_a_deep_flatten() {
    let w = handles_and_containers_world();
    let nested = Value::from(vec![
        Value::from(vec![Value::from(1i64), Value::from(2i64)]),
        Value::from(vec![Value::from(3i64)]),
    ]);
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| an(entity(flatten(flatten(lit(nested))), vec![])))
    });
    let results = collect_values(&query);
    assert_eq!(results, vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)]);
}

#[test]
fn for_all_fails_when_a_member_violates_the_condition() {
    let w = handles_and_containers_world();
    // The selected drawer is a member of the cabinet's drawers, so the
    // universal "not contained" fails for that value.
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let my_drawer = an(entity(
                let_(w.types.drawer, w.views.clone()),
                vec![],
            ));
            let cabinet_drawers = cabinets.attr("drawers");
            let cond = not_(in_(&my_drawer, cabinet_drawers)).expect("negation failed");
            an(entity(my_drawer.expr(), vec![for_all(cabinet_drawers, cond)]))
        })
    });
    assert_eq!(collect_values(&query).len(), 0);
}

#[test]
fn exists_finds_the_member() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let my_drawer = an(entity(
                let_(w.types.drawer, w.views.clone()),
                vec![],
            ));
            let cabinet_drawers = cabinets.attr("drawers");
            an(entity(
                my_drawer.expr(),
                vec![exists(cabinet_drawers, in_(&my_drawer, cabinet_drawers))],
            ))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 1);
    assert_eq!(name_of(&results[0].get_attr("handle").unwrap()), "Handle1");
}

#[test]
fn for_all_accepts_when_every_value_satisfies_the_condition() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let c = let_(w.types.container, w.bodies.clone());
            let the_container = the(entity(c, vec![c.attr("name").eq("Container2")]));
            an(entity(
                the_container.expr(),
                vec![for_all(
                    cabinets.attr("container"),
                    the_container.expr().eq(cabinets.attr("container")),
                )],
            ))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 1);
    assert_eq!(name_of(&results[0]), "Container2");
}

#[test]
fn for_all_rejects_when_some_value_violates_the_condition() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let cabinets = let_(w.types.cabinet, w.views.clone());
            let c = let_(w.types.container, w.bodies.clone());
            let the_container = the(entity(c, vec![c.attr("name").eq("Container2")]));
            an(entity(
                the_container.expr(),
                vec![for_all(
                    cabinets.attr("container"),
                    the_container.expr().ne(cabinets.attr("container")),
                )],
            ))
        })
    });
    assert_eq!(collect_values(&query).len(), 0);
}
