//! Query evaluation tests.
//!
//! Coverage areas:
//! - Unconstrained selection and registry domains
//! - Containment, conjunction, disjunction and their chains
//! - Negation push-down
//! - Multi-source joins over set_of
//! - The-quantification and result constraints
//! - Predicates, nested queries and re-evaluation idempotence

mod common;

use std::sync::Arc;

use common::{collect_names, collect_values, handles_and_containers_world, name_of, type_name_of};
use entiql::{
    add, an, an_with, and_, construct, contains, entity, has_type, in_, let_, lit, not_, or_,
    refinement, rule_mode_for, set_of, symbolic_mode, the, with_graph, EqlError, Quantification,
    Value,
};

// ============================================================================
// Unconstrained selection
// ============================================================================

#[test]
fn unconstrained_selection_yields_all_bodies_in_insertion_order() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(body, vec![]))
        })
    });
    let names = collect_names(&query);
    assert_eq!(
        names,
        vec!["Handle1", "Handle2", "Handle3", "Container1", "Container2", "Container3"]
    );
}

#[test]
fn bare_variable_quantifies_like_an_entity() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| an(let_(w.types.body, w.bodies.clone())))
    });
    assert_eq!(collect_values(&query).len(), 6);
}

#[test]
fn registry_domain_enumerates_subtypes() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, None);
            an(entity(body, vec![body.attr("world").eq(w.world.clone())]))
        })
    });
    assert_eq!(collect_values(&query).len(), 6);
}

#[test]
fn reevaluation_yields_the_same_outputs() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(body, vec![contains(body.attr("name"), "Handle")]))
        })
    });
    let first = collect_names(&query);
    let second = collect_names(&query);
    assert_eq!(first, vec!["Handle1", "Handle2", "Handle3"]);
    assert_eq!(first, second);
}

// ============================================================================
// Containment and logical connectives
// ============================================================================

#[test]
fn contains_filters_by_substring() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(body, vec![contains(body.attr("name"), "Handle")]))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|b| type_name_of(b) == "Handle"));
}

#[test]
fn in_is_containment_with_swapped_arguments() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(body, vec![in_("Handle", body.attr("name"))]))
        })
    });
    assert_eq!(collect_values(&query).len(), 3);
}

#[test]
fn conjunction_narrows_results() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(
                body,
                vec![contains(body.attr("name"), "Handle") & contains(body.attr("name"), "1")],
            ))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1"]);
}

#[test]
fn disjunction_unions_results() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(
                body,
                vec![contains(body.attr("name"), "Handle1") | contains(body.attr("name"), "Handle2")],
            ))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1", "Handle2"]);
}

#[test]
fn chained_disjunction() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            an(entity(
                body,
                vec![or_(vec![
                    contains(body.attr("name"), "Handle1"),
                    contains(body.attr("name"), "Handle2"),
                    contains(body.attr("name"), "Container1"),
                ])],
            ))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1", "Handle2", "Container1"]);
}

#[test]
fn disjunction_of_conjunctions() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            an(entity(
                body,
                vec![or_(vec![
                    and_(vec![contains(name, "Handle"), contains(name, "1")]),
                    and_(vec![contains(name, "Container"), contains(name, "1")]),
                ])],
            ))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1", "Container1"]);
}

#[test]
fn conjunction_of_disjunctions() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            an(entity(
                body,
                vec![
                    or_(vec![contains(name, "Handle"), contains(name, "1")]),
                    or_(vec![contains(name, "Handle"), contains(name, "2")]),
                ],
            ))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1", "Handle2", "Handle3"]);
}

#[test]
fn chained_conjunction() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            an(entity(
                body,
                vec![contains(name, "n"), contains(name, "1"), contains(name, "C")],
            ))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 1);
    assert_eq!(name_of(&results[0]), "Container1");
    assert_eq!(type_name_of(&results[0]), "Container");
    // Re-evaluation reproduces the run.
    assert_eq!(collect_names(&query), vec!["Container1"]);
}

// ============================================================================
// Negation push-down
// ============================================================================

#[test]
fn negated_method_call_inverts_the_truth_sense() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let cond = not_(body.attr("name").call("starts_with", vec![Value::from("Handle")]))
                .expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|b| type_name_of(b) == "Container"));
}

#[test]
fn negated_comparator_rewrites_the_operation() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let cond = not_(contains(body.attr("name"), "Handle")).expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    assert_eq!(collect_values(&query).len(), 3);
}

#[test]
fn negated_conjunction_becomes_else_if() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            let cond = not_(contains(name, "Handle") & contains(name, "1")).expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    let names = collect_names(&query);
    assert_eq!(names.len(), 5);
    assert!(!names.contains(&"Handle1".to_string()));
}

#[test]
fn negated_disjunction_becomes_conjunction() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            let cond = not_(contains(name, "Handle1") | contains(name, "Handle2")).expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    let names = collect_names(&query);
    assert_eq!(names.len(), 4);
    assert!(!names.contains(&"Handle1".to_string()));
    assert!(!names.contains(&"Handle2".to_string()));
}

#[test]
fn negated_mixed_tree() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let name = body.attr("name");
            let cond = not_(or_(vec![
                and_(vec![contains(name, "Handle"), contains(name, "1")]),
                and_(vec![contains(name, "Container"), contains(name, "1")]),
            ]))
            .expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    let names = collect_names(&query);
    assert_eq!(names.len(), 4);
    assert!(!names.contains(&"Handle1".to_string()));
    assert!(!names.contains(&"Container1".to_string()));
}

#[test]
fn double_negation_restores_the_original_results() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let cond = contains(body.attr("name"), "Handle");
            let cond = not_(not_(cond).expect("negation failed")).expect("negation failed");
            an(entity(body, vec![cond]))
        })
    });
    assert_eq!(collect_names(&query), vec!["Handle1", "Handle2", "Handle3"]);
}

#[test]
fn negating_a_quantifier_is_rejected() {
    let w = handles_and_containers_world();
    let err = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let inner = an(entity(body, vec![contains(body.attr("name"), "Handle")]));
            not_(&inner).unwrap_err()
        })
    });
    assert!(matches!(err, EqlError::UnsupportedNegation));
}

#[test]
fn negating_a_rule_branch_is_rejected() {
    let w = handles_and_containers_world();
    let err = with_graph(&w.graph, || {
        let (query, views, body, handle) = symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let handle = let_(w.types.handle, w.bodies.clone());
            let views = let_(w.types.view, None);
            let query = an(entity(views, vec![contains(body.attr("name"), "Handle")]));
            (query, views, body, handle)
        });
        rule_mode_for(&query, || {
            add(
                views,
                construct(w.types.drawer, vec![("handle", handle.into()), ("container", body.into())]),
            );
            refinement(vec![body.attr("size").gt(1)], || {
                add(
                    views,
                    construct(w.types.door, vec![("handle", handle.into()), ("body", body.into())]),
                );
            });
        });
        // The refinement wrapped the conditions root into an except-if
        // branch; negating it outside rule mode is a usage error.
        let branch = query.conditions().expect("rule tree has a conditions root");
        not_(branch).unwrap_err()
    });
    assert!(matches!(err, EqlError::Usage(_)));
}

// ============================================================================
// Multi-source joins
// ============================================================================

#[test]
fn multi_source_join_finds_both_drawer_component_sets() {
    let w = handles_and_containers_world();
    let (query, container, handle, fixed, prismatic) = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let container = let_(w.types.container, w.bodies.clone());
            let handle = let_(w.types.handle, w.bodies.clone());
            let fixed = let_(w.types.fixed, w.connections.clone());
            let prismatic = let_(w.types.prismatic, w.connections.clone());
            let q = an(set_of(
                vec![container, handle, fixed, prismatic],
                vec![
                    container.eq(fixed.attr("parent")),
                    handle.eq(fixed.attr("child")),
                    container.eq(prismatic.attr("child")),
                ],
            ));
            (q, container, handle, fixed, prismatic)
        })
    });

    let solutions: Vec<_> = query
        .evaluate()
        .collect::<entiql::Result<Vec<_>>>()
        .expect("join evaluation failed");
    assert_eq!(solutions.len(), 2);

    let expected = [("Container1", "Handle1"), ("Container3", "Handle3")];
    for (solution, (container_name, handle_name)) in solutions.iter().zip(expected) {
        let c = solution.get(&container).expect("container unbound");
        let h = solution.get(&handle).expect("handle unbound");
        let f = solution.get(&fixed).expect("fixed connection unbound");
        let p = solution.get(&prismatic).expect("prismatic connection unbound");
        assert_eq!(name_of(c), container_name);
        assert_eq!(name_of(h), handle_name);
        assert_eq!(&f.get_attr("parent").unwrap(), c);
        assert_eq!(&f.get_attr("child").unwrap(), h);
        assert_eq!(&p.get_attr("child").unwrap(), c);
    }
}

#[test]
fn predicate_filtering_on_connections() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let connection = let_(w.types.connection, w.connections.clone());
            an(entity(
                connection,
                vec![
                    has_type(connection.attr("parent"), w.types.container),
                    connection.attr("parent").attr("name").eq("Container1"),
                    has_type(connection.attr("child"), w.types.handle),
                ],
            ))
        })
    });
    let results = collect_values(&query);
    assert_eq!(results.len(), 1);
    assert_eq!(name_of(&results[0].get_attr("parent").unwrap()), "Container1");
    assert_eq!(name_of(&results[0].get_attr("child").unwrap()), "Handle1");
}

#[test]
fn custom_predicate_over_pairs() {
    let w = handles_and_containers_world();
    let same_first = w.graph.define_predicate(
        "HaveSameFirstCharacter",
        &["left", "right"],
        Arc::new(|_, instance| {
            let first = |v: Value| match v.get_attr("name") {
                Ok(Value::Str(s)) => s.chars().next(),
                _ => None,
            };
            let a = instance.get("left").and_then(first);
            let b = instance.get("right").and_then(first);
            Ok(a.is_some() && a == b)
        }),
    );
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let b1 = let_(w.types.body, w.bodies.clone());
            let b2 = let_(w.types.body, w.bodies.clone());
            let pred = entiql::construct(same_first, vec![("left", b1.into()), ("right", b2.into())]);
            an(set_of(vec![b1, b2], vec![b1.ne(b2), pred]))
        })
    });
    let solutions: Vec<_> = query
        .evaluate()
        .collect::<entiql::Result<Vec<_>>>()
        .expect("predicate query failed");
    // 3 handles and 3 containers: 3*2 ordered pairs within each group.
    assert_eq!(solutions.len(), 12);
}

// ============================================================================
// The-quantification and result constraints
// ============================================================================

#[test]
fn the_with_multiple_matches_fails() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let handle = let_(w.types.handle, w.bodies.clone());
            the(entity(
                handle,
                vec![handle.attr("name").call("starts_with", vec![Value::from("Handle")])],
            ))
        })
    });
    assert!(matches!(query.evaluate(), Err(EqlError::MultipleSolutionFound)));
}

#[test]
fn the_with_a_single_match_returns_it() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let handle = let_(w.types.handle, w.bodies.clone());
            the(entity(handle, vec![handle.attr("name").eq("Handle1")]))
        })
    });
    let result = query.evaluate_value().expect("expected a unique solution");
    assert_eq!(name_of(&result), "Handle1");
}

#[test]
fn the_with_no_match_fails() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let handle = let_(w.types.handle, w.bodies.clone());
            the(entity(handle, vec![handle.attr("name").eq("Handle9")]))
        })
    });
    assert!(matches!(query.evaluate(), Err(EqlError::NoSolutionFound)));
}

#[test]
fn quantification_constraints_bound_the_result_count() {
    let w = handles_and_containers_world();
    let build = |constraint| {
        with_graph(&w.graph, || {
            symbolic_mode(|| {
                let body = let_(w.types.body, w.bodies.clone());
                an_with(entity(body, vec![]), constraint)
            })
        })
    };

    let at_most = build(Quantification::AtMost(2));
    let err = at_most
        .evaluate()
        .collect::<entiql::Result<Vec<_>>>()
        .unwrap_err();
    assert!(matches!(err, EqlError::TooManySolutions { expected: 2 }));

    let at_least = build(Quantification::AtLeast(10));
    let err = at_least
        .evaluate()
        .collect::<entiql::Result<Vec<_>>>()
        .unwrap_err();
    assert!(matches!(err, EqlError::TooFewSolutions { expected: 10, found: 6 }));

    let exact = build(Quantification::Exactly(6));
    assert_eq!(exact.evaluate().count(), 6);

    assert!(matches!(
        Quantification::range(3, 1),
        Err(EqlError::InconsistentQuantification { .. })
    ));
}

// ============================================================================
// Nested queries
// ============================================================================

#[test]
fn nested_disjunction_matches_the_flat_query() {
    let w = handles_and_containers_world();
    let (original, nested) = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let original = an(entity(
                body,
                vec![contains(body.attr("name"), "Handle1") | contains(body.attr("name"), "Handle2")],
            ));
            let part1 = an(entity(body, vec![contains(body.attr("name"), "Handle1")]));
            let part2 = an(entity(body, vec![contains(body.attr("name"), "Handle2")]));
            let nested = an(entity(body, vec![part1.expr() | part2.expr()]));
            (original, nested)
        })
    });
    assert_eq!(collect_names(&original), collect_names(&nested));
}

#[test]
fn nested_conjunction_matches_the_flat_query() {
    let w = handles_and_containers_world();
    let (original, nested) = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let original = the(entity(
                body,
                vec![contains(body.attr("name"), "Handle") & contains(body.attr("name"), "1")],
            ));
            let part1 = an(entity(body, vec![contains(body.attr("name"), "Handle")]));
            let part2 = an(entity(body, vec![contains(body.attr("name"), "1")]));
            let nested = the(entity(body, vec![part1.expr() & part2.expr()]));
            (original, nested)
        })
    });
    let original = original.evaluate_value().expect("unique result");
    let nested = nested.evaluate_value().expect("unique result");
    assert_eq!(name_of(&original), "Handle1");
    assert_eq!(original, nested);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn empty_domain_yields_nothing() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| an(entity(let_(w.types.body, Vec::new()), vec![])))
    });
    assert_eq!(collect_values(&query).len(), 0);
}

#[test]
fn single_element_domain_yields_one_output() {
    let w = handles_and_containers_world();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| an(entity(let_(w.types.body, w.bodies[0].clone()), vec![])))
    });
    assert_eq!(collect_names(&query), vec!["Handle1"]);
}

#[test]
fn duplicate_domain_values_collapse_by_identity() {
    let w = handles_and_containers_world();
    let duplicated: Vec<Value> = w.bodies.iter().chain(w.bodies.iter()).cloned().collect();
    let query = with_graph(&w.graph, || {
        symbolic_mode(|| an(entity(let_(w.types.body, duplicated), vec![])))
    });
    assert_eq!(collect_values(&query).len(), 6);
}

#[test]
fn true_literal_is_a_conjunction_identity() {
    let w = handles_and_containers_world();
    let (plain, with_true_right, with_true_left) = with_graph(&w.graph, || {
        symbolic_mode(|| {
            let body = let_(w.types.body, w.bodies.clone());
            let plain = an(entity(body, vec![contains(body.attr("name"), "Handle")]));
            let with_true_right = an(entity(
                body,
                vec![contains(body.attr("name"), "Handle") & lit(true)],
            ));
            let with_true_left = an(entity(
                body,
                vec![lit(true) & contains(body.attr("name"), "Handle")],
            ));
            (plain, with_true_right, with_true_left)
        })
    });
    let expected = collect_names(&plain);
    assert_eq!(collect_names(&with_true_right), expected);
    assert_eq!(collect_names(&with_true_left), expected);
}
