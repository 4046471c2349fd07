//! End-to-end tests for load-store elimination.
//!
//! Each test builds a small method with [`GraphBuilder`], runs the pass,
//! and checks the observable outcome: which instructions survived, what
//! replaced the eliminated ones, and that a second run is a no-op.

use dotopt::analysis::AliasModel;
use dotopt::ir::{DataType, FieldRef, GraphBuilder, InstrId, InstrKind, InstructionGraph};
use dotopt::optimizer::{lse, optimize_all, MethodGraph, PassDriver};

fn run_lse(graph: &mut InstructionGraph) -> bool {
    let alias = AliasModel::build(graph);
    lse::eliminate(graph, &alias)
}

fn assert_idempotent(graph: &mut InstructionGraph) {
    assert!(
        !run_lse(graph),
        "second run must not change the graph:\n{graph}"
    );
}

fn phi_count(graph: &InstructionGraph) -> usize {
    graph
        .instructions()
        .iter()
        .filter(|i| i.is_live() && matches!(i.kind(), InstrKind::Phi))
        .count()
}

fn operand_of_return(graph: &InstructionGraph) -> InstrId {
    let ret = graph
        .instructions()
        .iter()
        .find(|i| i.is_live() && matches!(i.kind(), InstrKind::Return))
        .expect("graph has a return");
    ret.operands()[0]
}

#[test]
fn scenario_store_then_load_is_forwarded() {
    // store f = 1; x = load f; return x  =>  return 1, load removed.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let one = b.const_i32(1);
    let store = b.field_set(obj, f, one);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    assert_eq!(operand_of_return(&graph), one);
    // The object escaped to the caller, so the store stays observable.
    assert!(graph.instruction(store).is_live());
    assert_idempotent(&mut graph);
}

#[test]
fn scenario_store_of_current_value_is_deleted() {
    // x = load f; store f = x  =>  the store is removed entirely.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let load = b.field_get(obj, f);
    let store = b.field_set(obj, f, load);
    b.ret_void();
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(store).is_live());
    // The load itself had no known value and stays.
    assert!(graph.instruction(load).is_live());
    assert_idempotent(&mut graph);
}

#[test]
fn scenario_unknown_call_blocks_forwarding() {
    // store f = 1; call unknown(); x = load f  =>  nothing is eliminated.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let one = b.const_i32(1);
    let store = b.field_set(obj, f, one);
    b.invoke_unknown(&[]);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(!run_lse(&mut graph), "no optimization applies");
    assert!(graph.instruction(store).is_live());
    assert!(graph.instruction(load).is_live());
}

/// Builds `store f = <value>; while (cond) { body }` with a load of `f` in
/// the body and at the exit; `body_write` controls whether the body also
/// stores a new value to `f`.
struct LoopMethod {
    graph: InstructionGraph,
    body_load: InstrId,
    exit_load: InstrId,
    initial: InstrId,
}

fn build_loop_method(body_write: bool) -> LoopMethod {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let cond = b.parameter(1, DataType::Bool);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let initial = b.const_i32(10);
    let one = b.const_i32(1);

    let header = b.add_block();
    let body = b.add_block();
    let exit = b.add_block();

    b.field_set(obj, f, initial);
    b.goto(header);

    b.switch_to(header);
    b.branch(cond, body, exit);

    b.switch_to(body);
    let body_load = b.field_get(obj, f);
    if body_write {
        let next = b.add(body_load, one);
        b.field_set(obj, f, next);
    }
    b.goto(header);

    b.switch_to(exit);
    let exit_load = b.field_get(obj, f);
    b.ret_val(exit_load);

    LoopMethod {
        graph: b.finish(),
        body_load,
        exit_load,
        initial,
    }
}

#[test]
fn scenario_loop_invariant_load_shares_one_substitute() {
    // No write inside the loop: every iteration's load collapses to the
    // value stored before the loop, and no merge is materialized.
    let mut m = build_loop_method(false);

    assert!(run_lse(&mut m.graph));
    assert!(!m.graph.instruction(m.body_load).is_live());
    assert!(!m.graph.instruction(m.exit_load).is_live());
    assert_eq!(phi_count(&m.graph), 0, "no merge instruction is created");
    assert_eq!(operand_of_return(&m.graph), m.initial);
    assert_idempotent(&mut m.graph);
}

#[test]
fn scenario_loop_varying_value_materializes_merge() {
    // The body writes f = f + 1 each iteration: the loads need a real phi
    // selecting the pre-header value on entry and the incremented value on
    // the back edge.
    let mut m = build_loop_method(true);

    assert!(run_lse(&mut m.graph));
    assert!(!m.graph.instruction(m.body_load).is_live());
    assert!(!m.graph.instruction(m.exit_load).is_live());
    assert_eq!(phi_count(&m.graph), 1);

    let phi = m
        .graph
        .instructions()
        .iter()
        .find(|i| i.is_live() && matches!(i.kind(), InstrKind::Phi))
        .expect("materialized phi");
    assert_eq!(phi.operands().len(), 2);
    assert_eq!(phi.operands()[0], m.initial, "pre-header input");
    let back_edge_input = m.graph.instruction(phi.operands()[1]);
    assert!(
        matches!(back_edge_input.kind(), InstrKind::Binary { .. }),
        "back edge input is the incremented value"
    );
    // The increment itself now consumes the phi.
    assert_eq!(back_edge_input.operands()[0], phi.id());
    assert_idempotent(&mut m.graph);
}

#[test]
fn scenario_dead_singleton_allocation_is_removed() {
    // A non-escaping allocation whose fields are written and never read
    // disappears entirely, fences included.
    let mut b = GraphBuilder::new();
    let cls = b.type_const(7);
    let obj = b.new_instance(cls);
    let fence = b.fence(obj);
    let f = FieldRef::new(7, 0, DataType::Int32);
    let g = FieldRef::new(7, 1, DataType::Int32);
    let one = b.const_i32(1);
    let two = b.const_i32(2);
    let store_f = b.field_set(obj, f, one);
    let store_g = b.field_set(obj, g, two);
    b.ret_void();
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(store_f).is_live());
    assert!(!graph.instruction(store_g).is_live());
    assert!(!graph.instruction(fence).is_live());
    assert!(!graph.instruction(obj).is_live());
    assert_idempotent(&mut graph);
}

#[test]
fn scenario_published_allocation_keeps_its_stores() {
    // The same object handed to an unknown call: every store is
    // observable.
    let mut b = GraphBuilder::new();
    let cls = b.type_const(7);
    let obj = b.new_instance(cls);
    let f = FieldRef::new(7, 0, DataType::Int32);
    let one = b.const_i32(1);
    let store = b.field_set(obj, f, one);
    b.invoke_unknown(&[obj]);
    b.ret_void();
    let mut graph = b.finish();

    run_lse(&mut graph);
    assert!(graph.instruction(store).is_live());
    assert!(graph.instruction(obj).is_live());
}

#[test]
fn diamond_with_equal_branch_values_needs_no_merge() {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let cond = b.parameter(1, DataType::Bool);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let one = b.const_i32(1);

    let left = b.add_block();
    let right = b.add_block();
    let join = b.add_block();
    b.branch(cond, left, right);
    b.switch_to(left);
    b.field_set(obj, f, one);
    b.goto(join);
    b.switch_to(right);
    b.field_set(obj, f, one);
    b.goto(join);
    b.switch_to(join);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    assert_eq!(phi_count(&graph), 0);
    assert_eq!(operand_of_return(&graph), one);
    assert_idempotent(&mut graph);
}

#[test]
fn diamond_with_differing_branch_values_materializes_merge() {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let cond = b.parameter(1, DataType::Bool);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let one = b.const_i32(1);
    let two = b.const_i32(2);

    let left = b.add_block();
    let right = b.add_block();
    let join = b.add_block();
    b.branch(cond, left, right);
    b.switch_to(left);
    b.field_set(obj, f, one);
    b.goto(join);
    b.switch_to(right);
    b.field_set(obj, f, two);
    b.goto(join);
    b.switch_to(join);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    assert_eq!(phi_count(&graph), 1);
    let phi = graph
        .instructions()
        .iter()
        .find(|i| i.is_live() && matches!(i.kind(), InstrKind::Phi))
        .expect("join phi");
    assert_eq!(phi.operands(), &[one, two]);
    assert_idempotent(&mut graph);
}

#[test]
fn volatile_read_acts_as_acquire_fence() {
    // store f = 1; volatile load g; x = load f  =>  x cannot be forwarded.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let g = FieldRef::new_volatile(1, 1, DataType::Int32);
    let one = b.const_i32(1);
    let store = b.field_set(obj, f, one);
    b.field_get(obj, g);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    run_lse(&mut graph);
    assert!(graph.instruction(load).is_live(), "acquire blocks forwarding");
    assert!(graph.instruction(store).is_live());
}

#[test]
fn volatile_write_acts_as_release_fence() {
    // A private object's pending store would normally die with it; the
    // release fence publishes it first.
    let mut b = GraphBuilder::new();
    let cls = b.type_const(7);
    let obj = b.new_instance(cls);
    let f = FieldRef::new(7, 0, DataType::Int32);
    let g = FieldRef::new_volatile(7, 1, DataType::Int32);
    let one = b.const_i32(1);
    let two = b.const_i32(2);
    let store = b.field_set(obj, f, one);
    b.field_set(obj, g, two);
    b.ret_void();
    let mut graph = b.finish();

    run_lse(&mut graph);
    assert!(graph.instruction(store).is_live(), "release keeps the store");
    assert!(graph.instruction(obj).is_live());
}

#[test]
fn irreducible_loop_is_fully_conservative() {
    // Two entries into a cycle: the region cannot be analyzed, so nothing
    // inside it is eliminated and incoming stores survive.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let cond = b.parameter(1, DataType::Bool);
    let f = FieldRef::new(1, 0, DataType::Int32);
    let one = b.const_i32(1);

    let left = b.add_block();
    let cycle_a = b.add_block();
    let cycle_b = b.add_block();
    let store = b.field_set(obj, f, one);
    b.branch(cond, left, cycle_a);
    b.switch_to(left);
    b.goto(cycle_b);
    b.switch_to(cycle_a);
    let load = b.field_get(obj, f);
    b.goto(cycle_b);
    b.switch_to(cycle_b);
    b.branch(cond, cycle_a, left);
    let mut graph = b.finish();

    assert!(!run_lse(&mut graph));
    assert!(graph.instruction(store).is_live());
    assert!(graph.instruction(load).is_live());
}

#[test]
fn narrow_field_load_inserts_conversion() {
    // A 32-bit value stored into an 8-bit field reads back through an
    // explicit conversion.
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, DataType::Reference);
    let value = b.parameter(1, DataType::Int32);
    let f = FieldRef::new(1, 0, DataType::Int8);
    b.field_set(obj, f, value);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    let replacement = graph.instruction(operand_of_return(&graph));
    assert!(matches!(replacement.kind(), InstrKind::Convert));
    assert_eq!(replacement.data_type(), DataType::Int8);
    assert_eq!(replacement.operands(), &[value]);
    assert_idempotent(&mut graph);
}

#[test]
fn fresh_allocation_type_pointer_is_known() {
    // Reading the header type pointer of a fresh allocation resolves to
    // the class handle without touching memory.
    let mut b = GraphBuilder::new();
    let cls = b.type_const(7);
    let obj = b.new_instance(cls);
    let tp = b.type_pointer_get(obj);
    b.ret_val(tp);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(tp).is_live());
    assert_eq!(operand_of_return(&graph), cls);
    // With its only observer gone, the allocation itself is dead.
    assert!(!graph.instruction(obj).is_live());
    assert_idempotent(&mut graph);
}

#[test]
fn fresh_allocation_fields_read_as_default() {
    // Loads from a fresh object before any store see the zero value.
    let mut b = GraphBuilder::new();
    let cls = b.type_const(7);
    let obj = b.new_instance(cls);
    let f = FieldRef::new(7, 0, DataType::Int32);
    let load = b.field_get(obj, f);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    let replacement = graph.instruction(operand_of_return(&graph));
    assert!(replacement.is_zero_constant());
    assert_idempotent(&mut graph);
}

#[test]
fn may_aliasing_store_invalidates_forwarding() {
    // store a[0] = 1; store a[i] = 2 (unknown i); x = load a[0]
    // The unknown-index store may have hit a[0].
    let mut b = GraphBuilder::new();
    let arr = b.parameter(0, DataType::Reference);
    let i = b.parameter(1, DataType::Int32);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let two = b.const_i32(2);
    let first = b.array_set(arr, zero, one);
    b.array_set(arr, i, two);
    let load = b.array_get(arr, zero, DataType::Int32);
    b.ret_val(load);
    let mut graph = b.finish();

    run_lse(&mut graph);
    assert!(graph.instruction(load).is_live());
    assert!(graph.instruction(first).is_live());
}

#[test]
fn distinct_constant_indices_forward_independently() {
    let mut b = GraphBuilder::new();
    let arr = b.parameter(0, DataType::Reference);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let ten = b.const_i32(10);
    let twenty = b.const_i32(20);
    b.array_set(arr, zero, ten);
    b.array_set(arr, one, twenty);
    let load = b.array_get(arr, zero, DataType::Int32);
    b.ret_val(load);
    let mut graph = b.finish();

    assert!(run_lse(&mut graph));
    assert!(!graph.instruction(load).is_live());
    assert_eq!(operand_of_return(&graph), ten);
    assert_idempotent(&mut graph);
}

#[test]
fn driver_optimizes_methods_in_parallel() {
    let build_method = |id: u32| {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, DataType::Reference);
        let f = FieldRef::new(1, 0, DataType::Int32);
        let one = b.const_i32(1);
        b.field_set(obj, f, one);
        let load = b.field_get(obj, f);
        b.ret_val(load);
        MethodGraph {
            id,
            graph: b.finish(),
        }
    };

    let mut methods: Vec<MethodGraph> = (0..8).map(build_method).collect();
    let stats = optimize_all(&mut methods);
    assert_eq!(stats.methods_changed, 8);
    assert!(stats.failures.is_empty());
    assert_eq!(stats.events.len(), 8);
}

#[test]
fn driver_reports_invalid_graphs() {
    let mut broken = InstructionGraph::new();
    let b0 = broken.add_block();
    let b1 = broken.add_block();
    broken.add_edge(b0, b1);
    // Phi with the wrong arity.
    broken.insert_phi(b1, DataType::Int32);
    broken.analyze();

    let mut methods = vec![MethodGraph {
        id: 42,
        graph: broken,
    }];
    let stats = PassDriver::with_default_passes().run(&mut methods);
    assert_eq!(stats.methods_changed, 0);
    assert!(stats.failures.contains_key(&42));
}
