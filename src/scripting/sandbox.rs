//! Engine assembly: which language facilities scripts get, and the hard
//! limits that keep a callback inside its time and memory budget.

use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, Map, Module, FLOAT, INT};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::info;

/// Value caps sized so script-held values stay inside the per-callback
/// memory budget (16 MiB of `Dynamic` slots).
const MAX_ARRAY_SIZE: usize = 1_000_000;
const MAX_MAP_SIZE: usize = 100_000;
const MAX_STRING_SIZE: usize = 1_048_576;
const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 128;
/// Backstop op count in case a callback never yields to the progress hook's
/// wall-clock check.
const MAX_OPERATIONS: u64 = 100_000_000;

/// Shared per-call deadline slot; the host arms it before every callback.
pub type DeadlineSlot = Arc<Mutex<Option<Instant>>>;

/// Host bindings resolved by plain name from anywhere in the script,
/// including inside callback functions. Read-only from the script's side.
pub type HostVars = Arc<RwLock<Map>>;

/// Builds the restricted engine.
///
/// Only these packages are linked: core language, arithmetic/logic, arrays,
/// maps, math and string utilities. No time package, no blob package, no
/// module resolution, no `eval` — evaluation is deterministic in the host
/// bindings and script state alone.
pub fn build_engine(
    strategy: &str,
    vars: HostVars,
    state: Arc<RwLock<Map>>,
    config: Arc<RwLock<Map>>,
    deadline: DeadlineSlot,
) -> Engine {
    let mut engine = Engine::new_raw();

    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());

    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_MAP_SIZE);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_modules(0);
    engine.disable_symbol("eval");

    // Wall-clock budget: the progress hook fires periodically during
    // evaluation and terminates the call once the armed deadline passes.
    let progress_deadline = deadline.clone();
    engine.on_progress(move |_ops| {
        let slot = progress_deadline.lock().expect("deadline slot poisoned");
        match *slot {
            Some(deadline) if Instant::now() >= deadline => {
                Some(Dynamic::from("time budget exceeded"))
            }
            _ => None,
        }
    });

    // Plain-name host bindings (`close`, `symbol`, `bid`, ...). The resolver
    // hands out copies, so scripts can never mutate host context in place.
    let resolver_vars = vars.clone();
    engine.on_var(move |name, _index, _context| {
        let map = resolver_vars.read().expect("host vars poisoned");
        Ok(map.get(name).cloned())
    });

    let print_strategy = strategy.to_string();
    engine.on_print(move |text| {
        println!("[{print_strategy}] {text}");
    });

    let log_strategy = strategy.to_string();
    engine.register_fn("log", move |msg: &str| {
        info!(strategy = %log_strategy, "{msg}");
    });

    // State API. Thread safety comes from the single-threaded worker; the
    // lock only satisfies the engine's Send + Sync bounds.
    let get_state = state.clone();
    engine.register_fn("get_state", move |key: &str, default: Dynamic| -> Dynamic {
        get_state
            .read()
            .expect("state poisoned")
            .get(key)
            .cloned()
            .unwrap_or(default)
    });
    let set_state = state.clone();
    engine.register_fn("set_state", move |key: &str, value: Dynamic| {
        set_state
            .write()
            .expect("state poisoned")
            .insert(key.into(), value);
    });

    // Config API over the merged settings/overrides map.
    let get_config = config.clone();
    engine.register_fn("get_config", move |key: &str, default: Dynamic| -> Dynamic {
        get_config
            .read()
            .expect("config poisoned")
            .get(key)
            .cloned()
            .unwrap_or(default)
    });

    register_utilities(&mut engine);
    super::indicators_api::register(&mut engine);

    engine
}

fn register_utilities(engine: &mut Engine) {
    engine.register_fn("len", |arr: &mut Array| arr.len() as INT);
    engine.register_fn("len", |map: &mut Map| map.len() as INT);
    engine.register_fn("len", |s: &str| s.chars().count() as INT);

    engine.register_fn("round", |x: FLOAT| x.round());
    engine.register_fn("round", |x: INT| x);

    // `range` materializes as an array, like every indicator output. Spans
    // beyond the engine's array cap come back empty rather than allocating
    // outside the memory budget.
    engine.register_fn("range", |end: INT| -> Array { int_range(0, end) });
    engine.register_fn("range", |start: INT, end: INT| -> Array { int_range(start, end) });

    engine.register_fn("max", |a: FLOAT, b: FLOAT| a.max(b));
    engine.register_fn("max", |a: INT, b: INT| a.max(b));
    engine.register_fn("max", |a: INT, b: FLOAT| (a as FLOAT).max(b));
    engine.register_fn("max", |a: FLOAT, b: INT| a.max(b as FLOAT));
    engine.register_fn("min", |a: FLOAT, b: FLOAT| a.min(b));
    engine.register_fn("min", |a: INT, b: INT| a.min(b));
    engine.register_fn("min", |a: INT, b: FLOAT| (a as FLOAT).min(b));
    engine.register_fn("min", |a: FLOAT, b: INT| a.min(b as FLOAT));

    engine.register_fn("isnan", |x: FLOAT| x.is_nan());

    let mut math = Module::new();
    math.set_native_fn("abs", |x: FLOAT| Ok(x.abs()));
    math.set_native_fn("abs", |x: INT| Ok(x.abs()));
    math.set_native_fn("isnan", |x: FLOAT| Ok(x.is_nan()));
    math.set_native_fn("sqrt", |x: FLOAT| Ok(x.sqrt()));
    math.set_native_fn("floor", |x: FLOAT| Ok(x.floor()));
    math.set_native_fn("ceil", |x: FLOAT| Ok(x.ceil()));
    engine.register_static_module("math", math.into());
}

fn int_range(start: INT, end: INT) -> Array {
    if end <= start || (end - start) as usize > MAX_ARRAY_SIZE {
        return Array::new();
    }
    (start..end).map(Dynamic::from_int).collect()
}
