//! Script functions available to orchestra code.
//!
//! Instruments and top-level orchestra code talk to the engine through these
//! functions. All of them go through the shared [`EngineStore`].
//!
//! - `chnset(value, name)` / `chnget(name)` - control channels
//! - `ftgen(values)` / `ftgen(number, values)` - create a function table
//! - `tab(number, index)` / `tabw(number, index, value)` / `ftlen(number)`
//! - `score_time()` - current score position in beats

use liveperf_core::Value;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, FLOAT, INT};

use crate::store::EngineStore;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Create a Rhai engine with the orchestra API registered.
pub fn create_engine(store: &EngineStore) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(1024, 1024);
    engine.set_max_call_levels(1024);

    // Route print() and debug() through the log system instead of stdout.
    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[script]{} {}", loc, text);
    });

    register_channels(&mut engine, store);
    register_tables(&mut engine, store);

    let clock = store.clone();
    engine.register_fn("score_time", move || -> FLOAT { clock.score_time() });

    engine
}

/// Convert a script value into an engine value.
///
/// Unit maps to zero, matching what an evaluation without `return` yields.
pub fn dynamic_to_value(value: Dynamic) -> Option<Value> {
    if value.is_unit() {
        return Some(Value::Number(0.0));
    }
    if let Ok(i) = value.as_int() {
        return Some(Value::Number(i as f64));
    }
    if let Ok(f) = value.as_float() {
        return Some(Value::Number(f));
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Number(if b { 1.0 } else { 0.0 }));
    }
    if value.is_string() {
        return value.into_string().ok().map(Value::Text);
    }
    None
}

/// Convert an engine value into a script value.
pub fn value_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Number(n) => Dynamic::from_float(n),
        Value::Text(s) => Dynamic::from(s),
    }
}

fn register_channels(engine: &mut Engine, store: &EngineStore) {
    let s = store.clone();
    engine.register_fn("chnset", move |value: FLOAT, name: ImmutableString| {
        s.set_channel(&name, Value::Number(value));
    });
    let s = store.clone();
    engine.register_fn("chnset", move |value: INT, name: ImmutableString| {
        s.set_channel(&name, Value::Number(value as f64));
    });
    let s = store.clone();
    engine.register_fn("chnset", move |value: ImmutableString, name: ImmutableString| {
        s.set_channel(&name, Value::Text(value.to_string()));
    });

    // Unknown channels read as zero.
    let s = store.clone();
    engine.register_fn("chnget", move |name: ImmutableString| -> Dynamic {
        s.channel(&name)
            .map(value_to_dynamic)
            .unwrap_or_else(|| Dynamic::from_float(0.0))
    });
}

fn register_tables(engine: &mut Engine, store: &EngineStore) {
    let s = store.clone();
    engine.register_fn("ftgen", move |values: Array| -> FnResult<INT> {
        Ok(s.create_table(array_to_floats(values)?))
    });
    let s = store.clone();
    engine.register_fn("ftgen", move |number: INT, values: Array| -> FnResult<INT> {
        if number <= 0 {
            return Err(format!("invalid table number {}", number).into());
        }
        s.create_table_at(number, array_to_floats(values)?);
        Ok(number)
    });

    let s = store.clone();
    engine.register_fn("tab", move |number: INT, index: INT| -> FnResult<FLOAT> {
        s.with_read(|state| {
            let table = state
                .tables
                .get(&number)
                .ok_or_else(|| missing_table(number))?;
            let slot = usize::try_from(index)
                .ok()
                .and_then(|i| table.get(i))
                .ok_or_else(|| out_of_range(number, index, table.len()))?;
            Ok(*slot)
        })
    });

    let s = store.clone();
    engine.register_fn(
        "tabw",
        move |number: INT, index: INT, value: FLOAT| -> FnResult<()> {
            write_table(&s, number, index, value)
        },
    );
    let s = store.clone();
    engine.register_fn(
        "tabw",
        move |number: INT, index: INT, value: INT| -> FnResult<()> {
            write_table(&s, number, index, value as FLOAT)
        },
    );

    let s = store.clone();
    engine.register_fn("ftlen", move |number: INT| -> FnResult<INT> {
        s.with_read(|state| {
            state
                .tables
                .get(&number)
                .map(|t| t.len() as INT)
                .ok_or_else(|| missing_table(number))
        })
    });
}

fn write_table(store: &EngineStore, number: INT, index: INT, value: FLOAT) -> FnResult<()> {
    store.with_write(|state| {
        let table = state
            .tables
            .get_mut(&number)
            .ok_or_else(|| missing_table(number))?;
        let len = table.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| table.get_mut(i))
            .ok_or_else(|| out_of_range(number, index, len))?;
        *slot = value;
        Ok(())
    })
}

fn array_to_floats(values: Array) -> FnResult<Vec<f64>> {
    values
        .into_iter()
        .map(|v| {
            v.as_float()
                .or_else(|_| v.as_int().map(|i| i as FLOAT))
                .map_err(|type_name| {
                    format!("table values must be numbers, got {}", type_name).into()
                })
        })
        .collect()
}

fn missing_table(number: INT) -> Box<EvalAltResult> {
    format!("table {} does not exist", number).into()
}

fn out_of_range(number: INT, index: INT, len: usize) -> Box<EvalAltResult> {
    format!("index {} out of range for table {} (length {})", index, number, len).into()
}
