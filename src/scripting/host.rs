//! Script lifecycle host: load-time validation, capability discovery,
//! context binding and quarantined callback invocation.

use rhai::{AST, CallFnOptions, Dynamic, Engine, Map, Scope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::ConfigValue;
use crate::domain::errors::ScriptError;
use crate::domain::market::{Interval, Kline, KlineBuffer, OrderBookSnapshot, Ticker};
use crate::domain::trading::types::TradeIntent;
use crate::scripting::intent::parse_intent;
use crate::scripting::sandbox::{self, DeadlineSlot, HostVars};

/// Per-callback wall-clock budget.
pub const DEFAULT_CALLBACK_BUDGET: Duration = Duration::from_millis(500);

/// Which optional entry points the script defines; dispatch consults this
/// set so undefined callbacks are never invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackSet {
    pub on_start: bool,
    pub on_stop: bool,
    pub on_kline: bool,
    pub on_orderbook: bool,
    pub on_ticker: bool,
    pub on_rebalance: bool,
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost").field("name", &self.name).finish()
    }
}

pub struct ScriptHost {
    name: String,
    engine: Engine,
    ast: AST,
    pub callbacks: CallbackSet,
    interval: Interval,
    state: Arc<RwLock<Map>>,
    config: Arc<RwLock<Map>>,
    vars: HostVars,
    deadline: DeadlineSlot,
    budget: Duration,
}

fn config_value_to_dynamic(value: &ConfigValue) -> Dynamic {
    match value {
        ConfigValue::Bool(b) => Dynamic::from_bool(*b),
        ConfigValue::Int(i) => Dynamic::from_int(*i),
        ConfigValue::Float(f) => Dynamic::from_float(*f),
        ConfigValue::Str(s) => Dynamic::from(s.clone()),
    }
}

impl ScriptHost {
    /// Loads and validates a script: parse, confirm `settings()` exists and
    /// returns a map with a recognized `interval`, and record which
    /// callbacks are defined.
    pub fn load(
        name: &str,
        source: &str,
        overrides: &HashMap<String, ConfigValue>,
        budget: Duration,
    ) -> Result<Self, ScriptError> {
        Self::load_with(name, source, overrides, budget, |_| {})
    }

    /// Same as [`load`](Self::load), with an engine customization hook so
    /// sibling hosts (the rebalance worker) can add their helper functions.
    pub fn load_with(
        name: &str,
        source: &str,
        overrides: &HashMap<String, ConfigValue>,
        budget: Duration,
        customize: impl FnOnce(&mut Engine),
    ) -> Result<Self, ScriptError> {
        let vars: HostVars = Arc::new(RwLock::new(Map::new()));
        let state = Arc::new(RwLock::new(Map::new()));
        let config = Arc::new(RwLock::new(Map::new()));
        let deadline: DeadlineSlot = Arc::new(Mutex::new(None));

        let mut engine =
            sandbox::build_engine(name, vars.clone(), state.clone(), config.clone(), deadline.clone());
        customize(&mut engine);

        let ast = engine.compile(source).map_err(|e| ScriptError::Syntax {
            reason: e.to_string(),
        })?;

        let mut callbacks = CallbackSet::default();
        let mut has_settings = false;
        for f in ast.iter_functions() {
            match f.name {
                "settings" => has_settings = true,
                "on_start" => callbacks.on_start = true,
                "on_stop" => callbacks.on_stop = true,
                "on_kline" => callbacks.on_kline = true,
                "on_orderbook" => callbacks.on_orderbook = true,
                "on_ticker" => callbacks.on_ticker = true,
                "on_rebalance" => callbacks.on_rebalance = true,
                _ => {}
            }
        }
        if !has_settings {
            return Err(ScriptError::Settings {
                reason: "settings() is not defined".to_string(),
            });
        }

        // Top-level statements run exactly once, here; callback invocations
        // later never re-evaluate the AST body.
        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(true).rewind_scope(true);
        let settings_value = engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &ast, "settings", ())
            .map_err(|e| ScriptError::Settings {
                reason: e.to_string(),
            })?;
        let settings: Map = settings_value.try_cast().ok_or_else(|| ScriptError::Settings {
            reason: "settings() did not return a map".to_string(),
        })?;

        // Merge: script defaults overlaid with operator overrides.
        {
            let mut merged = config.write().expect("config poisoned");
            *merged = settings;
            for (key, value) in overrides {
                merged.insert(key.as_str().into(), config_value_to_dynamic(value));
            }
        }

        let interval = {
            let merged = config.read().expect("config poisoned");
            let raw = merged
                .get("interval")
                .cloned()
                .and_then(|d| d.into_string().ok())
                .ok_or_else(|| ScriptError::Settings {
                    reason: "settings() must provide an interval".to_string(),
                })?;
            raw.parse::<Interval>().map_err(|e| ScriptError::Settings {
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            name: name.to_string(),
            engine,
            ast,
            callbacks,
            interval,
            state,
            config,
            vars,
            deadline,
            budget,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Ring-buffer capacity hint: scripts declare their deepest indicator
    /// lookback in `settings().lookback`; the buffer floor still applies.
    pub fn lookback_hint(&self) -> usize {
        self.config
            .read()
            .expect("config poisoned")
            .get("lookback")
            .and_then(|d| d.as_int().ok())
            .map(|i| i.max(0) as usize)
            .unwrap_or(0)
    }

    pub fn config_f64(&self, key: &str, default: f64) -> f64 {
        let merged = self.config.read().expect("config poisoned");
        match merged.get(key) {
            Some(d) => d
                .as_float()
                .ok()
                .or_else(|| d.as_int().ok().map(|i| i as f64))
                .unwrap_or(default),
            None => default,
        }
    }

    pub fn config_i64(&self, key: &str, default: i64) -> i64 {
        let merged = self.config.read().expect("config poisoned");
        match merged.get(key) {
            Some(d) => d.as_int().ok().unwrap_or(default),
            None => default,
        }
    }

    /// Rebinds the host market context before a callback runs. All bindings
    /// resolve by plain name inside the script; NaN stands in for an absent
    /// bid/ask/spread (a one-sided or empty book).
    pub fn bind_market(
        &self,
        symbol: &str,
        exchange: &str,
        buffer: &KlineBuffer,
        book: Option<&OrderBookSnapshot>,
    ) {
        let mut vars = self.vars.write().expect("host vars poisoned");
        vars.insert("symbol".into(), Dynamic::from(symbol.to_string()));
        vars.insert("exchange".into(), Dynamic::from(exchange.to_string()));
        vars.insert("open".into(), float_array(buffer.opens()));
        vars.insert("high".into(), float_array(buffer.highs()));
        vars.insert("low".into(), float_array(buffer.lows()));
        vars.insert("close".into(), float_array(buffer.closes()));
        vars.insert("volume".into(), float_array(buffer.volumes()));
        vars.insert(
            "klines".into(),
            Dynamic::from_array(buffer.iter().map(|k| Dynamic::from_map(kline_to_map(k))).collect()),
        );

        let (bid, ask) = match book {
            Some(b) => (
                b.best_bid().unwrap_or(f64::NAN),
                b.best_ask().unwrap_or(f64::NAN),
            ),
            None => (f64::NAN, f64::NAN),
        };
        vars.insert("bid".into(), Dynamic::from_float(bid));
        vars.insert("ask".into(), Dynamic::from_float(ask));
        vars.insert("spread".into(), Dynamic::from_float(ask - bid));
    }

    /// Extra named binding (rebalance context and similar).
    pub fn bind_var(&self, name: &str, value: Dynamic) {
        self.vars
            .write()
            .expect("host vars poisoned")
            .insert(name.into(), value);
    }

    fn classify(&self, callback: &str, err: rhai::EvalAltResult) -> ScriptError {
        use rhai::EvalAltResult::*;
        match err {
            ErrorTerminated(..) => ScriptError::Budget {
                callback: callback.to_string(),
                budget: format!("{:?}", self.budget),
            },
            ErrorAssignmentToConstant(name, _) => ScriptError::FrozenGlobal { name },
            other => ScriptError::Runtime {
                callback: callback.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Invokes one script function under the armed deadline. The AST body is
    /// not re-evaluated, and the call's scope is discarded afterwards.
    fn invoke(&self, fn_name: &str, args: impl rhai::FuncArgs) -> Result<Dynamic, ScriptError> {
        *self.deadline.lock().expect("deadline slot poisoned") =
            Some(Instant::now() + self.budget);
        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, fn_name, args);
        *self.deadline.lock().expect("deadline slot poisoned") = None;
        result.map_err(|e| self.classify(fn_name, *e))
    }

    /// Runs a unit callback (`on_start`, `on_stop`, `on_rebalance`).
    pub fn call_unit(&self, fn_name: &str) -> Result<(), ScriptError> {
        self.invoke(fn_name, ()).map(|_| ())
    }

    fn call_trading(&self, fn_name: &str, arg: Map) -> Result<TradeIntent, ScriptError> {
        let value = self.invoke(fn_name, (arg,))?;
        if value.is_unit() {
            return Ok(TradeIntent::hold());
        }
        match value.try_cast::<Map>().as_ref().and_then(parse_intent) {
            Some(intent) => Ok(intent),
            None => {
                warn!(
                    strategy = %self.name,
                    callback = fn_name,
                    "Invalid intent shape returned, treating as hold"
                );
                Ok(TradeIntent::hold())
            }
        }
    }

    pub fn call_on_kline(&self, kline: &Kline) -> Result<TradeIntent, ScriptError> {
        self.call_trading("on_kline", kline_to_map(kline))
    }

    pub fn call_on_orderbook(&self, book: &OrderBookSnapshot) -> Result<TradeIntent, ScriptError> {
        self.call_trading("on_orderbook", orderbook_to_map(book))
    }

    pub fn call_on_ticker(&self, ticker: &Ticker) -> Result<TradeIntent, ScriptError> {
        self.call_trading("on_ticker", ticker_to_map(ticker))
    }

    /// Test and notification-hook access to the worker-scoped state map.
    pub fn state_get(&self, key: &str) -> Option<Dynamic> {
        self.state
            .read()
            .expect("state poisoned")
            .get(key)
            .cloned()
    }

    pub fn state_set(&self, key: &str, value: Dynamic) {
        self.state
            .write()
            .expect("state poisoned")
            .insert(key.into(), value);
    }
}

fn float_array(xs: Vec<f64>) -> Dynamic {
    Dynamic::from_array(xs.into_iter().map(Dynamic::from_float).collect())
}

pub fn kline_to_map(kline: &Kline) -> Map {
    let mut m = Map::new();
    m.insert("symbol".into(), Dynamic::from(kline.symbol.clone()));
    m.insert("interval".into(), Dynamic::from(kline.interval.as_str().to_string()));
    m.insert("open_time".into(), Dynamic::from_int(kline.open_time));
    m.insert("open".into(), Dynamic::from_float(kline.open));
    m.insert("high".into(), Dynamic::from_float(kline.high));
    m.insert("low".into(), Dynamic::from_float(kline.low));
    m.insert("close".into(), Dynamic::from_float(kline.close));
    m.insert("volume".into(), Dynamic::from_float(kline.volume));
    m
}

pub fn orderbook_to_map(book: &OrderBookSnapshot) -> Map {
    let level_to_dynamic = |levels: &[crate::domain::market::BookLevel]| -> Dynamic {
        Dynamic::from_array(
            levels
                .iter()
                .map(|l| {
                    let mut m = Map::new();
                    m.insert("price".into(), Dynamic::from_float(l.price));
                    m.insert("quantity".into(), Dynamic::from_float(l.quantity));
                    Dynamic::from_map(m)
                })
                .collect(),
        )
    };
    let mut m = Map::new();
    m.insert("symbol".into(), Dynamic::from(book.symbol.clone()));
    m.insert("bids".into(), level_to_dynamic(&book.bids));
    m.insert("asks".into(), level_to_dynamic(&book.asks));
    m.insert("ts".into(), Dynamic::from_int(book.ts));
    m
}

pub fn ticker_to_map(ticker: &Ticker) -> Map {
    let mut m = Map::new();
    m.insert("symbol".into(), Dynamic::from(ticker.symbol.clone()));
    m.insert("last_price".into(), Dynamic::from_float(ticker.last_price));
    m.insert("session_volume".into(), Dynamic::from_float(ticker.session_volume));
    m.insert("ts".into(), Dynamic::from_int(ticker.ts));
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::series::KlineBuffer;

    fn kline(open_time: i64, close: f64) -> Kline {
        Kline {
            symbol: "BTC/USDT".to_string(),
            interval: Interval::OneMinute,
            open_time,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 2.0,
        }
    }

    fn load(source: &str) -> Result<ScriptHost, ScriptError> {
        ScriptHost::load("test", source, &HashMap::new(), DEFAULT_CALLBACK_BUDGET)
    }

    const MINIMAL: &str = r#"
        fn settings() {
            #{ interval: "1m" }
        }

        fn on_kline(k) {
            #{ action: "hold" }
        }
    "#;

    #[test]
    fn test_load_discovers_callbacks() {
        let host = load(MINIMAL).unwrap();
        assert!(host.callbacks.on_kline);
        assert!(!host.callbacks.on_ticker);
        assert!(!host.callbacks.on_orderbook);
        assert_eq!(host.interval(), Interval::OneMinute);
    }

    #[test]
    fn test_load_rejects_missing_settings() {
        let err = load("fn on_kline(k) { }").unwrap_err();
        assert!(matches!(err, ScriptError::Settings { .. }));
    }

    #[test]
    fn test_load_rejects_bad_interval() {
        let err = load(r#"fn settings() { #{ interval: "7m" } }"#).unwrap_err();
        assert!(matches!(err, ScriptError::Settings { .. }));
    }

    #[test]
    fn test_load_rejects_syntax_error() {
        let err = load("fn settings( {").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
    }

    #[test]
    fn test_overrides_overlay_settings() {
        let source = r#"
            fn settings() {
                #{ interval: "1m", period: 14 }
            }
        "#;
        let mut overrides = HashMap::new();
        overrides.insert("period".to_string(), ConfigValue::Int(7));
        overrides.insert("interval".to_string(), ConfigValue::Str("5m".to_string()));
        let host =
            ScriptHost::load("test", source, &overrides, DEFAULT_CALLBACK_BUDGET).unwrap();
        assert_eq!(host.interval(), Interval::FiveMinutes);
        assert_eq!(host.config_i64("period", 0), 7);
    }

    #[test]
    fn test_state_round_trip_through_script() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                let count = get_state("count", 0);
                set_state("count", count + 1);
                #{ action: "hold" }
            }
        "#;
        let host = load(source).unwrap();
        let buffer = KlineBuffer::new(0);
        host.bind_market("BTC/USDT", "mock", &buffer, None);

        for i in 0..3 {
            host.call_on_kline(&kline(1000 * (i + 1), 100.0)).unwrap();
        }
        assert_eq!(host.state_get("count").unwrap().as_int().unwrap(), 3);
    }

    #[test]
    fn test_host_context_visible_inside_callback() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                if symbol != "BTC/USDT" {
                    return #{ action: "hold" };
                }
                if len(close) >= 2 {
                    return #{ action: "buy", quantity: 0.5, reason: "enough bars" };
                }
                #{ action: "hold" }
            }
        "#;
        let host = load(source).unwrap();
        let mut buffer = KlineBuffer::new(0);
        buffer.push(kline(1000, 100.0));
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&kline(1000, 100.0)).unwrap();
        assert!(intent.is_hold());

        buffer.push(kline(2000, 101.0));
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&kline(2000, 101.0)).unwrap();
        assert_eq!(intent.quantity, rust_decimal_macros::dec!(0.5));
    }

    #[test]
    fn test_runtime_error_is_quarantined() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                this_function_does_not_exist();
            }
        "#;
        let host = load(source).unwrap();
        let buffer = KlineBuffer::new(0);
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let err = host.call_on_kline(&kline(1000, 100.0)).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn test_time_budget_aborts_runaway_callback() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                let x = 0;
                loop {
                    x += 1;
                }
            }
        "#;
        let host = ScriptHost::load(
            "test",
            source,
            &HashMap::new(),
            Duration::from_millis(50),
        )
        .unwrap();
        let buffer = KlineBuffer::new(0);
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let err = host.call_on_kline(&kline(1000, 100.0)).unwrap_err();
        assert!(matches!(err, ScriptError::Budget { .. }));
    }

    #[test]
    fn test_invalid_return_shape_is_hold() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                42
            }
        "#;
        let host = load(source).unwrap();
        let buffer = KlineBuffer::new(0);
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&kline(1000, 100.0)).unwrap();
        assert!(intent.is_hold());
    }

    #[test]
    fn test_missing_return_is_hold() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                let unused = k.close;
            }
        "#;
        let host = load(source).unwrap();
        let buffer = KlineBuffer::new(0);
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&kline(1000, 100.0)).unwrap();
        assert!(intent.is_hold());
    }

    #[test]
    fn test_indicators_callable_from_script() {
        let source = r#"
            fn settings() {
                #{ interval: "1m", short: 2, long: 3 }
            }

            fn on_kline(k) {
                let s = sma(close, get_config("short", 2));
                let l = sma(close, get_config("long", 3));
                let x = crossover(s, l);
                if x[len(x) - 1] {
                    return #{ action: "buy", quantity: 0.01, reason: "golden cross" };
                }
                #{ action: "hold" }
            }
        "#;
        let host = load(source).unwrap();
        let mut buffer = KlineBuffer::new(0);
        // Closes from the crossover scenario; the cross lands on bar 4.
        let closes = [100.0, 99.0, 98.0, 101.0, 104.0];
        let mut buys = 0;
        for (i, c) in closes.iter().enumerate() {
            let k = kline(1000 * (i as i64 + 1), *c);
            buffer.push(k.clone());
            host.bind_market("BTC/USDT", "mock", &buffer, None);
            let intent = host.call_on_kline(&k).unwrap();
            if !intent.is_hold() {
                buys += 1;
            }
        }
        assert_eq!(buys, 1);
    }

    #[test]
    fn test_deterministic_evaluation() {
        let source = r#"
            fn settings() {
                #{ interval: "1m" }
            }

            fn on_kline(k) {
                let r = rsi(close, 3);
                set_state("last_rsi", r[len(r) - 1]);
                #{ action: "hold" }
            }
        "#;
        let run = || -> f64 {
            let host = load(source).unwrap();
            let mut buffer = KlineBuffer::new(0);
            for (i, c) in [10.0, 11.0, 10.5, 12.0, 13.0].iter().enumerate() {
                let k = kline(1000 * (i as i64 + 1), *c);
                buffer.push(k.clone());
                host.bind_market("BTC/USDT", "mock", &buffer, None);
                host.call_on_kline(&k).unwrap();
            }
            host.state_get("last_rsi").unwrap().as_float().unwrap()
        };
        assert_eq!(run(), run());
    }
}
