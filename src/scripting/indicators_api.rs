//! Bindings from the script surface to the indicator kernel.
//!
//! Script sequences are coerced element-wise to 64-bit floats before a
//! kernel call; any value that will not coerce fails that single indicator
//! call, which returns an empty sequence instead of partially corrupted
//! output. Multi-output indicators return maps of parallel sequences.

use crate::domain::indicators as ta;
use rhai::{Array, Dynamic, Engine, Map, FLOAT, INT};

fn coerce(arr: &Array) -> Option<Vec<f64>> {
    arr.iter()
        .map(|d| {
            if let Ok(f) = d.as_float() {
                Some(f)
            } else {
                d.as_int().ok().map(|i| i as f64)
            }
        })
        .collect()
}

fn floats(xs: Vec<f64>) -> Dynamic {
    Dynamic::from_array(xs.into_iter().map(Dynamic::from_float).collect())
}

fn bools(xs: Vec<bool>) -> Dynamic {
    Dynamic::from_array(xs.into_iter().map(Dynamic::from_bool).collect())
}

fn empty() -> Dynamic {
    Dynamic::from_array(Array::new())
}

fn map2(k1: &str, v1: Dynamic, k2: &str, v2: Dynamic) -> Dynamic {
    let mut m = Map::new();
    m.insert(k1.into(), v1);
    m.insert(k2.into(), v2);
    Dynamic::from_map(m)
}

fn map3(k1: &str, v1: Dynamic, k2: &str, v2: Dynamic, k3: &str, v3: Dynamic) -> Dynamic {
    let mut m = Map::new();
    m.insert(k1.into(), v1);
    m.insert(k2.into(), v2);
    m.insert(k3.into(), v3);
    Dynamic::from_map(m)
}

/// Lifts a single-sequence, single-period kernel function.
macro_rules! unary_period {
    ($engine:expr, $name:literal, $func:path) => {
        $engine.register_fn($name, |xs: Array, period: INT| -> Dynamic {
            match coerce(&xs) {
                Some(v) => floats($func(&v, period.max(0) as usize)),
                None => empty(),
            }
        });
    };
}

/// Lifts a high/low/close, single-period kernel function.
macro_rules! hlc_period {
    ($engine:expr, $name:literal, $func:path) => {
        $engine.register_fn(
            $name,
            |high: Array, low: Array, close: Array, period: INT| -> Dynamic {
                match (coerce(&high), coerce(&low), coerce(&close)) {
                    (Some(h), Some(l), Some(c)) => {
                        floats($func(&h, &l, &c, period.max(0) as usize))
                    }
                    _ => empty(),
                }
            },
        );
    };
}

pub fn register(engine: &mut Engine) {
    // Moving averages.
    unary_period!(engine, "sma", ta::sma);
    unary_period!(engine, "ema", ta::ema);
    unary_period!(engine, "wma", ta::wma);
    unary_period!(engine, "hma", ta::hma);
    unary_period!(engine, "tema", ta::tema);
    engine.register_fn("alma", |xs: Array, period: INT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::alma(&v, period.max(0) as usize, 0.85, 6.0)),
            None => empty(),
        }
    });
    engine.register_fn(
        "alma",
        |xs: Array, period: INT, offset: FLOAT, sigma: FLOAT| -> Dynamic {
            match coerce(&xs) {
                Some(v) => floats(ta::alma(&v, period.max(0) as usize, offset, sigma)),
                None => empty(),
            }
        },
    );
    engine.register_fn("kama", |xs: Array, period: INT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::kama(&v, period.max(0) as usize, 2, 30)),
            None => empty(),
        }
    });

    // Momentum oscillators.
    unary_period!(engine, "rsi", ta::rsi);
    unary_period!(engine, "roc", ta::roc);
    unary_period!(engine, "cmo", ta::cmo);
    engine.register_fn(
        "stochastic",
        |high: Array, low: Array, close: Array, k: INT, d: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::stochastic(&h, &l, &c, k.max(0) as usize, d.max(0) as usize);
                    map2("k", floats(out.k), "d", floats(out.d))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("stoch_rsi", |xs: Array, period: INT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => {
                let p = period.max(0) as usize;
                let out = ta::stochastic_rsi(&v, p, p, 3, 3);
                map2("k", floats(out.k), "d", floats(out.d))
            }
            None => empty(),
        }
    });
    engine.register_fn(
        "macd",
        |xs: Array, fast: INT, slow: INT, signal: INT| -> Dynamic {
            match coerce(&xs) {
                Some(v) => {
                    let out = ta::macd(
                        &v,
                        fast.max(0) as usize,
                        slow.max(0) as usize,
                        signal.max(0) as usize,
                    );
                    map3(
                        "macd",
                        floats(out.macd),
                        "signal",
                        floats(out.signal),
                        "histogram",
                        floats(out.histogram),
                    )
                }
                None => empty(),
            }
        },
    );
    hlc_period!(engine, "williams_r", ta::williams_r);
    hlc_period!(engine, "cci", ta::cci);
    engine.register_fn("tsi", |xs: Array| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::tsi(&v, 25, 13)),
            None => empty(),
        }
    });
    engine.register_fn(
        "ultimate_oscillator",
        |high: Array, low: Array, close: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => floats(ta::ultimate_oscillator(&h, &l, &c, 7, 14, 28)),
                _ => empty(),
            }
        },
    );
    engine.register_fn("kst", |xs: Array| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::kst(&v, 10, 15, 20, 30, 10, 10, 10, 15)),
            None => empty(),
        }
    });
    engine.register_fn("stc", |xs: Array| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::stc(&v, 23, 50, 10)),
            None => empty(),
        }
    });
    engine.register_fn("ppo", |xs: Array, fast: INT, slow: INT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::ppo(&v, fast.max(0) as usize, slow.max(0) as usize)),
            None => empty(),
        }
    });
    engine.register_fn(
        "rvi",
        |open: Array, high: Array, low: Array, close: Array, period: INT| -> Dynamic {
            match (coerce(&open), coerce(&high), coerce(&low), coerce(&close)) {
                (Some(o), Some(h), Some(l), Some(c)) => {
                    floats(ta::rvi(&o, &h, &l, &c, period.max(0) as usize))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("coppock", |xs: Array| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::coppock(&v, 14, 11, 10)),
            None => empty(),
        }
    });

    // Volatility.
    engine.register_fn("bollinger", |xs: Array, period: INT, mult: FLOAT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => {
                let out = ta::bollinger(&v, period.max(0) as usize, mult);
                map3(
                    "middle",
                    floats(out.middle),
                    "upper",
                    floats(out.upper),
                    "lower",
                    floats(out.lower),
                )
            }
            None => empty(),
        }
    });
    hlc_period!(engine, "atr", ta::atr);
    engine.register_fn(
        "keltner",
        |high: Array, low: Array, close: Array, period: INT, mult: FLOAT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::keltner(&h, &l, &c, period.max(0) as usize, mult);
                    map3(
                        "middle",
                        floats(out.middle),
                        "upper",
                        floats(out.upper),
                        "lower",
                        floats(out.lower),
                    )
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("donchian", |high: Array, low: Array, period: INT| -> Dynamic {
        match (coerce(&high), coerce(&low)) {
            (Some(h), Some(l)) => {
                let out = ta::donchian(&h, &l, period.max(0) as usize);
                map3(
                    "middle",
                    floats(out.middle),
                    "upper",
                    floats(out.upper),
                    "lower",
                    floats(out.lower),
                )
            }
            _ => empty(),
        }
    });
    engine.register_fn(
        "price_channel",
        |high: Array, low: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low)) {
                (Some(h), Some(l)) => {
                    let out = ta::price_channel(&h, &l, period.max(0) as usize);
                    map3(
                        "middle",
                        floats(out.middle),
                        "upper",
                        floats(out.upper),
                        "lower",
                        floats(out.lower),
                    )
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "supertrend",
        |high: Array, low: Array, close: Array, period: INT, mult: FLOAT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::supertrend(&h, &l, &c, period.max(0) as usize, mult);
                    map2("line", floats(out.line), "direction", floats(out.direction))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "chandelier_exit",
        |high: Array, low: Array, close: Array, period: INT, mult: FLOAT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::chandelier_exit(&h, &l, &c, period.max(0) as usize, mult);
                    map2("long", floats(out.long), "short", floats(out.short))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "chande_kroll_stop",
        |high: Array, low: Array, close: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::chande_kroll_stop(&h, &l, &c, 10, 1.0, 9);
                    map2(
                        "stop_long",
                        floats(out.stop_long),
                        "stop_short",
                        floats(out.stop_short),
                    )
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("mass_index", |high: Array, low: Array| -> Dynamic {
        match (coerce(&high), coerce(&low)) {
            (Some(h), Some(l)) => floats(ta::mass_index(&h, &l, 9, 25)),
            _ => empty(),
        }
    });
    engine.register_fn("percent_b", |xs: Array, period: INT, mult: FLOAT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::percent_b(&v, period.max(0) as usize, mult)),
            None => empty(),
        }
    });
    engine.register_fn("bandwidth", |xs: Array, period: INT, mult: FLOAT| -> Dynamic {
        match coerce(&xs) {
            Some(v) => floats(ta::bandwidth(&v, period.max(0) as usize, mult)),
            None => empty(),
        }
    });
    unary_period!(engine, "volatility_index", ta::volatility_index);

    // Volume.
    engine.register_fn(
        "vwap",
        |high: Array, low: Array, close: Array, volume: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => floats(ta::vwap(&h, &l, &c, &v)),
                _ => empty(),
            }
        },
    );
    engine.register_fn("obv", |close: Array, volume: Array| -> Dynamic {
        match (coerce(&close), coerce(&volume)) {
            (Some(c), Some(v)) => floats(ta::obv(&c, &v)),
            _ => empty(),
        }
    });
    engine.register_fn(
        "mfi",
        |high: Array, low: Array, close: Array, volume: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    floats(ta::mfi(&h, &l, &c, &v, period.max(0) as usize))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "chaikin_oscillator",
        |high: Array, low: Array, close: Array, volume: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    floats(ta::chaikin_oscillator(&h, &l, &c, &v, 3, 10))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "chaikin_money_flow",
        |high: Array, low: Array, close: Array, volume: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    floats(ta::chaikin_money_flow(&h, &l, &c, &v, period.max(0) as usize))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "accumulation_distribution",
        |high: Array, low: Array, close: Array, volume: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    floats(ta::accumulation_distribution(&h, &l, &c, &v))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "money_flow_volume",
        |high: Array, low: Array, close: Array, volume: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    floats(ta::money_flow_volume(&h, &l, &c, &v))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("williams_ad", |high: Array, low: Array, close: Array| -> Dynamic {
        match (coerce(&high), coerce(&low), coerce(&close)) {
            (Some(h), Some(l), Some(c)) => floats(ta::williams_ad(&h, &l, &c)),
            _ => empty(),
        }
    });
    engine.register_fn("force_index", |close: Array, volume: Array| -> Dynamic {
        match (coerce(&close), coerce(&volume)) {
            (Some(c), Some(v)) => floats(ta::force_index(&c, &v)),
            _ => empty(),
        }
    });
    engine.register_fn("elder_force_index", |close: Array, volume: Array| -> Dynamic {
        match (coerce(&close), coerce(&volume)) {
            (Some(c), Some(v)) => floats(ta::elder_force_index(&c, &v, 13)),
            _ => empty(),
        }
    });
    engine.register_fn("volume_oscillator", |volume: Array| -> Dynamic {
        match coerce(&volume) {
            Some(v) => floats(ta::volume_oscillator(&v, 5, 10)),
            None => empty(),
        }
    });
    engine.register_fn(
        "volume_profile",
        |close: Array, volume: Array, buckets: INT| -> Dynamic {
            match (coerce(&close), coerce(&volume)) {
                (Some(c), Some(v)) => {
                    let out = ta::volume_profile(&c, &v, buckets.max(0) as usize);
                    map2("levels", floats(out.levels), "volumes", floats(out.volumes))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "klinger",
        |high: Array, low: Array, close: Array, volume: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close), coerce(&volume)) {
                (Some(h), Some(l), Some(c), Some(v)) => {
                    let out = ta::klinger(&h, &l, &c, &v, 34, 55, 13);
                    map2("kvo", floats(out.kvo), "signal", floats(out.signal))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "ease_of_movement",
        |high: Array, low: Array, volume: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&volume)) {
                (Some(h), Some(l), Some(v)) => {
                    floats(ta::ease_of_movement(&h, &l, &v, period.max(0) as usize))
                }
                _ => empty(),
            }
        },
    );

    // Trend and structure.
    engine.register_fn(
        "adx",
        |high: Array, low: Array, close: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::adx(&h, &l, &c, period.max(0) as usize);
                    map3(
                        "adx",
                        floats(out.adx),
                        "plus_di",
                        floats(out.plus_di),
                        "minus_di",
                        floats(out.minus_di),
                    )
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("parabolic_sar", |high: Array, low: Array| -> Dynamic {
        match (coerce(&high), coerce(&low)) {
            (Some(h), Some(l)) => floats(ta::parabolic_sar(&h, &l, 0.02, 0.2)),
            _ => empty(),
        }
    });
    engine.register_fn("ichimoku", |high: Array, low: Array, close: Array| -> Dynamic {
        match (coerce(&high), coerce(&low), coerce(&close)) {
            (Some(h), Some(l), Some(c)) => {
                let out = ta::ichimoku(&h, &l, &c, 9, 26, 52);
                let mut m = Map::new();
                m.insert("tenkan".into(), floats(out.tenkan));
                m.insert("kijun".into(), floats(out.kijun));
                m.insert("span_a".into(), floats(out.span_a));
                m.insert("span_b".into(), floats(out.span_b));
                m.insert("chikou".into(), floats(out.chikou));
                Dynamic::from_map(m)
            }
            _ => empty(),
        }
    });
    engine.register_fn("aroon", |high: Array, low: Array, period: INT| -> Dynamic {
        match (coerce(&high), coerce(&low)) {
            (Some(h), Some(l)) => {
                let out = ta::aroon(&h, &l, period.max(0) as usize);
                map2("up", floats(out.up), "down", floats(out.down))
            }
            _ => empty(),
        }
    });
    engine.register_fn(
        "vortex",
        |high: Array, low: Array, close: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::vortex(&h, &l, &c, period.max(0) as usize);
                    map2("plus", floats(out.plus), "minus", floats(out.minus))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("alligator", |high: Array, low: Array| -> Dynamic {
        match (coerce(&high), coerce(&low)) {
            (Some(h), Some(l)) => {
                let out = ta::alligator(&h, &l);
                map3(
                    "jaw",
                    floats(out.jaw),
                    "teeth",
                    floats(out.teeth),
                    "lips",
                    floats(out.lips),
                )
            }
            _ => empty(),
        }
    });
    engine.register_fn(
        "balance_of_power",
        |open: Array, high: Array, low: Array, close: Array| -> Dynamic {
            match (coerce(&open), coerce(&high), coerce(&low), coerce(&close)) {
                (Some(o), Some(h), Some(l), Some(c)) => {
                    floats(ta::balance_of_power(&o, &h, &l, &c))
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "heikin_ashi",
        |open: Array, high: Array, low: Array, close: Array| -> Dynamic {
            match (coerce(&open), coerce(&high), coerce(&low), coerce(&close)) {
                (Some(o), Some(h), Some(l), Some(c)) => {
                    let out = ta::heikin_ashi(&o, &h, &l, &c);
                    let mut m = Map::new();
                    m.insert("open".into(), floats(out.open));
                    m.insert("high".into(), floats(out.high));
                    m.insert("low".into(), floats(out.low));
                    m.insert("close".into(), floats(out.close));
                    Dynamic::from_map(m)
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn(
        "elder_ray",
        |high: Array, low: Array, close: Array, period: INT| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::elder_ray(&h, &l, &c, period.max(0) as usize);
                    map2("bull", floats(out.bull), "bear", floats(out.bear))
                }
                _ => empty(),
            }
        },
    );
    unary_period!(engine, "dpo", ta::dpo);
    unary_period!(engine, "linreg", ta::linreg);
    unary_period!(engine, "linreg_slope", ta::linreg_slope);
    engine.register_fn(
        "correlation",
        |xs: Array, ys: Array, period: INT| -> Dynamic {
            match (coerce(&xs), coerce(&ys)) {
                (Some(a), Some(b)) => floats(ta::correlation(&a, &b, period.max(0) as usize)),
                _ => empty(),
            }
        },
    );
    unary_period!(engine, "std_error", ta::std_error);
    unary_period!(engine, "std_dev", ta::std_dev);

    // Levels.
    engine.register_fn(
        "pivot_points",
        |high: Array, low: Array, close: Array| -> Dynamic {
            match (coerce(&high), coerce(&low), coerce(&close)) {
                (Some(h), Some(l), Some(c)) => {
                    let out = ta::pivot_points(&h, &l, &c);
                    let mut m = Map::new();
                    m.insert("pivot".into(), floats(out.pivot));
                    m.insert("r1".into(), floats(out.r1));
                    m.insert("r2".into(), floats(out.r2));
                    m.insert("r3".into(), floats(out.r3));
                    m.insert("s1".into(), floats(out.s1));
                    m.insert("s2".into(), floats(out.s2));
                    m.insert("s3".into(), floats(out.s3));
                    Dynamic::from_map(m)
                }
                _ => empty(),
            }
        },
    );
    engine.register_fn("fibonacci", |high: FLOAT, low: FLOAT| -> Dynamic {
        let mut m = Map::new();
        for (key, value) in ta::fibonacci_retracement(high, low) {
            m.insert(key.into(), Dynamic::from_float(value));
        }
        Dynamic::from_map(m)
    });

    // Signal helpers.
    unary_period!(engine, "highest", ta::highest);
    unary_period!(engine, "lowest", ta::lowest);
    engine.register_fn("crossover", |a: Array, b: Array| -> Dynamic {
        match (coerce(&a), coerce(&b)) {
            (Some(x), Some(y)) => bools(ta::crossover(&x, &y)),
            _ => empty(),
        }
    });
    engine.register_fn("crossunder", |a: Array, b: Array| -> Dynamic {
        match (coerce(&a), coerce(&b)) {
            (Some(x), Some(y)) => bools(ta::crossunder(&x, &y)),
            _ => empty(),
        }
    });
}
