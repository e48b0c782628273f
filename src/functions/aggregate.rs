// Aggregate machinery: `AggInit`/`AggStep`/`AggFinal` bind a per-slot trait
// object rather than a class hierarchy.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Result, VdbeError};
use crate::value::Value;

/// Per-slot running state bound by `AggInit`, stepped by `AggStep`, consumed
/// by `AggFinal`.
pub trait AggregateFunc {
    fn step(&mut self, value: &Value);
    fn finalize(&mut self) -> Value;
}

struct CountAgg {
    count: u64,
    star: bool,
}

impl AggregateFunc for CountAgg {
    fn step(&mut self, value: &Value) {
        if self.star || !value.is_null() {
            self.count += 1;
        }
    }

    fn finalize(&mut self) -> Value {
        Value::Int64(self.count as i64)
    }
}

enum SumState {
    Empty,
    Int(i64),
    Float(f64),
}

struct SumAgg {
    state: SumState,
}

impl AggregateFunc for SumAgg {
    fn step(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        let as_float = matches!(value, Value::Float(_) | Value::Decimal(_));
        self.state = match (&self.state, as_float) {
            (SumState::Empty, true) => SumState::Float(value.add(&Value::Float(0.0)).as_f64()),
            (SumState::Empty, false) => match value.add(&Value::Int64(0)) {
                Value::Int64(i) => SumState::Int(i),
                Value::Float(f) => SumState::Float(f),
                _ => SumState::Empty,
            },
            (SumState::Int(acc), true) => SumState::Float(*acc as f64 + value.as_f64()),
            (SumState::Int(acc), false) => match Value::Int64(*acc).add(value) {
                Value::Int64(i) => SumState::Int(i),
                Value::Float(f) => SumState::Float(f),
                _ => SumState::Int(*acc),
            },
            (SumState::Float(acc), _) => SumState::Float(acc + value.as_f64()),
        };
    }

    fn finalize(&mut self) -> Value {
        match self.state {
            SumState::Empty => Value::Null,
            SumState::Int(i) => Value::Int64(i),
            SumState::Float(f) => Value::Float(f),
        }
    }
}

struct AvgAgg {
    sum: f64,
    count: u64,
}

impl AggregateFunc for AvgAgg {
    fn step(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        self.sum += value.as_f64();
        self.count += 1;
    }

    fn finalize(&mut self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
}

struct MinMaxAgg {
    best: Option<Value>,
    want_min: bool,
}

impl AggregateFunc for MinMaxAgg {
    fn step(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        let better = match &self.best {
            None => true,
            Some(cur) => {
                let ord = value.compare(cur);
                if self.want_min {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                }
            }
        };
        if better {
            self.best = Some(value.clone());
        }
    }

    fn finalize(&mut self) -> Value {
        self.best.take().unwrap_or(Value::Null)
    }
}

/// Name-keyed, case-insensitive construction of aggregate state machines.
pub struct AggregateRegistry {
    constructors: HashMap<String, fn() -> Box<dyn AggregateFunc>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        let mut constructors: HashMap<String, fn() -> Box<dyn AggregateFunc>> = HashMap::new();
        constructors.insert("COUNT".into(), || {
            Box::new(CountAgg { count: 0, star: false })
        });
        constructors.insert("COUNT*".into(), || Box::new(CountAgg { count: 0, star: true }));
        constructors.insert("SUM".into(), || {
            Box::new(SumAgg {
                state: SumState::Empty,
            })
        });
        constructors.insert("AVG".into(), || Box::new(AvgAgg { sum: 0.0, count: 0 }));
        constructors.insert("MIN".into(), || {
            Box::new(MinMaxAgg {
                best: None,
                want_min: true,
            })
        });
        constructors.insert("MAX".into(), || {
            Box::new(MinMaxAgg {
                best: None,
                want_min: false,
            })
        });
        Self { constructors }
    }

    pub fn construct(&self, name: &str) -> Result<Box<dyn AggregateFunc>> {
        self.constructors
            .get(&name.to_ascii_uppercase())
            .map(|ctor| ctor())
            .ok_or_else(|| VdbeError::UnknownAggregate(name.to_string()))
    }
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_sum_on_empty() {
        let reg = AggregateRegistry::new();
        let mut count = reg.construct("COUNT*").unwrap();
        assert_eq!(count.finalize(), Value::Int64(0));
        let mut sum = reg.construct("SUM").unwrap();
        assert_eq!(sum.finalize(), Value::Null);
        let mut avg = reg.construct("AVG").unwrap();
        assert_eq!(avg.finalize(), Value::Null);
        let mut max = reg.construct("MAX").unwrap();
        assert_eq!(max.finalize(), Value::Null);
    }

    #[test]
    fn sum_promotes_to_float_on_first_float_step() {
        let reg = AggregateRegistry::new();
        let mut sum = reg.construct("sum").unwrap();
        sum.step(&Value::Int64(2));
        sum.step(&Value::Int64(3));
        assert_eq!(sum.finalize(), Value::Int64(5));

        let mut sum2 = reg.construct("SUM").unwrap();
        sum2.step(&Value::Int64(2));
        sum2.step(&Value::Float(1.5));
        assert_eq!(sum2.finalize(), Value::Float(3.5));
    }

    #[test]
    fn min_max_skip_nulls() {
        let reg = AggregateRegistry::new();
        let mut min = reg.construct("MIN").unwrap();
        min.step(&Value::Null);
        min.step(&Value::Int64(5));
        min.step(&Value::Int64(2));
        assert_eq!(min.finalize(), Value::Int64(2));
    }

    #[test]
    fn unknown_aggregate_errors() {
        let reg = AggregateRegistry::new();
        assert!(reg.construct("BOGUS").is_err());
    }
}
