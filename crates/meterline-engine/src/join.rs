//! Series joiner: per-query series collections → one row per entity.
//!
//! The join is a union over every input. An entity seen by only one query
//! still gets a row, and every row carries every bound field, with
//! `Unknown` where its query had no series for that entity or failed
//! outright.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use meterline_core::{EntityKey, Reading, Series};

/// What to do when several series of one query map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Collision {
    /// Add the values. Any unknown addend makes the sum unknown.
    Sum,
    /// Keep the first series' value.
    First,
    /// Key each series by `primary/<label>` instead, producing sub-entity
    /// rows. Duplicates of the same compound key are summed.
    SubGroup { label: String },
}

/// How a range series is reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// The latest sample, as returned.
    #[default]
    Last,
    /// Mean of the known samples.
    Mean,
    Max,
    Min,
}

impl Reduction {
    pub fn reduce(self, series: &Series) -> Reading {
        let points = series.points();
        let known = || points.iter().filter_map(|p| p.value.value());
        match self {
            Reduction::Last => points.last().map(|p| p.value).unwrap_or_default(),
            Reduction::Mean => {
                let (sum, n) = known().fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
                if n == 0 {
                    Reading::Unknown
                } else {
                    Reading::from_f64(sum / n as f64)
                }
            }
            Reduction::Max => known().reduce(f64::max).into(),
            Reduction::Min => known().reduce(f64::min).into(),
        }
    }
}

/// Binds one query's series to a row field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: String,
    pub collision: Collision,
    pub reduction: Reduction,
}

impl FieldBinding {
    pub fn new(field: &str, collision: Collision) -> Self {
        Self {
            field: field.to_string(),
            collision,
            reduction: Reduction::Last,
        }
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }
}

/// Field name → value for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EntityRow {
    fields: BTreeMap<String, Reading>,
}

impl EntityRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The field's value; a field that was never set is unknown.
    pub fn get(&self, field: &str) -> Reading {
        self.fields.get(field).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Reading) {
        self.fields.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Reading> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Reading)> for EntityRow {
    fn from_iter<I: IntoIterator<Item = (String, Reading)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    pub rows: BTreeMap<EntityKey, EntityRow>,
    /// Series dropped because they lacked the key label (or sub-label).
    pub skipped_series: usize,
}

/// Joins query results on one key label, fixed for the whole join.
#[derive(Debug, Clone)]
pub struct Joiner {
    key_label: String,
}

impl Joiner {
    pub fn new(key_label: impl Into<String>) -> Self {
        Self {
            key_label: key_label.into(),
        }
    }

    pub fn key_label(&self) -> &str {
        &self.key_label
    }

    /// Join one input per binding. `None` marks a failed query: its field
    /// is unknown on every row.
    pub fn join(&self, inputs: &[(&FieldBinding, Option<&[Series]>)]) -> JoinOutput {
        let mut skipped_series = 0;
        let mut per_field: Vec<(&str, BTreeMap<EntityKey, Reading>)> = Vec::with_capacity(inputs.len());

        for (binding, series) in inputs {
            let values = match series {
                Some(series) => {
                    let (values, skipped) = self.collect(binding, series);
                    skipped_series += skipped;
                    values
                }
                None => BTreeMap::new(),
            };
            per_field.push((binding.field.as_str(), values));
        }

        let mut rows: BTreeMap<EntityKey, EntityRow> = BTreeMap::new();
        for (_, values) in &per_field {
            for key in values.keys() {
                rows.entry(key.clone()).or_default();
            }
        }
        for (key, row) in rows.iter_mut() {
            for (field, values) in &per_field {
                row.insert(*field, values.get(key).copied().unwrap_or_default());
            }
        }

        debug!(
            key_label = %self.key_label,
            entities = rows.len(),
            skipped_series,
            "joined query results"
        );
        JoinOutput {
            rows,
            skipped_series,
        }
    }

    fn collect(
        &self,
        binding: &FieldBinding,
        series: &[Series],
    ) -> (BTreeMap<EntityKey, Reading>, usize) {
        let sub_label = match &binding.collision {
            Collision::SubGroup { label } => Some(label.as_str()),
            _ => None,
        };

        let mut values: BTreeMap<EntityKey, Reading> = BTreeMap::new();
        let mut skipped = 0;
        for s in series {
            let key = match EntityKey::from_labels(&s.labels, &self.key_label, sub_label) {
                Ok(key) => key,
                Err(e) => {
                    warn!(field = %binding.field, error = %e, "skipping series");
                    skipped += 1;
                    continue;
                }
            };
            let value = binding.reduction.reduce(s);
            match values.get_mut(&key) {
                None => {
                    values.insert(key, value);
                }
                Some(existing) => match binding.collision {
                    Collision::First => {}
                    Collision::Sum | Collision::SubGroup { .. } => *existing = existing.add(value),
                },
            }
        }
        (values, skipped)
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::SeriesPoint;

    use super::*;

    fn series(labels: &[(&str, &str)], value: Reading) -> Series {
        Series::instant(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            SeriesPoint {
                timestamp: 0.0,
                value,
            },
        )
    }

    fn job(name: &str, value: f64) -> Series {
        series(&[("job", name)], Reading::Known(value))
    }

    #[test]
    fn join_is_a_union() {
        let a = FieldBinding::new("request_rate", Collision::First);
        let b = FieldBinding::new("error_rate", Collision::First);
        let c = FieldBinding::new("latency_p99_s", Collision::First);
        let only_a = vec![job("checkout", 10.0), job("search", 5.0)];
        let only_b = vec![job("search", 0.01)];
        let none: Vec<Series> = vec![];

        let out = Joiner::new("job").join(&[
            (&a, Some(only_a.as_slice())),
            (&b, Some(only_b.as_slice())),
            (&c, Some(none.as_slice())),
        ]);

        assert_eq!(out.rows.len(), 2);
        let checkout = &out.rows[&EntityKey::new("checkout")];
        assert_eq!(checkout.get("request_rate"), Reading::Known(10.0));
        assert_eq!(checkout.get("error_rate"), Reading::Unknown);
        assert_eq!(checkout.get("latency_p99_s"), Reading::Unknown);
        // Every row carries every field.
        assert_eq!(checkout.len(), 3);
    }

    #[test]
    fn failed_query_leaves_field_unknown() {
        let a = FieldBinding::new("request_rate", Collision::First);
        let b = FieldBinding::new("error_rate", Collision::First);
        let rates = vec![job("api", 3.0)];

        let out = Joiner::new("job").join(&[(&a, Some(rates.as_slice())), (&b, None)]);
        let api = &out.rows[&EntityKey::new("api")];
        assert_eq!(api.get("request_rate"), Reading::Known(3.0));
        assert_eq!(api.get("error_rate"), Reading::Unknown);
        assert!(api.contains("error_rate"));
    }

    #[test]
    fn sum_collision_adds_and_propagates_unknown() {
        let b = FieldBinding::new("cost_rate", Collision::Sum);
        let input = vec![
            series(&[("agent_name", "planner"), ("model", "a")], Reading::Known(1.5)),
            series(&[("agent_name", "planner"), ("model", "b")], Reading::Known(2.0)),
            series(&[("agent_name", "coder"), ("model", "a")], Reading::Known(1.0)),
            series(&[("agent_name", "coder"), ("model", "b")], Reading::Unknown),
        ];
        let out = Joiner::new("agent_name").join(&[(&b, Some(input.as_slice()))]);
        assert_eq!(out.rows[&EntityKey::new("planner")].get("cost_rate"), Reading::Known(3.5));
        assert_eq!(out.rows[&EntityKey::new("coder")].get("cost_rate"), Reading::Unknown);
    }

    #[test]
    fn first_collision_keeps_first() {
        let b = FieldBinding::new("availability", Collision::First);
        let input = vec![job("api", 0.99), job("api", 0.5)];
        let out = Joiner::new("job").join(&[(&b, Some(input.as_slice()))]);
        assert_eq!(out.rows[&EntityKey::new("api")].get("availability"), Reading::Known(0.99));
    }

    #[test]
    fn sub_group_produces_compound_keys() {
        let agent = FieldBinding::new("cost_rate", Collision::Sum);
        let model = FieldBinding::new(
            "model_cost_rate",
            Collision::SubGroup {
                label: "model".to_string(),
            },
        );
        let input = vec![
            series(&[("agent_name", "planner"), ("model", "opus")], Reading::Known(2.0)),
            series(&[("agent_name", "planner"), ("model", "haiku")], Reading::Known(0.5)),
        ];
        let out = Joiner::new("agent_name").join(&[(&agent, Some(input.as_slice())), (&model, Some(input.as_slice()))]);

        let keys: Vec<String> = out.rows.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["planner", "planner/haiku", "planner/opus"]);
        assert_eq!(out.rows[&EntityKey::new("planner")].get("cost_rate"), Reading::Known(2.5));
        assert_eq!(
            out.rows[&EntityKey::compound("planner", "opus")].get("model_cost_rate"),
            Reading::Known(2.0)
        );
        assert_eq!(
            out.rows[&EntityKey::compound("planner", "opus")].get("cost_rate"),
            Reading::Unknown
        );
    }

    #[test]
    fn delimiter_in_label_value_does_not_merge_entities() {
        let agent = FieldBinding::new("cost_rate", Collision::First);
        let model = FieldBinding::new(
            "model_cost_rate",
            Collision::SubGroup {
                label: "model".to_string(),
            },
        );
        let agents = vec![series(&[("agent_name", "a/b")], Reading::Known(1.0))];
        let models = vec![series(&[("agent_name", "a"), ("model", "b")], Reading::Known(2.0))];

        let out = Joiner::new("agent_name").join(&[(&agent, Some(agents.as_slice())), (&model, Some(models.as_slice()))]);
        assert_eq!(out.rows.len(), 2);
        let keys: Vec<String> = out.rows.keys().map(|k| k.to_string()).collect();
        assert!(keys.contains(&"a%2Fb".to_string()));
        assert!(keys.contains(&"a/b".to_string()));
    }

    #[test]
    fn series_without_key_label_are_skipped() {
        let b = FieldBinding::new("request_rate", Collision::First);
        let input = vec![
            job("api", 1.0),
            series(&[("instance", "10.0.0.1")], Reading::Known(2.0)),
            series(&[("job", "")], Reading::Known(3.0)),
        ];
        let out = Joiner::new("job").join(&[(&b, Some(input.as_slice()))]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.skipped_series, 2);
    }

    #[test]
    fn range_reductions() {
        let s = Series::range(
            BTreeMap::new(),
            vec![
                SeriesPoint { timestamp: 1.0, value: Reading::Known(1.0) },
                SeriesPoint { timestamp: 2.0, value: Reading::Unknown },
                SeriesPoint { timestamp: 3.0, value: Reading::Known(5.0) },
            ],
        );
        assert_eq!(Reduction::Last.reduce(&s), Reading::Known(5.0));
        assert_eq!(Reduction::Mean.reduce(&s), Reading::Known(3.0));
        assert_eq!(Reduction::Max.reduce(&s), Reading::Known(5.0));
        assert_eq!(Reduction::Min.reduce(&s), Reading::Known(1.0));

        let empty = Series::range(BTreeMap::new(), vec![]);
        assert_eq!(Reduction::Last.reduce(&empty), Reading::Unknown);
        assert_eq!(Reduction::Mean.reduce(&empty), Reading::Unknown);
    }
}
