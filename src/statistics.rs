//! Per-fiber-bundle and per-cluster summary statistics of per-point arrays.
//!
//! Every bundle added to a [`StatisticsSession`] gets one record keyed by its
//! identifier. Identifiers are colon-delimited paths: `A:B:C` is a member of
//! clusters `A` and `A:B`. Cluster records are derived from member records
//! on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::coloring::{measure_array_name, measure_values};
use crate::config::{ClampRange, StatisticsParameters};
use crate::enums::TableLayout;
use crate::fiber::FiberBundle;
use crate::measures::{TensorMeasureKind, UnknownMeasure};

pub const NUM_POINTS: &str = "Num_Points";
pub const NUM_FIBERS: &str = "Num_Fibers";
pub const MEAN_LENGTH: &str = "Mean_Length";
pub const NUM_CLAMP_EXCLUDED: &str = "Num_Clamp_Excluded";

/// Fields summed (not averaged) when building cluster records, in table order.
pub const AGGREGATE_FIELDS: [&str; 4] = [NUM_POINTS, NUM_FIBERS, MEAN_LENGTH, NUM_CLAMP_EXCLUDED];

const NAN_SUFFIX: &str = ".NAN";
const NAN_TOKEN: &str = "NAN";
const CLUSTER_SEPARATOR: char = ':';

pub type MeasureRecord = BTreeMap<String, f64>;

#[derive(Debug, Error, PartialEq)]
pub enum StatisticsError {
    #[error("Cluster '{cluster}': fiber '{fiber}' does not have measure '{measure}'")]
    InconsistentMeasures {
        cluster: String,
        fiber: String,
        measure: String,
    },

    #[error("Cluster '{cluster}': fiber '{fiber}' has no '{NUM_POINTS}' field")]
    MissingAggregate { cluster: String, fiber: String },

    #[error(transparent)]
    UnknownMeasure(#[from] UnknownMeasure),
}

/// Summary of one per-point array after NaN and clamp exclusion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArraySummary {
    pub retained: usize,
    pub nan_count: usize,
    /// Finite values outside the clamp range.
    pub excluded: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Sample variance (divisor `retained - 1`); NaN for a single value.
    pub variance: f64,
}

pub fn summarize(values: &[f64], clamp: Option<ClampRange>) -> ArraySummary {
    let nan_count = values.iter().filter(|v| v.is_nan()).count();
    let mut retained: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .filter(|v| clamp.is_none_or(|range| range.contains(*v)))
        .collect();
    let excluded = values.len() - nan_count - retained.len();

    if retained.is_empty() {
        return ArraySummary {
            retained: 0,
            nan_count,
            excluded,
            mean: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            median: f64::NAN,
            variance: f64::NAN,
        };
    }

    retained.sort_by(f64::total_cmp);
    let n = retained.len();
    let mean = retained.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 0 {
        0.5 * (retained[n / 2 - 1] + retained[n / 2])
    } else {
        retained[n / 2]
    };
    let variance = if n > 1 {
        retained.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1) as f64
    } else {
        f64::NAN
    };

    ArraySummary {
        retained: n,
        nan_count,
        excluded,
        mean,
        min: retained[0],
        max: retained[n - 1],
        median,
        variance,
    }
}

/// Clusters a fiber identifier belongs to, outermost first.
pub fn parent_clusters(id: &str) -> Vec<String> {
    let parts: Vec<&str> = id.split(CLUSTER_SEPARATOR).collect();
    (1..parts.len()).map(|n| parts[..n].join(":")).collect()
}

fn is_summed_field(name: &str) -> bool {
    AGGREGATE_FIELDS.contains(&name) || name.ends_with(NAN_SUFFIX)
}

pub struct StatisticsSession {
    parameters: StatisticsParameters,
    operations: Vec<TensorMeasureKind>,
    fibers: BTreeMap<String, MeasureRecord>,
    clusters: BTreeMap<String, MeasureRecord>,
}

impl StatisticsSession {
    pub fn new(parameters: StatisticsParameters) -> Self {
        Self {
            parameters,
            operations: TensorMeasureKind::STATISTICS_OPERATIONS.to_vec(),
            fibers: BTreeMap::new(),
            clusters: BTreeMap::new(),
        }
    }

    pub fn parameters(&self) -> &StatisticsParameters {
        &self.parameters
    }

    pub fn operations(&self) -> &[TensorMeasureKind] {
        &self.operations
    }

    pub fn set_operations(&mut self, operations: Vec<TensorMeasureKind>) {
        self.operations = operations;
    }

    /// # Errors
    ///
    /// Returns error if a name is not a known tensor measure
    pub fn set_operations_by_name(&mut self, names: &[&str]) -> Result<(), StatisticsError> {
        self.operations = names
            .iter()
            .map(|n| n.parse::<TensorMeasureKind>())
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Summary record of one bundle: aggregate fields, then statistics for
    /// every tensor-derived operation and every scalar array.
    pub fn bundle_record(&self, id: &str, bundle: &FiberBundle) -> MeasureRecord {
        let mut record = MeasureRecord::new();
        record.insert(NUM_POINTS.to_string(), bundle.num_points() as f64);
        record.insert(NUM_FIBERS.to_string(), bundle.num_fibers() as f64);
        record.insert(MEAN_LENGTH.to_string(), bundle.mean_length());
        record.insert(NUM_CLAMP_EXCLUDED.to_string(), 0.0);

        let mut arrays: Vec<(String, Vec<f64>)> = Vec::new();
        for (name, tensors) in bundle.tensor_arrays() {
            for &op in &self.operations {
                arrays.push((measure_array_name(name, op), measure_values(tensors, op)));
            }
        }
        if arrays.is_empty() && !self.operations.is_empty() {
            warn!(id, "bundle has no tensor arrays, tensor statistics skipped");
        }
        for (name, values) in bundle.scalar_arrays() {
            if !arrays.iter().any(|(existing, _)| existing == name) {
                arrays.push((name.to_string(), values.to_vec()));
            }
        }

        let mut excluded_total = 0usize;
        for (name, values) in &arrays {
            let summary = summarize(values, self.parameters.clamp.range_for(name));
            if summary.retained == 0 && !values.is_empty() {
                warn!(id, array = %name, "no values retained after NaN and clamp exclusion");
            }
            excluded_total += summary.excluded;

            record.insert(format!("{name}.Mean"), summary.mean);
            if self.parameters.more_statistics {
                record.insert(format!("{name}.Min"), summary.min);
                record.insert(format!("{name}.Max"), summary.max);
                record.insert(format!("{name}.Median"), summary.median);
                record.insert(format!("{name}.Variance"), summary.variance);
            }
            record.insert(format!("{name}{NAN_SUFFIX}"), summary.nan_count as f64);
        }
        record.insert(NUM_CLAMP_EXCLUDED.to_string(), excluded_total as f64);
        record
    }

    pub fn add_bundle(&mut self, id: &str, bundle: &FiberBundle) {
        let record = self.bundle_record(id, bundle);
        self.fibers.insert(id.to_string(), record);
    }

    /// Records are computed in parallel and inserted in input order.
    pub fn add_bundles(&mut self, bundles: &[(&str, &FiberBundle)]) {
        let records: Vec<(String, MeasureRecord)> = bundles
            .par_iter()
            .map(|(id, bundle)| (id.to_string(), self.bundle_record(id, bundle)))
            .collect();
        self.fibers.extend(records);
    }

    pub fn insert_record(&mut self, id: &str, record: MeasureRecord) {
        self.fibers.insert(id.to_string(), record);
    }

    pub fn fiber(&self, id: &str) -> Option<&MeasureRecord> {
        self.fibers.get(id)
    }

    pub fn fibers(&self) -> &BTreeMap<String, MeasureRecord> {
        &self.fibers
    }

    pub fn cluster(&self, id: &str) -> Option<&MeasureRecord> {
        self.clusters.get(id)
    }

    pub fn clusters(&self) -> &BTreeMap<String, MeasureRecord> {
        &self.clusters
    }

    /// Clusters without a parent.
    pub fn top_clusters(&self) -> Vec<&str> {
        self.clusters
            .keys()
            .filter(|id| !id.contains(CLUSTER_SEPARATOR))
            .map(String::as_str)
            .collect()
    }

    /// Rebuild every cluster record from the fiber records
    ///
    /// # Errors
    ///
    /// Returns error if two members of one cluster do not share the same
    /// measure names; no cluster records are kept in that case
    pub fn compute_clusters(&mut self) -> Result<(), StatisticsError> {
        self.clusters.clear();

        let mut members: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for id in self.fibers.keys() {
            for cluster in parent_clusters(id) {
                members.entry(cluster).or_default().push(id.as_str());
            }
        }

        let mut clusters = BTreeMap::new();
        for (cluster, ids) in &members {
            let record = self.cluster_record(cluster, ids)?;
            clusters.insert(cluster.clone(), record);
        }
        info!(clusters = clusters.len(), fibers = self.fibers.len(), "cluster statistics computed");
        self.clusters = clusters;
        Ok(())
    }

    fn cluster_record(
        &self,
        cluster: &str,
        ids: &[&str],
    ) -> Result<MeasureRecord, StatisticsError> {
        let records: Vec<(&str, &MeasureRecord)> = ids
            .iter()
            .filter_map(|id| self.fibers.get(*id).map(|r| (*id, r)))
            .collect();
        let Some(&(first_id, first)) = records.first() else {
            return Ok(MeasureRecord::new());
        };

        for &(id, record) in &records[1..] {
            let missing = first
                .keys()
                .find(|k| !record.contains_key(*k))
                .map(|k| (id, k))
                .or_else(|| record.keys().find(|k| !first.contains_key(*k)).map(|k| (first_id, k)));
            if let Some((fiber, measure)) = missing {
                return Err(StatisticsError::InconsistentMeasures {
                    cluster: cluster.to_string(),
                    fiber: fiber.to_string(),
                    measure: measure.clone(),
                });
            }
        }

        let mut weights = Vec::with_capacity(records.len());
        for &(id, record) in &records {
            let npoints = record
                .get(NUM_POINTS)
                .copied()
                .ok_or_else(|| StatisticsError::MissingAggregate {
                    cluster: cluster.to_string(),
                    fiber: id.to_string(),
                })?;
            weights.push(npoints);
        }

        let mut out = MeasureRecord::new();
        for name in first.keys() {
            let value = if is_summed_field(name) {
                records.iter().map(|(_, r)| r[name]).sum::<f64>()
            } else {
                let (weighted, weight) = records
                    .iter()
                    .zip(&weights)
                    .filter(|((_, r), _)| !r[name].is_nan())
                    .fold((0.0, 0.0), |(num, den), ((_, r), &npoints)| {
                        (num + npoints * r[name], den + npoints)
                    });
                if weight > 0.0 { weighted / weight } else { f64::NAN }
            };
            out.insert(name.clone(), value);
        }
        Ok(out)
    }

    /// Render the session as delimited text.
    pub fn render(&self) -> String {
        match self.parameters.layout {
            TableLayout::ColumnHierarchy => self.render_columns(),
            TableLayout::RowHierarchy => self.render_rows(),
        }
    }

    fn render_columns(&self) -> String {
        let mut out = String::new();
        let fibers: Vec<(&str, &MeasureRecord)> =
            self.fibers.iter().map(|(k, v)| (k.as_str(), v)).collect();
        if self.clusters.is_empty() {
            self.write_column_table(&mut out, &fibers);
            return out;
        }
        if self.parameters.print_all_statistics {
            self.write_column_table(&mut out, &fibers);
            out.push('\n');
        }
        let clusters: Vec<(&str, &MeasureRecord)> =
            self.clusters.iter().map(|(k, v)| (k.as_str(), v)).collect();
        self.write_column_table(&mut out, &clusters);
        out
    }

    fn write_column_table(&self, out: &mut String, rows: &[(&str, &MeasureRecord)]) {
        let sep = self.parameters.separator.as_str();
        let names = ordered_measure_names(rows.iter().map(|(_, r)| *r));

        let mut header = vec!["Name".to_string()];
        header.extend(names.iter().cloned());
        let _ = writeln!(out, "{}", header.join(sep));
        for (id, record) in rows {
            let mut cells = vec![id.to_string()];
            cells.extend(names.iter().map(|n| format_value(record.get(n).copied())));
            let _ = writeln!(out, "{}", cells.join(sep));
        }
    }

    fn render_rows(&self) -> String {
        let mut columns: Vec<(&str, &MeasureRecord)> = Vec::new();
        let top = self.top_clusters();
        for &id in &top {
            columns.push((id, &self.clusters[id]));
        }
        for (id, record) in &self.clusters {
            if !top.contains(&id.as_str()) {
                columns.push((id.as_str(), record));
            }
        }
        if self.clusters.is_empty() || self.parameters.print_all_statistics {
            columns.extend(self.fibers.iter().map(|(k, v)| (k.as_str(), v)));
        }

        let sep = self.parameters.separator.as_str();
        let names = ordered_measure_names(columns.iter().map(|(_, r)| *r));
        let mut ids = Vec::new();
        let mut measures = Vec::new();
        let mut values = Vec::new();
        for (id, record) in &columns {
            for name in &names {
                ids.push(id.to_string());
                measures.push(name.clone());
                values.push(format_value(record.get(name).copied()));
            }
        }
        format!("{}\n{}\n{}\n", ids.join(sep), measures.join(sep), values.join(sep))
    }
}

/// Aggregate fields first, then every other name in sorted order.
fn ordered_measure_names<'a>(records: impl Iterator<Item = &'a MeasureRecord>) -> Vec<String> {
    let mut others = BTreeSet::new();
    let mut present = BTreeSet::new();
    for record in records {
        for name in record.keys() {
            if AGGREGATE_FIELDS.contains(&name.as_str()) {
                present.insert(name.as_str());
            } else {
                others.insert(name.clone());
            }
        }
    }
    AGGREGATE_FIELDS
        .iter()
        .filter(|f| present.contains(*f))
        .map(|f| f.to_string())
        .chain(others)
        .collect()
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => format!("{v:.6}"),
        _ => NAN_TOKEN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClampTable;
    use crate::enums::Separator;
    use crate::phantom::stick_tensor;
    use crate::tensor::Tensor;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    fn record(npoints: f64, mean: f64) -> MeasureRecord {
        let mut r = MeasureRecord::new();
        r.insert(NUM_POINTS.into(), npoints);
        r.insert(NUM_FIBERS.into(), 1.0);
        r.insert(MEAN_LENGTH.into(), 10.0);
        r.insert(NUM_CLAMP_EXCLUDED.into(), 0.0);
        r.insert("FA.Mean".into(), mean);
        r.insert("FA.NAN".into(), 1.0);
        r
    }

    #[test]
    fn test_nan_values_are_counted_not_averaged() {
        let s = summarize(&[1.0, f64::NAN, 3.0], None);
        assert_eq!(s.retained, 2);
        assert_eq!(s.nan_count, 1);
        assert!(close(s.mean, 2.0));
        assert!(close(s.variance, 2.0));
    }

    #[test]
    fn test_clamped_values_are_excluded() {
        let range = ClampTable::default().range_for("Tensors.FractionalAnisotropy");
        let s = summarize(&[0.5, 1.5, 0.2], range);
        assert_eq!(s.excluded, 1);
        assert_eq!(s.retained, 2);
        assert!(close(s.mean, 0.35));
        assert_eq!(s.max, 0.5);
    }

    #[test]
    fn test_median_parity() {
        assert_eq!(summarize(&[4.0, 1.0, 3.0, 2.0], None).median, 2.5);
        assert_eq!(summarize(&[3.0, 1.0, 2.0], None).median, 2.0);
        let single = summarize(&[7.0], None);
        assert_eq!(single.retained, 1);
        assert_eq!(single.mean, 7.0);
        assert!(single.variance.is_nan());

        let one_left = summarize(&[0.4, f64::NAN], None);
        assert_eq!(one_left.retained, 1);
        assert!(one_left.variance.is_nan());
    }

    #[test]
    fn test_no_retained_values_give_nan() {
        let s = summarize(&[f64::NAN, f64::NAN], None);
        assert_eq!(s.retained, 0);
        assert!(s.mean.is_nan() && s.min.is_nan() && s.median.is_nan() && s.variance.is_nan());
    }

    #[test]
    fn test_parent_clusters() {
        assert_eq!(parent_clusters("A:B:C"), vec!["A".to_string(), "A:B".to_string()]);
        assert!(parent_clusters("lonely").is_empty());
    }

    #[test]
    fn test_cluster_weighting_and_sums() {
        let mut session = StatisticsSession::new(StatisticsParameters::default());
        session.insert_record("T:f1", record(10.0, 1.0));
        session.insert_record("T:f2", record(30.0, 3.0));
        session.insert_record("T:f3", record(50.0, f64::NAN));
        session.compute_clusters().unwrap();

        let cluster = session.cluster("T").unwrap();
        assert!(close(cluster["FA.Mean"], 2.5));
        assert_eq!(cluster[NUM_POINTS], 90.0);
        assert_eq!(cluster[NUM_FIBERS], 3.0);
        assert_eq!(cluster["FA.NAN"], 3.0);
        assert_eq!(session.top_clusters(), vec!["T"]);
    }

    #[test]
    fn test_inconsistent_measures_abort_clusters() {
        let mut session = StatisticsSession::new(StatisticsParameters::default());
        session.insert_record("T:a", record(10.0, 1.0));
        let mut other = record(10.0, 1.0);
        other.remove("FA.Mean");
        session.insert_record("T:b", other);

        let err = session.compute_clusters().unwrap_err();
        assert_eq!(
            err,
            StatisticsError::InconsistentMeasures {
                cluster: "T".into(),
                fiber: "T:b".into(),
                measure: "FA.Mean".into()
            }
        );
        assert!(session.clusters().is_empty());
        assert!(session.fiber("T:a").is_some());
    }

    #[test]
    fn test_records_without_point_count_fail_aggregation() {
        let mut session = StatisticsSession::new(StatisticsParameters::default());
        let bare = MeasureRecord::from([("FA.Mean".to_string(), 0.5)]);
        session.insert_record("T:a", bare.clone());
        session.insert_record("T:b", bare);

        let err = session.compute_clusters().unwrap_err();
        assert_eq!(
            err,
            StatisticsError::MissingAggregate {
                cluster: "T".into(),
                fiber: "T:a".into()
            }
        );
        assert!(session.clusters().is_empty());
    }

    #[test]
    fn test_bundle_record_fields() {
        let points: Vec<[f64; 3]> = (0..4).map(|i| [i as f64, 0.0, 0.0]).collect();
        let mut bundle = FiberBundle::from_lines([points]);
        bundle
            .set_tensor_array(
                "Tensors",
                vec![
                    stick_tensor([1.0, 0.0, 0.0], 1.7e-3, 0.2e-3),
                    stick_tensor([1.0, 0.0, 0.0], 1.7e-3, 0.2e-3),
                    Tensor::diagonal(1e-3, 1e-3, 1e-3),
                    Tensor::new(f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0),
                ],
            )
            .unwrap();
        bundle.set_scalar_array("Weight", vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let session = StatisticsSession::new(StatisticsParameters::default());
        let r = session.bundle_record("f", &bundle);
        assert_eq!(r[NUM_POINTS], 4.0);
        assert_eq!(r[NUM_FIBERS], 1.0);
        assert_eq!(r[MEAN_LENGTH], 3.0);
        assert_eq!(r[NUM_CLAMP_EXCLUDED], 0.0);
        assert_eq!(r["Tensors.FractionalAnisotropy.NAN"], 1.0);
        assert_eq!(r["Tensors.FractionalAnisotropy.Min"], 0.0);
        assert!(close(r["Weight.Median"], 2.5));
        assert!(r.contains_key("Tensors.MaxEigenvalue.Variance"));

        let mut brief = StatisticsSession::new(StatisticsParameters {
            more_statistics: false,
            ..Default::default()
        });
        brief.set_operations_by_name(&["Trace"]).unwrap();
        let r = brief.bundle_record("f", &bundle);
        assert!(r.contains_key("Tensors.Trace.Mean"));
        assert!(!r.contains_key("Tensors.Trace.Max"));
        assert!(!r.contains_key("Tensors.FractionalAnisotropy.Mean"));
        assert!(brief.set_operations_by_name(&["Bogus"]).is_err());
    }

    #[test]
    fn test_render_column_and_row_layouts() {
        let mut session = StatisticsSession::new(StatisticsParameters {
            separator: Separator::Tab,
            ..Default::default()
        });
        session.insert_record("T:f1", record(10.0, 1.0));
        session.insert_record("T:f2", record(30.0, f64::NAN));
        session.compute_clusters().unwrap();

        let table = session.render();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Name\tNum_Points\tNum_Fibers\tMean_Length\tNum_Clamp_Excluded\tFA.Mean\tFA.NAN"
        );
        assert_eq!(lines[1], "T\t40.000000\t2.000000\t20.000000\t0.000000\t1.000000\t2.000000");

        let mut rows = StatisticsSession::new(StatisticsParameters {
            layout: TableLayout::RowHierarchy,
            ..Default::default()
        });
        rows.insert_record("f2", record(30.0, f64::NAN));
        let table = rows.render();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("f2,f2"));
        assert!(lines[1].starts_with("Num_Points,Num_Fibers"));
        assert!(lines[2].ends_with("NAN,1.000000"));
    }
}
