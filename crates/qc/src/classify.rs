use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ComparisonMode, ThresholdMethod, ThresholdPolicy};
use crate::error::QcError;
use crate::model::{
    AppliedThreshold, DegenerateReason, DeviationTable, ExcludedMeasure, FlaggedRow, Interval,
    MeasureThreshold, OutlierReport, ThresholdDefault, ThresholdSet,
};
use crate::stats::Sample;

// ---------------------------------------------------------------------------
// Default thresholds
// ---------------------------------------------------------------------------

/// Compute the default threshold interval for every differenced measure.
///
/// Audit mode works on |diff| and yields `[0, upper]`:
/// - percentile: `upper = P(audit_percentile)`
/// - box-style:  `upper = Q3 + k*IQR`
///
/// Year-over-year mode works on signed diff:
/// - percentile: `[P(lower_percentile), P(upper_percentile)]`
/// - box-style:  `[Q1 - k*IQR, Q3 + k*IQR]`
///
/// Measures with too few samples, or whose interval comes out zero-width or
/// non-finite, are marked degenerate instead.
pub fn compute_thresholds(
    table: &DeviationTable,
    mode: ComparisonMode,
    policy: &ThresholdPolicy,
) -> ThresholdSet {
    let measures = table
        .measures
        .iter()
        .enumerate()
        .map(|(idx, measure)| {
            let method = policy.method_for(measure);
            let sample = match mode {
                ComparisonMode::Audit => Sample::from_values(table.diff_column(idx).map(f64::abs)),
                ComparisonMode::YearOverYear => Sample::from_values(table.diff_column(idx)),
            };
            let default = default_interval(&sample, mode, method, policy);
            if let ThresholdDefault::Degenerate { detail } = &default {
                log::warn!("{measure}: excluded from flagging, {detail}");
            }
            MeasureThreshold {
                measure: measure.clone(),
                method,
                samples: sample.len(),
                default,
                operator_override: None,
            }
        })
        .collect();

    ThresholdSet { mode, measures }
}

fn default_interval(
    sample: &Sample,
    mode: ComparisonMode,
    method: ThresholdMethod,
    policy: &ThresholdPolicy,
) -> ThresholdDefault {
    if sample.len() < policy.min_samples {
        return ThresholdDefault::Degenerate {
            detail: DegenerateReason::TooFewSamples {
                found: sample.len(),
                required: policy.min_samples,
            },
        };
    }

    let interval = match (mode, method) {
        (ComparisonMode::Audit, ThresholdMethod::Percentile) => sample
            .percentile(policy.audit_percentile)
            .map(|upper| Interval::new(0.0, upper)),
        (ComparisonMode::Audit, ThresholdMethod::BoxStyle) => sample
            .tukey_fences(policy.iqr_multiplier)
            .map(|(_, upper)| Interval::new(0.0, upper)),
        (ComparisonMode::YearOverYear, ThresholdMethod::Percentile) => sample
            .percentile(policy.lower_percentile)
            .zip(sample.percentile(policy.upper_percentile))
            .map(|(lower, upper)| Interval::new(lower, upper)),
        (ComparisonMode::YearOverYear, ThresholdMethod::BoxStyle) => sample
            .tukey_fences(policy.iqr_multiplier)
            .map(|(lower, upper)| Interval::new(lower, upper)),
    };

    match interval {
        Some(iv) if !iv.is_finite() => ThresholdDefault::Degenerate {
            detail: DegenerateReason::NonFinite,
        },
        Some(iv) if iv.width() <= 0.0 => ThresholdDefault::Degenerate {
            detail: DegenerateReason::ZeroWidth,
        },
        Some(iv) => ThresholdDefault::Computed { interval: iv },
        None => ThresholdDefault::Degenerate {
            detail: DegenerateReason::TooFewSamples {
                found: 0,
                required: policy.min_samples,
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Operator overrides
// ---------------------------------------------------------------------------

impl ThresholdSet {
    pub fn get(&self, measure: &str) -> Option<&MeasureThreshold> {
        self.measures.iter().find(|t| t.measure == measure)
    }

    /// Replace one measure's interval with an operator-chosen one. Other
    /// measures are untouched. In audit mode only `upper` is meaningful and
    /// `lower` is pinned to 0.
    pub fn set_override(&mut self, measure: &str, interval: Interval) -> Result<(), QcError> {
        let mode = self.mode;
        let entry = self
            .measures
            .iter_mut()
            .find(|t| t.measure == measure)
            .ok_or_else(|| QcError::UnknownMeasure(measure.into()))?;

        let invalid = |reason: &str| QcError::InvalidOverride {
            measure: measure.into(),
            reason: reason.into(),
        };

        if !interval.is_finite() {
            return Err(invalid("bounds must be finite"));
        }
        let interval = match mode {
            ComparisonMode::Audit => {
                if interval.upper <= 0.0 {
                    return Err(invalid("audit threshold must be positive"));
                }
                Interval::new(0.0, interval.upper)
            }
            ComparisonMode::YearOverYear => {
                if interval.lower >= interval.upper {
                    return Err(invalid("lower bound must be below upper bound"));
                }
                interval
            }
        };

        log::debug!("{measure}: operator override [{}, {}]", interval.lower, interval.upper);
        entry.operator_override = Some(interval);
        Ok(())
    }

    /// Drop an override, falling back to the computed default.
    pub fn clear_override(&mut self, measure: &str) -> Result<(), QcError> {
        let entry = self
            .measures
            .iter_mut()
            .find(|t| t.measure == measure)
            .ok_or_else(|| QcError::UnknownMeasure(measure.into()))?;
        entry.operator_override = None;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, Interval>) -> Result<(), QcError> {
        for (measure, interval) in overrides {
            self.set_override(measure, *interval)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Expand a selection of measure and group names into differenced measures,
/// in first-seen order. An empty selection means every differenced measure.
/// Group members that are not differenced (utility/index) are skipped; a
/// directly named one is an error, and so is a group with no differenced
/// member at all.
pub fn resolve_selection(
    table: &DeviationTable,
    selection: &[String],
    groups: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, QcError> {
    if selection.is_empty() {
        return Ok(table.measures.clone());
    }

    let mut seen = BTreeSet::new();
    let mut resolved = Vec::new();
    for name in selection {
        if let Some(members) = groups.get(name) {
            let differenced: Vec<&String> = members
                .iter()
                .filter(|m| table.measure_index(m).is_some())
                .collect();
            if differenced.is_empty() {
                return Err(QcError::ConfigValidation(format!(
                    "measure group '{name}' has no differenced measures to flag on"
                )));
            }
            for member in differenced {
                if seen.insert(member.as_str()) {
                    resolved.push(member.clone());
                }
            }
        } else if table.measure_index(name).is_some() {
            if seen.insert(name.as_str()) {
                resolved.push(name.clone());
            }
        } else {
            return Err(QcError::UnknownMeasure(name.clone()));
        }
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Flagging
// ---------------------------------------------------------------------------

/// Whether a single deviation falls outside its interval.
///
/// Audit: `|d| >= upper`. Year-over-year: `d < lower || d > upper`.
/// NaN never flags.
pub fn is_outlier(mode: ComparisonMode, interval: &Interval, diff: f64) -> bool {
    if diff.is_nan() {
        return false;
    }
    match mode {
        ComparisonMode::Audit => diff.abs() >= interval.upper,
        ComparisonMode::YearOverYear => diff < interval.lower || diff > interval.upper,
    }
}

/// Flag rows where any selected measure falls outside its effective interval.
///
/// Degenerate measures without an override are excluded and reported, not
/// flagged on.
pub fn flag_outliers(
    table: &DeviationTable,
    thresholds: &ThresholdSet,
    selection: &[String],
) -> Result<OutlierReport, QcError> {
    let mut applied = Vec::new();
    let mut excluded = Vec::new();
    let mut active: Vec<(usize, &str, Interval)> = Vec::new();

    for measure in selection {
        let idx = table
            .measure_index(measure)
            .ok_or_else(|| QcError::UnknownMeasure(measure.clone()))?;
        let threshold = thresholds
            .get(measure)
            .ok_or_else(|| QcError::UnknownMeasure(measure.clone()))?;

        match threshold.effective() {
            Some(interval) => {
                applied.push(AppliedThreshold {
                    measure: measure.clone(),
                    interval,
                    overridden: threshold.operator_override.is_some(),
                });
                active.push((idx, measure.as_str(), interval));
            }
            None => {
                if let Some(reason) = threshold.degenerate_reason() {
                    excluded.push(ExcludedMeasure {
                        measure: measure.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
    }

    let mut flagged = Vec::new();
    for (row_idx, row) in table.rows.iter().enumerate() {
        let hits: Vec<String> = active
            .iter()
            .filter(|(idx, _, interval)| is_outlier(thresholds.mode, interval, row.diffs[*idx]))
            .map(|(_, name, _)| (*name).to_string())
            .collect();
        if !hits.is_empty() {
            flagged.push(FlaggedRow { row: row_idx, measures: hits });
        }
    }

    log::info!(
        "flagged {} of {} row(s) on {} measure(s), {} excluded",
        flagged.len(),
        table.rows.len(),
        applied.len(),
        excluded.len()
    );

    Ok(OutlierReport {
        mode: thresholds.mode,
        selection: selection.to_vec(),
        applied,
        excluded,
        flagged,
    })
}
