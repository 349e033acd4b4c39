use crate::config::AnomalyConfig;
use crate::detect::{AnomalyMethod, AnomalyResult, DetectError};
use serde_json::json;
use std::collections::BTreeMap;

/// Guard against dividing by a zero moving-average baseline.
const BASELINE_EPSILON: f64 = 1e-9;

/// A simple time series for statistical analysis.
///
/// Non-finite samples are dropped on construction.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into_iter().filter(|v| v.is_finite()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self
            .values
            .iter()
            .map(|&x| (x - mean).powi(2))
            .sum();
        sum_sq_diff / (self.values.len() - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Mean of the most recent `n` samples (all samples when `n` is `None`).
    pub fn tail_mean(&self, n: Option<usize>) -> f64 {
        let n = n.unwrap_or(self.values.len()).clamp(1, self.values.len().max(1));
        let start = self.values.len().saturating_sub(n);
        let tail = &self.values[start..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().sum::<f64>() / tail.len() as f64
    }

    /// Linear-interpolation percentile, `p` in `[0, 1]`.
    ///
    /// Uses selection rather than a full sort, so the cost is linear in the
    /// series length.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut scratch = self.values.clone();
        let pos = p.clamp(0.0, 1.0) * (scratch.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let frac = pos - lo as f64;

        let (_, lo_val, upper) = scratch.select_nth_unstable_by(lo, f64::total_cmp);
        let lo_val = *lo_val;
        if frac == 0.0 || upper.is_empty() {
            return Some(lo_val);
        }
        let hi_val = upper.iter().copied().fold(f64::INFINITY, f64::min);
        Some(lo_val + (hi_val - lo_val) * frac)
    }

    /// Calculate the Z-score of a value relative to this series.
    /// Z = (value - mean) / std_dev
    pub fn z_score(&self, value: f64) -> Result<f64, DetectError> {
        self.require(AnomalyMethod::Zscore.min_history())?;
        let std = self.std_dev();
        if std == 0.0 {
            return Ok(0.0);
        }
        Ok((value - self.mean()) / std)
    }

    fn require(&self, needed: usize) -> Result<(), DetectError> {
        if self.values.len() < needed {
            return Err(DetectError::InsufficientBaseline {
                needed,
                have: self.values.len(),
            });
        }
        Ok(())
    }
}

/// Score `current` against `historical` with the given method.
///
/// Never fails: too little history yields a non-anomalous result with zero
/// confidence and an `insufficient_data` detail.
pub fn detect(
    method: AnomalyMethod,
    current: f64,
    historical: &[f64],
    sensitivity: f64,
) -> AnomalyResult {
    detect_with_window(method, current, historical, sensitivity, None)
}

fn detect_with_window(
    method: AnomalyMethod,
    current: f64,
    historical: &[f64],
    sensitivity: f64,
    window: Option<usize>,
) -> AnomalyResult {
    if !current.is_finite() {
        return AnomalyResult::non_finite(method);
    }
    let series = TimeSeries::new(historical.to_vec());
    let sensitivity = if sensitivity.is_finite() && sensitivity > 0.0 {
        sensitivity
    } else {
        f64::EPSILON
    };

    let outcome = match method {
        AnomalyMethod::Zscore => zscore(&series, current, sensitivity),
        AnomalyMethod::Iqr => iqr(&series, current, sensitivity),
        AnomalyMethod::MovingAverage => moving_average(&series, current, sensitivity, window),
    };

    match outcome {
        Ok(mut result) => {
            result
                .details
                .insert("historical_count".to_string(), series.len().into());
            result
                .details
                .insert("sensitivity".to_string(), json!(sensitivity));
            result
        }
        Err(e) => AnomalyResult::insufficient(method, e),
    }
}

fn zscore(
    series: &TimeSeries,
    current: f64,
    sensitivity: f64,
) -> Result<AnomalyResult, DetectError> {
    let z = series.z_score(current)?;
    let mean = series.mean();
    let stdev = series.std_dev();
    let mut details = BTreeMap::new();
    details.insert("mean".to_string(), json!(mean));
    details.insert("stdev".to_string(), json!(stdev));

    if stdev == 0.0 {
        // Constant baseline: any deviation at all is anomalous.
        let deviates = (current - mean).abs() > f64::EPSILON * mean.abs().max(1.0);
        details.insert("zero_variance".to_string(), json!(true));
        return Ok(AnomalyResult {
            is_anomaly: deviates,
            score: if deviates { current - mean } else { 0.0 },
            confidence: if deviates { 1.0 } else { 0.0 },
            baseline_value: mean,
            method: AnomalyMethod::Zscore,
            details,
        });
    }

    details.insert("zscore".to_string(), json!(z));
    Ok(AnomalyResult {
        is_anomaly: z.abs() > sensitivity,
        score: z,
        confidence: (z.abs() / (sensitivity * 2.0)).min(1.0),
        baseline_value: mean,
        method: AnomalyMethod::Zscore,
        details,
    })
}

fn iqr(series: &TimeSeries, current: f64, sensitivity: f64) -> Result<AnomalyResult, DetectError> {
    series.require(AnomalyMethod::Iqr.min_history())?;
    let have = series.len();
    let quartile = |p: f64| {
        series
            .percentile(p)
            .ok_or(DetectError::InsufficientBaseline { needed: 4, have })
    };
    let q1 = quartile(0.25)?;
    let q3 = quartile(0.75)?;
    let median = quartile(0.5)?;
    let iqr = q3 - q1;
    let lower = q1 - sensitivity * iqr;
    let upper = q3 + sensitivity * iqr;

    let distance = if current < lower {
        current - lower
    } else if current > upper {
        current - upper
    } else {
        0.0
    };
    let is_anomaly = distance != 0.0;

    let (score, confidence) = if !is_anomaly {
        (0.0, 0.0)
    } else if iqr > 0.0 {
        (
            distance / iqr,
            (distance.abs() / (sensitivity * iqr)).min(1.0),
        )
    } else {
        // Degenerate spread: any excursion is maximally confident.
        (distance, 1.0)
    };

    let mut details = BTreeMap::new();
    details.insert("q1".to_string(), json!(q1));
    details.insert("q3".to_string(), json!(q3));
    details.insert("iqr".to_string(), json!(iqr));
    details.insert("lower_bound".to_string(), json!(lower));
    details.insert("upper_bound".to_string(), json!(upper));
    details.insert("median".to_string(), json!(median));

    Ok(AnomalyResult {
        is_anomaly,
        score,
        confidence,
        baseline_value: median,
        method: AnomalyMethod::Iqr,
        details,
    })
}

fn moving_average(
    series: &TimeSeries,
    current: f64,
    sensitivity: f64,
    window: Option<usize>,
) -> Result<AnomalyResult, DetectError> {
    series.require(AnomalyMethod::MovingAverage.min_history())?;
    let window_size = window.unwrap_or(series.len()).clamp(1, series.len());
    let baseline = series.tail_mean(Some(window_size));
    let denom = baseline.abs().max(BASELINE_EPSILON);
    let ratio = (current - baseline) / denom;
    let deviation = ratio.abs();

    let mut details = BTreeMap::new();
    details.insert("moving_average".to_string(), json!(baseline));
    details.insert("window_size".to_string(), window_size.into());
    details.insert("deviation_ratio".to_string(), json!(deviation));

    Ok(AnomalyResult {
        is_anomaly: deviation > sensitivity,
        score: ratio,
        confidence: (deviation / sensitivity).min(1.0),
        baseline_value: baseline,
        method: AnomalyMethod::MovingAverage,
        details,
    })
}

/// Detector bundling per-method sensitivities.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    default_method: AnomalyMethod,
    zscore_sensitivity: f64,
    iqr_sensitivity: f64,
    moving_average_sensitivity: f64,
    moving_average_window: Option<usize>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::from_config(&AnomalyConfig::default())
    }
}

impl AnomalyDetector {
    pub fn from_config(cfg: &AnomalyConfig) -> Self {
        Self {
            default_method: cfg.default_method,
            zscore_sensitivity: cfg.zscore_sensitivity,
            iqr_sensitivity: cfg.iqr_sensitivity,
            moving_average_sensitivity: cfg.moving_average_sensitivity,
            moving_average_window: cfg.moving_average_window,
        }
    }

    pub fn default_method(&self) -> AnomalyMethod {
        self.default_method
    }

    pub fn sensitivity(&self, method: AnomalyMethod) -> f64 {
        match method {
            AnomalyMethod::Zscore => self.zscore_sensitivity,
            AnomalyMethod::Iqr => self.iqr_sensitivity,
            AnomalyMethod::MovingAverage => self.moving_average_sensitivity,
        }
    }

    pub fn detect(&self, method: AnomalyMethod, current: f64, historical: &[f64]) -> AnomalyResult {
        detect_with_window(
            method,
            current,
            historical,
            self.sensitivity(method),
            self.moving_average_window,
        )
    }

    pub fn detect_default(&self, current: f64, historical: &[f64]) -> AnomalyResult {
        self.detect(self.default_method, current, historical)
    }
}
