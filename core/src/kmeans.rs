//! K-means over standardized feature matrices, backed by linfa.
//!
//! Each candidate k is one `linfa_clustering::KMeans` fit (k-means++
//! seeding, several restarts) driven by a forked analyzer stream, so a
//! run is reproducible from its seed. Elbow selection and the silhouette
//! score are computed here over the fitted labels.

use crate::{
    error::{AnalyticsError, AnalyticsResult},
    rng::AnalyzerRng,
};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Points above this count are subsampled for the silhouette score.
const SILHOUETTE_SAMPLE: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KMeansSettings {
    pub max_iter: u64,
    /// Stop when the centroids move less than this.
    pub tol:      f64,
    /// Independent k-means++ restarts; the lowest inertia wins.
    pub n_init:   usize,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self { max_iter: 300, tol: 1e-6, n_init: 10 }
    }
}

/// One fitted partition.
#[derive(Debug, Clone)]
pub struct ClusterFit {
    pub k:         usize,
    pub labels:    Array1<usize>,
    /// Centroids in standardized space, one row per cluster.
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares.
    pub inertia:   f64,
}

impl ClusterFit {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &l in self.labels.iter() {
            if l < self.k {
                sizes[l] += 1;
            }
        }
        sizes
    }
}

/// Row-major matrix from equally wide rows.
pub fn to_matrix(rows: &[Vec<f64>]) -> Array2<f64> {
    let width = rows.first().map_or(0, Vec::len);
    Array2::from_shape_fn((rows.len(), width), |(i, j)| rows[i][j])
}

/// Fit k clusters with a child stream of `rng` salted by k.
pub fn fit_kmeans(
    features: &Array2<f64>,
    k: usize,
    settings: &KMeansSettings,
    rng: &mut AnalyzerRng,
) -> AnalyticsResult<ClusterFit> {
    if k == 0 || k > features.nrows() {
        return Err(AnalyticsError::insufficient(
            "kmeans",
            format!("{} points cannot form {k} clusters", features.nrows()),
        ));
    }

    let targets: Array1<usize> = Array1::zeros(features.nrows());
    let dataset = Dataset::new(features.clone(), targets);
    let model = KMeans::params_with(k, rng.fork(k as u64), L2Dist)
        .n_runs(settings.n_init.max(1))
        .max_n_iterations(settings.max_iter)
        .tolerance(settings.tol)
        .fit(&dataset)
        .map_err(|e| AnalyticsError::non_convergent("kmeans", e.to_string()))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = inertia(features, &labels, &centroids);
    Ok(ClusterFit { k, labels, centroids, inertia })
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter(|(_, c)| **c < centroids.nrows())
        .map(|(row, c)| squared_distance(row, centroids.row(*c)))
        .sum()
}

/// Elbow heuristic over (k, inertia) pairs sorted by k.
///
/// Both axes are rescaled to [0, 1]; the chosen k is the interior point
/// farthest from the chord joining the first and last points. With fewer
/// than three candidates the largest k is returned.
pub fn elbow_k(curve: &[(usize, f64)]) -> Option<usize> {
    let (first, last) = (curve.first()?, curve.last()?);
    if curve.len() < 3 {
        return Some(last.0);
    }
    let k_span = (last.0 - first.0) as f64;
    let (lo, hi) = curve
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, i)| (lo.min(*i), hi.max(*i)));
    let i_span = hi - lo;
    let norm = |(k, inertia): (usize, f64)| {
        let x = if k_span > 0.0 { (k - first.0) as f64 / k_span } else { 0.0 };
        let y = if i_span > 0.0 { (inertia - lo) / i_span } else { 0.0 };
        (x, y)
    };

    let (x0, y0) = norm(*first);
    let (x1, y1) = norm(*last);
    let chord = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    if chord == 0.0 {
        return Some(curve[1].0);
    }

    let mut best = (curve[1].0, f64::NEG_INFINITY);
    for point in &curve[1..curve.len() - 1] {
        let (x, y) = norm(*point);
        let distance = ((y1 - y0) * x - (x1 - x0) * y + x1 * y0 - y1 * x0).abs() / chord;
        if distance > best.1 {
            best = (point.0, distance);
        }
    }
    Some(best.0)
}

/// Mean silhouette coefficient. `None` unless 2 ≤ k < n.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, k: usize) -> Option<f64> {
    let n = features.nrows();
    if k < 2 || k >= n {
        return None;
    }
    let step = n.div_ceil(SILHOUETTE_SAMPLE).max(1);

    let mut total = 0.0;
    let mut counted = 0usize;
    for i in (0..n).step_by(step) {
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for j in 0..n {
            if i != j {
                sums[labels[j]] += squared_distance(features.row(i), features.row(j)).sqrt();
                counts[labels[j]] += 1;
            }
        }
        let own = labels[i];
        if counts[own] == 0 {
            // Singleton cluster: silhouette defined as 0.
            counted += 1;
            continue;
        }
        let a = sums[own] / counts[own] as f64;
        let b = (0..k)
            .filter(|c| *c != own && counts[*c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);
        if !b.is_finite() {
            continue;
        }
        let denom = a.max(b);
        total += if denom > 0.0 { (b - a) / denom } else { 0.0 };
        counted += 1;
    }
    (counted > 0).then(|| total / counted as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..10 {
            rows.push(vec![0.0 + i as f64 * 0.01, 0.0]);
            rows.push(vec![10.0 + i as f64 * 0.01, 10.0]);
        }
        to_matrix(&rows)
    }

    #[test]
    fn elbow_picks_the_bend() {
        let curve = [(1, 100.0), (2, 20.0), (3, 15.0), (4, 12.0), (5, 10.0)];
        assert_eq!(elbow_k(&curve), Some(2));
    }

    #[test]
    fn elbow_with_two_candidates_takes_the_larger() {
        assert_eq!(elbow_k(&[(1, 10.0), (2, 4.0)]), Some(2));
        assert_eq!(elbow_k(&[]), None);
    }

    #[test]
    fn separated_blobs_are_recovered() {
        let data = blobs();
        let mut rng = AnalyzerRng::new(7, 3);
        let fit = fit_kmeans(&data, 2, &KMeansSettings::default(), &mut rng).unwrap();
        assert_eq!(fit.cluster_sizes(), vec![10, 10]);
        assert!(fit.labels.as_slice().unwrap().chunks(2).all(|pair| pair[0] != pair[1]));
        assert!(fit.inertia < 1.0, "inertia {}", fit.inertia);
        assert!(silhouette_score(&data, &fit.labels, 2).unwrap() > 0.9);
        assert!(fit_kmeans(&data, 0, &KMeansSettings::default(), &mut rng).is_err());
        assert!(fit_kmeans(&data, 21, &KMeansSettings::default(), &mut rng).is_err());
    }

    #[test]
    fn same_stream_gives_same_partition() {
        let data = blobs();
        let a = fit_kmeans(&data, 3, &KMeansSettings::default(), &mut AnalyzerRng::new(11, 3)).unwrap();
        let b = fit_kmeans(&data, 3, &KMeansSettings::default(), &mut AnalyzerRng::new(11, 3)).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }
}
