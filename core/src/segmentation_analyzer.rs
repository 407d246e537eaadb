//! Segmentation engine: RFM quartile scoring plus k-means segments.
//!
//! RFM: recency, frequency and monetary are bucketed into quartiles
//! independently. Duplicate quartile edges are dropped, so a
//! duplicate-heavy column simply has fewer buckets. Recency scores run
//! 4 (most recent) down to 1, frequency and monetary 1 up to 4, so the
//! composite is always in 3..=12.
//!
//! Clustering: standardized RFM features, k chosen by the elbow of the
//! inertia curve, clusters named by comparing centroids to global means.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    error::{AnalyticsError, AnalyticsResult},
    features::CustomerFeatures,
    kmeans::{self, ClusterFit, KMeansSettings},
    rng::{AnalyzerRng, AnalyzerSlot},
    stats::{self, StandardScaler},
    types::CustomerId,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const QUARTILES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];
/// Clustering needs at least this many customers.
pub const MIN_CLUSTER_POINTS: usize = 3;

// ── RFM ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RfmSegment {
    #[serde(rename = "Lost Cause")]
    LostCause,
    Hibernating,
    #[serde(rename = "Can't Lose")]
    CantLose,
    #[serde(rename = "Need Attention")]
    NeedAttention,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalist")]
    PotentialLoyalist,
    Promising,
    Champions,
}

impl RfmSegment {
    /// Total over every composite value: ≤4 Lost Cause … ≥11 Champions.
    pub fn from_composite(score: u8) -> Self {
        match score {
            0..=4 => Self::LostCause,
            5     => Self::Hibernating,
            6     => Self::CantLose,
            7     => Self::NeedAttention,
            8     => Self::LoyalCustomers,
            9     => Self::PotentialLoyalist,
            10    => Self::Promising,
            _     => Self::Champions,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::LostCause         => "Lost Cause",
            Self::Hibernating       => "Hibernating",
            Self::CantLose          => "Can't Lose",
            Self::NeedAttention     => "Need Attention",
            Self::LoyalCustomers    => "Loyal Customers",
            Self::PotentialLoyalist => "Potential Loyalist",
            Self::Promising         => "Promising",
            Self::Champions         => "Champions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RfmScore {
    pub customer_id:  CustomerId,
    pub recency_days: i64,
    pub frequency:    usize,
    pub monetary:     f64,
    pub r_score:      u8,
    pub f_score:      u8,
    pub m_score:      u8,
    pub composite:    u8,
    pub segment:      RfmSegment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RfmSegmentSummary {
    pub segment:       RfmSegment,
    pub customers:     usize,
    pub avg_recency:   f64,
    pub avg_frequency: f64,
    pub avg_monetary:  f64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RfmReport {
    pub scores:          Vec<RfmScore>,
    pub summaries:       Vec<RfmSegmentSummary>,
    /// Deduplicated quartile edges actually used for each dimension.
    pub recency_edges:   Vec<f64>,
    pub frequency_edges: Vec<f64>,
    pub monetary_edges:  Vec<f64>,
}

// ── Clusters ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Centroid {
    pub recency:   f64,
    pub frequency: f64,
    pub monetary:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub segment_id:    usize,
    pub label:         String,
    pub size:          usize,
    pub share_pct:     f64,
    /// Mean RFM of members in original units.
    pub centroid:      Centroid,
    pub total_revenue: f64,
    /// 1 = highest total revenue.
    pub revenue_rank:  usize,
    pub members:       Vec<CustomerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clustering {
    pub k:                usize,
    pub segments:         Vec<Segment>,
    /// (k, inertia) for every candidate k.
    pub elbow_curve:      Vec<(usize, f64)>,
    pub silhouette_score: Option<f64>,
    pub global_means:     Option<Centroid>,
    /// Why clustering was skipped or degraded, if it was.
    pub note:             Option<String>,
}

impl Clustering {
    fn empty(note: impl Into<String>) -> Self {
        Self {
            k: 0,
            segments: Vec::new(),
            elbow_curve: Vec::new(),
            silhouette_score: None,
            global_means: None,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentationReport {
    pub rfm:        RfmReport,
    pub clustering: Clustering,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct SegmentationAnalyzer;

impl Analyzer for SegmentationAnalyzer {
    type Output = SegmentationReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::Segmentation
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, rng: &mut AnalyzerRng) -> AnalyticsResult<SegmentationReport> {
        let customers: Vec<&CustomerFeatures> = ctx.features.active_history().collect();
        if customers.is_empty() {
            return Err(AnalyticsError::insufficient("segmentation", "no customers with dated transactions"));
        }

        let rfm = score_rfm(&customers);
        let clustering = cluster_customers(&customers, ctx.config.max_segmentation_k, rng, ctx)?;

        log::info!(
            "segmentation: {} customers scored, {} clusters",
            rfm.scores.len(),
            clustering.k
        );
        Ok(SegmentationReport { rfm, clustering })
    }
}

// ── RFM scoring ────────────────────────────────────────────────────

/// Quartile edges with duplicates removed.
pub fn quartile_edges(values: &[f64]) -> Vec<f64> {
    let sorted = stats::sorted(values);
    let mut edges: Vec<f64> = QUARTILES
        .iter()
        .filter_map(|q| stats::quantile_sorted(&sorted, *q))
        .collect();
    edges.dedup();
    edges
}

/// Bucket index of `v` given ascending edges; the first bucket includes
/// its lower edge. A single edge means one bucket.
fn bucket(v: f64, edges: &[f64]) -> usize {
    let buckets = edges.len().saturating_sub(1).max(1);
    (0..buckets)
        .find(|i| edges.get(i + 1).map_or(true, |upper| v <= *upper))
        .unwrap_or(buckets - 1)
}

/// Quartile scores in 1..=4. `descending` flips the order so that the
/// lowest values score highest (used for recency).
pub fn quartile_scores(values: &[f64], descending: bool) -> (Vec<u8>, Vec<f64>) {
    let edges = quartile_edges(values);
    let scores = values
        .iter()
        .map(|v| {
            let i = bucket(*v, &edges).min(3) as u8;
            if descending { 4 - i } else { i + 1 }
        })
        .collect();
    (scores, edges)
}

pub fn score_rfm(customers: &[&CustomerFeatures]) -> RfmReport {
    let recency: Vec<f64> = customers.iter().map(|c| c.recency_days.unwrap_or(0) as f64).collect();
    let frequency: Vec<f64> = customers.iter().map(|c| c.frequency as f64).collect();
    let monetary: Vec<f64> = customers.iter().map(|c| c.monetary).collect();

    let (r, recency_edges) = quartile_scores(&recency, true);
    let (f, frequency_edges) = quartile_scores(&frequency, false);
    let (m, monetary_edges) = quartile_scores(&monetary, false);

    let scores: Vec<RfmScore> = customers
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let composite = r[i] + f[i] + m[i];
            RfmScore {
                customer_id: c.customer_id.clone(),
                recency_days: c.recency_days.unwrap_or(0),
                frequency: c.frequency,
                monetary: c.monetary,
                r_score: r[i],
                f_score: f[i],
                m_score: m[i],
                composite,
                segment: RfmSegment::from_composite(composite),
            }
        })
        .collect();

    let mut grouped: BTreeMap<RfmSegment, Vec<&RfmScore>> = BTreeMap::new();
    for s in &scores {
        grouped.entry(s.segment).or_default().push(s);
    }
    let summaries = grouped
        .into_iter()
        .rev()
        .map(|(segment, members)| {
            let avg = |f: &dyn Fn(&RfmScore) -> f64| {
                stats::mean(&members.iter().map(|s| f(s)).collect::<Vec<_>>()).unwrap_or(0.0)
            };
            RfmSegmentSummary {
                segment,
                customers: members.len(),
                avg_recency: avg(&|s| s.recency_days as f64),
                avg_frequency: avg(&|s| s.frequency as f64),
                avg_monetary: avg(&|s| s.monetary),
                total_revenue: members.iter().map(|s| s.monetary).sum(),
            }
        })
        .collect();

    RfmReport { scores, summaries, recency_edges, frequency_edges, monetary_edges }
}

// ── Clustering ─────────────────────────────────────────────────────

fn cluster_customers(
    customers: &[&CustomerFeatures],
    max_k: usize,
    rng: &mut AnalyzerRng,
    ctx: &AnalysisContext<'_>,
) -> AnalyticsResult<Clustering> {
    if customers.len() < MIN_CLUSTER_POINTS {
        log::warn!("segmentation: {} customers, clustering skipped", customers.len());
        return Ok(Clustering::empty(format!(
            "clustering needs at least {MIN_CLUSTER_POINTS} customers, got {}",
            customers.len()
        )));
    }

    let raw: Vec<Vec<f64>> = customers
        .iter()
        .map(|c| vec![c.recency_days.unwrap_or(0) as f64, c.frequency as f64, c.monetary])
        .collect();
    let global = centroid_of(&raw).unwrap_or(Centroid { recency: 0.0, frequency: 0.0, monetary: 0.0 });

    let scaler = StandardScaler::fit(&raw)
        .ok_or_else(|| AnalyticsError::insufficient("segmentation", "no feature rows"))?;
    if scaler.is_degenerate(&raw) {
        // Every customer has identical RFM: one segment holds everybody.
        log::warn!("segmentation: zero-variance RFM features, single segment fallback");
        let labels = vec![0; raw.len()];
        let segments = build_segments(customers, &raw, &labels, 1, &global);
        return Ok(Clustering {
            k: 1,
            segments,
            elbow_curve: vec![(1, 0.0)],
            silhouette_score: None,
            global_means: Some(global),
            note: Some("zero-variance input, single segment".into()),
        });
    }
    let data = kmeans::to_matrix(&scaler.transform(&raw));

    // Candidate range shrinks with the number of points.
    let upper = max_k.min(data.nrows() - 1).max(1);
    let settings = KMeansSettings::default();
    let mut fits: Vec<ClusterFit> = Vec::new();
    for k in 1..=upper {
        ctx.clock.checkpoint("segmentation_k_search")?;
        match kmeans::fit_kmeans(&data, k, &settings, rng) {
            Ok(fit) => fits.push(fit),
            Err(e) => log::warn!("segmentation: k={k} skipped: {e}"),
        }
    }
    let elbow_curve: Vec<(usize, f64)> = fits.iter().map(|f| (f.k, f.inertia)).collect();
    let chosen = kmeans::elbow_k(&elbow_curve)
        .and_then(|k| fits.iter().find(|f| f.k == k))
        .ok_or_else(|| AnalyticsError::degenerate("segmentation", "no candidate k could be fitted"))?;

    let labels = chosen.labels.to_vec();
    let segments = build_segments(customers, &raw, &labels, chosen.k, &global);
    Ok(Clustering {
        k: chosen.k,
        silhouette_score: kmeans::silhouette_score(&data, &chosen.labels, chosen.k),
        segments,
        elbow_curve,
        global_means: Some(global),
        note: None,
    })
}

fn centroid_of(rows: &[Vec<f64>]) -> Option<Centroid> {
    let col = |i: usize| stats::mean(&rows.iter().map(|r| r[i]).collect::<Vec<_>>());
    Some(Centroid { recency: col(0)?, frequency: col(1)?, monetary: col(2)? })
}

/// Name a cluster from how its centroid compares with the global means.
pub fn describe_centroid(c: &Centroid, global: &Centroid) -> &'static str {
    let recent = c.recency < global.recency;
    let frequent = c.frequency > global.frequency;
    let valuable = c.monetary > global.monetary;
    match (recent, frequent, valuable) {
        (true, true, true)    => "Loyal High-Value",
        (true, true, false)   => "Frequent Budget",
        (true, false, true)   => "Recent Big Spenders",
        (true, false, false)  => "Recent Occasional",
        (false, _, true)      => "At-Risk High-Value",
        (false, true, false)  => "Lapsing Regulars",
        (false, false, false) => "Dormant Low-Value",
    }
}

fn build_segments(
    customers: &[&CustomerFeatures],
    raw: &[Vec<f64>],
    labels: &[usize],
    k: usize,
    global: &Centroid,
) -> Vec<Segment> {
    let total = customers.len() as f64;
    let mut segments: Vec<Segment> = (0..k)
        .filter_map(|cluster| {
            let idx: Vec<usize> = (0..labels.len()).filter(|i| labels[*i] == cluster).collect();
            let rows: Vec<Vec<f64>> = idx.iter().map(|i| raw[*i].clone()).collect();
            let centroid = centroid_of(&rows)?;
            let mut members: Vec<CustomerId> = idx.iter().map(|i| customers[*i].customer_id.clone()).collect();
            members.sort();
            Some(Segment {
                segment_id: cluster,
                label: describe_centroid(&centroid, global).to_string(),
                size: idx.len(),
                share_pct: stats::ratio(idx.len() as f64 * 100.0, total).unwrap_or(0.0),
                total_revenue: idx.iter().map(|i| customers[*i].monetary).sum(),
                centroid,
                revenue_rank: 0,
                members,
            })
        })
        .collect();

    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|a, b| {
        segments[*b]
            .total_revenue
            .partial_cmp(&segments[*a].total_revenue)
            .unwrap_or(Ordering::Equal)
    });
    for (rank, i) in order.into_iter().enumerate() {
        segments[i].revenue_rank = rank + 1;
    }
    segments
}
