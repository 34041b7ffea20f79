//! K-Means segmentation of students and cluster-to-tier labelling

use std::collections::{BTreeMap, HashSet};

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Points used for the silhouette estimate
const SILHOUETTE_SAMPLE: usize = 500;

/// K-Means hyper-parameters. The seed and restart count are fixed so that
/// identical input always produces identical cluster ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansSettings {
    pub seed: u64,
    pub n_runs: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

/// One formed cluster, in tier order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub mean_total: f64,
    pub tier: String,
}

/// Cluster assignment and tier labels for every student
#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    /// Resolved cluster count, `min(k_requested, rows)`
    pub k: usize,
    /// Cluster id per row, each in `[0, k)`
    pub cluster_ids: Vec<usize>,
    /// Tier label per row
    pub tier_labels: Vec<String>,
    /// Non-empty clusters sorted from the lowest to the highest tier
    pub clusters: Vec<ClusterSummary>,
    /// Cluster centroids in item space
    #[serde(skip)]
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    /// Mean silhouette coefficient, only when two or more clusters formed
    pub silhouette: Option<f64>,
}

impl Segmentation {
    fn empty(n_items: usize) -> Self {
        Self {
            k: 0,
            cluster_ids: Vec::new(),
            tier_labels: Vec::new(),
            clusters: Vec::new(),
            centroids: Array2::zeros((0, n_items)),
            inertia: 0.0,
            silhouette: None,
        }
    }

    /// Number of students per cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        cluster_sizes(&self.cluster_ids, self.k)
    }

    pub fn tier_of_cluster(&self, cluster: usize) -> Option<&str> {
        self.clusters
            .iter()
            .find(|c| c.id == cluster)
            .map(|c| c.tier.as_str())
    }
}

/// Cluster the students' item vectors and label each cluster with a tier.
///
/// `responses` holds one row per student and one column per item, `totals`
/// the matching total scores. `tiers` is ordered from the lowest to the
/// highest tier and needs at least `k` labels.
pub fn segment(
    responses: &Array2<f64>,
    totals: &[f64],
    k_requested: usize,
    tiers: &[String],
    settings: &KMeansSettings,
) -> crate::Result<Segmentation> {
    if k_requested == 0 {
        return Err(PipelineError::InvalidClusterCount(k_requested));
    }

    let rows = responses.nrows();
    if rows == 0 {
        tracing::debug!("empty table, segmentation skipped");
        return Ok(Segmentation::empty(responses.ncols()));
    }

    // Without items every student is the same point
    let k = if responses.ncols() == 0 {
        1
    } else {
        k_requested.min(rows)
    };
    if tiers.len() < k {
        return Err(PipelineError::TierVocabularyMismatch {
            tiers: tiers.len(),
            k,
        });
    }

    // K-Means cannot place more centroids than there are distinct points
    let n_fit = k.min(count_distinct_rows(responses));
    let (labels, centroids) = if n_fit <= 1 {
        single_cluster(responses)
    } else {
        fit_kmeans(responses, n_fit, settings)?
    };

    let cluster_ids = labels.to_vec();
    let ranked = rank_clusters_by_mean(&cluster_ids, totals);
    let tier_by_cluster = assign_tiers(&ranked, tiers)?;

    let tier_labels = cluster_ids
        .iter()
        .map(|id| tier_by_cluster.get(id).cloned().unwrap_or_default())
        .collect();

    let sizes = cluster_sizes(&cluster_ids, k);
    let clusters = ranked
        .iter()
        .map(|&(id, mean_total)| ClusterSummary {
            id,
            size: sizes[id],
            mean_total,
            tier: tier_by_cluster[&id].clone(),
        })
        .collect();

    let inertia = compute_inertia(responses, &labels, &centroids);
    let silhouette = (n_fit >= 2)
        .then(|| compute_silhouette_sample(responses, &labels, n_fit, SILHOUETTE_SAMPLE));

    tracing::info!(k, formed = ranked.len(), inertia, "students segmented");

    Ok(Segmentation {
        k,
        cluster_ids,
        tier_labels,
        clusters,
        centroids,
        inertia,
        silhouette,
    })
}

/// Order formed clusters by their mean total score, lowest first.
///
/// Returns `(cluster id, mean total)` for every cluster id that occurs in
/// `labels`. Equal means are ordered by cluster id so the result is a total
/// order.
pub fn rank_clusters_by_mean(labels: &[usize], totals: &[f64]) -> Vec<(usize, f64)> {
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (&label, &total) in labels.iter().zip(totals) {
        let entry = sums.entry(label).or_insert((0.0, 0));
        entry.0 += total;
        entry.1 += 1;
    }

    let mut ranked: Vec<(usize, f64)> = sums
        .into_iter()
        .map(|(id, (sum, count))| (id, sum / count as f64))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Give the i-th ranked cluster the i-th tier label
pub fn assign_tiers(
    ranked: &[(usize, f64)],
    tiers: &[String],
) -> crate::Result<BTreeMap<usize, String>> {
    if tiers.len() < ranked.len() {
        return Err(PipelineError::TierVocabularyMismatch {
            tiers: tiers.len(),
            k: ranked.len(),
        });
    }

    Ok(ranked
        .iter()
        .zip(tiers)
        .map(|(&(id, _), tier)| (id, tier.clone()))
        .collect())
}

fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    settings: &KMeansSettings,
) -> crate::Result<(Array1<usize>, Array2<f64>)> {
    let dataset = DatasetBase::from(features.clone());
    let rng = StdRng::seed_from_u64(settings.seed);

    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(settings.n_runs)
        .max_n_iterations(settings.max_iterations)
        .tolerance(settings.tolerance)
        .fit(&dataset)
        .map_err(PipelineError::clustering)?;

    let labels: Array1<usize> = model.predict(features);
    Ok((labels, model.centroids().clone()))
}

/// Everyone in cluster 0, centroid at the column means
fn single_cluster(features: &Array2<f64>) -> (Array1<usize>, Array2<f64>) {
    let labels = Array1::zeros(features.nrows());
    let centroid = features
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(features.ncols()));
    (labels, centroid.insert_axis(Axis(0)))
}

fn count_distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

fn cluster_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0; k];
    for &label in labels {
        if label < k {
            sizes[label] += 1;
        }
    }
    sizes
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let point = features.row(i);
            let centroid = centroids.row(cluster);
            inertia += point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>();
        }
    }

    inertia
}

/// Mean silhouette coefficient over the first `sample_size` points
fn compute_silhouette_sample(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
    sample_size: usize,
) -> f64 {
    let n_samples = features.nrows().min(sample_size);
    if n_samples < 2 {
        return 0.0;
    }

    let mut silhouette_sum = 0.0;

    for i in 0..n_samples {
        let point = features.row(i);
        let own = labels[i];

        let mut same = (0.0, 0usize);
        let mut other = vec![(0.0, 0usize); n_clusters];

        for j in 0..n_samples {
            if i == j {
                continue;
            }
            let distance = euclidean_distance(&point, &features.row(j));
            let label = labels[j];
            if label == own {
                same.0 += distance;
                same.1 += 1;
            } else if label < n_clusters {
                other[label].0 += distance;
                other[label].1 += 1;
            }
        }

        // Singleton clusters score 0
        if same.1 == 0 {
            continue;
        }
        let a_i = same.0 / same.1 as f64;
        let b_i = other
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(sum, count)| sum / *count as f64)
            .fold(f64::INFINITY, f64::min);

        if b_i.is_finite() && a_i.max(b_i) > 0.0 {
            silhouette_sum += (b_i - a_i) / a_i.max(b_i);
        }
    }

    silhouette_sum / n_samples as f64
}

fn euclidean_distance(a: &ndarray::ArrayView1<f64>, b: &ndarray::ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
