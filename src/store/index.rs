//! Approximate nearest-neighbor index construction and loading.
//!
//! The IVF-flat index partitions vectors into `nlist` clusters trained by
//! k-means after the bulk insert has committed. Each vector is stored in the
//! inverted list of its nearest centroid; queries later probe only the
//! `nprobe` closest lists. The index is always built in one pass over a
//! static collection, never incrementally.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::collection::{set_state, Collection, CollectionState};
use super::schema::{index_ddl, VECTOR_FIELD};
use super::{bytes_to_embedding, embedding_to_bytes, VectorStore};
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity; scores lie in `[-1, 1]`, higher is closer.
    Cosine,
    /// Euclidean distance; scores are negated distances.
    L2,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }

    /// sqlite-vec scalar function computing this metric's distance.
    pub(crate) fn sql_distance_fn(&self) -> &'static str {
        match self {
            Self::Cosine => "vec_distance_cosine",
            Self::L2 => "vec_distance_l2",
        }
    }

    /// Map a backend distance to a score where higher means closer.
    pub(crate) fn score(&self, distance: f64) -> f32 {
        match self {
            Self::Cosine => (1.0 - distance) as f32,
            Self::L2 => (-distance) as f32,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Clustered inverted lists with exact scoring inside probed lists.
    IvfFlat,
    /// No clustering: every query scans all rows.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub metric: Metric,
    pub kind: IndexKind,
    pub nlist: usize,
    pub max_iterations: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            kind: IndexKind::IvfFlat,
            nlist: 128,
            max_iterations: 25,
        }
    }
}

impl IndexParams {
    pub fn validate(&self) -> Result<()> {
        if self.kind == IndexKind::IvfFlat && self.nlist == 0 {
            return Err(IndexError::InvalidParams("nlist must be at least 1".into()));
        }
        if self.kind == IndexKind::IvfFlat && self.max_iterations == 0 {
            return Err(IndexError::InvalidParams(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`VectorStore::build_index`].
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub rows: usize,
    pub lists: usize,
    pub iterations: usize,
}

impl VectorStore {
    /// Train and persist the index over every row of a populated collection.
    ///
    /// Rebuilding an `Indexed` collection replaces its index. A `Loaded`
    /// collection must be released first.
    pub fn build_index(
        &mut self,
        collection: &Collection,
        params: &IndexParams,
    ) -> Result<IndexSummary> {
        params.validate()?;
        let info = self.current(collection, "build index on")?;
        let indexable = matches!(
            info.state,
            CollectionState::Populated | CollectionState::Indexed
        );
        if !indexable || info.row_count == 0 {
            return Err(IndexError::InvalidState {
                name: collection.name().to_string(),
                state: format!("{} ({} rows)", info.state, info.row_count),
                operation: "build index on",
            });
        }

        let dim = collection.schema().vector_dim()?;
        let (ids, data) = self.read_vectors(collection, dim)?;

        let clustering = match params.kind {
            IndexKind::IvfFlat => {
                train_ivf(&data, params.nlist.min(ids.len()), params.metric, params.max_iterations)
            }
            IndexKind::Flat => Clustering::empty(dim),
        };

        let tables = collection.tables();
        let params_json = serde_json::to_string(params)
            .map_err(|e| IndexError::InvalidParams(format!("failed to encode index params: {e}")))?;

        let tx = self.conn_mut().transaction()?;
        tx.execute_batch(&index_ddl(collection))?;
        {
            let mut insert_centroid = tx.prepare(&format!(
                "INSERT INTO {} (list_id, centroid, size) VALUES (?1, ?2, ?3)",
                tables.centroids
            ))?;
            for (list_id, centroid) in clustering.centroids.axis_iter(Axis(0)).enumerate() {
                let centroid = centroid.to_vec();
                let size = clustering.assignments.iter().filter(|&&a| a == list_id).count();
                insert_centroid.execute(params![
                    list_id as i64,
                    embedding_to_bytes(&centroid),
                    size as i64
                ])?;
            }

            let mut insert_member = tx.prepare(&format!(
                "INSERT INTO {} (entity_id, list_id) VALUES (?1, ?2)",
                tables.lists
            ))?;
            for (id, list_id) in ids.iter().zip(&clustering.assignments) {
                insert_member.execute(params![id, *list_id as i64])?;
            }
        }
        tx.execute(
            "UPDATE collections SET index_params = ?1 WHERE name = ?2",
            params![params_json, collection.name()],
        )?;
        set_state(&tx, collection.name(), CollectionState::Indexed)?;
        tx.commit()?;

        let summary = IndexSummary {
            rows: ids.len(),
            lists: clustering.centroids.nrows(),
            iterations: clustering.iterations,
        };
        tracing::info!(
            collection = collection.name(),
            metric = %params.metric,
            kind = ?params.kind,
            rows = summary.rows,
            lists = summary.lists,
            iterations = summary.iterations,
            "index built"
        );
        Ok(summary)
    }

    /// Bring an indexed collection into the serving state. Loading an already
    /// loaded collection is a no-op.
    pub fn load(&self, collection: &Collection) -> Result<()> {
        let info = self.current(collection, "load")?;
        match info.state {
            CollectionState::Loaded => return Ok(()),
            CollectionState::Indexed => {}
            other => {
                return Err(IndexError::InvalidState {
                    name: collection.name().to_string(),
                    state: other.to_string(),
                    operation: "load",
                })
            }
        }

        let params = info.index_params.ok_or_else(|| {
            IndexError::Schema(format!("{} is indexed but has no index params", info.name))
        })?;
        if params.kind == IndexKind::IvfFlat {
            let tables = collection.tables();
            let (lists, members): (i64, i64) = self.conn().query_row(
                &format!(
                    "SELECT (SELECT COUNT(*) FROM {}), (SELECT COUNT(*) FROM {})",
                    tables.centroids, tables.lists
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if lists == 0 || members as u64 != info.row_count {
                return Err(IndexError::Schema(format!(
                    "index of {} is incomplete: {lists} lists, {members} of {} rows assigned",
                    info.name, info.row_count
                )));
            }
        }

        set_state(self.conn(), collection.name(), CollectionState::Loaded)?;
        tracing::info!(collection = collection.name(), rows = info.row_count, "collection loaded");
        Ok(())
    }

    /// Take a loaded collection out of service, back to `Indexed`.
    pub fn release(&self, collection: &Collection) -> Result<()> {
        let state = self.current(collection, "release")?.state;
        if state != CollectionState::Loaded {
            return Err(IndexError::InvalidState {
                name: collection.name().to_string(),
                state: state.to_string(),
                operation: "release",
            });
        }
        set_state(self.conn(), collection.name(), CollectionState::Indexed)
    }

    /// Read every vector in insertion order as an `n x dim` matrix.
    fn read_vectors(&self, collection: &Collection, dim: usize) -> Result<(Vec<i64>, Array2<f32>)> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, {VECTOR_FIELD} FROM {} ORDER BY id",
            collection.tables().entities
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for (id, bytes) in rows {
            let vector = bytes_to_embedding(&bytes)?;
            if vector.len() != dim {
                return Err(IndexError::Schema(format!(
                    "row {id} has {} dimensions, schema declares {dim}",
                    vector.len()
                )));
            }
            ids.push(id);
            flat.extend(vector);
        }

        let data = Array2::from_shape_vec((ids.len(), dim), flat)
            .map_err(|e| IndexError::Schema(format!("vector matrix shape: {e}")))?;
        Ok((ids, data))
    }
}

/// Trained centroids and the list each input row was assigned to.
pub(crate) struct Clustering {
    pub centroids: Array2<f32>,
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

impl Clustering {
    fn empty(dim: usize) -> Self {
        Self {
            centroids: Array2::zeros((0, dim)),
            assignments: Vec::new(),
            iterations: 0,
        }
    }
}

/// k-means over the rows of `data` with at most `k` clusters.
///
/// Initialization is deterministic farthest-point seeding starting at row 0,
/// so the same input always yields the same lists. For cosine the rows and
/// centroids are unit-normalized (spherical k-means). Seeding stops early when
/// every remaining row coincides with a chosen centroid.
pub(crate) fn train_ivf(
    data: &Array2<f32>,
    k: usize,
    metric: Metric,
    max_iterations: usize,
) -> Clustering {
    let (n, dim) = data.dim();
    if n == 0 || k == 0 {
        return Clustering::empty(dim);
    }

    let data = match metric {
        Metric::Cosine => normalize_rows(data),
        Metric::L2 => data.clone(),
    };

    let mut centroids = seed_centroids(&data, k, metric);
    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;
        if assign(&data, &centroids, metric, &mut assignments) == 0 {
            break;
        }
        update_centroids(&data, &mut centroids, &assignments, metric);
    }
    assign(&data, &centroids, metric, &mut assignments);

    Clustering {
        centroids,
        assignments,
        iterations,
    }
}

fn normalize_rows(data: &Array2<f32>) -> Array2<f32> {
    let mut out = data.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    out
}

fn distance(metric: Metric, a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    match metric {
        // Rows are unit-normalized for cosine.
        Metric::Cosine => 1.0 - a.dot(&b),
        Metric::L2 => {
            let diff = &a - &b;
            diff.dot(&diff)
        }
    }
}

fn seed_centroids(data: &Array2<f32>, k: usize, metric: Metric) -> Array2<f32> {
    let n = data.nrows();
    let mut chosen = vec![0usize];
    let mut nearest: Vec<f32> = (0..n)
        .map(|i| distance(metric, data.row(i), data.row(0)))
        .collect();

    while chosen.len() < k {
        let (far, &far_dist) = nearest
            .iter()
            .enumerate()
            .fold((0, &f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if far_dist <= f32::EPSILON {
            break;
        }
        chosen.push(far);
        for (i, d) in nearest.iter_mut().enumerate() {
            *d = d.min(distance(metric, data.row(i), data.row(far)));
        }
    }

    data.select(Axis(0), &chosen)
}

/// Assign each row to its closest centroid. Returns how many assignments changed.
fn assign(
    data: &Array2<f32>,
    centroids: &Array2<f32>,
    metric: Metric,
    assignments: &mut [usize],
) -> usize {
    // Higher proximity is closer: cosine uses the dot product directly, l2
    // drops the row norm from ||x - c||^2 and negates.
    let dots = data.dot(&centroids.t());
    let centroid_norms: Array1<f32> = centroids
        .axis_iter(Axis(0))
        .map(|c| c.dot(&c))
        .collect();

    let mut changed = 0;
    for (i, row) in dots.axis_iter(Axis(0)).enumerate() {
        let mut best = 0;
        let mut best_proximity = f32::MIN;
        for (j, &dot) in row.iter().enumerate() {
            let proximity = match metric {
                Metric::Cosine => dot,
                Metric::L2 => 2.0 * dot - centroid_norms[j],
            };
            if proximity > best_proximity {
                best_proximity = proximity;
                best = j;
            }
        }
        if assignments[i] != best {
            assignments[i] = best;
            changed += 1;
        }
    }
    changed
}

/// Move each centroid to the mean of its members. Empty clusters keep their
/// previous centroid.
fn update_centroids(
    data: &Array2<f32>,
    centroids: &mut Array2<f32>,
    assignments: &[usize],
    metric: Metric,
) {
    let mut sums = Array2::<f32>::zeros(centroids.dim());
    let mut counts = vec![0usize; centroids.nrows()];
    for (row, &cluster) in data.axis_iter(Axis(0)).zip(assignments) {
        let mut sum = sums.row_mut(cluster);
        sum += &row;
        counts[cluster] += 1;
    }

    for (j, count) in counts.into_iter().enumerate() {
        if count == 0 {
            continue;
        }
        let mut mean = sums.row(j).to_owned() / count as f32;
        if metric == Metric::Cosine {
            let norm = mean.dot(&mean).sqrt();
            if norm > 0.0 {
                mean /= norm;
            }
        }
        centroids.row_mut(j).assign(&mean);
    }
}
