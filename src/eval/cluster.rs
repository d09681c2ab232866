use nalgebra::*;
use rand::Rng;
use rand::seq::IteratorRandom;
use std::fmt;
use crate::error::UlcaError;

#[derive(Debug, Clone)]
pub struct KMeansSettings {
    pub n_cluster : usize,
    pub max_iter : usize
}

/// K-means partition of the rows of a matrix, used to label unlabeled data before
/// evaluating the weight optimizer on it.
#[derive(Debug, Clone)]
pub struct KMeans {
    allocations : Vec<usize>,
    means : Vec<DVector<f64>>,
    n_iter : usize
}

impl KMeans {

    /// Seeds the clusters (see seed_means) and alternates allocations and mean
    /// updates until no observation changes cluster or max_iter is reached.
    pub fn estimate<R : Rng>(x : &DMatrix<f64>, settings : &KMeansSettings, rng : &mut R) -> Result<Self, UlcaError> {
        let n = x.nrows();
        if settings.n_cluster == 0 || settings.n_cluster > n {
            return Err(UlcaError::InvalidSetting(format!(
                "Cannot build {} clusters from {} observations",
                settings.n_cluster,
                n
            )));
        }
        let mut means = seed_means(x, settings.n_cluster, rng);
        let mut allocations = vec![0; n];
        update_allocations(&mut allocations, &means, x);
        let mut n_iter = 0;
        while n_iter < settings.max_iter {
            update_means(&mut means, &allocations, x);
            n_iter += 1;
            if update_allocations(&mut allocations, &means, x) == 0 {
                break;
            }
        }
        Ok(Self { allocations, means, n_iter })
    }

    /// Return cluster of each observation, in the order they were supplied
    pub fn allocations(&self) -> &[usize] {
        &self.allocations[..]
    }

    /// Mean-update rounds run before the allocations settled (or max_iter).
    pub fn iterations(&self) -> usize {
        self.n_iter
    }

    pub fn n_clusters(&self) -> usize {
        self.means.len()
    }

    pub fn count_allocations(&self, cluster_ix : usize) -> usize {
        self.allocations().iter().filter(|alloc| **alloc == cluster_ix ).count()
    }

}

impl fmt::Display for KMeans {

    fn fmt(&self, f : &mut fmt::Formatter) -> Result<(), fmt::Error> {
        for (c, mean) in self.means.iter().enumerate() {
            writeln!(f, "Cluster {}: {} observations, mean = {:?}", c, self.count_allocations(c), mean.as_slice())?;
        }
        Ok(())
    }

}

fn closest(means : &[DVector<f64>], obs : &RowDVector<f64>) -> usize {
    let mut min_dist = f64::INFINITY;
    let mut min_ix = 0;
    for (ix, m) in means.iter().enumerate() {
        let dist = (obs.transpose() - m).norm();
        if dist < min_dist {
            min_ix = ix;
            min_dist = dist;
        }
    }
    min_ix
}

/// Update allocation vector, returning how many observations were re-allocated.
fn update_allocations(allocations : &mut [usize], means : &[DVector<f64>], x : &DMatrix<f64>) -> usize {
    let mut n_reallocated = 0;
    for (alloc, row) in allocations.iter_mut().zip(x.row_iter()) {
        let best = closest(means, &row.into_owned());
        if *alloc != best {
            *alloc = best;
            n_reallocated += 1;
        }
    }
    n_reallocated
}

// Clusters left empty keep their previous mean.
fn update_means(means : &mut [DVector<f64>], allocations : &[usize], x : &DMatrix<f64>) {
    for (c, mean) in means.iter_mut().enumerate() {
        let rows : Vec<usize> = allocations.iter().enumerate().filter(|(_, a)| **a == c ).map(|(i, _)| i ).collect();
        if rows.is_empty() {
            continue;
        }
        let members = x.select_rows(rows.iter());
        *mean = DVector::from_iterator(x.ncols(), members.column_iter().map(|col| col.mean() ));
    }
}

/// Takes the first seed at random, then each next seed as the observation with the
/// highest average distance to the seeds taken so far, so seeds tend to fall in
/// different clusters.
fn seed_means<R : Rng>(x : &DMatrix<f64>, n_cluster : usize, rng : &mut R) -> Vec<DVector<f64>> {
    let n = x.nrows();
    let first = (0..n).choose(rng).unwrap_or(0);
    let mut seed_ixs = vec![first];
    while seed_ixs.len() < n_cluster {
        let mut furthest = (0, -1.0);
        for (ix, row) in x.row_iter().enumerate() {
            if seed_ixs.contains(&ix) {
                continue;
            }
            let avg_dist = seed_ixs.iter()
                .map(|s| (row - x.row(*s)).norm() )
                .sum::<f64>() / seed_ixs.len() as f64;
            if avg_dist > furthest.1 {
                furthest = (ix, avg_dist);
            }
        }
        seed_ixs.push(furthest.0);
    }
    seed_ixs.iter().map(|ix| x.row(*ix).transpose() ).collect()
}
