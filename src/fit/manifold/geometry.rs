use nalgebra::*;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Serialize, Deserialize};

/// Orthogonality-constrained matrix manifolds searched by the trust-region solver.
/// Points are n x p matrices with orthonormal columns. Tangent vectors are
/// represented in the ambient space, and the metric is the Euclidean (Frobenius)
/// one inherited from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Manifold {

    /// Subspaces: two points spanning the same columns are identified, so the
    /// search only sees the subspace.
    Grassmann,

    /// Orthonormal frames: the specific basis matters.
    Stiefel

}

impl Default for Manifold {

    fn default() -> Self {
        Manifold::Grassmann
    }

}

impl Manifold {

    pub fn dim(&self, n : usize, p : usize) -> usize {
        match self {
            Manifold::Grassmann => p * (n - p),
            Manifold::Stiefel => n * p - p * (p + 1) / 2
        }
    }

    /// Scale of distances on the manifold, bounding the trust-region radius.
    pub fn typical_dist(&self, n : usize, p : usize) -> f64 {
        match self {
            Manifold::Grassmann => ((p * (n - p)) as f64).sqrt(),
            Manifold::Stiefel => (p as f64).sqrt()
        }
    }

    pub fn inner(&self, u : &DMatrix<f64>, v : &DMatrix<f64>) -> f64 {
        u.dot(v)
    }

    pub fn norm(&self, u : &DMatrix<f64>) -> f64 {
        u.norm()
    }

    /// Orthogonal projection of an ambient matrix onto the tangent space at x.
    pub fn proj(&self, x : &DMatrix<f64>, u : &DMatrix<f64>) -> DMatrix<f64> {
        let xtu = x.transpose() * u;
        match self {
            Manifold::Grassmann => u - x * xtu,
            Manifold::Stiefel => {
                let sym = (&xtu + xtu.transpose()) * 0.5;
                u - x * sym
            }
        }
    }

    /// Riemannian gradient from the Euclidean gradient of the cost.
    pub fn egrad2rgrad(&self, x : &DMatrix<f64>, egrad : &DMatrix<f64>) -> DMatrix<f64> {
        self.proj(x, egrad)
    }

    /// QR-based retraction. The signs of the factor columns are fixed so the
    /// retraction is a smooth function of x + u.
    pub fn retr(&self, x : &DMatrix<f64>, u : &DMatrix<f64>) -> DMatrix<f64> {
        orthonormalize(x + u)
    }

    /// Vector transport by projection onto the tangent space at the destination.
    pub fn transp(&self, _from : &DMatrix<f64>, to : &DMatrix<f64>, u : &DMatrix<f64>) -> DMatrix<f64> {
        self.proj(to, u)
    }

    pub fn random_point<R : Rng>(&self, n : usize, p : usize, rng : &mut R) -> DMatrix<f64> {
        let a = DMatrix::<f64>::from_fn(n, p, |_, _| rng.sample(StandardNormal) );
        orthonormalize(a)
    }

    pub fn zero_vector(&self, x : &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::zeros(x.nrows(), x.ncols())
    }

}

/// Q factor of the thin QR decomposition with columns flipped so that the
/// diagonal of R is non-negative.
pub fn orthonormalize(a : DMatrix<f64>) -> DMatrix<f64> {
    let qr = a.qr();
    let r_diag = qr.r().diagonal();
    let mut q = qr.q();
    for (j, mut col) in q.column_iter_mut().enumerate() {
        if r_diag[j] < 0.0 {
            col.neg_mut();
        }
    }
    q
}
