use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::error::UlcaError;

/// Post-processing applied to a projection matrix after either solver. Neither
/// step changes the spanned subspace; both make nearby fits produce visually
/// stable axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {

    /// Rotate the columns to concentrate the loadings (varimax).
    pub apply_varimax : bool,

    /// Flip signs so column sums are non-negative, then order columns by
    /// descending maximum.
    pub apply_consist_axes : bool

}

const VARIMAX_MAX_ITER : usize = 500;

const VARIMAX_TOL : f64 = 1e-5;

/// Applies the configured steps. Projections with a single column are returned unchanged.
pub fn normalize_axes(m : DMatrix<f64>, settings : AxisSettings) -> Result<DMatrix<f64>, UlcaError> {
    if m.ncols() <= 1 {
        return Ok(m);
    }
    let m = if settings.apply_varimax {
        varimax(&m)?
    } else {
        m
    };
    if settings.apply_consist_axes {
        Ok(canonicalize_order(&canonicalize_signs(&m)))
    } else {
        Ok(m)
    }
}

/// Kaiser-normalized varimax rotation of the loading matrix (features at rows,
/// components at columns). Rows are scaled to unit norm before the rotation
/// is searched and scaled back afterwards.
pub fn varimax(loadings : &DMatrix<f64>) -> Result<DMatrix<f64>, UlcaError> {
    let (n_rows, n_cols) = loadings.shape();
    let norms = DVector::from_iterator(n_rows, loadings.row_iter().map(|r| r.norm() ));
    let mut x = loadings.clone();
    for (i, mut row) in x.row_iter_mut().enumerate() {
        if norms[i] > 0.0 {
            row.unscale_mut(norms[i]);
        }
    }

    let mut rotation = DMatrix::<f64>::identity(n_cols, n_cols);
    let mut d = 0.0;
    for _ in 0..VARIMAX_MAX_ITER {
        let old_d = d;
        let basis = &x * &rotation;
        let col_ss = DVector::from_iterator(n_cols, basis.column_iter().map(|c| c.norm_squared() ));
        let diag = DMatrix::from_diagonal(&col_ss);
        let cubed = basis.map(|b| b.powi(3) );
        let target = x.transpose() * (cubed - (&basis * diag) / (n_rows as f64));
        let svd = SVD::new(target, true, true);
        let u = svd.u.ok_or_else(|| UlcaError::Decomposition(String::from("varimax SVD (U)")) )?;
        let v_t = svd.v_t.ok_or_else(|| UlcaError::Decomposition(String::from("varimax SVD (V)")) )?;
        rotation = u * v_t;
        d = svd.singular_values.sum();
        if d < old_d * (1.0 + VARIMAX_TOL) {
            break;
        }
    }

    let mut rotated = x * rotation;
    for (i, mut row) in rotated.row_iter_mut().enumerate() {
        if norms[i] > 0.0 {
            row.scale_mut(norms[i]);
        }
    }
    Ok(rotated)
}

/// Flips each column whose entries sum to a negative value.
pub fn canonicalize_signs(m : &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for mut col in out.column_iter_mut() {
        if col.sum() < 0.0 {
            col.neg_mut();
        }
    }
    out
}

/// Reorders columns by descending column maximum. Ties keep their relative order.
pub fn canonicalize_order(m : &DMatrix<f64>) -> DMatrix<f64> {
    let maxes : Vec<f64> = m.column_iter().map(|c| c.max() ).collect();
    let mut order : Vec<usize> = (0..m.ncols()).collect();
    order.sort_by(|a, b| maxes[*b].partial_cmp(&maxes[*a]).unwrap_or(std::cmp::Ordering::Equal) );
    m.select_columns(order.iter())
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn loadings() -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 2, &[
            0.1, -0.9,
            -0.2, -0.3,
            0.7, 0.1,
            0.6, 0.2
        ])
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let settings = AxisSettings { apply_varimax : false, apply_consist_axes : true };
        let once = normalize_axes(loadings(), settings).unwrap();
        let twice = normalize_axes(once.clone(), settings).unwrap();
        assert_eq!(once, twice);
        for col in once.column_iter() {
            assert!(col.sum() >= 0.0);
        }
        assert!(once.column(0).max() >= once.column(1).max());
    }

    #[test]
    fn sign_flip_and_reorder() {
        let m = canonicalize_order(&canonicalize_signs(&loadings()));
        // Second column had a negative sum, flipped it has max 0.9 and comes first.
        assert_relative_eq!(m[(0, 0)], 0.9);
        assert_relative_eq!(m[(2, 1)], 0.7);
    }

    #[test]
    fn varimax_preserves_subspace() {
        let m = loadings().qr().q();
        let r = varimax(&m).unwrap();
        let p_before = &m * m.transpose();
        let p_after = &r * r.transpose();
        assert_relative_eq!(p_before, p_after, epsilon = 1e-8);
    }

    #[test]
    fn single_column_is_untouched() {
        let m = DMatrix::from_column_slice(3, 1, &[-1.0, -2.0, 0.5]);
        let settings = AxisSettings { apply_varimax : true, apply_consist_axes : true };
        assert_eq!(normalize_axes(m.clone(), settings).unwrap(), m);
    }

}
