use nalgebra::*;
use crate::error::UlcaError;

/// Orthogonal Procrustes: finds the orthogonal R minimizing ||z_prev - z R||
/// for two embeddings of the same instances (rows in correspondence). With the
/// SVD z_prev^T z = U S V^T, the solution is R = V U^T. Returns None when the
/// previous embedding has no rows, in which case no alignment should happen.
pub fn align(z_prev : &DMatrix<f64>, z : &DMatrix<f64>) -> Result<Option<DMatrix<f64>>, UlcaError> {
    if z_prev.nrows() == 0 {
        return Ok(None);
    }
    if z_prev.shape() != z.shape() {
        return Err(UlcaError::ShapeMismatch(format!(
            "Cannot align a {}x{} embedding to a {}x{} one",
            z.nrows(),
            z.ncols(),
            z_prev.nrows(),
            z_prev.ncols()
        )));
    }
    let svd = SVD::new(z_prev.transpose() * z, true, true);
    let u = svd.u.ok_or_else(|| UlcaError::Decomposition(String::from("Procrustes SVD (U)")) )?;
    let v_t = svd.v_t.ok_or_else(|| UlcaError::Decomposition(String::from("Procrustes SVD (V)")) )?;
    Ok(Some(v_t.transpose() * u.transpose()))
}

/// Rotates z onto z_prev when a previous embedding is available, returning the
/// rotated embedding and the rotation applied (if any).
pub fn align_embedding(
    z_prev : Option<&DMatrix<f64>>,
    z : DMatrix<f64>
) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>), UlcaError> {
    match z_prev {
        Some(prev) => match align(prev, &z)? {
            Some(r) => Ok((&z * &r, Some(r))),
            None => Ok((z, None))
        },
        None => Ok((z, None))
    }
}
