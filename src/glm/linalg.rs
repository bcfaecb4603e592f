//! Small dense solvers for the per-gene normal equations

use ndarray::{Array1, Array2, ArrayView1};

/// Lower Cholesky factor of a symmetric matrix.
/// Non-positive pivots are replaced by a tiny epsilon so nearly singular
/// systems still produce a finite answer.
fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                l[[i, i]] = if sum <= 0.0 { 1e-12_f64.sqrt() } else { sum.sqrt() };
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    l
}

fn solve_with_factor(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `a x = b` for symmetric positive (semi)definite `a`
pub fn solve_symmetric(a: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    solve_with_factor(&cholesky(a), b)
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_symmetric(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let l = cholesky(a);
    let mut inv = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[i] = 1.0;
        inv.column_mut(i).assign(&solve_with_factor(&l, e.view()));
    }
    inv
}

/// Log determinant of a symmetric positive definite matrix
pub fn log_det_symmetric(a: &Array2<f64>) -> f64 {
    let l = cholesky(a);
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

/// `X' diag(w) X`
pub fn weighted_crossprod(x: &Array2<f64>, weights: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut out = Array2::<f64>::zeros((p, p));
    for (i, row) in x.rows().into_iter().enumerate() {
        let w = weights[i];
        for j in 0..p {
            let wxj = w * row[j];
            if wxj == 0.0 {
                continue;
            }
            for k in 0..p {
                out[[j, k]] += wxj * row[k];
            }
        }
    }
    out
}

/// `X' diag(w) z`
pub fn weighted_xtz(x: &Array2<f64>, weights: &[f64], z: &[f64]) -> Array1<f64> {
    let p = x.ncols();
    let mut out = Array1::<f64>::zeros(p);
    for (i, row) in x.rows().into_iter().enumerate() {
        let wz = weights[i] * z[i];
        for j in 0..p {
            out[j] += wz * row[j];
        }
    }
    out
}
