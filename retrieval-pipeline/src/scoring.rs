use std::cmp::Ordering;

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity with precomputed norms, bounded to `[-1, 1]`.
///
/// A zero-norm operand has no direction, so it scores 0 against everything.
pub fn cosine_similarity(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm <= f32::EPSILON || b_norm <= f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let score = dot / (a_norm * b_norm);
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Sorts by non-increasing score. The sort is stable, so equal scores keep their input order.
pub fn sort_by_score_desc<T>(items: &mut [(T, f32)]) {
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}
