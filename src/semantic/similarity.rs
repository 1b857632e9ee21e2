//! Cosine similarity and ranking over embedding vectors.

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Position of the candidate in the slice handed to [`rank`]
    pub index: usize,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f64,
}

/// L2 norm, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// `dot(a, b) / (|a| * |b|)`, or 0.0 when either vector has zero norm.
///
/// Vectors of different length are compared over their common prefix.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Score every candidate against `query`, highest first, truncated to `limit`.
pub fn rank(query: &[f32], candidates: &[Vec<f32>], limit: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| SearchResult {
            index,
            score: cosine(query, candidate),
        })
        .collect();

    // Sort by score descending, stable for equal scores
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_norm_is_zero() {
        assert_eq!(cosine(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
    }

    #[test]
    fn test_bounds() {
        let vectors = [
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, -0.3],
            vec![-5.0, 2.0, 0.5],
            vec![1e-3, 1e3, -1e2],
        ];
        for a in &vectors {
            for b in &vectors {
                let s = cosine(a, b);
                assert!((-1.0..=1.0).contains(&s), "{s} out of range");
            }
        }
    }

    #[test]
    fn test_scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_orders_and_limits() {
        let candidates = vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
        ];
        let results = rank(&[1.0, 0.0, 0.0], &candidates, 2);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        assert_eq!(results[1].index, 2);
        assert!(results[0].score > results[1].score);
    }
}
