//! Cosine similarity, group means and group ranking

use std::cmp::Ordering;

use anyhow::Result;

use super::store::SqliteStore;
use crate::core::schema::SubjectKind;

const NORM_EPSILON: f32 = 1e-12;

/// Cosine similarity between two embeddings
///
/// Returns 0.0 for missing or empty input, mismatched lengths, or a (near-)zero norm.
pub fn cosine_similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) if !a.is_empty() && a.len() == b.len() => (a, b),
        _ => return 0.0,
    };

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > NORM_EPSILON && norm_b > NORM_EPSILON {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Map-edge distance annotation
pub fn distance(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Coordinate-wise mean of the member vectors that exist
///
/// Members without a vector (or with a different length than the first one)
/// contribute nothing. Returns `None` when no member has a vector.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;

    for vector in vectors {
        if vector.is_empty() {
            continue;
        }
        if sum.is_empty() {
            sum = vec![0.0; vector.len()];
        } else if vector.len() != sum.len() {
            continue;
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += *value as f64;
        }
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(sum.iter().map(|v| (*v / count as f64) as f32).collect())
}

/// Candidate group for ranking against a user's embedding
#[derive(Debug, Clone)]
pub struct GroupCandidate {
    pub group_id: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedGroup {
    pub group_id: String,
    pub similarity: f32,
    pub has_embedding: bool,
}

/// Rank groups by similarity, best first; groups without an embedding go last
pub fn rank_groups(user: Option<&[f32]>, groups: Vec<GroupCandidate>) -> Vec<RankedGroup> {
    let mut ranked: Vec<RankedGroup> = groups
        .into_iter()
        .map(|g| RankedGroup {
            similarity: cosine_similarity(user, g.embedding.as_deref()),
            has_embedding: g.embedding.is_some(),
            group_id: g.group_id,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.has_embedding
            .cmp(&a.has_embedding)
            .then_with(|| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    ranked
}

/// Rank every stored group against a user's active embedding
pub fn rank_groups_for_user(store: &SqliteStore, user_id: &str) -> Result<Vec<RankedGroup>> {
    let user = store.get_active_embedding(user_id)?.map(|r| r.vector);

    let mut candidates = Vec::new();
    for group_id in store.list_subjects(SubjectKind::Group)? {
        let embedding = store.get_active_embedding(&group_id)?.map(|r| r.vector);
        candidates.push(GroupCandidate { group_id, embedding });
    }
    Ok(rank_groups(user.as_deref(), candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::generator::GeneratedEmbedding;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(Some(a.as_slice()), Some(b.as_slice())) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(Some(a.as_slice()), Some(c.as_slice())).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(Some(a.as_slice()), Some(d.as_slice())) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(Some(v.as_slice()), Some(v.as_slice())) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_inputs_are_zero() {
        let v = vec![1.0, 2.0];
        let zero = vec![0.0, 0.0];
        assert_eq!(cosine_similarity(Some(v.as_slice()), None), 0.0);
        assert_eq!(cosine_similarity(None, None), 0.0);
        assert_eq!(cosine_similarity(Some(zero.as_slice()), Some(v.as_slice())), 0.0);
        assert_eq!(cosine_similarity(Some(&[][..]), Some(&[][..])), 0.0);
        assert_eq!(cosine_similarity(Some(v.as_slice()), Some(&[1.0, 2.0, 3.0][..])), 0.0);
    }

    #[test]
    fn test_distance() {
        let v = vec![1.0, 1.0];
        assert!(distance(Some(v.as_slice()), Some(v.as_slice())).abs() < 1e-6);
        assert_eq!(distance(Some(v.as_slice()), None), 1.0);
    }

    #[test]
    fn test_mean_skips_absent_members() {
        let a = vec![1.0, 3.0];
        let b = vec![3.0, 5.0];
        let mean = mean_vector([a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);

        let members: Vec<Option<Vec<f32>>> = vec![Some(a.clone()), None, Some(b.clone())];
        let mean = mean_vector(members.iter().flatten().map(Vec::as_slice)).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);

        assert!(mean_vector(std::iter::empty()).is_none());
    }

    #[test]
    fn test_rank_groups() {
        let user = vec![1.0, 0.0];
        let ranked = rank_groups(
            Some(user.as_slice()),
            vec![
                GroupCandidate {
                    group_id: "far".into(),
                    embedding: Some(vec![0.0, 1.0]),
                },
                GroupCandidate {
                    group_id: "none".into(),
                    embedding: None,
                },
                GroupCandidate {
                    group_id: "near".into(),
                    embedding: Some(vec![0.9, 0.1]),
                },
            ],
        );
        let order: Vec<&str> = ranked.iter().map(|r| r.group_id.as_str()).collect();
        assert_eq!(order, vec!["near", "far", "none"]);
        assert!(!ranked[2].has_embedding);
    }

    #[test]
    fn test_rank_groups_for_user() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embed = |v: Vec<f32>| GeneratedEmbedding {
            vector: v,
            model_name: "m".into(),
            model_version: None,
        };
        for group in ["g-far", "g-near", "g-empty"] {
            store.upsert_subject(group, SubjectKind::Group, None, &[], None)?;
        }
        store.set_active_embedding("u1", &embed(vec![1.0, 0.0]), "h")?;
        store.set_active_embedding("g-far", &embed(vec![-1.0, 0.2]), "h")?;
        store.set_active_embedding("g-near", &embed(vec![1.0, 0.1]), "h")?;

        let ranked = rank_groups_for_user(&store, "u1")?;
        let order: Vec<&str> = ranked.iter().map(|r| r.group_id.as_str()).collect();
        assert_eq!(order, vec!["g-near", "g-far", "g-empty"]);
        assert!(ranked[1].similarity < 0.0);
        Ok(())
    }
}
