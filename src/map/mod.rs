//! 2-D group maps from member embeddings
//!
//! Members are projected onto their top two principal axes and scaled onto a
//! fixed canvas. Layouts are cached under a signature of member ids and their
//! embedding timestamps, so any embedding replacement invalidates the entry.

pub mod cache;
pub mod pca;
pub mod scale;

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::config::MapSettings;
use crate::embedding::similarity::cosine_similarity;
use crate::embedding::SqliteStore;

pub use cache::{Layout, LayoutCache};
pub use scale::Canvas;

/// One subject to place on the map
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInput {
    pub subject_id: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemberInput {
    pub fn new(subject_id: &str, embedding: Option<Vec<f32>>, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            embedding,
            updated_at,
        }
    }
}

/// Hash over sorted `subject_id:timestamp` pairs
pub fn map_signature(members: &[MemberInput]) -> String {
    let mut parts: Vec<String> = members
        .iter()
        .map(|m| {
            let stamp = m
                .updated_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
                .unwrap_or_default();
            format!("{}:{}", m.subject_id, stamp)
        })
        .collect();
    parts.sort();
    hex::encode(Sha256::digest(parts.join("|").as_bytes()))
}

pub struct MapProjector {
    canvas: Canvas,
    cache: LayoutCache,
    iterations: usize,
}

impl MapProjector {
    pub fn new(canvas: Canvas, cache: LayoutCache, iterations: usize) -> Self {
        Self {
            canvas,
            cache,
            iterations,
        }
    }

    pub fn from_settings(settings: &MapSettings) -> Self {
        Self::new(
            Canvas {
                width: settings.width,
                height: settings.height,
                padding: settings.padding,
            },
            LayoutCache::new(settings.cache_capacity),
            settings.power_iterations,
        )
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn cache(&self) -> &LayoutCache {
        &self.cache
    }

    /// Positions for every member, from cache when the signature is known
    pub fn project(&self, group_id: &str, members: &[MemberInput]) -> Layout {
        let members = dedupe(members);
        let key = format!("{}:{}", group_id, map_signature(&members));
        if let Some(layout) = self.cache.get(&key) {
            debug!(group_id, "map layout cache hit");
            return layout;
        }

        let layout = self.compute_layout(&members);
        self.cache.put(key, layout.clone());
        layout
    }

    /// Positions for every member, bypassing the cache
    pub fn compute_layout(&self, members: &[MemberInput]) -> Layout {
        if members.is_empty() {
            return Layout::new();
        }

        let dim = members
            .iter()
            .filter_map(|m| m.embedding.as_ref())
            .map(Vec::len)
            .find(|len| *len > 0);

        let coords = match dim {
            Some(dim) => {
                let vectors: Vec<Vec<f64>> = members
                    .iter()
                    .map(|m| match &m.embedding {
                        Some(v) if v.len() == dim => v.iter().map(|x| *x as f64).collect(),
                        _ => vec![0.0; dim],
                    })
                    .collect();
                match pca::pca_2d(&vectors, self.iterations) {
                    Some(projected) => scale::scale_coords(&projected, &self.canvas),
                    None => scale::circle_coords(members.len(), &self.canvas),
                }
            }
            None => scale::circle_coords(members.len(), &self.canvas),
        };

        members
            .iter()
            .zip(coords)
            .map(|(m, point)| (m.subject_id.clone(), point))
            .collect()
    }
}

fn dedupe(members: &[MemberInput]) -> Vec<MemberInput> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|m| seen.insert(m.subject_id.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Ready,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapNode {
    pub subject_id: String,
    pub x: f64,
    pub y: f64,
    pub embedding_status: EmbeddingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// Nodes in member order, with similarity to the viewer when it has an embedding
pub fn annotate(layout: &Layout, members: &[MemberInput], viewer: Option<&[f32]>) -> Vec<MapNode> {
    dedupe(members)
        .into_iter()
        .filter_map(|m| {
            let (x, y) = *layout.get(&m.subject_id)?;
            let embedding = m.embedding.as_deref().filter(|v| !v.is_empty());
            let similarity = viewer.map(|v| cosine_similarity(Some(v), embedding));
            Some(MapNode {
                x,
                y,
                embedding_status: if embedding.is_some() {
                    EmbeddingStatus::Ready
                } else {
                    EmbeddingStatus::Missing
                },
                similarity,
                distance: similarity.map(|s| 1.0 - s),
                subject_id: m.subject_id,
            })
        })
        .collect()
}

/// Group members in stored order, plus the viewer when not already a member
pub fn load_members(store: &SqliteStore, group_id: &str, viewer: Option<&str>) -> Result<Vec<MemberInput>> {
    let mut ids = store.get_group_members(group_id)?;
    if let Some(viewer) = viewer {
        if !ids.iter().any(|id| id == viewer) {
            ids.push(viewer.to_string());
        }
    }

    let mut members = Vec::with_capacity(ids.len());
    for id in ids {
        let member = match store.get_active_embedding(&id)? {
            Some(record) => MemberInput::new(&id, Some(record.vector), Some(record.updated_at)),
            None => MemberInput::new(&id, None, None),
        };
        members.push(member);
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::generator::fallback_vector;
    use chrono::TimeZone;

    fn projector() -> MapProjector {
        MapProjector::new(Canvas::default(), LayoutCache::new(4), pca::DEFAULT_POWER_ITERATIONS)
    }

    fn stamp(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single()
    }

    fn members(count: usize) -> Vec<MemberInput> {
        (0..count)
            .map(|i| {
                let id = format!("u{}", i);
                MemberInput::new(&id, Some(fallback_vector(&id, 64)), stamp(i as i64))
            })
            .collect()
    }

    #[test]
    fn test_single_member_at_center() {
        let layout = projector().project("g", &members(1));
        assert_eq!(layout["u0"], (195.0, 260.0));
    }

    #[test]
    fn test_positions_stay_on_canvas() {
        let projector = projector();
        let mut input = members(12);
        input.push(MemberInput::new("no-vector", None, None));
        input.push(MemberInput::new("short", Some(vec![1.0; 3]), stamp(99)));
        let layout = projector.project("g", &input);

        assert_eq!(layout.len(), 14);
        for (id, point) in &layout {
            assert!(projector.canvas().contains(*point), "{} at {:?}", id, point);
        }
    }

    #[test]
    fn test_projection_is_idempotent_across_projectors() {
        let input = members(8);
        let first = projector().project("g", &input);
        let warm = projector();
        warm.project("g", &input);
        let cached = warm.project("g", &input);
        let cold = projector().project("g", &input);

        assert_eq!(first, cached);
        assert_eq!(first, cold);
    }

    #[test]
    fn test_signature_tracks_timestamps() {
        let input = members(3);
        let mut reordered = input.clone();
        reordered.reverse();
        assert_eq!(map_signature(&input), map_signature(&reordered));

        let mut touched = input.clone();
        touched[1].updated_at = stamp(500);
        assert_ne!(map_signature(&input), map_signature(&touched));

        let projector = projector();
        projector.project("g", &input);
        projector.project("g", &touched);
        assert_eq!(projector.cache().len(), 2);
    }

    #[test]
    fn test_missing_embeddings_use_circle() {
        let input = vec![
            MemberInput::new("a", None, None),
            MemberInput::new("b", None, None),
            MemberInput::new("c", Some(Vec::new()), None),
        ];
        let layout = projector().project("g", &input);
        let circle = scale::circle_coords(3, &Canvas::default());
        assert_eq!(layout["a"], circle[0]);
        assert_eq!(layout["c"], circle[2]);
    }

    #[test]
    fn test_identical_embeddings_use_circle() {
        let input: Vec<MemberInput> = (0..3)
            .map(|i| MemberInput::new(&format!("u{}", i), Some(vec![0.5; 8]), stamp(i)))
            .collect();
        let layout = projector().project("g", &input);
        assert_eq!(layout["u1"], scale::circle_coords(3, &Canvas::default())[1]);
    }

    #[test]
    fn test_annotate_with_viewer() {
        let input = vec![
            MemberInput::new("a", Some(vec![1.0, 0.0]), stamp(0)),
            MemberInput::new("b", Some(vec![0.0, 1.0]), stamp(1)),
            MemberInput::new("c", None, None),
        ];
        let layout = projector().project("g", &input);
        let viewer = vec![1.0, 0.0];
        let nodes = annotate(&layout, &input, Some(viewer.as_slice()));

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].embedding_status, EmbeddingStatus::Ready);
        assert!((nodes[0].similarity.unwrap() - 1.0).abs() < 1e-6);
        assert!((nodes[1].distance.unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(nodes[2].embedding_status, EmbeddingStatus::Missing);
        assert_eq!(nodes[2].similarity, Some(0.0));

        let anonymous = annotate(&layout, &input, None);
        assert!(anonymous.iter().all(|n| n.similarity.is_none()));
    }

    #[test]
    fn test_load_members_appends_viewer() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.set_group_members("g", &["a".into(), "b".into()])?;

        let loaded = load_members(&store, "g", Some("viewer"))?;
        let ids: Vec<&str> = loaded.iter().map(|m| m.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "viewer"]);
        assert!(loaded.iter().all(|m| m.embedding.is_none()));

        let loaded = load_members(&store, "g", Some("a"))?;
        assert_eq!(loaded.len(), 2);
        Ok(())
    }
}
